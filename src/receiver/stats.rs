// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live counters shared between the receive loop and reporters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by [`super::Receiver::run`].
///
/// All updates and reads use relaxed ordering; a snapshot taken while the
/// loop runs may mix values from adjacent packets.
#[derive(Debug, Default)]
pub struct Stats {
    packets: AtomicU64,
    payload_bytes: AtomicU64,
    nal_units: AtomicU64,
    fu_a_completed: AtomicU64,
    stap_a_units: AtomicU64,
    decode_errors: AtomicU64,
    markers: AtomicU64,
    lost: AtomicU64,
    out_of_order: AtomicU64,
    duplicate: AtomicU64,
    dropped: AtomicU64,
    empty: AtomicU64,
    bytes_written: AtomicU64,
}

/// A point-in-time copy of [`Stats`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Accepted version 2 packets.
    pub packets: u64,
    pub payload_bytes: u64,
    pub nal_units: u64,
    pub fu_a_completed: u64,
    pub stap_a_units: u64,
    pub decode_errors: u64,
    pub markers: u64,
    pub lost: u64,
    pub out_of_order: u64,
    pub duplicate: u64,

    /// Datagrams rejected by the header codec or with a version other than 2.
    pub dropped: u64,

    /// Accepted packets with an empty payload.
    pub empty: u64,

    /// Bytes written to the sink, start codes included.
    pub bytes_written: u64,
}

macro_rules! counter {
    ($field:ident, $inc:ident) => {
        #[inline]
        pub(crate) fn $inc(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }
    };
}

impl Stats {
    counter!(packets, add_packets);
    counter!(payload_bytes, add_payload_bytes);
    counter!(nal_units, add_nal_units);
    counter!(fu_a_completed, add_fu_a_completed);
    counter!(stap_a_units, add_stap_a_units);
    counter!(decode_errors, add_decode_errors);
    counter!(markers, add_markers);
    counter!(lost, add_lost);
    counter!(out_of_order, add_out_of_order);
    counter!(duplicate, add_duplicate);
    counter!(dropped, add_dropped);
    counter!(empty, add_empty);
    counter!(bytes_written, add_bytes_written);

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
            nal_units: self.nal_units.load(Ordering::Relaxed),
            fu_a_completed: self.fu_a_completed.load(Ordering::Relaxed),
            stap_a_units: self.stap_a_units.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            markers: self.markers.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Lost packets as a fraction of expected packets (received plus lost).
    pub fn loss_ratio(&self) -> f64 {
        let expected = self.packets + self.lost;
        if expected == 0 {
            return 0.0;
        }
        self.lost as f64 / expected as f64
    }
}
