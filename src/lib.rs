// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconstructs H.264 Annex B elementary streams from RTP.
//!
//! The pieces, leaves first:
//!
//! *   [`annexb`] finds start codes and NAL units in a byte stream, and records
//!     the start code lengths of a reference file.
//! *   [`rtp`] validates RTP headers as described in
//!     [RFC 3550 section 5.1](https://datatracker.ietf.org/doc/html/rfc3550#section-5.1).
//! *   [`codec`] holds the start code policy and the
//!     [RFC 6184](https://tools.ietf.org/html/rfc6184) depacketizer and packetizer.
//! *   [`receiver`] drives all of the above from a UDP socket, tracking
//!     sequence number anomalies and exposing live counters.

#![forbid(clippy::print_stderr, clippy::print_stdout)]

mod error;

pub use error::Error;

/// Wraps the supplied `ErrorInt` and returns it as an `Err`.
macro_rules! bail {
    ($e:expr) => {
        return Err(crate::error::Error(std::sync::Arc::new($e)))
    };
}

macro_rules! wrap {
    ($e:expr) => {
        crate::error::Error(std::sync::Arc::new($e))
    };
}

pub mod annexb;
pub mod codec;
mod hex;
pub mod receiver;
pub mod rtp;

#[cfg(test)]
mod testutil;

use error::ErrorInt;

/// The largest datagram the receiver will accept, in bytes.
pub const MAX_DATAGRAM_LEN: usize = 65_536;
