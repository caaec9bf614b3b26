// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tests a roundtrip through the H.264 packetizer and depacketizer with an
//! arbitrary maximum payload size and Annex B stream. Ensures the following:
//! *   there are no crashes.
//! *   when the stream scans cleanly, replaying its start code lengths
//!     reproduces the stream's NAL units byte for byte.

#![no_main]
use libfuzzer_sys::fuzz_target;
use rtp_annexb::annexb;
use rtp_annexb::codec::{h264::Depacketizer, h264::Packetizer, StartCodeLen, StartCodePlan};
use rtp_annexb::rtp::ReceivedPacket;

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }
    let max_payload_size = u16::from_be_bytes([data[0], data[1]]);
    let aggregate = (data[2] & 1) != 0;
    let stream = &data[3..];
    let mut p = match Packetizer::new(max_payload_size, 96, 0, 0) {
        Ok(p) => p.aggregate(aggregate),
        Err(_) => return,
    };
    let nals: Vec<annexb::NalUnit> = match annexb::nal_units(stream).collect() {
        Ok(n) => n,
        Err(_) => return,
    };
    let starts = annexb::find_start_codes(stream);
    if nals.len() != starts.len() {
        return; // some start codes delimit empty units.
    }
    let bodies: Vec<&[u8]> = nals.iter().map(|n| n.bytes()).collect();
    if p.push_access_unit(0, &bodies).is_err() {
        return;
    }
    let mut d = Depacketizer::new(StartCodePlan::Replay {
        lengths: annexb::start_code_lengths(stream),
        fallback: StartCodeLen::Four,
    });
    let mut out = Vec::new();
    while let Some(pkt) = p.pull() {
        let pkt = ReceivedPacket::parse(pkt).unwrap();
        assert!(pkt.payload().len() <= usize::from(max_payload_size));
        d.push(pkt.into_payload_bytes());
        d.check_invariants();
        while let Some(r) = d.pull() {
            out.extend_from_slice(r.unwrap().data());
        }
    }
    assert!(d.pending_fragment_len().is_none());
    let first = match starts.first() {
        Some(s) => s.pos,
        None => return,
    };
    assert_eq!(&out[..], &stream[first..]);
});
