// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rtp_annexb::rtp::RawPacket;

fuzz_target!(|data: &[u8]| {
    if let Ok((pkt, payload_range)) = RawPacket::new(Bytes::copy_from_slice(data)) {
        assert!(payload_range.start >= 12 + 4 * usize::from(pkt.csrc_count()));
        assert!(payload_range.start <= payload_range.end);
        assert!(payload_range.end <= data.len());
        if !pkt.has_padding() {
            assert_eq!(payload_range.end, data.len());
        }
    }
});
