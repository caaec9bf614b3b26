// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Feeds arbitrary payloads to the H.264 depacketizer. Each payload is
//! prefixed by a length byte. Ensures there are no crashes, that every
//! emitted record begins with the start code it claims, and that replayed
//! start codes are consumed one per record.

#![no_main]
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rtp_annexb::codec::{h264::Depacketizer, DepacketizeError, StartCodeLen, StartCodePlan};

fuzz_target!(|data: &[u8]| {
    let mut data = data;
    let lengths: Vec<StartCodeLen> = (0..16)
        .map(|i| if i % 3 == 0 { StartCodeLen::Three } else { StartCodeLen::Four })
        .collect();
    let mut depacketizer = Depacketizer::new(StartCodePlan::Replay {
        lengths,
        fallback: StartCodeLen::Four,
    });
    // Records emitted plus fragments started; each takes one start code.
    let mut consumed = 0;
    loop {
        let Some((&len, rest)) = data.split_first() else {
            break;
        };
        let len = usize::from(len);
        if rest.len() < len {
            break;
        }
        let (payload, rest) = rest.split_at(len);
        data = rest;
        depacketizer.push(Bytes::copy_from_slice(payload));
        depacketizer.check_invariants();
        while let Some(item) = depacketizer.pull() {
            match item {
                Ok(r) => {
                    let sc = r.start_code_len();
                    assert_eq!(&r.data()[..sc.len()], sc.bytes());
                    assert!(!r.nal().is_empty());
                    consumed += 1;
                }
                Err(DepacketizeError::AbandonedFragment { .. }) => consumed += 1,
                Err(_) => {}
            }
        }
        depacketizer.check_invariants();
    }
    consumed += usize::from(depacketizer.pending_fragment_len().is_some());
    assert_eq!(depacketizer.planner().replayed(), consumed.min(16));
});
