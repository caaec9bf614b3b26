// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ensures streaming start code collection matches whole-buffer scanning for
//! any split point, and that yielded units lie within the buffer.

#![no_main]
use libfuzzer_sys::fuzz_target;
use rtp_annexb::annexb::{self, ForbiddenBitPolicy, NalUnits, StartCodeCollector};

fuzz_target!(|data: &[u8]| {
    let Some((&split, data)) = data.split_first() else {
        return;
    };
    let whole = annexb::start_code_lengths(data);
    let split = usize::from(split).min(data.len());
    let mut c = StartCodeCollector::new();
    c.push(&data[..split]);
    c.push(&data[split..]);
    assert_eq!(c.finish(), whole);

    let mut units = NalUnits::new(data, ForbiddenBitPolicy::Skip);
    let mut n = 0;
    for u in units.by_ref() {
        let u = u.unwrap();
        assert!(!u.forbidden_zero_bit());
        assert!(u.start_code().end() < data.len());
        n += 1;
    }
    assert!(n + units.skipped() <= whole.len());
});
