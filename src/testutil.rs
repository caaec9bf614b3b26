// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::Bytes;

use crate::codec::{h264::Depacketizer, DepacketizeError, NalRecord};

pub(crate) fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(true)
        .try_init();
}

/// Pushes each payload through `d`, returning everything it produced in order.
pub(crate) fn depacketize_all<'a, I>(
    d: &mut Depacketizer,
    payloads: I,
) -> Vec<Result<NalRecord, DepacketizeError>>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut out = Vec::new();
    for p in payloads {
        d.push(Bytes::copy_from_slice(p));
        d.check_invariants();
        while let Some(item) = d.pull() {
            out.push(item);
        }
    }
    out
}
