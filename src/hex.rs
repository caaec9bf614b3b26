// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `Debug` helper that hex-dumps at most a prefix of a buffer via `pretty-hex`.

use pretty_hex::{HexConfig, PrettyHex};

pub(crate) struct LimitedHex<'a> {
    inner: &'a [u8],
    max_bytes: usize,
}

impl<'a> LimitedHex<'a> {
    pub(crate) fn new(inner: &'a [u8], max_bytes: usize) -> Self {
        Self { inner, max_bytes }
    }
}

impl std::fmt::Debug for LimitedHex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = self.inner.len().min(self.max_bytes);
        let cfg = HexConfig {
            title: false,
            width: 16,
            group: 4,
            ..HexConfig::default()
        };
        write!(f, "{} bytes", self.inner.len())?;
        if shown > 0 {
            let print: &[u8] = &self.inner[..shown];
            write!(f, "\n{:?}", print.hex_conf(cfg))?;
        }
        let omitted = self.inner.len() - shown;
        if omitted > 0 {
            write!(f, "\n...{omitted} more bytes")?;
        }
        Ok(())
    }
}
