// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Compares a reconstructed stream against its reference.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Error};
use sha2::{Digest, Sha256};

const CHUNK_SIZE: usize = 1 << 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDigest {
    pub size: u64,

    /// Lowercase hex.
    pub sha256: String,
}

/// Hashes `r` in chunks, never holding more than one chunk in memory.
pub fn digest_reader<R: Read>(mut r: R) -> Result<FileDigest, std::io::Error> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let n = match r.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok(FileDigest {
        size,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

pub fn digest_file(path: &Path) -> Result<FileDigest, Error> {
    let f = std::fs::File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    digest_reader(f).with_context(|| format!("unable to read {}", path.display()))
}

#[derive(Clone, Debug)]
pub struct Comparison {
    pub input: FileDigest,
    pub output: FileDigest,
}

impl Comparison {
    pub fn new(input: &Path, output: &Path) -> Result<Self, Error> {
        Ok(Self {
            input: digest_file(input)?,
            output: digest_file(output)?,
        })
    }

    pub fn exact_match(&self) -> bool {
        self.input == self.output
    }

    pub fn size_delta(&self) -> i64 {
        self.output.size as i64 - self.input.size as i64
    }

    pub fn loss_pct(&self) -> f64 {
        loss_pct(self.input.size, self.output.size)
    }
}

/// The share of the reference missing from the output by size, as a
/// percentage. 0 when the output is at least as large or the input is empty.
pub fn loss_pct(input_size: u64, output_size: u64) -> f64 {
    if input_size == 0 {
        return 0.0;
    }
    (1.0 - output_size as f64 / input_size as f64).max(0.0) * 100.0
}
