// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Annex B byte streams: NAL units delimited by `00 00 01` or `00 00 00 01`.
//!
//! See [H.264](https://www.itu.int/rec/T-REC-H.264-201906-I/en) Annex B.
//! Scanning is deliberately simple: it doesn't look for emulation prevention
//! bytes or `trailing_zero_8bits`, so trailing zeros belong to the preceding
//! NAL unit unless they form part of a 4-byte start code. That makes the
//! scan exactly reversible when paired with the recorded start code lengths.

use std::io::Read;

use h264_reader::nal::{NalHeader, UnitType};
use thiserror::Error;

use crate::codec::StartCodeLen;

/// Chunk size used when reading reference streams.
const READ_CHUNK_LEN: usize = 1 << 20;

/// A start code found within a buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StartCode {
    /// Offset of the first byte of the start code.
    pub pos: usize,
    pub len: StartCodeLen,
}

impl StartCode {
    /// Offset of the first byte after the start code.
    #[inline]
    pub fn end(&self) -> usize {
        self.pos + self.len.len()
    }
}

/// Returns the start code beginning at `data[i]`, if any.
///
/// The caller guarantees at least 4 bytes are available at `i`.
#[inline]
fn start_code_at(data: &[u8], i: usize) -> Option<StartCodeLen> {
    match &data[i..i + 4] {
        [0, 0, 0, 1] => Some(StartCodeLen::Four),
        [0, 0, 1, _] => Some(StartCodeLen::Three),
        _ => None,
    }
}

/// Finds all start codes in `data`, left to right.
///
/// A 4-byte start code takes priority over the 3-byte start code it contains.
/// Matching requires at least 4 bytes at the candidate position, so a 3-byte
/// start code in the final 3 bytes of the buffer (which could only precede an
/// empty NAL unit) isn't reported.
pub fn find_start_codes(data: &[u8]) -> Vec<StartCode> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 3 < data.len() {
        match start_code_at(data, i) {
            Some(len) => {
                out.push(StartCode { pos: i, len });
                i += len.len();
            }
            None => i += 1,
        }
    }
    out
}

/// Returns the ordered start code lengths of `data`.
pub fn start_code_lengths(data: &[u8]) -> Vec<StartCodeLen> {
    find_start_codes(data).into_iter().map(|sc| sc.len).collect()
}

/// Returns the length of the first start code in `data`, or 4 if there is none.
pub fn detect_start_code_len(data: &[u8]) -> StartCodeLen {
    let mut i = 0;
    while i + 3 < data.len() {
        if let Some(len) = start_code_at(data, i) {
            return len;
        }
        i += 1;
    }
    StartCodeLen::Four
}

/// Reads the first chunk of `r` and calls [`detect_start_code_len`] on it.
pub fn detect_start_code_len_from_reader<R: Read>(r: R) -> Result<StartCodeLen, crate::Error> {
    let mut buf = Vec::with_capacity(READ_CHUNK_LEN);
    r.take(READ_CHUNK_LEN as u64)
        .read_to_end(&mut buf)
        .map_err(|source| wrap!(crate::ErrorInt::ReadError { pos: 0, source }))?;
    Ok(detect_start_code_len(&buf))
}

/// Incrementally collects start code lengths from a stream fed in chunks.
///
/// Produces the same sequence as [`start_code_lengths`] on the concatenation
/// of all chunks: bytes which can't yet be classified are carried into the
/// next call.
#[derive(Debug, Default)]
pub struct StartCodeCollector {
    carry: Vec<u8>,
    lengths: Vec<StartCodeLen>,
    consumed: u64,
}

impl StartCodeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);
        let data = &self.carry[..];
        let mut i = 0;
        while i + 3 < data.len() {
            match start_code_at(data, i) {
                Some(len) => {
                    self.lengths.push(len);
                    i += len.len();
                }
                None => i += 1,
            }
        }
        self.consumed += i as u64;
        self.carry.drain(..i);
    }

    /// Returns the lengths found so far.
    pub fn lengths(&self) -> &[StartCodeLen] {
        &self.lengths
    }

    pub fn finish(self) -> Vec<StartCodeLen> {
        self.lengths
    }

    /// Reads `r` to the end in 1 MiB chunks and returns all start code lengths.
    pub fn collect_from_reader<R: Read>(mut r: R) -> Result<Vec<StartCodeLen>, crate::Error> {
        let mut collector = Self::new();
        let mut buf = vec![0u8; READ_CHUNK_LEN];
        loop {
            let n = match r.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(wrap!(crate::ErrorInt::ReadError {
                        pos: collector.consumed + collector.carry.len() as u64,
                        source,
                    }))
                }
            };
            collector.push(&buf[..n]);
        }
        Ok(collector.finish())
    }
}

/// What to do with a NAL unit whose `forbidden_zero_bit` is set.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ForbiddenBitPolicy {
    /// Yield [`InvalidNal`] for the unit. Iteration may continue afterward.
    #[default]
    Fail,

    /// Drop the unit silently, counting it in [`NalUnits::skipped`].
    Skip,
}

/// A NAL unit within an Annex B buffer had its forbidden bit set.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid NAL at byte {offset}: header 0x{header:02x} has forbidden_zero_bit set")]
pub struct InvalidNal {
    /// Offset of the NAL header byte within the scanned buffer.
    pub offset: usize,
    pub header: u8,
}

/// A NAL unit borrowed from an Annex B buffer.
#[derive(Copy, Clone)]
pub struct NalUnit<'a> {
    hdr: NalHeader,
    start_code: StartCode,
    data: &'a [u8],
}

impl<'a> NalUnit<'a> {
    /// The start code which preceded this unit.
    #[inline]
    pub fn start_code(&self) -> StartCode {
        self.start_code
    }

    #[inline]
    pub fn header(&self) -> NalHeader {
        self.hdr
    }

    /// Always false for units yielded by [`NalUnits`].
    #[inline]
    pub fn forbidden_zero_bit(&self) -> bool {
        (self.data[0] & 0b1000_0000) != 0
    }

    #[inline]
    pub fn nal_ref_idc(&self) -> u8 {
        self.hdr.nal_ref_idc()
    }

    /// The raw 5-bit `nal_unit_type`.
    #[inline]
    pub fn nal_unit_type(&self) -> u8 {
        self.data[0] & 0b0001_1111
    }

    #[inline]
    pub fn unit_type(&self) -> UnitType {
        self.hdr.nal_unit_type()
    }

    /// The bytes after the header byte.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        &self.data[1..]
    }

    /// The whole unit, including its header byte but not its start code.
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }
}

impl std::fmt::Debug for NalUnit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NalUnit")
            .field("start_code", &self.start_code)
            .field("nal_ref_idc", &self.nal_ref_idc())
            .field("unit_type", &self.unit_type())
            .field("payload", &crate::hex::LimitedHex::new(self.payload(), 32))
            .finish()
    }
}

/// Iterator over the NAL units of an Annex B buffer.
///
/// Bytes before the first start code are ignored. Cloning the iterator
/// restarts from the same position.
#[derive(Clone, Debug)]
pub struct NalUnits<'a> {
    data: &'a [u8],
    start_codes: std::vec::IntoIter<StartCode>,
    next: Option<StartCode>,
    policy: ForbiddenBitPolicy,
    skipped: usize,
}

impl<'a> NalUnits<'a> {
    pub fn new(data: &'a [u8], policy: ForbiddenBitPolicy) -> Self {
        let mut start_codes = find_start_codes(data).into_iter();
        let next = start_codes.next();
        Self {
            data,
            start_codes,
            next,
            policy,
            skipped: 0,
        }
    }

    /// Number of units dropped under [`ForbiddenBitPolicy::Skip`] so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = Result<NalUnit<'a>, InvalidNal>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start_code = self.next.take()?;
            self.next = self.start_codes.next();
            let end = self.next.map(|sc| sc.pos).unwrap_or(self.data.len());
            let data = &self.data[start_code.end()..end];
            let Some(&header) = data.first() else {
                continue;
            };
            match NalHeader::new(header) {
                Ok(hdr) => {
                    return Some(Ok(NalUnit {
                        hdr,
                        start_code,
                        data,
                    }))
                }
                Err(_) if self.policy == ForbiddenBitPolicy::Skip => {
                    self.skipped += 1;
                    continue;
                }
                Err(_) => {
                    return Some(Err(InvalidNal {
                        offset: start_code.end(),
                        header,
                    }))
                }
            }
        }
    }
}

/// Returns an iterator over the NAL units of `data` which fails on set forbidden bits.
pub fn nal_units(data: &[u8]) -> NalUnits<'_> {
    NalUnits::new(data, ForbiddenBitPolicy::Fail)
}
