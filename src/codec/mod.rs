// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Codec-specific logic.
//!
//! Currently this consists of RTP depacketization (and the reverse) for
//! H.264, plus the policy deciding which Annex B start code precedes each
//! reconstructed NAL unit.

use bytes::Bytes;
use thiserror::Error;

pub mod h264;

const START_CODE_3: &[u8] = b"\x00\x00\x01";
const START_CODE_4: &[u8] = b"\x00\x00\x00\x01";

/// Length of an Annex B start code.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum StartCodeLen {
    /// `00 00 01`
    Three,

    /// `00 00 00 01`
    #[default]
    Four,
}

impl StartCodeLen {
    #[inline]
    pub fn len(self) -> usize {
        match self {
            StartCodeLen::Three => 3,
            StartCodeLen::Four => 4,
        }
    }

    #[inline]
    pub fn bytes(self) -> &'static [u8] {
        match self {
            StartCodeLen::Three => START_CODE_3,
            StartCodeLen::Four => START_CODE_4,
        }
    }
}

impl TryFrom<u8> for StartCodeLen {
    type Error = String;

    fn try_from(len: u8) -> Result<Self, Self::Error> {
        match len {
            3 => Ok(StartCodeLen::Three),
            4 => Ok(StartCodeLen::Four),
            _ => Err(format!("invalid start code length {len}; must be 3 or 4")),
        }
    }
}

impl std::fmt::Display for StartCodeLen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.len())
    }
}

/// How start codes are chosen for reconstructed NAL units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartCodePlan {
    /// Always emit the given length.
    Fixed(StartCodeLen),

    /// Emit `lengths` in order, one per NAL unit, then `fallback` forever after.
    ///
    /// When `lengths` was recorded from a reference stream (see
    /// [`crate::annexb::StartCodeCollector`]) and NAL units arrive one-to-one
    /// in the same order, this reproduces the reference byte for byte.
    Replay {
        lengths: Vec<StartCodeLen>,
        fallback: StartCodeLen,
    },
}

impl Default for StartCodePlan {
    fn default() -> Self {
        StartCodePlan::Fixed(StartCodeLen::Four)
    }
}

/// A cursor over a [`StartCodePlan`].
#[derive(Clone, Debug)]
pub struct StartCodePlanner {
    lengths: Vec<StartCodeLen>,
    cursor: usize,
    fallback: StartCodeLen,
}

impl StartCodePlanner {
    pub fn new(plan: StartCodePlan) -> Self {
        match plan {
            StartCodePlan::Fixed(len) => Self {
                lengths: Vec::new(),
                cursor: 0,
                fallback: len,
            },
            StartCodePlan::Replay { lengths, fallback } => Self {
                lengths,
                cursor: 0,
                fallback,
            },
        }
    }

    /// Returns the length for the next NAL unit and advances.
    pub fn next_len(&mut self) -> StartCodeLen {
        match self.lengths.get(self.cursor) {
            Some(&len) => {
                self.cursor += 1;
                len
            }
            None => self.fallback,
        }
    }

    /// Returns the start code for the next NAL unit and advances.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> &'static [u8] {
        self.next_len().bytes()
    }

    /// Number of recorded lengths handed out so far.
    pub fn replayed(&self) -> usize {
        self.cursor
    }

    /// Number of recorded lengths not yet handed out.
    pub fn remaining(&self) -> usize {
        self.lengths.len() - self.cursor
    }

    pub fn fallback(&self) -> StartCodeLen {
        self.fallback
    }
}

/// How an emitted NAL unit was carried over RTP.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NalSource {
    /// A single NAL unit packet.
    Single,

    /// One unit of a STAP-A aggregation packet.
    StapA,

    /// Reassembled from FU-A fragments.
    FuA,
}

/// A reconstructed NAL unit, preceded by its Annex B start code.
#[derive(Clone, PartialEq, Eq)]
pub struct NalRecord {
    data: Bytes,
    start_code_len: StartCodeLen,
    source: NalSource,
}

impl NalRecord {
    pub(crate) fn new(data: Bytes, start_code_len: StartCodeLen, source: NalSource) -> Self {
        debug_assert!(data.len() > start_code_len.len());
        debug_assert_eq!(&data[..start_code_len.len()], start_code_len.bytes());
        Self {
            data,
            start_code_len,
            source,
        }
    }

    /// The bytes to write to an Annex B stream: start code then NAL unit.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// The NAL unit alone, starting with its header byte.
    #[inline]
    pub fn nal(&self) -> &[u8] {
        &self.data[self.start_code_len.len()..]
    }

    #[inline]
    pub fn nal_header(&self) -> u8 {
        self.nal()[0]
    }

    #[inline]
    pub fn start_code_len(&self) -> StartCodeLen {
        self.start_code_len
    }

    #[inline]
    pub fn source(&self) -> NalSource {
        self.source
    }
}

impl std::fmt::Debug for NalRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NalRecord")
            .field("source", &self.source)
            .field("start_code_len", &self.start_code_len)
            .field("nal", &crate::hex::LimitedHex::new(self.nal(), 64))
            .finish()
    }
}

/// A problem with one RTP payload. The depacketizer skips the offending
/// unit or fragment and continues with the next packet.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DepacketizeError {
    #[error("empty RTP payload")]
    EmptyPayload,

    #[error("FU-A payload of {len} bytes lacks FU indicator and header")]
    FuTooShort { len: usize },

    #[error("FU-A continuation (FU header 0x{fu_header:02x}) with no fragment in progress")]
    FuContinuationWithoutStart { fu_header: u8 },

    #[error("STAP-A unit declares {declared} bytes but only {remaining} remain")]
    StapLengthOverflow { declared: u16, remaining: usize },

    #[error("unsupported NAL type {nal_type} (header 0x{header:02x})")]
    UnsupportedNalType { nal_type: u8, header: u8 },

    #[error("abandoned unfinished {len}-byte fragment of NAL header 0x{header:02x}")]
    AbandonedFragment { header: u8, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed() {
        let mut p = StartCodePlanner::new(StartCodePlan::Fixed(StartCodeLen::Three));
        for _ in 0..3 {
            assert_eq!(p.next(), b"\x00\x00\x01");
        }
        assert_eq!(p.replayed(), 0);
        assert_eq!(p.remaining(), 0);
    }

    #[test]
    fn replay_then_fallback() {
        let mut p = StartCodePlanner::new(StartCodePlan::Replay {
            lengths: vec![StartCodeLen::Four, StartCodeLen::Three],
            fallback: StartCodeLen::Three,
        });
        assert_eq!(p.remaining(), 2);
        assert_eq!(p.next(), b"\x00\x00\x00\x01");
        assert_eq!(p.next(), b"\x00\x00\x01");
        assert_eq!(p.remaining(), 0);
        assert_eq!(p.next(), b"\x00\x00\x01");
        assert_eq!(p.next(), b"\x00\x00\x01");
        assert_eq!(p.replayed(), 2);
    }

    #[test]
    fn len_parse() {
        assert_eq!(StartCodeLen::try_from(3).unwrap(), StartCodeLen::Three);
        assert_eq!(StartCodeLen::try_from(4).unwrap(), StartCodeLen::Four);
        assert!(StartCodeLen::try_from(5).is_err());
        assert_eq!(StartCodeLen::Four.to_string(), "4");
    }
}
