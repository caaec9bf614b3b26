// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTP sequence number anomaly tracking.

/// Classification of one sequence number relative to the previous one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeqClass {
    /// The first packet, or exactly one ahead of the previous packet.
    InOrder,

    /// Ahead of the previous packet by more than one; the gap is the number
    /// of packets presumed lost.
    Lost(u16),

    /// Same as the previous packet.
    Duplicate,

    /// Behind the previous packet (at least 32768 ahead, modulo 2^16).
    OutOfOrder,
}

/// When [`SequenceTracker`] moves its notion of the previous sequence number.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LastSeqUpdate {
    /// After every packet, including duplicates and out-of-order ones.
    ///
    /// A single late packet thus makes the next in-order packet look far
    /// ahead, so one reordering may be counted as both out-of-order and loss.
    #[default]
    Always,

    /// Only after in-order or lost classifications.
    OnAdvance,
}

/// Counts loss, duplication, and reordering of a single RTP stream.
#[derive(Clone, Debug, Default)]
pub struct SequenceTracker {
    last_seq: Option<u16>,
    update: LastSeqUpdate,
    lost: u64,
    duplicate: u64,
    out_of_order: u64,
}

impl SequenceTracker {
    pub fn new(update: LastSeqUpdate) -> Self {
        Self {
            update,
            ..Default::default()
        }
    }

    pub fn observe(&mut self, seq: u16) -> SeqClass {
        let Some(last) = self.last_seq else {
            self.last_seq = Some(seq);
            return SeqClass::InOrder;
        };
        let delta = seq.wrapping_sub(last);
        let class = match delta {
            0 => SeqClass::Duplicate,
            1 => SeqClass::InOrder,
            d if d < 0x8000 => SeqClass::Lost(d - 1),
            _ => SeqClass::OutOfOrder,
        };
        match class {
            SeqClass::Duplicate => self.duplicate += 1,
            SeqClass::Lost(n) => self.lost += u64::from(n),
            SeqClass::OutOfOrder => self.out_of_order += 1,
            SeqClass::InOrder => {}
        }
        if self.update == LastSeqUpdate::Always
            || matches!(class, SeqClass::InOrder | SeqClass::Lost(_))
        {
            self.last_seq = Some(seq);
        }
        class
    }

    pub fn last_seq(&self) -> Option<u16> {
        self.last_seq
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn duplicate(&self) -> u64 {
        self.duplicate
    }

    pub fn out_of_order(&self) -> u64 {
        self.out_of_order
    }
}
