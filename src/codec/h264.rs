// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [H.264](https://www.itu.int/rec/T-REC-H.264-201906-I/en)-encoded video
//! carried as described in [RFC 6184](https://tools.ietf.org/html/rfc6184).

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::rtp::RawPacketBuilder;

use super::{DepacketizeError, NalRecord, NalSource, StartCodeLen, StartCodePlan, StartCodePlanner};

const STAP_A: u8 = 24;
const FU_A: u8 = 28;

/// Produces Annex B NAL units from RTP payloads in non-interleaved mode.
///
/// Single NAL unit packets, STAP-A, and FU-A are understood. Each RTP payload
/// is handed to [`Depacketizer::push`]; the resulting NAL units (each preceded
/// by a start code chosen by the [`StartCodePlanner`]) and per-unit errors are
/// then drained in order with [`Depacketizer::pull`]. Errors never poison the
/// depacketizer; it simply moves on to the next unit or packet.
///
/// This doesn't look at RTP sequence numbers, timestamps, or the marker bit,
/// and doesn't inspect the contents of the NAL units beyond their headers.
#[derive(Debug)]
pub struct Depacketizer {
    planner: StartCodePlanner,

    /// The FU-A in progress, if any.
    fragment: Option<Fragment>,

    /// Results ready for pull, in order.
    pending: VecDeque<Result<NalRecord, DepacketizeError>>,

    seen_inconsistent_fu_nal_hdr: bool,
}

#[derive(Debug)]
struct Fragment {
    /// The reconstructed NAL header.
    hdr: u8,

    start_code_len: StartCodeLen,

    /// Start code, header byte, then all fragment bodies seen so far.
    buf: BytesMut,
}

impl Depacketizer {
    pub fn new(plan: StartCodePlan) -> Self {
        Self::with_planner(StartCodePlanner::new(plan))
    }

    pub fn with_planner(planner: StartCodePlanner) -> Self {
        Depacketizer {
            planner,
            fragment: None,
            pending: VecDeque::new(),
            seen_inconsistent_fu_nal_hdr: false,
        }
    }

    pub fn planner(&self) -> &StartCodePlanner {
        &self.planner
    }

    /// Returns the size in bytes of the NAL unit currently being reassembled
    /// from FU-A fragments, excluding its start code.
    pub fn pending_fragment_len(&self) -> Option<usize> {
        self.fragment
            .as_ref()
            .map(|f| f.buf.len() - f.start_code_len.len())
    }

    /// Panics if internal state is inconsistent.
    pub fn check_invariants(&self) {
        if let Some(f) = &self.fragment {
            let sc = f.start_code_len.len();
            assert!(f.buf.len() > sc, "fragment lacks header: {:?}", f);
            assert_eq!(&f.buf[..sc], f.start_code_len.bytes());
            assert_eq!(f.buf[sc], f.hdr);
        }
        for r in self.pending.iter().flatten() {
            assert!(!r.nal().is_empty());
        }
    }

    /// Processes one RTP payload.
    ///
    /// Panics if results of a previous call remain unpulled.
    pub fn push(&mut self, mut data: Bytes) {
        if let Some(p) = self.pending.front() {
            panic!("push with data already pending: {p:?}");
        }
        let Some(&nal_header) = data.first() else {
            self.pending.push_back(Err(DepacketizeError::EmptyPayload));
            return;
        };
        match nal_header & 0b1_1111 {
            0..=23 => {
                self.abandon_fragment();
                self.emit(&data, NalSource::Single);
            }
            STAP_A => {
                self.abandon_fragment();
                data.advance(1); // skip the STAP-A header.
                while data.remaining() >= 2 {
                    let len = data.get_u16();
                    if usize::from(len) > data.remaining() {
                        self.pending.push_back(Err(DepacketizeError::StapLengthOverflow {
                            declared: len,
                            remaining: data.remaining(),
                        }));
                        return;
                    }
                    let unit = data.split_to(usize::from(len));
                    if !unit.is_empty() {
                        self.emit(&unit, NalSource::StapA);
                    }
                }
                if data.has_remaining() {
                    log::trace!("ignoring trailing byte of STAP-A");
                }
            }
            FU_A => self.push_fu_a(data),
            nal_type => {
                self.abandon_fragment();
                self.pending
                    .push_back(Err(DepacketizeError::UnsupportedNalType {
                        nal_type,
                        header: nal_header,
                    }));
            }
        }
    }

    fn push_fu_a(&mut self, mut data: Bytes) {
        if data.len() < 2 {
            self.pending
                .push_back(Err(DepacketizeError::FuTooShort { len: data.len() }));
            return;
        }
        let fu_indicator = data[0];
        let fu_header = data[1];
        let start = (fu_header & 0b1000_0000) != 0;
        let end = (fu_header & 0b0100_0000) != 0;
        let hdr = (fu_indicator & 0b1110_0000) | (fu_header & 0b0001_1111);
        data.advance(2);
        if start {
            self.abandon_fragment();
            let start_code_len = self.planner.next_len();
            let mut buf = BytesMut::with_capacity(start_code_len.len() + 1 + data.len());
            buf.extend_from_slice(start_code_len.bytes());
            buf.put_u8(hdr);
            buf.extend_from_slice(&data);
            self.fragment = Some(Fragment {
                hdr,
                start_code_len,
                buf,
            });
        } else {
            let Some(f) = self.fragment.as_mut() else {
                self.pending
                    .push_back(Err(DepacketizeError::FuContinuationWithoutStart { fu_header }));
                return;
            };
            if hdr != f.hdr && !self.seen_inconsistent_fu_nal_hdr {
                log::debug!(
                    "FU-A has inconsistent NAL header: 0x{:02x} then 0x{:02x}; will not log about this again",
                    f.hdr,
                    hdr,
                );
                self.seen_inconsistent_fu_nal_hdr = true;
            }
            f.buf.extend_from_slice(&data);
        }
        if end {
            if let Some(f) = self.fragment.take() {
                self.pending.push_back(Ok(NalRecord::new(
                    f.buf.freeze(),
                    f.start_code_len,
                    NalSource::FuA,
                )));
            }
        }
    }

    /// Drops any FU-A in progress, noting it as an error.
    fn abandon_fragment(&mut self) {
        if let Some(f) = self.fragment.take() {
            self.pending.push_back(Err(DepacketizeError::AbandonedFragment {
                header: f.hdr,
                len: f.buf.len() - f.start_code_len.len(),
            }));
        }
    }

    /// Queues `start_code ++ nal`. `nal` must be non-empty.
    fn emit(&mut self, nal: &[u8], source: NalSource) {
        let start_code_len = self.planner.next_len();
        let mut buf = BytesMut::with_capacity(start_code_len.len() + nal.len());
        buf.extend_from_slice(start_code_len.bytes());
        buf.extend_from_slice(nal);
        self.pending
            .push_back(Ok(NalRecord::new(buf.freeze(), start_code_len, source)));
    }

    pub fn pull(&mut self) -> Option<Result<NalRecord, DepacketizeError>> {
        self.pending.pop_front()
    }
}

/// Builds RTP packets from NAL units, the inverse of [`Depacketizer`].
///
/// A NAL unit which fits in `max_payload_size` is sent as a single NAL unit
/// packet; larger ones are split into FU-A fragments. Units whose type
/// collides with the RFC 6184 packet types (24 through 31) are always sent as
/// FU-A so they survive depacketization. Optionally, runs of small NAL units
/// within an access unit are aggregated into STAP-A packets.
#[derive(Debug)]
pub struct Packetizer {
    max_payload_size: u16,
    payload_type: u8,
    ssrc: u32,
    next_sequence_number: u16,
    aggregate: bool,

    /// Packets ready for pull, in order.
    pending: VecDeque<Bytes>,
}

impl Packetizer {
    pub fn new(
        max_payload_size: u16,
        payload_type: u8,
        ssrc: u32,
        initial_sequence_number: u16,
    ) -> Result<Self, String> {
        if max_payload_size < 3 {
            return Err(format!(
                "max_payload_size={max_payload_size} must be at least 3"
            ));
        }
        if payload_type >= 0x80 {
            return Err(format!("payload_type={payload_type} must be less than 128"));
        }
        Ok(Self {
            max_payload_size,
            payload_type,
            ssrc,
            next_sequence_number: initial_sequence_number,
            aggregate: false,
            pending: VecDeque::new(),
        })
    }

    /// Creates a packetizer with a random SSRC and initial sequence number,
    /// as RFC 3550 section 5.1 recommends.
    pub fn with_random_ids(max_payload_size: u16, payload_type: u8) -> Result<Self, String> {
        Self::new(max_payload_size, payload_type, rand::random(), rand::random())
    }

    /// Sets whether [`Packetizer::push_access_unit`] aggregates small NAL units.
    pub fn aggregate(self, aggregate: bool) -> Self {
        Self { aggregate, ..self }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn next_sequence_number(&self) -> u16 {
        self.next_sequence_number
    }

    /// Packetizes one NAL unit, setting the marker bit on its last packet iff `mark`.
    pub fn push_nal(&mut self, timestamp: u32, nal: &[u8], mark: bool) -> Result<(), String> {
        let Some(&hdr) = nal.first() else {
            return Err("empty NAL unit".into());
        };
        let max = usize::from(self.max_payload_size);
        if nal.len() <= max && (hdr & 0b1_1111) < STAP_A {
            return self.add_packet(timestamp, mark, nal.iter().copied());
        }

        let fu_indicator = (hdr & 0b1110_0000) | FU_A;
        let nal_type = hdr & 0b1_1111;
        let mut body = &nal[1..];
        let mut first = true;
        loop {
            let chunk = std::cmp::min(body.len(), max - 2);
            let last = chunk == body.len();
            let fu_header = if first { 0b1000_0000 } else { 0 }
                | if last { 0b0100_0000 } else { 0 }
                | nal_type;
            let (piece, rest) = body.split_at(chunk);
            self.add_packet(
                timestamp,
                mark && last,
                [fu_indicator, fu_header]
                    .into_iter()
                    .chain(piece.iter().copied()),
            )?;
            if last {
                return Ok(());
            }
            body = rest;
            first = false;
        }
    }

    /// Packs `nals` into one STAP-A packet.
    ///
    /// Fails if any unit is empty or the packet would exceed `max_payload_size`.
    pub fn push_stap_a(&mut self, timestamp: u32, nals: &[&[u8]], mark: bool) -> Result<(), String> {
        if nals.is_empty() {
            return Err("STAP-A must hold at least one NAL unit".into());
        }
        let mut hdr = STAP_A;
        let mut payload = Vec::with_capacity(usize::from(self.max_payload_size));
        payload.push(0);
        for nal in nals {
            let Some(&nal_hdr) = nal.first() else {
                return Err("empty NAL unit".into());
            };
            let len = u16::try_from(nal.len()).map_err(|_| "NAL unit too long for STAP-A")?;
            hdr |= nal_hdr & 0b1000_0000;
            hdr = (hdr & !0b0110_0000) | std::cmp::max(hdr & 0b0110_0000, nal_hdr & 0b0110_0000);
            payload.extend_from_slice(&len.to_be_bytes());
            payload.extend_from_slice(nal);
        }
        if payload.len() > usize::from(self.max_payload_size) {
            return Err(format!(
                "STAP-A of {} bytes exceeds max_payload_size={}",
                payload.len(),
                self.max_payload_size
            ));
        }
        payload[0] = hdr;
        self.add_packet(timestamp, mark, payload)
    }

    /// Packetizes all NAL units of an access unit, marking its final packet.
    pub fn push_access_unit(&mut self, timestamp: u32, nals: &[&[u8]]) -> Result<(), String> {
        let max = usize::from(self.max_payload_size);
        let mut i = 0;
        while i < nals.len() {
            if self.aggregate {
                // Greedily gather a run of two or more units that fit together.
                let mut size = 1;
                let mut j = i;
                while j < nals.len() {
                    let nal = nals[j];
                    if nal.is_empty() || (nal[0] & 0b1_1111) >= STAP_A || nal.len() > usize::from(u16::MAX) {
                        break;
                    }
                    if size + 2 + nal.len() > max {
                        break;
                    }
                    size += 2 + nal.len();
                    j += 1;
                }
                if j - i >= 2 {
                    self.push_stap_a(timestamp, &nals[i..j], j == nals.len())?;
                    i = j;
                    continue;
                }
            }
            self.push_nal(timestamp, nals[i], i + 1 == nals.len())?;
            i += 1;
        }
        Ok(())
    }

    fn add_packet<P: IntoIterator<Item = u8>>(
        &mut self,
        timestamp: u32,
        mark: bool,
        payload: P,
    ) -> Result<(), String> {
        let (pkt, _payload_range) = RawPacketBuilder {
            sequence_number: self.next_sequence_number,
            timestamp,
            payload_type: self.payload_type,
            ssrc: self.ssrc,
            mark,
            ..Default::default()
        }
        .build(payload)?;
        self.next_sequence_number = self.next_sequence_number.wrapping_add(1);
        self.pending.push_back(pkt.0);
        Ok(())
    }

    /// Returns the next complete RTP datagram.
    pub fn pull(&mut self) -> Option<Bytes> {
        self.pending.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::annexb::{nal_units, start_code_lengths};
    use crate::rtp::ReceivedPacket;
    use crate::testutil::{depacketize_all, init_logging};

    fn fixed4() -> Depacketizer {
        Depacketizer::new(StartCodePlan::Fixed(StartCodeLen::Four))
    }

    #[test]
    fn fu_a_reassembly() {
        init_logging();
        let mut d = fixed4();
        let out = depacketize_all(
            &mut d,
            [
                &b"\x5c\x85AB"[..], // FU-A start, ref_idc=2, type=5.
                &b"\x5c\x05C"[..],
                &b"\x5c\x45DE"[..], // end
            ],
        );
        assert_eq!(out.len(), 1);
        let r = out[0].as_ref().unwrap();
        assert_eq!(r.data(), &b"\x00\x00\x00\x01\x45ABCDE"[..]);
        assert_eq!(r.source(), NalSource::FuA);
        assert_eq!(r.nal_header(), 0x45);
        assert!(d.pending_fragment_len().is_none());
    }

    #[test]
    fn stap_a() {
        init_logging();
        let mut d = Depacketizer::new(StartCodePlan::Fixed(StartCodeLen::Three));
        let out = depacketize_all(
            &mut d,
            [&b"\x18\x00\x02\x01\x02\x00\x03\x03\x04\x05"[..]],
        );
        let data: Vec<_> = out.iter().map(|r| r.as_ref().unwrap().data().clone()).collect();
        assert_eq!(
            data,
            [
                &b"\x00\x00\x01\x01\x02"[..],
                &b"\x00\x00\x01\x03\x04\x05"[..]
            ]
        );
        assert!(out
            .iter()
            .all(|r| r.as_ref().unwrap().source() == NalSource::StapA));
    }

    #[test]
    fn stap_a_overflow_keeps_earlier_units() {
        init_logging();
        let mut d = fixed4();
        let out = depacketize_all(&mut d, [&b"\x18\x00\x02\x01\x02\x00\x09\x03\x04"[..]]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap().nal(), b"\x01\x02");
        assert_eq!(
            out[1],
            Err(DepacketizeError::StapLengthOverflow {
                declared: 9,
                remaining: 2
            })
        );
    }

    #[test]
    fn stap_a_zero_length_and_trailing_byte() {
        init_logging();
        let mut d = fixed4();
        let out = depacketize_all(&mut d, [&b"\x18\x00\x00\x00\x01\x09\x07"[..]]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().nal(), b"\x09");
    }

    #[test]
    fn single_nal() {
        let mut d = fixed4();
        let out = depacketize_all(&mut d, [&b"\x67\x64\x00\x1f"[..]]);
        let r = out[0].as_ref().unwrap();
        assert_eq!(r.data(), &b"\x00\x00\x00\x01\x67\x64\x00\x1f"[..]);
        assert_eq!(r.source(), NalSource::Single);
    }

    #[test]
    fn empty_and_short() {
        let mut d = fixed4();
        let out = depacketize_all(&mut d, [&b""[..], &b"\x7c"[..]]);
        assert_eq!(
            out,
            [
                Err(DepacketizeError::EmptyPayload),
                Err(DepacketizeError::FuTooShort { len: 1 })
            ]
        );
    }

    #[test]
    fn continuation_without_start() {
        init_logging();
        let mut d = fixed4();
        let out = depacketize_all(&mut d, [&b"\x7c\x05mid"[..], &b"\x7c\x45end"[..]]);
        assert_eq!(
            out,
            [
                Err(DepacketizeError::FuContinuationWithoutStart { fu_header: 0x05 }),
                Err(DepacketizeError::FuContinuationWithoutStart { fu_header: 0x45 }),
            ]
        );
    }

    #[test]
    fn single_abandons_fragment() {
        init_logging();
        let mut d = fixed4();
        let out = depacketize_all(&mut d, [&b"\x7c\x85abc"[..]]);
        assert!(out.is_empty());
        assert_eq!(d.pending_fragment_len(), Some(4));
        let out = depacketize_all(&mut d, [&b"\x06sei"[..]]);
        assert_eq!(
            out[0],
            Err(DepacketizeError::AbandonedFragment {
                header: 0x65,
                len: 4
            })
        );
        assert_eq!(out[1].as_ref().unwrap().nal(), b"\x06sei");
        assert!(d.pending_fragment_len().is_none());
    }

    #[test]
    fn stap_a_abandons_fragment() {
        let mut d = fixed4();
        let out = depacketize_all(&mut d, [&b"\x7c\x85abc"[..]]);
        assert!(out.is_empty());
        let out = depacketize_all(&mut d, [&b"\x78\x00\x03\x06ab\x00\x02\x09\xf0"[..]]);
        assert_eq!(out.len(), 3);
        assert_eq!(
            out[0],
            Err(DepacketizeError::AbandonedFragment {
                header: 0x65,
                len: 4
            })
        );
        assert_eq!(out[1].as_ref().unwrap().nal(), b"\x06ab");
        assert_eq!(out[2].as_ref().unwrap().nal(), b"\x09\xf0");
        assert!(d.pending_fragment_len().is_none());
    }

    #[test]
    fn new_start_abandons_fragment() {
        let mut d = fixed4();
        let out = depacketize_all(
            &mut d,
            [&b"\x7c\x85abc"[..], &b"\x7c\x85xyz"[..], &b"\x7c\x45!"[..]],
        );
        assert_eq!(out.len(), 2);
        assert!(matches!(
            out[0],
            Err(DepacketizeError::AbandonedFragment { .. })
        ));
        assert_eq!(out[1].as_ref().unwrap().nal(), b"\x65xyz!");
    }

    #[test]
    fn start_and_end_in_one() {
        let mut d = fixed4();
        let out = depacketize_all(&mut d, [&b"\x7c\xc5whole"[..]]);
        assert_eq!(out[0].as_ref().unwrap().nal(), b"\x65whole");
    }

    #[test]
    fn unsupported() {
        init_logging();
        let mut d = fixed4();
        let out = depacketize_all(
            &mut d,
            [&b"\x19\x00"[..], &b"\x7c\x85a"[..], &b"\x1dxx"[..]],
        );
        assert_eq!(
            out,
            [
                Err(DepacketizeError::UnsupportedNalType {
                    nal_type: 25,
                    header: 0x19
                }),
                Err(DepacketizeError::AbandonedFragment {
                    header: 0x65,
                    len: 2
                }),
                Err(DepacketizeError::UnsupportedNalType {
                    nal_type: 29,
                    header: 0x1d
                }),
            ]
        );
    }

    #[test]
    fn fu_a_start_code_chosen_at_start() {
        let mut d = Depacketizer::new(StartCodePlan::Replay {
            lengths: vec![StartCodeLen::Three, StartCodeLen::Four],
            fallback: StartCodeLen::Three,
        });
        let out = depacketize_all(
            &mut d,
            [&b"\x7c\x85a"[..], &b"\x7c\x45b"[..], &b"\x09\xf0"[..], &b"\x09\xf0"[..]],
        );
        let lens: Vec<_> = out
            .iter()
            .map(|r| r.as_ref().unwrap().start_code_len())
            .collect();
        assert_eq!(
            lens,
            [StartCodeLen::Three, StartCodeLen::Four, StartCodeLen::Three]
        );
        assert_eq!(d.planner().replayed(), 2);
    }

    #[test]
    #[should_panic]
    fn push_with_pending() {
        let mut d = fixed4();
        d.push(Bytes::from_static(b"\x09\xf0"));
        d.push(Bytes::from_static(b"\x09\xf0"));
    }

    #[test]
    fn packetizer_rejects_bad_args() {
        assert!(Packetizer::new(2, 96, 0, 0).is_err());
        assert!(Packetizer::new(1400, 128, 0, 0).is_err());
        let mut p = Packetizer::new(10, 96, 0, 0).unwrap();
        assert!(p.push_nal(0, b"", true).is_err());
        assert!(p.push_stap_a(0, &[&b"\x09\xf0"[..], &b"0123456789"[..]], true).is_err());
    }

    #[test]
    fn packetizer_fu_a() {
        let mut p = Packetizer::new(4, 96, 0x1234, 0xffff).unwrap();
        p.push_nal(90_000, b"\x45ABCDE", true).unwrap();
        let mut payloads = Vec::new();
        let mut seqs = Vec::new();
        let mut marks = Vec::new();
        while let Some(pkt) = p.pull() {
            let pkt = ReceivedPacket::parse(pkt).unwrap();
            seqs.push(pkt.sequence_number());
            marks.push(pkt.mark());
            assert_eq!(pkt.ssrc(), 0x1234);
            assert_eq!(pkt.timestamp(), 90_000);
            payloads.push(pkt.payload().to_vec());
        }
        assert_eq!(
            payloads,
            [
                &b"\x5c\x85AB"[..],
                &b"\x5c\x05CD"[..],
                &b"\x5c\x45E"[..]
            ]
        );
        assert_eq!(seqs, [0xffff, 0, 1]);
        assert_eq!(marks, [false, false, true]);
        assert_eq!(p.next_sequence_number(), 2);
    }

    #[test]
    fn packetizer_stap_a_header() {
        let mut p = Packetizer::new(1400, 96, 0, 0).unwrap();
        p.push_stap_a(0, &[&b"\x67\x01"[..], &b"\x28\x02"[..]], false).unwrap();
        let pkt = ReceivedPacket::parse(p.pull().unwrap()).unwrap();
        assert_eq!(pkt.payload(), b"\x78\x00\x02\x67\x01\x00\x02\x28\x02");
        assert!(!pkt.mark());
    }

    #[test]
    fn packetizer_wraps_reserved_types_in_fu_a() {
        let mut p = Packetizer::new(1400, 96, 0, 0).unwrap();
        p.push_nal(0, b"\x18xy", true).unwrap();
        let pkt = ReceivedPacket::parse(p.pull().unwrap()).unwrap();
        assert_eq!(pkt.payload(), b"\x1c\xd8xy");
        let mut d = fixed4();
        let out = depacketize_all(&mut d, [pkt.payload()]);
        assert_eq!(out[0].as_ref().unwrap().nal(), b"\x18xy");
    }

    /// Builds an Annex B stream of random NAL units with mixed start codes.
    /// NAL bodies avoid zero bytes, so there's no start code emulation.
    fn random_stream(rng: &mut rand::rngs::StdRng, nals: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for _ in 0..nals {
            if rng.gen() {
                out.extend_from_slice(b"\x00\x00\x00\x01");
            } else {
                out.extend_from_slice(b"\x00\x00\x01");
            }
            out.push(rng.gen_range(1..=0x7fu8));
            let len = match rng.gen_range(0..4) {
                0 => 0,
                1 => rng.gen_range(1..8),
                2 => rng.gen_range(8..200),
                _ => rng.gen_range(200..3000),
            };
            out.extend((0..len).map(|_| rng.gen_range(1..=255u8)));
        }
        out
    }

    #[test]
    fn round_trip() {
        init_logging();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for &(max_payload_size, aggregate) in &[
            (3, false),
            (4, true),
            (17, true),
            (200, false),
            (1400, true),
            (1400, false),
        ] {
            let stream = random_stream(&mut rng, 50);
            let lengths = start_code_lengths(&stream);
            let nals: Vec<&[u8]> = nal_units(&stream).map(|n| n.unwrap().bytes()).collect();
            assert_eq!(lengths.len(), nals.len());

            let mut p = Packetizer::new(max_payload_size, 96, 1, 65_530)
                .unwrap()
                .aggregate(aggregate);
            for au in nals.chunks(3) {
                p.push_access_unit(0, au).unwrap();
            }
            let mut d = Depacketizer::new(StartCodePlan::Replay {
                lengths,
                fallback: StartCodeLen::Four,
            });
            let mut out = Vec::with_capacity(stream.len());
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
            assert_eq!(d.planner().remaining(), 0);
            assert!(
                out == stream,
                "max_payload_size={max_payload_size} aggregate={aggregate}: {} vs {} bytes",
                out.len(),
                stream.len()
            );
        }
    }
}
