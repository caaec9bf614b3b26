// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handles RTP data as described in
//! [RFC 3550 section 5.1](https://datatracker.ietf.org/doc/html/rfc3550#section-5.1).

use std::ops::Range;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// The minimum length of an RTP header (no CSRCs or extensions).
const MIN_HEADER_LEN: usize = 12;

/// Raw packet without state-specific interpretation or metadata.
///
/// This primarily validates a raw buffer then provides accessors for it. The
/// payload range is determined once during validation rather than on each
/// access.
pub struct RawPacket(
    /// Full packet data, including headers.
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |                           timestamp                           |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |           synchronization source (SSRC) identifier            |
    /// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
    /// |            contributing source (CSRC) identifiers             |
    /// |                             ....                              |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |      defined by profile       |           length              |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |                        header extension                       |
    /// |                             ....                              |
    /// ```
    pub Bytes,
);

impl RawPacket {
    /// Validates an RTP packet, returning a wrapper and the payload range.
    ///
    /// The version field is not checked here; see [`RawPacket::version`].
    pub fn new(data: Bytes) -> Result<(Self, Range<usize>), RawPacketError> {
        let len = data.len();
        if len < MIN_HEADER_LEN {
            return Err(RawPacketError {
                kind: RawPacketErrorKind::HeaderTooShort,
                reason: "shorter than fixed header",
                data,
            });
        }
        let has_padding = (data[0] & 0b0010_0000) != 0;
        let has_extension = (data[0] & 0b0001_0000) != 0;
        let csrc_count = usize::from(data[0] & 0b0000_1111);
        let csrc_end = MIN_HEADER_LEN + 4 * csrc_count;
        if len < csrc_end {
            return Err(RawPacketError {
                kind: RawPacketErrorKind::HeaderTooShort,
                reason: "CSRC list is after end of packet",
                data,
            });
        }
        let payload_start = if has_extension {
            if len < csrc_end + 4 {
                return Err(RawPacketError {
                    kind: RawPacketErrorKind::HeaderTooShort,
                    reason: "extension header is after end of packet",
                    data,
                });
            }
            // The length field counts 32-bit words, excluding the 4-byte
            // extension header itself.
            let extension_words =
                usize::from(u16::from_be_bytes([data[csrc_end + 2], data[csrc_end + 3]]));
            let extension_end = csrc_end + 4 + 4 * extension_words;
            if len < extension_end {
                return Err(RawPacketError {
                    kind: RawPacketErrorKind::InvalidExtensionLength,
                    reason: "extension extends beyond end of packet",
                    data,
                });
            }
            extension_end
        } else {
            csrc_end
        };
        let payload_end = if has_padding {
            let padding_len = usize::from(data[len - 1]);
            if padding_len == 0 {
                return Err(RawPacketError {
                    kind: RawPacketErrorKind::InvalidPadding,
                    reason: "invalid padding length 0",
                    data,
                });
            }
            if padding_len > len - payload_start {
                return Err(RawPacketError {
                    kind: RawPacketErrorKind::InvalidPadding,
                    reason: "padding larger than payload",
                    data,
                });
            }
            len - padding_len
        } else {
            len
        };
        Ok((Self(data), payload_start..payload_end))
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.0[0] >> 6
    }

    #[inline]
    pub fn has_padding(&self) -> bool {
        (self.0[0] & 0b0010_0000) != 0
    }

    #[inline]
    pub fn has_extension(&self) -> bool {
        (self.0[0] & 0b0001_0000) != 0
    }

    #[inline]
    pub fn csrc_count(&self) -> u8 {
        self.0[0] & 0b0000_1111
    }

    #[inline]
    pub fn mark(&self) -> bool {
        (self.0[1] & 0b1000_0000) != 0
    }

    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.0[1] & 0b0111_1111
    }

    #[inline]
    pub fn sequence_number(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    #[inline]
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.0[8], self.0[9], self.0[10], self.0[11]])
    }
}

/// The reason a datagram could not be decoded as an RTP packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RawPacketErrorKind {
    /// The fixed header, CSRC list, or extension header is truncated.
    HeaderTooShort,

    /// The extension's declared length runs past the end of the datagram.
    InvalidExtensionLength,

    /// The padding count is zero or larger than the payload.
    InvalidPadding,
}

#[derive(Error)]
#[error("{kind:?}: {reason}")]
pub struct RawPacketError {
    pub kind: RawPacketErrorKind,
    pub reason: &'static str,
    pub data: Bytes,
}

impl std::fmt::Debug for RawPacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawPacketError")
            .field("kind", &self.kind)
            .field("reason", &self.reason)
            .field("data", &crate::hex::LimitedHex::new(&self.data, 64))
            .finish()
    }
}

/// Builds version 2 packets. Used by the packetizer and tests.
#[derive(Clone, Debug, Default)]
pub struct RawPacketBuilder {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload_type: u8,
    pub ssrc: u32,
    pub mark: bool,
    pub csrcs: Vec<u32>,

    /// Header extension body as 32-bit words, with the profile-defined id.
    pub extension: Option<(u16, Vec<u32>)>,

    /// Number of padding bytes to append, including the trailing count byte.
    pub padding: u8,
}

impl RawPacketBuilder {
    pub fn build<P: IntoIterator<Item = u8>>(
        self,
        payload: P,
    ) -> Result<(RawPacket, Range<usize>), &'static str> {
        if self.payload_type >= 0x80 {
            return Err("payload type too large");
        }
        let csrc_count = u8::try_from(self.csrcs.len())
            .ok()
            .filter(|&c| c <= 0b1111)
            .ok_or("too many CSRCs")?;
        let mut data = BytesMut::new();
        data.extend_from_slice(&[
            2 << 6
                | if self.padding > 0 { 0b0010_0000 } else { 0 }
                | if self.extension.is_some() {
                    0b0001_0000
                } else {
                    0
                }
                | csrc_count,
            if self.mark { 0b1000_0000 } else { 0 } | self.payload_type,
        ]);
        data.extend_from_slice(&self.sequence_number.to_be_bytes());
        data.extend_from_slice(&self.timestamp.to_be_bytes());
        data.extend_from_slice(&self.ssrc.to_be_bytes());
        for csrc in &self.csrcs {
            data.extend_from_slice(&csrc.to_be_bytes());
        }
        if let Some((profile, words)) = &self.extension {
            let len = u16::try_from(words.len()).map_err(|_| "extension too long")?;
            data.extend_from_slice(&profile.to_be_bytes());
            data.extend_from_slice(&len.to_be_bytes());
            for w in words {
                data.extend_from_slice(&w.to_be_bytes());
            }
        }
        let payload_start = data.len();
        data.extend(payload);
        let payload_end = data.len();
        if self.padding > 0 {
            data.resize(data.len() + usize::from(self.padding) - 1, 0);
            data.extend_from_slice(&[self.padding]);
        }
        if data.len() > crate::MAX_DATAGRAM_LEN {
            return Err("payload too long");
        }
        Ok((RawPacket(data.freeze()), payload_start..payload_end))
    }
}

/// A decoded RTP packet along with its payload range.
pub struct ReceivedPacket {
    raw: RawPacket,
    payload_range: Range<usize>,
}

impl std::fmt::Debug for ReceivedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivedPacket")
            .field("ssrc", &format_args!("{:08x}", self.raw.ssrc()))
            .field("sequence_number", &self.raw.sequence_number())
            .field("timestamp", &self.raw.timestamp())
            .field("payload_type", &self.raw.payload_type())
            .field("mark", &self.raw.mark())
            .field("payload", &crate::hex::LimitedHex::new(self.payload(), 64))
            .finish()
    }
}

impl ReceivedPacket {
    /// Decodes a datagram; see [`RawPacket::new`].
    pub fn parse(data: Bytes) -> Result<Self, RawPacketError> {
        RawPacket::new(data).map(Self::from)
    }

    #[inline]
    pub fn header(&self) -> &RawPacket {
        &self.raw
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.raw.version()
    }

    #[inline]
    pub fn mark(&self) -> bool {
        self.raw.mark()
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.raw.ssrc()
    }

    #[inline]
    pub fn sequence_number(&self) -> u16 {
        self.raw.sequence_number()
    }

    #[inline]
    pub fn timestamp(&self) -> u32 {
        self.raw.timestamp()
    }

    /// Returns the raw bytes, including the RTP headers.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw.0[..]
    }

    /// Returns the offset of the payload within [`ReceivedPacket::raw`].
    #[inline]
    pub fn payload_offset(&self) -> usize {
        self.payload_range.start
    }

    /// Returns only the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.raw.0[self.payload_range.clone()]
    }

    /// Consumes the `ReceivedPacket` and returns the payload as a [`Bytes`]
    /// without copying.
    #[inline]
    pub fn into_payload_bytes(self) -> Bytes {
        let mut data = self.raw.0;
        data.truncate(self.payload_range.end);
        data.advance(self.payload_range.start);
        data
    }
}

impl From<(RawPacket, Range<usize>)> for ReceivedPacket {
    fn from((raw, payload_range): (RawPacket, Range<usize>)) -> Self {
        Self { raw, payload_range }
    }
}
