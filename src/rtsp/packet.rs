//! Media packet construction
//!
//! Each conditioned audio block becomes one interleaved frame on the
//! session's byte stream: a `$` marker, the channel identifier, a 16-bit
//! big-endian length, then a 12-byte RTP header and the big-endian PCM
//! payload. All multi-byte fields go through typed big-endian writers.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{FRAME_MARKER, PCM_PAYLOAD_TYPE, RTP_HEADER_LEN};

/// RTP version 2, no padding/extension/CSRC
const RTP_VERSION_BYTE: u8 = 0x80;

/// Interleaved channel carrying media (0; RTCP would be 1)
const MEDIA_CHANNEL: u8 = 0;

/// Builds the framing + header + payload for each audio block.
///
/// Sequence and timestamp state live only within a playing session and are
/// reset on each new `PLAY`.
pub struct StreamPacketizer {
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
}

impl StreamPacketizer {
    /// `ssrc` is the 32-bit session-source identifier, chosen randomly at
    /// boot.
    pub fn new(ssrc: u32) -> Self {
        Self {
            sequence: 0,
            timestamp: 0,
            ssrc,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Reset per-session counters (on `PLAY`).
    pub fn reset(&mut self) {
        self.sequence = 0;
        self.timestamp = 0;
    }

    /// Build one interleaved frame for a block of conditioned samples.
    /// Advances sequence by one and the timestamp by the sample count.
    pub fn packetize(&mut self, samples: &[i16]) -> Bytes {
        let payload_len = RTP_HEADER_LEN + samples.len() * 2;
        let mut buf = BytesMut::with_capacity(4 + payload_len);

        // Interleaved framing
        buf.put_u8(FRAME_MARKER);
        buf.put_u8(MEDIA_CHANNEL);
        buf.put_u16(payload_len as u16);

        // RTP header
        buf.put_u8(RTP_VERSION_BYTE);
        buf.put_u8(PCM_PAYLOAD_TYPE);
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        // Big-endian 16-bit PCM payload
        for &sample in samples {
            buf.put_i16(sample);
        }

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(samples.len() as u32);

        buf.freeze()
    }
}

/// Parsed view of one interleaved frame, for tests and diagnostics.
#[derive(Debug, PartialEq)]
pub struct ParsedFrame {
    pub channel: u8,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub samples: Vec<i16>,
}

impl ParsedFrame {
    /// Decode a frame produced by [`StreamPacketizer::packetize`].
    pub fn decode(frame: &[u8]) -> Option<Self> {
        let mut buf = frame;
        if buf.remaining() < 4 + RTP_HEADER_LEN || buf.get_u8() != FRAME_MARKER {
            return None;
        }
        let channel = buf.get_u8();
        let len = buf.get_u16() as usize;
        if buf.remaining() != len || len < RTP_HEADER_LEN {
            return None;
        }
        if buf.get_u8() != RTP_VERSION_BYTE {
            return None;
        }
        let payload_type = buf.get_u8();
        let sequence = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();
        let mut samples = Vec::with_capacity(buf.remaining() / 2);
        while buf.remaining() >= 2 {
            samples.push(buf.get_i16());
        }
        Some(Self {
            channel,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            samples,
        })
    }
}
