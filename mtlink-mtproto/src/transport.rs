//! Abridged framing.
//!
//! Each packet is prefixed with its length in 4-byte words: one byte when
//! the count is below `0x7f`, otherwise `0x7f` followed by a 3-byte
//! little-endian count. A packet exactly one word long is not data but a
//! negative transport error code (e.g. `-404`).
//!
//! [`FrameDecoder`] is fed whatever the socket produced and yields complete
//! frames as they become available, so reads can be split anywhere.

/// Largest packet accepted by default (16 MiB).
pub const MAX_PACKET_LEN: usize = 16 * 1024 * 1024;

/// Append the abridged length header for a `len`-byte payload to `out`.
///
/// `len` must be a multiple of 4 and below 2^24 words.
pub fn encode_header(len: usize, out: &mut Vec<u8>) {
    debug_assert!(len % 4 == 0, "payload of {len} bytes is not word-aligned");
    debug_assert!(len / 4 < 1 << 24, "payload of {len} bytes does not fit a 3-byte length");
    let words = len / 4;
    if words < 0x7f {
        out.push(words as u8);
    } else {
        out.extend([0x7f, words as u8, (words >> 8) as u8, (words >> 16) as u8]);
    }
}

/// Header followed by payload, as one buffer.
pub fn encode_packet(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    encode_header(payload.len(), &mut out);
    out.extend_from_slice(payload);
    out
}

/// A complete inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// A data packet.
    Packet(Vec<u8>),
    /// A one-word frame: the server's transport-level error code.
    TransportError(i32),
}

/// The inbound stream is corrupt; the connection must be dropped.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The length header announced zero words.
    #[error("zero-length frame")]
    Empty,
    /// The length header announced more than the configured maximum.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Announced length in bytes.
        len: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Incremental abridged frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_len: usize,
    packets: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_PACKET_LEN)
    }
}

impl FrameDecoder {
    /// A decoder rejecting frames longer than `max_len` bytes.
    pub fn new(max_len: usize) -> Self {
        Self { buf: Vec::new(), max_len, packets: 0 }
    }

    /// Feed raw bytes as received.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Frames decoded so far.
    pub fn packets(&self) -> u32 {
        self.packets
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let Some(&first) = self.buf.first() else { return Ok(None) };
        let (header, words) = if first < 0x7f {
            (1, first as usize)
        } else {
            let Some(b) = self.buf.get(1..4) else { return Ok(None) };
            (4, b[0] as usize | (b[1] as usize) << 8 | (b[2] as usize) << 16)
        };

        let len = words * 4;
        if len == 0 {
            return Err(FrameError::Empty);
        }
        if len > self.max_len {
            return Err(FrameError::TooLarge { len, max: self.max_len });
        }
        if self.buf.len() < header + len {
            return Ok(None);
        }

        let payload: Vec<u8> = self.buf.drain(..header + len).skip(header).collect();
        self.packets = self.packets.wrapping_add(1);
        if len == 4 {
            let code = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
            log::debug!("[abridged] transport error frame {code}");
            return Ok(Some(Frame::TransportError(code)));
        }
        Ok(Some(Frame::Packet(payload)))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
