//! Message ids and the unencrypted message envelope.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::envelope::EnvelopeError;

/// A 64-bit MTProto message identifier.
///
/// The upper 32 bits hold Unix seconds, the lower 32 bits the fraction of
/// the current second. Client ids are divisible by 4.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MessageId(pub i64);

impl MessageId {
    /// An id for the current instant, not yet made unique.
    pub(crate) fn now() -> Self {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let fraction = (u64::from(since_epoch.subsec_nanos()) << 32) / 1_000_000_000;
        let id = (since_epoch.as_secs() << 32) | fraction;
        Self((id & !3) as i64)
    }
}

/// A message ready to be framed.
#[derive(Debug)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: MessageId,
    /// Sequence number: odd for content-related messages, even otherwise.
    pub seq_no: i32,
    /// The serialized body (constructor id + fields).
    pub body: Vec<u8>,
}

impl Message {
    /// Bundle an already-serialized body.
    pub fn new(id: MessageId, seq_no: i32, body: Vec<u8>) -> Self {
        Self { id, seq_no, body }
    }

    /// The unencrypted wire form:
    ///
    /// ```text
    /// auth_key_id:long  (0)
    /// message_id:long
    /// message_data_length:int
    /// message_data:bytes
    /// ```
    pub fn to_plaintext_bytes(&self) -> Vec<u8> {
        plaintext_bytes(self.id, &self.body)
    }
}

/// Wrap `body` into the unencrypted envelope under `id`.
pub fn plaintext_bytes(id: MessageId, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20 + body.len());
    buf.extend(0i64.to_le_bytes());
    buf.extend(id.0.to_le_bytes());
    buf.extend((body.len() as u32).to_le_bytes());
    buf.extend_from_slice(body);
    buf
}

/// Split an unencrypted envelope into its message id and body.
pub fn parse_plaintext(frame: &[u8]) -> Result<(MessageId, &[u8]), EnvelopeError> {
    if frame.len() < 20 {
        return Err(EnvelopeError::TooShort { len: frame.len() });
    }
    let word = |at: usize| -> [u8; 8] {
        let mut b = [0u8; 8];
        b.copy_from_slice(&frame[at..at + 8]);
        b
    };
    if i64::from_le_bytes(word(0)) != 0 {
        return Err(EnvelopeError::Encrypted);
    }
    let id = MessageId(i64::from_le_bytes(word(8)));
    let declared = u32::from_le_bytes([frame[16], frame[17], frame[18], frame[19]]) as usize;
    let body = frame.get(20..20 + declared).ok_or(EnvelopeError::Truncated {
        declared,
        available: frame.len() - 20,
    })?;
    Ok((id, body))
}
