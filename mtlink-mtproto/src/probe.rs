//! Reachability probe.
//!
//! Sending `req_pq` in an unencrypted envelope is the cheapest thing any DC
//! answers. The reply echoes our random nonce, which proves the bytes came
//! back through the very transport we are testing rather than from a
//! middlebox.

use mtlink_crypto::{RandomError, random_array};
use mtlink_wire::schema::{ReqPq, ResPq};
use mtlink_wire::{Deserializable, Serializable};

use crate::envelope::EnvelopeError;
use crate::message::{self, MessageId};
use crate::sequencer::MessageSequencer;

/// The probe reply did not check out.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The reply was not a readable unencrypted message.
    #[error("malformed probe reply: {0}")]
    Envelope(#[from] EnvelopeError),
    /// The reply was not a `resPQ`.
    #[error("probe reply is not resPQ: {0}")]
    Decode(#[from] mtlink_wire::deserialize::Error),
    /// The reply answered somebody else's probe.
    #[error("probe nonce mismatch")]
    NonceMismatch,
    /// No randomness for the nonce.
    #[error(transparent)]
    Random(#[from] RandomError),
}

/// One probe: a nonce and the means to check the answer.
#[derive(Clone, Debug)]
pub struct FakePq {
    nonce: [u8; 16],
}

impl FakePq {
    /// A probe with a fresh random nonce.
    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self { nonce: random_array()? })
    }

    /// A probe with a known nonce.
    pub fn with_nonce(nonce: [u8; 16]) -> Self {
        Self { nonce }
    }

    /// The nonce this probe expects back.
    pub fn nonce(&self) -> &[u8; 16] {
        &self.nonce
    }

    /// The unencrypted message carrying `req_pq`.
    pub fn request(&self, seq: &mut MessageSequencer) -> Vec<u8> {
        let id: MessageId = seq.next_msg_id();
        message::plaintext_bytes(id, &ReqPq { nonce: self.nonce }.to_bytes())
    }

    /// Check a reply packet, returning the decoded `resPQ` when it matches.
    pub fn verify(&self, packet: &[u8]) -> Result<ResPq, ProbeError> {
        let (_, body) = message::parse_plaintext(packet)?;
        let res = ResPq::from_bytes(body)?;
        if res.nonce != self.nonce {
            log::debug!("[probe] nonce mismatch in resPQ");
            return Err(ProbeError::NonceMismatch);
        }
        Ok(res)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
