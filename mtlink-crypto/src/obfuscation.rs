//! Transport obfuscation ("obfuscated2").
//!
//! Before any framed traffic the client sends a 64-byte header made of
//! random bytes. Bytes `8..56` of it seed two AES-256-CTR streams: the
//! forward slice keys the client→server direction, the same slice reversed
//! keys server→client. Bytes `56..60` carry the framing protocol tag and are
//! only readable after decryption, so the header looks like noise on the wire.
//!
//! Keys live for one connection only. Every reconnect draws a fresh nonce.

use aes::cipher::{KeyIvInit, StreamCipher};

use crate::{RandomError, random_array};

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Length of the handshake header.
pub const NONCE_LEN: usize = 64;

/// Protocol tag announcing abridged framing.
pub const ABRIDGED_TAG: [u8; 4] = [0xef; 4];

/// First words that would make the header look like another protocol
/// (HTTP verbs, the intermediate/padded tags, a TLS record).
const RESERVED_FIRST_WORDS: [u32; 7] = [
    0x44414548, // HEAD
    0x54534f50, // POST
    0x20544547, // GET
    0x4954504f, // OPTI
    0xdddddddd,
    0xeeeeeeee,
    0x02010316,
];

/// `true` when `nonce` may not be used as a handshake header.
pub fn is_reserved(nonce: &[u8; NONCE_LEN]) -> bool {
    let first = u32::from_le_bytes([nonce[0], nonce[1], nonce[2], nonce[3]]);
    nonce[0] == 0xef || RESERVED_FIRST_WORDS.contains(&first) || nonce[4..8] == [0; 4]
}

/// Draw random headers until one is usable, then stamp `tag` at `56..60`.
pub fn generate_nonce(tag: [u8; 4]) -> Result<[u8; NONCE_LEN], RandomError> {
    loop {
        let mut nonce = random_array::<NONCE_LEN>()?;
        if is_reserved(&nonce) {
            continue;
        }
        nonce[56..60].copy_from_slice(&tag);
        return Ok(nonce);
    }
}

// ─── Keys ─────────────────────────────────────────────────────────────────────

/// Key material for both directions of one connection, client perspective.
#[derive(Clone, PartialEq, Eq)]
pub struct ObfuscationKeys {
    pub send_key: [u8; 32],
    pub send_iv: [u8; 16],
    pub recv_key: [u8; 32],
    pub recv_iv: [u8; 16],
}

impl ObfuscationKeys {
    /// Derive both key/IV pairs from a handshake header.
    ///
    /// With a proxy `secret` each key becomes `SHA-256(key || secret)`;
    /// IVs are used as-is.
    pub fn derive(nonce: &[u8; NONCE_LEN], secret: Option<&[u8; 16]>) -> Self {
        let forward = &nonce[8..56];
        let mut reversed = [0u8; 48];
        reversed.copy_from_slice(forward);
        reversed.reverse();

        let (send_key, send_iv) = split_key_iv(forward, secret);
        let (recv_key, recv_iv) = split_key_iv(&reversed, secret);
        Self { send_key, send_iv, recv_key, recv_iv }
    }

    /// The same keys as seen by the other end.
    pub fn mirrored(&self) -> Self {
        Self {
            send_key: self.recv_key,
            send_iv: self.recv_iv,
            recv_key: self.send_key,
            recv_iv: self.send_iv,
        }
    }
}

impl std::fmt::Debug for ObfuscationKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ObfuscationKeys { .. }")
    }
}

fn split_key_iv(src: &[u8], secret: Option<&[u8; 16]>) -> ([u8; 32], [u8; 16]) {
    let mut key = [0u8; 32];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&src[..32]);
    iv.copy_from_slice(&src[32..48]);
    if let Some(secret) = secret {
        key = crate::sha256!(&key, secret);
    }
    (key, iv)
}

// ─── Cipher ───────────────────────────────────────────────────────────────────

/// One direction of an obfuscated stream.
///
/// CTR mode is symmetric, and the keystream position carries over between
/// calls, so bytes must be fed in exactly the order they travel.
pub struct ObfuscationCipher {
    inner: Aes256Ctr,
}

impl ObfuscationCipher {
    pub fn new(key: &[u8; 32], iv: &[u8; 16]) -> Self {
        Self { inner: Aes256Ctr::new(&(*key).into(), &(*iv).into()) }
    }

    /// XOR `data` in place with the next `data.len()` keystream bytes.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.inner.apply_keystream(data);
    }
}

// ─── Obfuscator ───────────────────────────────────────────────────────────────

/// The server could not make sense of a handshake header.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("unexpected protocol tag {found:02x?}")]
    TagMismatch { found: [u8; 4] },
}

/// Cipher pair for a live connection.
pub struct Obfuscator {
    send: ObfuscationCipher,
    recv: ObfuscationCipher,
}

impl Obfuscator {
    /// Client side of a fresh connection.
    ///
    /// Returns the cipher pair together with the 64-byte header that must be
    /// written before anything else.
    pub fn client(
        tag: [u8; 4],
        secret: Option<&[u8; 16]>,
    ) -> Result<(Self, [u8; NONCE_LEN]), RandomError> {
        Ok(Self::from_nonce(&generate_nonce(tag)?, secret))
    }

    /// Client side with a caller-chosen nonce.
    ///
    /// The whole nonce runs through the send cipher; the plain first 56
    /// bytes and the encrypted last 8 go on the wire, and the send stream
    /// continues from offset 64.
    pub fn from_nonce(
        nonce: &[u8; NONCE_LEN],
        secret: Option<&[u8; 16]>,
    ) -> (Self, [u8; NONCE_LEN]) {
        let keys = ObfuscationKeys::derive(nonce, secret);
        let mut send = ObfuscationCipher::new(&keys.send_key, &keys.send_iv);
        let recv = ObfuscationCipher::new(&keys.recv_key, &keys.recv_iv);

        let mut encrypted = *nonce;
        send.apply(&mut encrypted);

        let mut header = *nonce;
        header[56..].copy_from_slice(&encrypted[56..]);
        (Self { send, recv }, header)
    }

    /// Server side: accept a client header and check its protocol tag.
    pub fn server(
        header: &[u8; NONCE_LEN],
        secret: Option<&[u8; 16]>,
        expected_tag: [u8; 4],
    ) -> Result<Self, HandshakeError> {
        let keys = ObfuscationKeys::derive(header, secret).mirrored();
        let mut recv = ObfuscationCipher::new(&keys.recv_key, &keys.recv_iv);
        let send = ObfuscationCipher::new(&keys.send_key, &keys.send_iv);

        let mut decrypted = *header;
        recv.apply(&mut decrypted);
        let found = [decrypted[56], decrypted[57], decrypted[58], decrypted[59]];
        if found != expected_tag {
            return Err(HandshakeError::TagMismatch { found });
        }
        Ok(Self { send, recv })
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        self.send.apply(data);
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        self.recv.apply(data);
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
