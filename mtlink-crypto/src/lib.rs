//! Transport-level cryptography for mtlink.
//!
//! Provides:
//! - Obfuscation nonce generation avoiding reserved prefixes
//! - Send/receive AES-256-CTR key derivation from that nonce
//! - A stateful CTR cipher pair for a single connection
//! - `sha256!` hash macro and OS randomness helpers

#![deny(unsafe_code)]

pub mod obfuscation;
mod sha;

pub use obfuscation::{HandshakeError, ObfuscationCipher, ObfuscationKeys, Obfuscator};

/// The operating system refused to hand out random bytes.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("system randomness unavailable: {0}")]
pub struct RandomError(String);

/// Fill `buf` from the OS random source.
pub fn fill_random(buf: &mut [u8]) -> Result<(), RandomError> {
    getrandom::getrandom(buf).map_err(|e| RandomError(e.to_string()))
}

/// A random array of `N` bytes.
pub fn random_array<const N: usize>() -> Result<[u8; N], RandomError> {
    let mut out = [0u8; N];
    fill_random(&mut out)?;
    Ok(out)
}
