//! Wire codec for the mtlink transport layer.
//!
//! Everything on the wire is a stream of little-endian 32-bit words.
//! This crate turns Rust values into that stream and back:
//!
//! | Module          | Contents                                                  |
//! |-----------------|-----------------------------------------------------------|
//! | [`serialize`]   | [`Serializable`] and impls for the primitive types        |
//! | [`deserialize`] | [`Deserializable`], the [`Cursor`] reader, decode errors  |
//! | [`schema`]      | Service constructors the transport layer speaks itself    |
//!
//! Application-level schemas are out of scope; callers hand the transport
//! already-serialized request bodies and get raw reply bytes back.
//!
//! ```rust
//! use mtlink_wire::{Deserializable, Serializable};
//!
//! let bytes = "hello".to_string().to_bytes();
//! assert_eq!(bytes.len() % 4, 0);
//! assert_eq!(String::from_bytes(&bytes).unwrap(), "hello");
//! ```

#![deny(unsafe_code)]

pub mod deserialize;
pub mod schema;
pub mod serialize;

pub use deserialize::{Cursor, Deserializable};
pub use serialize::Serializable;

/// Constructor id of the boxed `Vector` type.
pub const VECTOR_ID: u32 = 0x1cb5c415;

/// Bare vector: a count followed by items, without the [`VECTOR_ID`] header.
#[derive(Clone, Debug, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

/// Opaque bytes passed through verbatim.
///
/// Serializes as the raw bytes with no length prefix, which is how a wrapped
/// query is embedded in `invokeWithLayer` and friends. Deserializing consumes
/// everything left in the buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(v: Vec<u8>) -> Self { Self(v) }
}

impl From<&[u8]> for Blob {
    fn from(v: &[u8]) -> Self { Self(v.to_vec()) }
}

// ─── Core traits ──────────────────────────────────────────────────────────────

/// Types with a fixed 32-bit constructor id.
pub trait Identifiable {
    /// The constructor id written in front of the boxed value.
    const CONSTRUCTOR_ID: u32;
}

/// A function that can be sent as an RPC call.
pub trait RemoteCall: Serializable {
    /// What the server answers with.
    type Return: Deserializable;
}

/// Peek the constructor id at the front of `body` without consuming it.
pub fn peek_constructor(body: &[u8]) -> Option<u32> {
    let head: [u8; 4] = body.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(head))
}
