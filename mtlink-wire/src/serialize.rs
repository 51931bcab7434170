//! The [`Serializable`] trait and impls for the primitive wire types.
//!
//! Fixed-width values are little-endian. Byte strings carry a 1- or 4-byte
//! length header and are zero-padded to a word boundary.

use crate::{Blob, RawVec, VECTOR_ID};

/// Write `self` in wire format.
pub trait Serializable {
    /// Append the encoded form of `self` to `buf`.
    fn serialize(&self, buf: &mut impl Extend<u8>);

    /// Encode into a freshly allocated buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize(&mut out);
        out
    }
}

// ─── bool ────────────────────────────────────────────────────────────────────

/// `boolTrue#997275b5` / `boolFalse#bc799737`
impl Serializable for bool {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        if *self { 0x997275b5u32 } else { 0xbc799737u32 }.serialize(buf);
    }
}

// ─── fixed width ─────────────────────────────────────────────────────────────

macro_rules! le_impl {
    ($($t:ty),+) => {$(
        impl Serializable for $t {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                buf.extend(self.to_le_bytes());
            }
        }
    )+};
}

le_impl!(i32, u32, i64, u64, f64);

/// `int128` and `int256` are written as-is.
impl<const N: usize> Serializable for [u8; N] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.iter().copied());
    }
}

// ─── byte strings ────────────────────────────────────────────────────────────

/// Number of zero bytes needed after a byte string of `len` bytes whose
/// header took `header` bytes.
pub(crate) fn string_padding(header: usize, len: usize) -> usize {
    (4 - (header + len) % 4) % 4
}

/// `len ≤ 253`: one length byte. Otherwise `0xfe` and a 3-byte LE length.
impl Serializable for &[u8] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let len = self.len();
        let header = if len <= 253 {
            buf.extend([len as u8]);
            1
        } else {
            buf.extend([0xfe, len as u8, (len >> 8) as u8, (len >> 16) as u8]);
            4
        };
        buf.extend(self.iter().copied());
        buf.extend(std::iter::repeat_n(0u8, string_padding(header, len)));
    }
}

impl Serializable for Vec<u8> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_slice().serialize(buf);
    }
}

impl Serializable for String {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_bytes().serialize(buf);
    }
}

impl Serializable for &str {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_bytes().serialize(buf);
    }
}

impl Serializable for Blob {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.0.iter().copied());
    }
}

// ─── vectors ─────────────────────────────────────────────────────────────────

/// Boxed `Vector<T>`.
impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        VECTOR_ID.serialize(buf);
        (self.len() as i32).serialize(buf);
        self.iter().for_each(|item| item.serialize(buf));
    }
}

/// Bare `vector<T>`.
impl<T: Serializable> Serializable for RawVec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        (self.0.len() as i32).serialize(buf);
        self.0.iter().for_each(|item| item.serialize(buf));
    }
}

/// Flag-guarded fields: absence is encoded in the flags word, so `None`
/// writes nothing.
impl<T: Serializable> Serializable for Option<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        if let Some(v) = self {
            v.serialize(buf);
        }
    }
}
