//! The [`Deserializable`] trait, the [`Cursor`] reader and primitive impls.

use crate::serialize::string_padding;
use crate::{Blob, RawVec, VECTOR_ID};

// ─── Error ───────────────────────────────────────────────────────────────────

/// Ways decoding can fail.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    /// Ran out of bytes before the value was complete.
    #[error("unexpected end of buffer")]
    UnexpectedEof,
    /// Found a constructor id that does not belong to the expected type.
    #[error("unexpected constructor id: {id:#010x}")]
    UnexpectedConstructor { id: u32 },
    /// A string field held bytes that are not UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    /// A length prefix was negative or impossibly large.
    #[error("invalid length prefix: {0}")]
    InvalidLength(i64),
}

/// Decoding result.
pub type Result<T> = std::result::Result<T, Error>;

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// Forward-only reader over a borrowed byte slice.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize { self.pos }

    pub fn remaining(&self) -> usize { self.buf.len() - self.pos }

    pub fn read_byte(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or(Error::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(Error::UnexpectedEof)?;
        let out = self.buf.get(self.pos..end).ok_or(Error::UnexpectedEof)?;
        self.pos = end;
        Ok(out)
    }

    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        out.copy_from_slice(self.take(out.len())?);
        Ok(())
    }

    /// Borrow everything that is left.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}

/// Shorthand for the argument every impl receives.
pub type Buffer<'a, 'b> = &'a mut Cursor<'b>;

// ─── Deserializable ──────────────────────────────────────────────────────────

/// Read a value in wire format.
pub trait Deserializable: Sized {
    /// Decode `Self` from `buf`, advancing it.
    fn deserialize(buf: Buffer) -> Result<Self>;

    /// Decode from the start of `bytes`; trailing bytes are ignored.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::deserialize(&mut Cursor::from_slice(bytes))
    }
}

/// Consume a constructor id and check it.
pub fn expect_constructor(buf: Buffer, expected: u32) -> Result<()> {
    match u32::deserialize(buf)? {
        id if id == expected => Ok(()),
        id => Err(Error::UnexpectedConstructor { id }),
    }
}

// ─── Primitives ───────────────────────────────────────────────────────────────

impl Deserializable for bool {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            0x997275b5 => Ok(true),
            0xbc799737 => Ok(false),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

macro_rules! le_impl {
    ($($t:ty),+) => {$(
        impl Deserializable for $t {
            fn deserialize(buf: Buffer) -> Result<Self> {
                let mut b = [0u8; std::mem::size_of::<$t>()];
                buf.read_exact(&mut b)?;
                Ok(<$t>::from_le_bytes(b))
            }
        }
    )+};
}

le_impl!(i32, u32, i64, u64, f64);

impl<const N: usize> Deserializable for [u8; N] {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; N];
        buf.read_exact(&mut b)?;
        Ok(b)
    }
}

// ─── Bytes / String ───────────────────────────────────────────────────────────

impl Deserializable for Vec<u8> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let (header, len) = match buf.read_byte()? {
            0xfe => {
                let b = buf.take(3)?;
                (4, b[0] as usize | (b[1] as usize) << 8 | (b[2] as usize) << 16)
            }
            n => (1, n as usize),
        };
        let data = buf.take(len)?.to_vec();
        buf.take(string_padding(header, len))?;
        Ok(data)
    }
}

impl Deserializable for String {
    fn deserialize(buf: Buffer) -> Result<Self> {
        String::from_utf8(Vec::<u8>::deserialize(buf)?).map_err(|_| Error::InvalidUtf8)
    }
}

impl Deserializable for Blob {
    fn deserialize(buf: Buffer) -> Result<Self> {
        Ok(Blob(buf.rest().to_vec()))
    }
}

// ─── Vectors ─────────────────────────────────────────────────────────────────

fn read_count(buf: Buffer) -> Result<usize> {
    let n = i32::deserialize(buf)?;
    // every element takes at least one byte, which bounds bogus counts
    if n < 0 || n as usize > buf.remaining() {
        return Err(Error::InvalidLength(n.into()));
    }
    Ok(n as usize)
}

impl<T: Deserializable> Deserializable for Vec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, VECTOR_ID)?;
        let len = read_count(buf)?;
        (0..len).map(|_| T::deserialize(buf)).collect()
    }
}

impl<T: Deserializable> Deserializable for RawVec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let len = read_count(buf)?;
        Ok(RawVec((0..len).map(|_| T::deserialize(buf)).collect::<Result<_>>()?))
    }
}
