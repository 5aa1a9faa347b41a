//! Fallible reading and writing of wire values on top of [`Bytes`].
//!
//! The wire format is little-endian throughout, and every variable-length
//! field is prefixed with a 4-byte length. These traits exist so that packet
//! decoding never panics on hostile or truncated input - the [`Bytes`] API
//! panics when out of bounds, which is unacceptable at a datagram boundary.

use bytes::Bytes;

mod enc_dec;
mod impl_bytes;

/// Error when reading or writing wire values using [`ReadBytes`] or
/// [`WriteBytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Byte buffer was too short to read or write the next value.
    #[error("buffer too short")]
    BufferTooShort,
    /// A length-prefixed field claimed a length over the allowed maximum.
    #[error("length {len} over maximum {max}")]
    TooLong {
        /// Length the field claimed.
        len: usize,
        /// Maximum length allowed here.
        max: usize,
    },
    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid utf-8 string")]
    InvalidUtf8,
    /// The tag byte did not map to a known packet type or channel flags.
    #[error("unknown packet tag {0:#04x}")]
    UnknownTag(u8),
    /// A connection response carried a result code outside the defined set.
    #[error("unknown result code {0}")]
    UnknownResultCode(u32),
}

/// Result type with [`CodecError`] as the error type.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Gives the [encoded](Encode) length of a value of this type.
pub trait EncodeLen {
    /// Gets the encoded length of this value in bytes.
    fn encode_len(&self) -> usize;
}

/// Type which [encodes](Encode) to a constant number of bytes.
///
/// [`EncodeLen`] is automatically implemented for implementors.
pub trait ConstEncodeLen {
    /// Number of bytes a value of this type encodes to.
    const ENCODE_LEN: usize;
}

impl<T: ConstEncodeLen> EncodeLen for T {
    fn encode_len(&self) -> usize {
        Self::ENCODE_LEN
    }
}

/// Defines how to encode this value into a [`WriteBytes`].
pub trait Encode {
    /// Writes this value into a [`WriteBytes`].
    ///
    /// # Errors
    ///
    /// Errors if the buffer cannot fit the extra bytes.
    fn encode(&self, buf: &mut impl WriteBytes) -> Result<()>;
}

/// Defines how to decode a value of this type from a [`ReadBytes`].
pub trait Decode: Sized {
    /// Reads the next value of this type, advancing the buffer's cursor.
    ///
    /// # Errors
    ///
    /// Errors if the buffer does not hold a valid value of this type.
    fn decode(buf: &mut impl ReadBytes) -> Result<Self>;
}

/// Fallible reads from a byte buffer. Integers are little-endian.
pub trait ReadBytes {
    /// Reads the next [`u8`] and advances the cursor.
    ///
    /// # Errors
    ///
    /// Errors if the buffer has no bytes left.
    fn read_u8(&mut self) -> Result<u8>;

    /// Reads the next little-endian [`u32`] and advances the cursor.
    ///
    /// # Errors
    ///
    /// Errors if the buffer has fewer than 4 bytes left.
    fn read_u32(&mut self) -> Result<u32>;

    /// Reads the next little-endian [`u64`] and advances the cursor.
    ///
    /// # Errors
    ///
    /// Errors if the buffer has fewer than 8 bytes left.
    fn read_u64(&mut self) -> Result<u64>;

    /// Reads the next `len` bytes as a [`Bytes`], advancing the cursor.
    ///
    /// The returned value is a cheap reference-counted view.
    ///
    /// # Errors
    ///
    /// Errors if the buffer has fewer than `len` bytes left.
    fn read_slice(&mut self, len: usize) -> Result<Bytes>;

    /// Reads a 4-byte length prefix followed by that many bytes, rejecting
    /// lengths over `max`.
    ///
    /// # Errors
    ///
    /// Errors if the claimed length exceeds `max`, or if the buffer does not
    /// hold that many bytes.
    fn read_prefixed(&mut self, max: usize) -> Result<Bytes>
    where
        Self: Sized,
    {
        let len = self.read_u32()? as usize;
        if len > max {
            return Err(CodecError::TooLong { len, max });
        }
        self.read_slice(len)
    }

    /// Reads the next `T` and advances the cursor.
    ///
    /// # Errors
    ///
    /// Errors if the buffer does not hold a valid `T`.
    #[inline]
    fn read<T: Decode>(&mut self) -> Result<T>
    where
        Self: Sized,
    {
        T::decode(self)
    }
}

/// Fallible writes to a byte buffer. Integers are little-endian.
pub trait WriteBytes {
    /// Writes a [`u8`] and advances the cursor.
    ///
    /// # Errors
    ///
    /// Errors if the buffer cannot fit the extra byte.
    fn write_u8(&mut self, value: u8) -> Result<()>;

    /// Writes a little-endian [`u32`] and advances the cursor.
    ///
    /// # Errors
    ///
    /// Errors if the buffer cannot fit the extra bytes.
    fn write_u32(&mut self, value: u32) -> Result<()>;

    /// Writes a little-endian [`u64`] and advances the cursor.
    ///
    /// # Errors
    ///
    /// Errors if the buffer cannot fit the extra bytes.
    fn write_u64(&mut self, value: u64) -> Result<()>;

    /// Writes a slice of bytes and advances the cursor.
    ///
    /// # Errors
    ///
    /// Errors if the buffer cannot fit the extra bytes.
    fn write_slice(&mut self, src: &[u8]) -> Result<()>;

    /// Writes a 4-byte length prefix followed by the bytes of `src`.
    ///
    /// # Errors
    ///
    /// Errors if `src` is longer than a [`u32`] can express, or if the buffer
    /// cannot fit the extra bytes.
    fn write_prefixed(&mut self, src: &[u8]) -> Result<()> {
        let len = u32::try_from(src.len()).map_err(|_| CodecError::TooLong {
            len: src.len(),
            max: u32::MAX as usize,
        })?;
        self.write_u32(len)?;
        self.write_slice(src)
    }

    /// Writes a `T` and advances the cursor.
    ///
    /// # Errors
    ///
    /// Errors if the buffer cannot fit the extra bytes.
    #[inline]
    fn write<T: Encode>(&mut self, value: &T) -> Result<()>
    where
        Self: Sized,
    {
        value.encode(self)
    }
}
