use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{CodecError, ReadBytes, Result, WriteBytes};

macro_rules! read_u {
    ($self:expr, $get:ident, $size:literal) => {
        if $self.remaining() >= $size {
            Ok($self.$get())
        } else {
            Err(CodecError::BufferTooShort)
        }
    };
}

impl ReadBytes for Bytes {
    #[inline]
    fn read_u8(&mut self) -> Result<u8> {
        read_u!(self, get_u8, 1)
    }

    #[inline]
    fn read_u32(&mut self) -> Result<u32> {
        read_u!(self, get_u32_le, 4)
    }

    #[inline]
    fn read_u64(&mut self) -> Result<u64> {
        read_u!(self, get_u64_le, 8)
    }

    #[inline]
    fn read_slice(&mut self, len: usize) -> Result<Bytes> {
        if self.remaining() >= len {
            Ok(self.split_to(len))
        } else {
            Err(CodecError::BufferTooShort)
        }
    }
}

// `BytesMut` grows on demand, so writes only fail on length-prefix overflow,
// but the fallible signatures are kept so encode impls compose.
impl WriteBytes for BytesMut {
    #[inline]
    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.put_u8(value);
        Ok(())
    }

    #[inline]
    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.put_u32_le(value);
        Ok(())
    }

    #[inline]
    fn write_u64(&mut self, value: u64) -> Result<()> {
        self.put_u64_le(value);
        Ok(())
    }

    #[inline]
    fn write_slice(&mut self, src: &[u8]) -> Result<()> {
        self.put_slice(src);
        Ok(())
    }
}
