use bytes::Bytes;

use super::{CodecError, ConstEncodeLen, Decode, Encode, EncodeLen, ReadBytes, Result, WriteBytes};

macro_rules! impl_uint {
    ($ty:ty, $read:ident, $write:ident, $width:literal) => {
        impl Encode for $ty {
            fn encode(&self, buf: &mut impl WriteBytes) -> Result<()> {
                buf.$write(*self)
            }
        }

        impl ConstEncodeLen for $ty {
            const ENCODE_LEN: usize = $width;
        }

        impl Decode for $ty {
            fn decode(buf: &mut impl ReadBytes) -> Result<Self> {
                buf.$read()
            }
        }
    };
}

impl_uint!(u8, read_u8, write_u8, 1);
impl_uint!(u32, read_u32, write_u32, 4);
impl_uint!(u64, read_u64, write_u64, 8);

impl EncodeLen for Bytes {
    fn encode_len(&self) -> usize {
        4 + self.len()
    }
}

impl Encode for Bytes {
    fn encode(&self, buf: &mut impl WriteBytes) -> Result<()> {
        buf.write_prefixed(self)
    }
}

impl Decode for Bytes {
    fn decode(buf: &mut impl ReadBytes) -> Result<Self> {
        buf.read_prefixed(usize::MAX)
    }
}

impl EncodeLen for String {
    fn encode_len(&self) -> usize {
        4 + self.len()
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut impl WriteBytes) -> Result<()> {
        buf.write_prefixed(self.as_bytes())
    }
}

impl Decode for String {
    fn decode(buf: &mut impl ReadBytes) -> Result<Self> {
        let bytes = buf.read_prefixed(usize::MAX)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}
