//! `Encode`/`Decode` impls for the primitive wire types.

use std::io::Write;

use anyhow::ensure;
use byteorder::ReadBytesExt;

use crate::{Decode, Encode};

impl Encode for u8 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_all(&[*self])?)
    }
}

impl Decode<'_> for u8 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_u8()?)
    }
}

impl Encode for bool {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        u8::from(*self).encode(w)
    }
}

impl Decode<'_> for bool {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(u8::decode(r)? != 0)
    }
}

macro_rules! le_int {
    ($($ty:ty),*) => {
        $(
            impl Encode for $ty {
                fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
                    Ok(w.write_all(&self.to_le_bytes())?)
                }
            }

            impl Decode<'_> for $ty {
                fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
                    ensure!(
                        r.len() >= std::mem::size_of::<$ty>(),
                        "unexpected end of packet while reading {}",
                        stringify!($ty),
                    );
                    let (head, rest) = r.split_at(std::mem::size_of::<$ty>());
                    *r = rest;
                    Ok(<$ty>::from_le_bytes(head.try_into()?))
                }
            }
        )*
    }
}

le_int!(u16, i16, u32, i32, u64, i64, f64);

impl<const N: usize> Encode for [u8; N] {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_all(self)?)
    }
}

impl<const N: usize> Decode<'_> for [u8; N] {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        ensure!(r.len() >= N, "unexpected end of packet while reading [u8; {N}]");
        let (head, rest) = r.split_at(N);
        *r = rest;
        Ok(head.try_into()?)
    }
}

impl Encode for &str {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        crate::encode_utf16(self, w)
    }
}

impl Encode for String {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        crate::encode_utf16(self, w)
    }
}

impl Decode<'_> for String {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        crate::decode_utf16(r)
    }
}

/// Raw trailing bytes: encodes as-is, decodes by taking the remainder of
/// the frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RawBytes<'a>(pub &'a [u8]);

impl Encode for RawBytes<'_> {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_all(self.0)?)
    }
}

impl<'a> Decode<'a> for RawBytes<'a> {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        let all = *r;
        *r = &[];
        Ok(RawBytes(all))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ints_are_little_endian() {
        let mut buf = Vec::new();
        0x0000_c621_i32.encode(&mut buf).unwrap();
        assert_eq!(buf, [0x21, 0xc6, 0x00, 0x00]);

        let mut r = &buf[..];
        assert_eq!(i32::decode(&mut r).unwrap(), 0x0000_c621);
        assert!(r.is_empty());
    }

    #[test]
    fn short_input_does_not_consume() {
        let buf = [0x01u8, 0x02];
        let mut r = &buf[..];
        assert!(i32::decode(&mut r).is_err());
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn fixed_arrays_round_trip() {
        let mut buf = Vec::new();
        [9u8; 16].encode(&mut buf).unwrap();

        let mut r = &buf[..];
        assert_eq!(<[u8; 16]>::decode(&mut r).unwrap(), [9u8; 16]);
    }
}
