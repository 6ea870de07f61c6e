//! Packet shapes and wire primitives for the Interlude protocol.
//!
//! Every multi-byte integer on the wire is little-endian and every string is
//! UTF-16LE with a 16-bit nul terminator. Frames are prefixed with a 2-byte
//! length that includes the header itself; encryption happens below this
//! crate, in `interlude_net`.

mod impls;
pub mod packets;
mod session_key;

use std::io::Write;

pub use impls::RawBytes;
pub use session_key::SessionKey;

/// The only client revision this server family speaks.
pub const PROTOCOL_REVISION: i32 = 0x0000_c621;

/// The revision the same client presents on the game channel.
pub const GAME_PROTOCOL_VERSION: i32 = 746;

/// Frame length prefix: 2 bytes, little-endian, inclusive.
pub const HEADER_SIZE: usize = 2;

/// Hard ceiling on a received frame. Anything at or above 64 KiB is a
/// protocol violation.
pub const MAX_PACKET_SIZE: usize = 0x1_0000;

/// Default listen port for login clients.
pub const LOGIN_CLIENT_PORT: u16 = 2106;

/// Default listen port for game servers registering with the login server.
pub const INTER_PORT: u16 = 9013;

/// Default listen port for game clients.
pub const GAME_CLIENT_PORT: u16 = 7777;

/// The GameGuard constants echoed in the Init packet. The client checks
/// them bit for bit.
pub const GG_CONSTANTS: [i32; 4] = [
    0x29dd_954e,
    0x77c3_9cfc,
    0x97ad_b620_u32 as i32,
    0x07bd_e0f7,
];

/// Revision advertised on the login↔game-server channel.
pub const INTER_PROTOCOL_REVISION: i32 = 0x0102;

/// Types that can be written to the wire.
pub trait Encode {
    fn encode(&self, w: impl Write) -> anyhow::Result<()>;
}

/// Types that can be read from the wire. Decoding borrows from the frame
/// where possible and must consume exactly the bytes it owns.
pub trait Decode<'a>: Sized {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self>;
}

/// A packet body with a fixed leading opcode.
pub trait Packet {
    const OPCODE: u8;
    const NAME: &'static str;

    /// Writes the opcode followed by the body.
    fn encode_with_opcode(&self, mut w: impl Write) -> anyhow::Result<()>
    where
        Self: Encode,
    {
        w.write_all(&[Self::OPCODE])?;
        self.encode(w)
    }
}

/// Reads a whole UTF-16LE nul-terminated string.
pub fn decode_utf16(r: &mut &[u8]) -> anyhow::Result<String> {
    let mut units = Vec::new();
    loop {
        let unit = <u16 as Decode>::decode(r)?;
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    String::from_utf16(&units).map_err(Into::into)
}

/// Writes a UTF-16LE string with its nul terminator.
pub fn encode_utf16(s: &str, mut w: impl Write) -> anyhow::Result<()> {
    for unit in s.encode_utf16() {
        w.write_all(&unit.to_le_bytes())?;
    }
    w.write_all(&[0, 0])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_round_trip() {
        let mut buf = Vec::new();
        encode_utf16("Шёлк σ l2", &mut buf).unwrap();

        let mut r = &buf[..];
        assert_eq!(decode_utf16(&mut r).unwrap(), "Шёлк σ l2");
        assert!(r.is_empty());
    }

    #[test]
    fn utf16_empty_string_is_a_bare_terminator() {
        let mut buf = Vec::new();
        encode_utf16("", &mut buf).unwrap();
        assert_eq!(buf, [0, 0]);
    }

    #[test]
    fn utf16_missing_terminator_is_an_error() {
        let buf = [0x61, 0x00, 0x62, 0x00];
        let mut r = &buf[..];
        assert!(decode_utf16(&mut r).is_err());
    }
}
