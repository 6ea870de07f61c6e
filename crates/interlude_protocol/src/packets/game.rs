//! The slice of the game-client protocol the core owns: the handshake that
//! arms the rolling cipher, session hand-off, and object despawn. Gameplay
//! packet bodies live with the gameplay systems, not here.

use std::io::Write;

use anyhow::bail;

use crate::{Decode, Encode, Packet, SessionKey};

/// The fixed half of the Interlude game-channel key. The server generates
/// the first 8 bytes per connection and ships only those; the client pads
/// with this well-known tail.
pub const KEY_STATIC_TAIL: [u8; 8] = [0xc8, 0x27, 0x93, 0x01, 0xa1, 0x6c, 0x31, 0x97];

/// Builds the full 16-byte rolling-cipher key from the dynamic half.
pub fn full_game_key(dynamic: &[u8; 8]) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(dynamic);
    key[8..].copy_from_slice(&KEY_STATIC_TAIL);
    key
}

/// C2S 0x00 — first packet on a game connection, sent in cleartext.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ProtocolVersion {
    pub revision: i32,
}

impl Packet for ProtocolVersion {
    const OPCODE: u8 = 0x00;
    const NAME: &'static str = "ProtocolVersion";
}

impl Encode for ProtocolVersion {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.revision.encode(w)
    }
}

impl Decode<'_> for ProtocolVersion {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            revision: i32::decode(r)?,
        })
    }
}

/// S2C 0x00 — accepts the protocol and carries the dynamic key half. The
/// one game packet that goes out unencrypted; sending it arms the cipher.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct KeyInit {
    pub accepted: bool,
    pub key_half: [u8; 8],
}

impl Packet for KeyInit {
    const OPCODE: u8 = 0x00;
    const NAME: &'static str = "KeyInit";
}

impl Encode for KeyInit {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.accepted.encode(&mut w)?;
        self.key_half.encode(&mut w)?;
        1_i32.encode(&mut w) // crypt enabled
    }
}

impl Decode<'_> for KeyInit {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let accepted = bool::decode(r)?;
        let key_half = <[u8; 8]>::decode(r)?;
        i32::decode(r)?;
        Ok(Self { accepted, key_half })
    }
}

/// C2S 0x08 — the session key issued by the login server, presented on the
/// game channel.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AuthLogin {
    pub account: String,
    pub key: SessionKey,
}

impl Packet for AuthLogin {
    const OPCODE: u8 = 0x08;
    const NAME: &'static str = "AuthLogin";
}

impl Encode for AuthLogin {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.account.encode(&mut w)?;
        self.key.encode(&mut w)
    }
}

impl Decode<'_> for AuthLogin {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            account: String::decode(r)?,
            key: SessionKey::decode(r)?,
        })
    }
}

/// S2C 0x13 — minimal character-screen acknowledgement after the session
/// relay succeeds.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CharSelectInfo {
    pub character_count: i32,
}

impl Packet for CharSelectInfo {
    const OPCODE: u8 = 0x13;
    const NAME: &'static str = "CharSelectInfo";
}

impl Encode for CharSelectInfo {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.character_count.encode(w)
    }
}

impl Decode<'_> for CharSelectInfo {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            character_count: i32::decode(r)?,
        })
    }
}

/// S2C 0x12 — removes an object from the client's world.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DeleteObject {
    pub object_id: i32,
}

impl Packet for DeleteObject {
    const OPCODE: u8 = 0x12;
    const NAME: &'static str = "DeleteObject";
}

impl Encode for DeleteObject {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.object_id.encode(&mut w)?;
        0_i32.encode(&mut w) // unknown, always zero
    }
}

impl Decode<'_> for DeleteObject {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let object_id = i32::decode(r)?;
        i32::decode(r)?;
        Ok(Self { object_id })
    }
}

/// Frames the game server accepts from a client during the handshake.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum GameClientFrame {
    ProtocolVersion(ProtocolVersion),
    AuthLogin(AuthLogin),
}

impl GameClientFrame {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProtocolVersion(_) => ProtocolVersion::NAME,
            Self::AuthLogin(_) => AuthLogin::NAME,
        }
    }

    pub fn decode_frame(mut body: &[u8]) -> anyhow::Result<Self> {
        let r = &mut body;
        let opcode = u8::decode(r)?;
        let frame = match opcode {
            ProtocolVersion::OPCODE => Self::ProtocolVersion(ProtocolVersion::decode(r)?),
            AuthLogin::OPCODE => Self::AuthLogin(AuthLogin::decode(r)?),
            other => bail!("unknown game client opcode 0x{other:02x}"),
        };
        Ok(frame)
    }
}
