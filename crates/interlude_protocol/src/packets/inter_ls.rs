//! Packets the login server sends to a game server.

use std::io::Write;

use anyhow::{bail, ensure};

use crate::{Decode, Encode, Packet};

/// 0x00 — first packet on the inter-server channel: revision plus the raw
/// (unscrambled) RSA-512 modulus the game server must encrypt its
/// replacement Blowfish key with.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InitLs {
    pub revision: i32,
    pub modulus: Vec<u8>,
}

impl Packet for InitLs {
    const OPCODE: u8 = 0x00;
    const NAME: &'static str = "InitLs";
}

impl Encode for InitLs {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.revision.encode(&mut w)?;
        (self.modulus.len() as i32).encode(&mut w)?;
        Ok(w.write_all(&self.modulus)?)
    }
}

impl Decode<'_> for InitLs {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let revision = i32::decode(r)?;
        let len = i32::decode(r)?;
        ensure!((1..=256).contains(&len), "implausible modulus size {len}");
        ensure!(r.len() >= len as usize, "truncated InitLs modulus");
        let (head, rest) = r.split_at(len as usize);
        let modulus = head.to_vec();
        *r = rest;
        Ok(Self { revision, modulus })
    }
}

/// Reasons for 0x01 LoginServerFail.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum LoginServerFailReason {
    None = 0x00,
    IpBanned = 0x01,
    IpReserved = 0x02,
    WrongHexId = 0x03,
    IdReserved = 0x04,
    NoFreeId = 0x05,
    NotAuthed = 0x06,
    AlreadyLoggedIn = 0x07,
}

/// 0x01 — registration refused; the connection is closed after this.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LoginServerFail {
    pub reason: LoginServerFailReason,
}

impl Packet for LoginServerFail {
    const OPCODE: u8 = 0x01;
    const NAME: &'static str = "LoginServerFail";
}

impl Encode for LoginServerFail {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        (self.reason as u8).encode(w)
    }
}

impl Decode<'_> for LoginServerFail {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let reason = match u8::decode(r)? {
            0x00 => LoginServerFailReason::None,
            0x01 => LoginServerFailReason::IpBanned,
            0x02 => LoginServerFailReason::IpReserved,
            0x03 => LoginServerFailReason::WrongHexId,
            0x04 => LoginServerFailReason::IdReserved,
            0x05 => LoginServerFailReason::NoFreeId,
            0x06 => LoginServerFailReason::NotAuthed,
            0x07 => LoginServerFailReason::AlreadyLoggedIn,
            other => bail!("unknown LoginServerFail reason 0x{other:02x}"),
        };
        Ok(Self { reason })
    }
}

/// 0x02 — registration accepted under the given (possibly alternate) id.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AuthResponse {
    pub server_id: u8,
    pub server_name: String,
}

impl Packet for AuthResponse {
    const OPCODE: u8 = 0x02;
    const NAME: &'static str = "AuthResponse";
}

impl Encode for AuthResponse {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.server_id.encode(&mut w)?;
        self.server_name.encode(&mut w)
    }
}

impl Decode<'_> for AuthResponse {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            server_id: u8::decode(r)?,
            server_name: String::decode(r)?,
        })
    }
}

/// 0x03 — verdict on a PlayerAuthRequest.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PlayerAuthResponse {
    pub account: String,
    pub authorized: bool,
}

impl Packet for PlayerAuthResponse {
    const OPCODE: u8 = 0x03;
    const NAME: &'static str = "PlayerAuthResponse";
}

impl Encode for PlayerAuthResponse {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.account.encode(&mut w)?;
        self.authorized.encode(&mut w)
    }
}

impl Decode<'_> for PlayerAuthResponse {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            account: String::decode(r)?,
            authorized: bool::decode(r)?,
        })
    }
}

/// 0x04 — order the game server to drop a player whose session went stale
/// or logged in elsewhere.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct KickPlayer {
    pub account: String,
}

impl Packet for KickPlayer {
    const OPCODE: u8 = 0x04;
    const NAME: &'static str = "KickPlayer";
}

impl Encode for KickPlayer {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.account.encode(w)
    }
}

impl Decode<'_> for KickPlayer {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            account: String::decode(r)?,
        })
    }
}

/// 0x05 — ask how many characters an account owns on this server.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RequestCharacters {
    pub account: String,
}

impl Packet for RequestCharacters {
    const OPCODE: u8 = 0x05;
    const NAME: &'static str = "RequestCharacters";
}

impl Encode for RequestCharacters {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.account.encode(w)
    }
}

impl Decode<'_> for RequestCharacters {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            account: String::decode(r)?,
        })
    }
}

/// Frames a game server accepts from the login server. Same opcode values
/// as [`super::inter_gs::GsFrame`], different meanings — the channel is
/// dispatched by direction.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LsFrame {
    InitLs(InitLs),
    LoginServerFail(LoginServerFail),
    AuthResponse(AuthResponse),
    PlayerAuthResponse(PlayerAuthResponse),
    KickPlayer(KickPlayer),
    RequestCharacters(RequestCharacters),
}

impl LsFrame {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitLs(_) => InitLs::NAME,
            Self::LoginServerFail(_) => LoginServerFail::NAME,
            Self::AuthResponse(_) => AuthResponse::NAME,
            Self::PlayerAuthResponse(_) => PlayerAuthResponse::NAME,
            Self::KickPlayer(_) => KickPlayer::NAME,
            Self::RequestCharacters(_) => RequestCharacters::NAME,
        }
    }

    pub fn decode_frame(mut body: &[u8]) -> anyhow::Result<Self> {
        let r = &mut body;
        let opcode = u8::decode(r)?;
        let frame = match opcode {
            InitLs::OPCODE => Self::InitLs(InitLs::decode(r)?),
            LoginServerFail::OPCODE => Self::LoginServerFail(LoginServerFail::decode(r)?),
            AuthResponse::OPCODE => Self::AuthResponse(AuthResponse::decode(r)?),
            PlayerAuthResponse::OPCODE => Self::PlayerAuthResponse(PlayerAuthResponse::decode(r)?),
            KickPlayer::OPCODE => Self::KickPlayer(KickPlayer::decode(r)?),
            RequestCharacters::OPCODE => Self::RequestCharacters(RequestCharacters::decode(r)?),
            other => bail!("unknown login-server opcode 0x{other:02x}"),
        };
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_ls_round_trip() {
        let pkt = InitLs {
            revision: crate::INTER_PROTOCOL_REVISION,
            modulus: vec![9u8; 64],
        };

        let mut buf = Vec::new();
        pkt.encode_with_opcode(&mut buf).unwrap();

        match LsFrame::decode_frame(&buf).unwrap() {
            LsFrame::InitLs(decoded) => assert_eq!(decoded, pkt),
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn same_opcode_decodes_differently_per_direction() {
        use super::super::inter_gs::GsFrame;

        let pkt = PlayerAuthResponse {
            account: "alice".to_owned(),
            authorized: true,
        };
        let mut buf = Vec::new();
        pkt.encode_with_opcode(&mut buf).unwrap();

        // 0x03 from the login server is a PlayerAuthResponse...
        assert!(matches!(
            LsFrame::decode_frame(&buf).unwrap(),
            LsFrame::PlayerAuthResponse(_)
        ));
        // ...while 0x03 from a game server parses as a PlayerLogout.
        assert!(matches!(
            GsFrame::decode_frame(&buf).unwrap(),
            GsFrame::PlayerLogout(_)
        ));
    }
}
