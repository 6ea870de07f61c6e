//! Packets the login server sends to a client.

use std::io::Write;
use std::net::Ipv4Addr;

use anyhow::bail;

use crate::{Decode, Encode, Packet, GG_CONSTANTS, PROTOCOL_REVISION};

/// 0x00 — the very first packet on a login connection, carrying the session
/// id, the scrambled RSA modulus and the per-connection Blowfish key. The
/// only packet encrypted with the static key and the XOR pad.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Init {
    pub session_id: i32,
    pub scrambled_modulus: [u8; 128],
    pub blowfish_key: [u8; 16],
}

impl Packet for Init {
    const OPCODE: u8 = 0x00;
    const NAME: &'static str = "Init";
}

impl Encode for Init {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.session_id.encode(&mut w)?;
        PROTOCOL_REVISION.encode(&mut w)?;
        self.scrambled_modulus.encode(&mut w)?;
        for gg in GG_CONSTANTS {
            gg.encode(&mut w)?;
        }
        self.blowfish_key.encode(&mut w)?;
        0_u8.encode(&mut w) // nul terminator after the key
    }
}

impl Decode<'_> for Init {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let session_id = i32::decode(r)?;
        let revision = i32::decode(r)?;
        if revision != PROTOCOL_REVISION {
            bail!("unexpected protocol revision 0x{revision:08x}");
        }
        let scrambled_modulus = <[u8; 128]>::decode(r)?;
        for _ in 0..4 {
            i32::decode(r)?;
        }
        let blowfish_key = <[u8; 16]>::decode(r)?;
        *r = &[]; // terminator and XOR-pad remnants
        Ok(Self {
            session_id,
            scrambled_modulus,
            blowfish_key,
        })
    }
}

/// Reasons for 0x01 LoginFail.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum LoginFailReason {
    SystemError = 0x01,
    PassWrong = 0x02,
    UserOrPassWrong = 0x03,
    AccessFailed = 0x04,
    AccountInUse = 0x07,
    ServerOverloaded = 0x0f,
    ServerMaintenance = 0x10,
}

/// 0x01 — terminal login failure.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LoginFail {
    pub reason: LoginFailReason,
}

impl Packet for LoginFail {
    const OPCODE: u8 = 0x01;
    const NAME: &'static str = "LoginFail";
}

impl Encode for LoginFail {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        (self.reason as u8).encode(w)
    }
}

impl Decode<'_> for LoginFail {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let reason = match u8::decode(r)? {
            0x01 => LoginFailReason::SystemError,
            0x02 => LoginFailReason::PassWrong,
            0x03 => LoginFailReason::UserOrPassWrong,
            0x04 => LoginFailReason::AccessFailed,
            0x07 => LoginFailReason::AccountInUse,
            0x0f => LoginFailReason::ServerOverloaded,
            0x10 => LoginFailReason::ServerMaintenance,
            other => bail!("unknown LoginFail reason 0x{other:02x}"),
        };
        Ok(Self { reason })
    }
}

/// Reasons for 0x02 AccountKicked.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(i32)]
pub enum AccountKickedReason {
    DataStealer = 0x01,
    GenericViolation = 0x08,
    SevenDaysSuspended = 0x10,
    PermanentlyBanned = 0x20,
}

/// 0x02 — the account itself is barred, independent of credentials.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AccountKicked {
    pub reason: AccountKickedReason,
}

impl Packet for AccountKicked {
    const OPCODE: u8 = 0x02;
    const NAME: &'static str = "AccountKicked";
}

impl Encode for AccountKicked {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        (self.reason as i32).encode(w)
    }
}

impl Decode<'_> for AccountKicked {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let reason = match i32::decode(r)? {
            0x01 => AccountKickedReason::DataStealer,
            0x08 => AccountKickedReason::GenericViolation,
            0x10 => AccountKickedReason::SevenDaysSuspended,
            0x20 => AccountKickedReason::PermanentlyBanned,
            other => bail!("unknown AccountKicked reason 0x{other:08x}"),
        };
        Ok(Self { reason })
    }
}

/// 0x03 — credentials accepted; the login pair authorizes the next leg.
/// The body is padded to the fixed 49-byte shape the client expects.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LoginOk {
    pub login_ok1: i32,
    pub login_ok2: i32,
}

impl Packet for LoginOk {
    const OPCODE: u8 = 0x03;
    const NAME: &'static str = "LoginOk";
}

impl Encode for LoginOk {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.login_ok1.encode(&mut w)?;
        self.login_ok2.encode(&mut w)?;
        0_i32.encode(&mut w)?;
        0_i32.encode(&mut w)?;
        0x0000_03ea_i32.encode(&mut w)?;
        0_i32.encode(&mut w)?;
        0_i32.encode(&mut w)?;
        0_i32.encode(&mut w)?;
        [0u8; 16].encode(&mut w)
    }
}

impl Decode<'_> for LoginOk {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let login_ok1 = i32::decode(r)?;
        let login_ok2 = i32::decode(r)?;
        *r = &[];
        Ok(Self {
            login_ok1,
            login_ok2,
        })
    }
}

/// One row of the 0x04 ServerList reply.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ServerListEntry {
    pub id: u8,
    pub ip: Ipv4Addr,
    pub port: i32,
    pub age_limit: u8,
    pub pvp: bool,
    pub current_players: u16,
    pub max_players: u16,
    pub online: bool,
    pub server_type: i32,
    pub brackets: bool,
}

/// 0x04 — the realm list shown at the character screen.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ServerList {
    pub last_server: u8,
    pub servers: Vec<ServerListEntry>,
}

impl Packet for ServerList {
    const OPCODE: u8 = 0x04;
    const NAME: &'static str = "ServerList";
}

impl Encode for ServerList {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        (self.servers.len() as u8).encode(&mut w)?;
        self.last_server.encode(&mut w)?;
        for s in &self.servers {
            s.id.encode(&mut w)?;
            s.ip.octets().encode(&mut w)?;
            s.port.encode(&mut w)?;
            s.age_limit.encode(&mut w)?;
            s.pvp.encode(&mut w)?;
            s.current_players.encode(&mut w)?;
            s.max_players.encode(&mut w)?;
            s.online.encode(&mut w)?;
            s.server_type.encode(&mut w)?;
            s.brackets.encode(&mut w)?;
        }
        0_u16.encode(&mut w) // trailer
    }
}

impl Decode<'_> for ServerList {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let count = u8::decode(r)?;
        let last_server = u8::decode(r)?;

        let mut servers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            servers.push(ServerListEntry {
                id: u8::decode(r)?,
                ip: Ipv4Addr::from(<[u8; 4]>::decode(r)?),
                port: i32::decode(r)?,
                age_limit: u8::decode(r)?,
                pvp: bool::decode(r)?,
                current_players: u16::decode(r)?,
                max_players: u16::decode(r)?,
                online: bool::decode(r)?,
                server_type: i32::decode(r)?,
                brackets: bool::decode(r)?,
            });
        }
        *r = &[];
        Ok(Self {
            last_server,
            servers,
        })
    }
}

/// Reasons for 0x06 PlayFail.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum PlayFailReason {
    SystemError = 0x01,
    UserOrPassWrong = 0x03,
    AccessFailed = 0x04,
    ServerOverloaded = 0x0f,
}

/// 0x06 — the chosen game server cannot be joined.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PlayFail {
    pub reason: PlayFailReason,
}

impl Packet for PlayFail {
    const OPCODE: u8 = 0x06;
    const NAME: &'static str = "PlayFail";
}

impl Encode for PlayFail {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        (self.reason as u8).encode(w)
    }
}

impl Decode<'_> for PlayFail {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let reason = match u8::decode(r)? {
            0x01 => PlayFailReason::SystemError,
            0x03 => PlayFailReason::UserOrPassWrong,
            0x04 => PlayFailReason::AccessFailed,
            0x0f => PlayFailReason::ServerOverloaded,
            other => bail!("unknown PlayFail reason 0x{other:02x}"),
        };
        Ok(Self { reason })
    }
}

/// 0x07 — the play pair the client hands to the chosen game server.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PlayOk {
    pub play_ok1: i32,
    pub play_ok2: i32,
}

impl Packet for PlayOk {
    const OPCODE: u8 = 0x07;
    const NAME: &'static str = "PlayOk";
}

impl Encode for PlayOk {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.play_ok1.encode(&mut w)?;
        self.play_ok2.encode(&mut w)
    }
}

impl Decode<'_> for PlayOk {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let play_ok1 = i32::decode(r)?;
        let play_ok2 = i32::decode(r)?;
        *r = &[];
        Ok(Self { play_ok1, play_ok2 })
    }
}

/// 0x0B — GameGuard accepted; echoes the session id.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GgAuth {
    pub session_id: i32,
}

impl Packet for GgAuth {
    const OPCODE: u8 = 0x0b;
    const NAME: &'static str = "GgAuth";
}

impl Encode for GgAuth {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.session_id.encode(&mut w)?;
        for _ in 0..4 {
            0_i32.encode(&mut w)?;
        }
        Ok(())
    }
}

impl Decode<'_> for GgAuth {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let session_id = i32::decode(r)?;
        *r = &[];
        Ok(Self { session_id })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn init_body_is_170_bytes() {
        let pkt = Init {
            session_id: 0x0102_0304,
            scrambled_modulus: [0xaa; 128],
            blowfish_key: [0xbb; 16],
        };

        let mut buf = Vec::new();
        pkt.encode_with_opcode(&mut buf).unwrap();
        assert_eq!(buf.len(), 170);
        assert_eq!(buf[0], 0x00);
        // Protocol revision sits right after the session id.
        assert_eq!(&buf[5..9], &[0x21, 0xc6, 0x00, 0x00]);
        assert_eq!(*buf.last().unwrap(), 0x00);
    }

    #[test]
    fn login_ok_is_49_bytes_with_opcode() {
        let pkt = LoginOk {
            login_ok1: 7,
            login_ok2: 9,
        };
        let mut buf = Vec::new();
        pkt.encode_with_opcode(&mut buf).unwrap();
        assert_eq!(buf.len(), 49);
    }

    #[test]
    fn server_list_round_trip() {
        let pkt = ServerList {
            last_server: 1,
            servers: vec![ServerListEntry {
                id: 1,
                ip: Ipv4Addr::new(127, 0, 0, 1),
                port: 7777,
                age_limit: 0,
                pvp: true,
                current_players: 42,
                max_players: 5000,
                online: true,
                server_type: 1,
                brackets: false,
            }],
        };

        let mut buf = Vec::new();
        pkt.encode(&mut buf).unwrap();

        let mut r = &buf[..];
        assert_eq!(ServerList::decode(&mut r).unwrap(), pkt);
    }

    #[test]
    fn init_round_trip_through_client_eyes() {
        let pkt = Init {
            session_id: -55,
            scrambled_modulus: [3; 128],
            blowfish_key: [4; 16],
        };

        let mut buf = Vec::new();
        pkt.encode(&mut buf).unwrap();

        let mut r = &buf[..];
        assert_eq!(Init::decode(&mut r).unwrap(), pkt);
    }
}
