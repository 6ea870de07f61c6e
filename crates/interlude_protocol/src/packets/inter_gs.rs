//! Packets a game server sends to the login server.

use std::io::Write;

use anyhow::{bail, ensure};

use crate::{Decode, Encode, Packet, SessionKey};

/// 0x00 — the RSA-encrypted replacement Blowfish key, sent right after the
/// game server receives InitLs.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlowFishKey {
    pub encrypted: Vec<u8>,
}

impl Packet for BlowFishKey {
    const OPCODE: u8 = 0x00;
    const NAME: &'static str = "BlowFishKey";
}

impl Encode for BlowFishKey {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        (self.encrypted.len() as i32).encode(&mut w)?;
        Ok(w.write_all(&self.encrypted)?)
    }
}

impl Decode<'_> for BlowFishKey {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let len = i32::decode(r)?;
        ensure!((1..=256).contains(&len), "implausible key block size {len}");
        ensure!(r.len() >= len as usize, "truncated BlowFishKey block");
        let (head, rest) = r.split_at(len as usize);
        let encrypted = head.to_vec();
        *r = rest;
        Ok(Self { encrypted })
    }
}

/// 0x01 — registration request with the desired slot and installation
/// identity.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GameServerAuth {
    pub desired_id: u8,
    pub accept_alternate: bool,
    pub reserve_host: bool,
    pub port: u16,
    pub max_players: i32,
    pub hex_id: Vec<u8>,
    pub hosts: Vec<String>,
}

impl Packet for GameServerAuth {
    const OPCODE: u8 = 0x01;
    const NAME: &'static str = "GameServerAuth";
}

impl Encode for GameServerAuth {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.desired_id.encode(&mut w)?;
        self.accept_alternate.encode(&mut w)?;
        self.reserve_host.encode(&mut w)?;
        self.port.encode(&mut w)?;
        self.max_players.encode(&mut w)?;
        (self.hex_id.len() as i32).encode(&mut w)?;
        w.write_all(&self.hex_id)?;
        (self.hosts.len() as i32).encode(&mut w)?;
        for host in &self.hosts {
            host.encode(&mut w)?;
        }
        Ok(())
    }
}

impl Decode<'_> for GameServerAuth {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let desired_id = u8::decode(r)?;
        let accept_alternate = bool::decode(r)?;
        let reserve_host = bool::decode(r)?;
        let port = u16::decode(r)?;
        let max_players = i32::decode(r)?;

        let hex_len = i32::decode(r)?;
        ensure!((1..=64).contains(&hex_len), "implausible hex id size {hex_len}");
        ensure!(r.len() >= hex_len as usize, "truncated hex id");
        let (head, rest) = r.split_at(hex_len as usize);
        let hex_id = head.to_vec();
        *r = rest;

        let host_count = i32::decode(r)?;
        ensure!((0..=16).contains(&host_count), "implausible host count {host_count}");
        let mut hosts = Vec::with_capacity(host_count as usize);
        for _ in 0..host_count {
            hosts.push(String::decode(r)?);
        }

        Ok(Self {
            desired_id,
            accept_alternate,
            reserve_host,
            port,
            max_players,
            hex_id,
            hosts,
        })
    }
}

/// 0x02 — the full set of accounts currently in game on this server.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PlayerInGame {
    pub accounts: Vec<String>,
}

impl Packet for PlayerInGame {
    const OPCODE: u8 = 0x02;
    const NAME: &'static str = "PlayerInGame";
}

impl Encode for PlayerInGame {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        (self.accounts.len() as u16).encode(&mut w)?;
        for account in &self.accounts {
            account.encode(&mut w)?;
        }
        Ok(())
    }
}

impl Decode<'_> for PlayerInGame {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let count = u16::decode(r)?;
        let mut accounts = Vec::with_capacity(count as usize);
        for _ in 0..count {
            accounts.push(String::decode(r)?);
        }
        Ok(Self { accounts })
    }
}

/// 0x03 — one account left the game server.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PlayerLogout {
    pub account: String,
}

impl Packet for PlayerLogout {
    const OPCODE: u8 = 0x03;
    const NAME: &'static str = "PlayerLogout";
}

impl Encode for PlayerLogout {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.account.encode(w)
    }
}

impl Decode<'_> for PlayerLogout {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            account: String::decode(r)?,
        })
    }
}

/// 0x05 — ask the login server whether a connecting player presented the
/// session key it was issued.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PlayerAuthRequest {
    pub account: String,
    pub key: SessionKey,
}

impl Packet for PlayerAuthRequest {
    const OPCODE: u8 = 0x05;
    const NAME: &'static str = "PlayerAuthRequest";
}

impl Encode for PlayerAuthRequest {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.account.encode(&mut w)?;
        self.key.encode(&mut w)
    }
}

impl Decode<'_> for PlayerAuthRequest {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            account: String::decode(r)?,
            key: SessionKey::decode(r)?,
        })
    }
}

/// Attribute ids understood in 0x06 ServerStatus.
pub mod server_status {
    pub const STATUS: i32 = 0x01;
    pub const CLOCK: i32 = 0x02;
    pub const BRACKETS: i32 = 0x03;
    pub const MAX_PLAYERS: i32 = 0x04;
    pub const TEST_SERVER: i32 = 0x05;
    pub const SERVER_AGE: i32 = 0x06;

    pub const STATUS_AUTO: i32 = 0x00;
    pub const STATUS_GOOD: i32 = 0x01;
    pub const STATUS_DOWN: i32 = 0x04;
}

/// 0x06 — attribute pairs describing how the server should appear in the
/// realm list.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ServerStatus {
    pub attributes: Vec<(i32, i32)>,
}

impl Packet for ServerStatus {
    const OPCODE: u8 = 0x06;
    const NAME: &'static str = "ServerStatus";
}

impl Encode for ServerStatus {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        (self.attributes.len() as i32).encode(&mut w)?;
        for (id, value) in &self.attributes {
            id.encode(&mut w)?;
            value.encode(&mut w)?;
        }
        Ok(())
    }
}

impl Decode<'_> for ServerStatus {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let count = i32::decode(r)?;
        ensure!((0..=32).contains(&count), "implausible attribute count {count}");
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            attributes.push((i32::decode(r)?, i32::decode(r)?));
        }
        Ok(Self { attributes })
    }
}

/// Frames the login server accepts from a game server, keyed by this
/// direction's opcode table.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum GsFrame {
    BlowFishKey(BlowFishKey),
    GameServerAuth(GameServerAuth),
    PlayerInGame(PlayerInGame),
    PlayerLogout(PlayerLogout),
    PlayerAuthRequest(PlayerAuthRequest),
    ServerStatus(ServerStatus),
}

impl GsFrame {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BlowFishKey(_) => BlowFishKey::NAME,
            Self::GameServerAuth(_) => GameServerAuth::NAME,
            Self::PlayerInGame(_) => PlayerInGame::NAME,
            Self::PlayerLogout(_) => PlayerLogout::NAME,
            Self::PlayerAuthRequest(_) => PlayerAuthRequest::NAME,
            Self::ServerStatus(_) => ServerStatus::NAME,
        }
    }

    pub fn decode_frame(mut body: &[u8]) -> anyhow::Result<Self> {
        let r = &mut body;
        let opcode = u8::decode(r)?;
        let frame = match opcode {
            BlowFishKey::OPCODE => Self::BlowFishKey(BlowFishKey::decode(r)?),
            GameServerAuth::OPCODE => Self::GameServerAuth(GameServerAuth::decode(r)?),
            PlayerInGame::OPCODE => Self::PlayerInGame(PlayerInGame::decode(r)?),
            PlayerLogout::OPCODE => Self::PlayerLogout(PlayerLogout::decode(r)?),
            PlayerAuthRequest::OPCODE => Self::PlayerAuthRequest(PlayerAuthRequest::decode(r)?),
            ServerStatus::OPCODE => Self::ServerStatus(ServerStatus::decode(r)?),
            other => bail!("unknown game-server opcode 0x{other:02x}"),
        };
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_server_auth_round_trip() {
        let pkt = GameServerAuth {
            desired_id: 1,
            accept_alternate: true,
            reserve_host: false,
            port: 7777,
            max_players: 5000,
            hex_id: vec![0xde, 0xad, 0xbe, 0xef, 0x01],
            hosts: vec!["127.0.0.1".to_owned(), "10.0.0.0/8".to_owned()],
        };

        let mut buf = Vec::new();
        pkt.encode_with_opcode(&mut buf).unwrap();

        match GsFrame::decode_frame(&buf).unwrap() {
            GsFrame::GameServerAuth(decoded) => assert_eq!(decoded, pkt),
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn player_auth_request_round_trip() {
        let pkt = PlayerAuthRequest {
            account: "alice".to_owned(),
            key: SessionKey {
                login_ok1: 1,
                login_ok2: 2,
                play_ok1: 3,
                play_ok2: 4,
            },
        };

        let mut buf = Vec::new();
        pkt.encode_with_opcode(&mut buf).unwrap();

        match GsFrame::decode_frame(&buf).unwrap() {
            GsFrame::PlayerAuthRequest(decoded) => assert_eq!(decoded, pkt),
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn oversized_blowfish_key_is_rejected() {
        let mut buf = vec![BlowFishKey::OPCODE];
        buf.extend_from_slice(&1024_i32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 64]);
        assert!(GsFrame::decode_frame(&buf).is_err());
    }
}
