//! Packets a login client sends to the login server.

use std::io::Write;

use anyhow::bail;

use crate::{Decode, Encode, Packet};

/// 0x07 — the GameGuard challenge echo. Carries the session id from Init.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AuthGameGuard {
    pub session_id: i32,
}

impl Packet for AuthGameGuard {
    const OPCODE: u8 = 0x07;
    const NAME: &'static str = "AuthGameGuard";
}

impl Encode for AuthGameGuard {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.session_id.encode(&mut w)?;
        // GameGuard junk the server never inspects.
        for _ in 0..4 {
            0_i32.encode(&mut w)?;
        }
        Ok(())
    }
}

impl Decode<'_> for AuthGameGuard {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let session_id = i32::decode(r)?;
        *r = &[]; // trailing GameGuard data is ignored
        Ok(Self { session_id })
    }
}

/// 0x00 — the credential block, one raw RSA-1024 ciphertext.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RequestAuthLogin {
    pub block: [u8; 128],
}

impl Packet for RequestAuthLogin {
    const OPCODE: u8 = 0x00;
    const NAME: &'static str = "RequestAuthLogin";
}

impl Encode for RequestAuthLogin {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.block.encode(&mut w)
    }
}

impl Decode<'_> for RequestAuthLogin {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let block = <[u8; 128]>::decode(r)?;
        *r = &[]; // newer clients append GameGuard trailers
        Ok(Self { block })
    }
}

/// 0x05 — request for the server list, authorized by the login pair.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RequestServerList {
    pub login_ok1: i32,
    pub login_ok2: i32,
}

impl Packet for RequestServerList {
    const OPCODE: u8 = 0x05;
    const NAME: &'static str = "RequestServerList";
}

impl Encode for RequestServerList {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.login_ok1.encode(&mut w)?;
        self.login_ok2.encode(&mut w)
    }
}

impl Decode<'_> for RequestServerList {
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

/// 0x02 — the client picked a game server.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RequestServerLogin {
    pub login_ok1: i32,
    pub login_ok2: i32,
    pub server_id: u8,
}

impl Packet for RequestServerLogin {
    const OPCODE: u8 = 0x02;
    const NAME: &'static str = "RequestServerLogin";
}

impl Encode for RequestServerLogin {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.login_ok1.encode(&mut w)?;
        self.login_ok2.encode(&mut w)?;
        self.server_id.encode(&mut w)
    }
}

impl Decode<'_> for RequestServerLogin {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let login_ok1 = i32::decode(r)?;
        let login_ok2 = i32::decode(r)?;
        let server_id = u8::decode(r)?;
        *r = &[];
        Ok(Self {
            login_ok1,
            login_ok2,
            server_id,
        })
    }
}

/// Everything the login server is prepared to receive from a client,
/// decoded from a decrypted frame.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ClientFrame {
    AuthGameGuard(AuthGameGuard),
    RequestAuthLogin(RequestAuthLogin),
    RequestServerList(RequestServerList),
    RequestServerLogin(RequestServerLogin),
}

impl ClientFrame {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::AuthGameGuard(_) => AuthGameGuard::OPCODE,
            Self::RequestAuthLogin(_) => RequestAuthLogin::OPCODE,
            Self::RequestServerList(_) => RequestServerList::OPCODE,
            Self::RequestServerLogin(_) => RequestServerLogin::OPCODE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthGameGuard(_) => AuthGameGuard::NAME,
            Self::RequestAuthLogin(_) => RequestAuthLogin::NAME,
            Self::RequestServerList(_) => RequestServerList::NAME,
            Self::RequestServerLogin(_) => RequestServerLogin::NAME,
        }
    }

    /// Decodes one frame: leading opcode, then the body.
    pub fn decode_frame(mut body: &[u8]) -> anyhow::Result<Self> {
        let r = &mut body;
        let opcode = u8::decode(r)?;
        let frame = match opcode {
            AuthGameGuard::OPCODE => Self::AuthGameGuard(AuthGameGuard::decode(r)?),
            RequestAuthLogin::OPCODE => Self::RequestAuthLogin(RequestAuthLogin::decode(r)?),
            RequestServerList::OPCODE => Self::RequestServerList(RequestServerList::decode(r)?),
            RequestServerLogin::OPCODE => Self::RequestServerLogin(RequestServerLogin::decode(r)?),
            other => bail!("unknown login client opcode 0x{other:02x}"),
        };
        Ok(frame)
    }
}
