use std::io::Write;

use crate::{Decode, Encode};

/// The four int32s issued at login success.
///
/// The login pair authorizes the license/server-list leg on the login
/// server; the play pair is what the game server presents when the client
/// reconnects to it. On the wire the play pair travels first.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SessionKey {
    pub login_ok1: i32,
    pub login_ok2: i32,
    pub play_ok1: i32,
    pub play_ok2: i32,
}

impl SessionKey {
    pub fn generate() -> Self {
        Self {
            login_ok1: rand::random(),
            login_ok2: rand::random(),
            play_ok1: rand::random(),
            play_ok2: rand::random(),
        }
    }

    /// Compares keys. Strict mode (the license-screen flow) matches all
    /// four components; lax mode matches only the play pair.
    pub fn matches(&self, other: &SessionKey, strict: bool) -> bool {
        let play = self.play_ok1 == other.play_ok1 && self.play_ok2 == other.play_ok2;
        if !strict {
            return play;
        }
        play && self.login_ok1 == other.login_ok1 && self.login_ok2 == other.login_ok2
    }
}

impl Encode for SessionKey {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.play_ok1.encode(&mut w)?;
        self.play_ok2.encode(&mut w)?;
        self.login_ok1.encode(&mut w)?;
        self.login_ok2.encode(&mut w)?;
        Ok(())
    }
}

impl Decode<'_> for SessionKey {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let play_ok1 = i32::decode(r)?;
        let play_ok2 = i32::decode(r)?;
        let login_ok1 = i32::decode(r)?;
        let login_ok2 = i32::decode(r)?;
        Ok(Self {
            login_ok1,
            login_ok2,
            play_ok1,
            play_ok2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_matching_needs_all_four() {
        let key = SessionKey {
            login_ok1: 1,
            login_ok2: 2,
            play_ok1: 3,
            play_ok2: 4,
        };

        let mut probe = key;
        assert!(key.matches(&probe, true));
        assert!(key.matches(&probe, false));

        probe.login_ok2 = 99;
        assert!(!key.matches(&probe, true));
        assert!(key.matches(&probe, false));

        probe.play_ok1 = 99;
        assert!(!key.matches(&probe, false));
    }

    #[test]
    fn wire_order_is_play_pair_first() {
        let key = SessionKey {
            login_ok1: 0x0101_0101,
            login_ok2: 0x0202_0202,
            play_ok1: 0x0303_0303,
            play_ok2: 0x0404_0404,
        };

        let mut buf = Vec::new();
        key.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0x03);
        assert_eq!(buf[4], 0x04);
        assert_eq!(buf[8], 0x01);
        assert_eq!(buf[12], 0x02);

        let mut r = &buf[..];
        assert_eq!(SessionKey::decode(&mut r).unwrap(), key);
    }
}
