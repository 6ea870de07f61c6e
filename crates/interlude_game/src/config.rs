use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Game server configuration, loaded from YAML with per-field defaults.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GameConfig {
    /// Interface for the game client listener.
    pub bind_address: String,
    /// Game client listener port.
    pub port: u16,
    /// Where the login server's game-server listener lives.
    pub login_server_host: String,
    pub login_server_port: u16,
    /// The id this installation wants in the realm list.
    pub server_id: u8,
    /// Take any free id if the desired one is held by someone else.
    pub accept_alternate_id: bool,
    /// Installation identity, hex-encoded. Proves ownership of the slot
    /// across reconnects.
    pub hex_id: String,
    pub max_players: i32,
    /// Hosts advertised to clients through the realm list.
    pub external_hosts: Vec<String>,
    /// debug | info | warn | error
    pub log_level: String,
    /// Seconds of client inactivity before the connection is dropped.
    pub read_timeout: u64,
    /// Seconds a single socket write may stall.
    pub write_timeout: u64,
    /// Frames queued per connection before overflow sets in.
    pub send_queue_size: usize,
    /// Seconds between reconnect attempts to the login server.
    pub login_reconnect_interval: u64,
    /// Simultaneous client connections.
    pub max_connections: usize,
    /// Where fresh characters enter the world.
    pub spawn_x: i32,
    pub spawn_y: i32,
    pub spawn_z: i32,
    /// Raid respawn window, seconds.
    pub raid_respawn_min: u64,
    pub raid_respawn_max: u64,
    pub database: DatabaseConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_owned(),
            port: interlude_protocol::GAME_CLIENT_PORT,
            login_server_host: "127.0.0.1".to_owned(),
            login_server_port: interlude_protocol::INTER_PORT,
            server_id: 1,
            accept_alternate_id: true,
            hex_id: "74657374".to_owned(),
            max_players: 5000,
            external_hosts: vec!["127.0.0.1".to_owned()],
            log_level: "info".to_owned(),
            read_timeout: 120,
            write_timeout: 5,
            send_queue_size: 256,
            login_reconnect_interval: 5,
            max_connections: 4096,
            spawn_x: -84_318,
            spawn_y: 244_579,
            spawn_z: -3_730,
            raid_respawn_min: 12 * 3600,
            raid_respawn_max: 36 * 3600,
            database: DatabaseConfig::default(),
        }
    }
}

/// Connection parameters for the world database. An empty URL selects the
/// in-memory stores.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
}

impl GameConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }

    pub fn login_reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.login_reconnect_interval)
    }

    /// The hex id as raw bytes; invalid hex falls back to the raw string
    /// bytes so a typo'd config still registers consistently.
    pub fn hex_id_bytes(&self) -> Vec<u8> {
        decode_hex(&self.hex_id).unwrap_or_else(|| self.hex_id.as_bytes().to_vec())
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || s.is_empty() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_line_up_with_the_protocol_ports() {
        let config = GameConfig::default();
        assert_eq!(config.port, 7777);
        assert_eq!(config.login_server_port, 9013);
    }

    #[test]
    fn hex_id_decodes_hex() {
        let config: GameConfig = serde_yaml::from_str("hex_id: deadbeef01\n").unwrap();
        assert_eq!(config.hex_id_bytes(), [0xde, 0xad, 0xbe, 0xef, 0x01]);
    }

    #[test]
    fn bad_hex_id_falls_back_to_raw_bytes() {
        let config: GameConfig = serde_yaml::from_str("hex_id: not-hex\n").unwrap();
        assert_eq!(config.hex_id_bytes(), b"not-hex");
    }
}
