use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Login server configuration, loaded from YAML. Every field has a default
/// so a missing file or an empty document still boots a usable server.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoginConfig {
    /// Interface for the client listener.
    pub bind_address: String,
    /// Client listener port.
    pub port: u16,
    /// Interface for the game-server listener.
    pub gs_listen_host: String,
    /// Game-server listener port.
    pub gs_listen_port: u16,
    /// Create an account on first login instead of rejecting it.
    pub auto_create_accounts: bool,
    /// Insert the license screen round-trip (LoginOk) before the server
    /// list.
    pub show_licence: bool,
    /// debug | info | warn | error
    pub log_level: String,
    /// Seconds of client inactivity before the connection is dropped.
    pub read_timeout: u64,
    /// Seconds a single socket write may stall.
    pub write_timeout: u64,
    /// Frames queued per connection before overflow sets in.
    pub send_queue_size: usize,
    /// Seconds an unconsumed session key stays valid.
    pub session_ttl: u64,
    /// Seconds between session sweeps.
    pub session_sweep_interval: u64,
    /// RSA-1024 pairs generated at startup and rotated per connection.
    pub rsa_pool_size: usize,
    /// Simultaneous client connections.
    pub max_connections: usize,
    pub database: DatabaseConfig,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_owned(),
            port: interlude_protocol::LOGIN_CLIENT_PORT,
            gs_listen_host: "0.0.0.0".to_owned(),
            gs_listen_port: interlude_protocol::INTER_PORT,
            auto_create_accounts: false,
            show_licence: true,
            log_level: "info".to_owned(),
            read_timeout: 120,
            write_timeout: 5,
            send_queue_size: 256,
            session_ttl: 60,
            session_sweep_interval: 30,
            rsa_pool_size: 10,
            max_connections: 1024,
            database: DatabaseConfig::default(),
        }
    }
}

/// Connection parameters for the account database. An empty URL selects
/// the in-memory store.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
}

impl LoginConfig {
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

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: LoginConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.port, 2106);
        assert_eq!(config.gs_listen_port, 9013);
        assert!(config.show_licence);
        assert!(!config.auto_create_accounts);
    }

    #[test]
    fn yaml_keys_override_defaults() {
        let config: LoginConfig = serde_yaml::from_str(
            "bind_address: 127.0.0.1\nauto_create_accounts: true\nshow_licence: false\nsession_ttl: 5\n",
        )
        .unwrap();
        assert_eq!(config.bind_address, "127.0.0.1");
        assert!(config.auto_create_accounts);
        assert!(!config.show_licence);
        assert_eq!(config.session_ttl(), Duration::from_secs(5));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_yaml::from_str::<LoginConfig>("prot: 9\n").is_err());
    }
}
