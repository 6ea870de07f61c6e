//! The Interlude login server.
//!
//! Owns the client-facing authentication flow (Init → GameGuard →
//! credentials → server list → play authorization), the registry of game
//! servers and the session keys that bridge the two. The binary in
//! `main.rs` wires this up with a YAML config and signal handling;
//! [`LoginServer::spawn`] is the embeddable form the integration tests
//! drive on ephemeral ports.

pub mod account;
mod client;
pub mod config;
mod gs_link;
pub mod registry;
mod server;
pub mod session;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use interlude_crypt::RsaKeyPool;
use interlude_net::BufferPool;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

pub use account::{hash_password, Account, AccountStore, MemoryAccountStore};
pub use config::LoginConfig;
pub use gs_link::GsLinks;
pub use registry::{GameServerInfo, GsRegistry};
pub use server::LoginServer;
pub use session::SessionRegistry;

/// State shared by every connection task of the login process.
pub struct LoginContext {
    pub config: LoginConfig,
    pub sessions: SessionRegistry,
    pub accounts: Arc<dyn AccountStore>,
    pub gameservers: GsRegistry,
    pub links: GsLinks,
    /// Accounts currently attached to a game server, for double-login
    /// kicks and server-list population counts.
    pub in_game: RwLock<FxHashMap<String, u8>>,
    /// Read-buffer slabs shared by every connection of this process.
    pub buffers: Arc<BufferPool>,
    keys: RsaKeyPool,
    session_ids: AtomicI32,
}

impl LoginContext {
    /// Builds the context, generating the RSA pool up front.
    pub fn new(config: LoginConfig, accounts: Arc<dyn AccountStore>) -> anyhow::Result<Arc<Self>> {
        let keys = RsaKeyPool::generate(config.rsa_pool_size)?;
        Ok(Arc::new(Self {
            config,
            sessions: SessionRegistry::new(),
            accounts,
            gameservers: GsRegistry::new(),
            links: GsLinks::default(),
            in_game: RwLock::new(FxHashMap::default()),
            buffers: Arc::new(BufferPool::for_packets()),
            keys,
            session_ids: AtomicI32::new(1),
        }))
    }

    pub(crate) fn next_session_id(&self) -> i32 {
        self.session_ids.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn rsa_keys(&self) -> &RsaKeyPool {
        &self.keys
    }

    /// Players attached to the given game server right now.
    pub fn players_on(&self, server_id: u8) -> u16 {
        self.in_game
            .read()
            .values()
            .filter(|&&id| id == server_id)
            .count() as u16
    }
}
