//! The Interlude game server.
//!
//! Hosts the world: the region grid, the visibility pipeline, client
//! fan-out, the tick loops that drive AI, respawns and boss lifecycles,
//! and the client leg of the login-server link. The binary in `main.rs`
//! wires this up from YAML config; [`GameServer::spawn`] is the
//! embeddable form the integration tests drive.

pub mod clients;
pub mod config;
pub mod login_link;
mod net;
pub mod npc;
pub mod raid;
mod server;
pub mod store;
pub mod ticks;

use std::sync::Arc;

use interlude_net::BufferPool;
use interlude_world::{ObjectIdAllocator, VisibilityEngine, WorldGrid};

pub use clients::ClientManager;
pub use config::GameConfig;
pub use login_link::LoginLink;
pub use npc::{NpcDirector, NpcSpawn};
pub use raid::{GrandBossRegistry, RaidRegistry};
pub use server::{GameServer, GameStores};
pub use ticks::TickScheduler;

use store::{CharacterStore, RaidPointsStore};

/// State shared by every task of the game process.
pub struct GameContext {
    pub config: GameConfig,
    pub grid: Arc<WorldGrid>,
    pub visibility: Arc<VisibilityEngine>,
    pub allocator: Arc<ObjectIdAllocator>,
    pub clients: Arc<ClientManager>,
    pub director: Arc<NpcDirector>,
    pub raids: Arc<RaidRegistry>,
    pub grand_bosses: Arc<GrandBossRegistry>,
    pub login_link: Arc<LoginLink>,
    pub characters: Arc<dyn CharacterStore>,
    pub raid_points: Arc<dyn RaidPointsStore>,
    /// Read-buffer slabs shared by every connection of this process.
    pub buffers: Arc<BufferPool>,
}
