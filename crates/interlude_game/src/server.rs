use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use interlude_net::{accept_loop, shutdown_channel, AcceptConfig, BufferPool};
use interlude_world::{
    GridConfig, ObjectIdAllocator, VisibilityConfig, VisibilityEngine, WorldGrid,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::clients::ClientManager;
use crate::config::GameConfig;
use crate::login_link::LoginLink;
use crate::npc::NpcDirector;
use crate::raid::{GrandBossRegistry, RaidRegistry, SpawnFn};
use crate::store::{
    CharacterStore, GrandBossStore, MemoryCharacterStore, MemoryGrandBossStore,
    MemoryRaidPointsStore, MemoryRaidStore, RaidPointsStore, RaidStore,
};
use crate::ticks::{intervals, TickScheduler};
use crate::{net, GameContext};

/// The pluggable persistence backends, defaulting to the in-memory set.
pub struct GameStores {
    pub raids: Arc<dyn RaidStore>,
    pub grand_bosses: Arc<dyn GrandBossStore>,
    pub raid_points: Arc<dyn RaidPointsStore>,
    pub characters: Arc<dyn CharacterStore>,
}

impl Default for GameStores {
    fn default() -> Self {
        Self {
            raids: Arc::new(MemoryRaidStore::new()),
            grand_bosses: Arc::new(MemoryGrandBossStore::new()),
            raid_points: Arc::new(MemoryRaidPointsStore::new()),
            characters: Arc::new(MemoryCharacterStore::new()),
        }
    }
}

/// A running game server: the client listener, the login-server link and
/// the full tick loop set, under one shutdown switch.
pub struct GameServer {
    pub client_addr: SocketAddr,
    ctx: Arc<GameContext>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    link_task: JoinHandle<()>,
    scheduler: TickScheduler,
}

impl GameServer {
    pub async fn spawn(config: GameConfig, stores: GameStores) -> anyhow::Result<Self> {
        let grid = Arc::new(WorldGrid::new(GridConfig::default()));
        let visibility = Arc::new(VisibilityEngine::new(VisibilityConfig::default()));
        let allocator = Arc::new(ObjectIdAllocator::new());
        let clients = Arc::new(ClientManager::new(grid.clone(), visibility.clone()));
        let director = Arc::new(NpcDirector::new(
            grid.clone(),
            visibility.clone(),
            clients.clone(),
            allocator.clone(),
        ));

        // Boss respawns re-enter the world through the director; the
        // registries never see the grid.
        let raid_spawn: SpawnFn = {
            let director = director.clone();
            Arc::new(move |boss_id| {
                director.spawn_boss(boss_id);
            })
        };

        let raids = Arc::new(RaidRegistry::new(
            stores.raids.clone(),
            stores.raid_points.clone(),
            config.raid_respawn_min as i64..=config.raid_respawn_max as i64,
            raid_spawn.clone(),
        ));
        let grand_bosses = Arc::new(GrandBossRegistry::new(
            stores.grand_bosses.clone(),
            stores.raid_points.clone(),
            raid_spawn,
        ));

        raids.init().await?;
        grand_bosses.init().await?;

        let buffers = Arc::new(BufferPool::for_packets());
        let login_link = LoginLink::new(config.clone(), stores.characters.clone(), buffers.clone());

        let ctx = Arc::new(GameContext {
            config: config.clone(),
            grid: grid.clone(),
            visibility: visibility.clone(),
            allocator,
            clients: clients.clone(),
            director: director.clone(),
            raids: raids.clone(),
            grand_bosses: grand_bosses.clone(),
            login_link: login_link.clone(),
            characters: stores.characters,
            raid_points: stores.raid_points,
            buffers,
        });

        let listener = TcpListener::bind((config.bind_address.as_str(), config.port)).await?;
        let client_addr = listener.local_addr()?;
        info!(%client_addr, "game server listening");

        let (shutdown_tx, shutdown_rx) = shutdown_channel();

        let accept_task = {
            let ctx = ctx.clone();
            let accept = AcceptConfig {
                max_connections: config.max_connections,
            };
            tokio::spawn(accept_loop(
                listener,
                shutdown_rx.clone(),
                accept,
                move |stream, addr| net::handle_game_client(ctx.clone(), stream, addr),
            ))
        };

        let link_task = tokio::spawn(login_link.clone().run(shutdown_rx.clone()));

        let mut scheduler = TickScheduler::new(shutdown_rx);

        {
            let director = director.clone();
            scheduler.spawn_loop("ai", intervals::AI, move || {
                let director = director.clone();
                async move { director.ai_tick() }
            });
        }
        {
            let director = director.clone();
            scheduler.spawn_loop("respawn", intervals::RESPAWN, move || {
                let director = director.clone();
                async move { director.lifecycle_tick() }
            });
        }
        {
            let director = director.clone();
            scheduler.spawn_loop("attack_stance", intervals::ATTACK_STANCE, move || {
                let director = director.clone();
                async move { director.stance_tick() }
            });
        }
        {
            let visibility = visibility.clone();
            let grid = grid.clone();
            scheduler.spawn_loop("visibility", intervals::VISIBILITY, move || {
                let visibility = visibility.clone();
                let grid = grid.clone();
                async move { visibility.refresh_due(&grid) }
            });
        }
        {
            let raids = raids.clone();
            scheduler.spawn_loop("raid_respawn", intervals::RAID_RESPAWN, move || {
                let raids = raids.clone();
                async move { raids.respawn_due().await }
            });
        }
        {
            let grand_bosses = grand_bosses.clone();
            scheduler.spawn_loop(
                "grand_boss_respawn",
                intervals::GRAND_BOSS_RESPAWN,
                move || {
                    let grand_bosses = grand_bosses.clone();
                    async move { grand_bosses.respawn_due() }
                },
            );
        }
        {
            let for_ticks = grand_bosses.clone();
            let for_final = grand_bosses;
            scheduler.spawn_loop_with_final(
                "grand_boss_save",
                intervals::GRAND_BOSS_SAVE,
                move || {
                    let grand_bosses = for_ticks.clone();
                    async move { grand_bosses.save_all().await }
                },
                move || async move { for_final.save_all().await },
            );
        }

        Ok(Self {
            client_addr,
            ctx,
            shutdown_tx,
            accept_task,
            link_task,
            scheduler,
        })
    }

    pub fn context(&self) -> &Arc<GameContext> {
        &self.ctx
    }

    /// Ordered shutdown: stop accepting, stop the loops (the save loop
    /// flushes once more), then drop the link.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        let mut accept = self.accept_task;
        if tokio::time::timeout(Duration::from_secs(5), &mut accept)
            .await
            .is_err()
        {
            accept.abort();
        }

        self.scheduler.join().await;

        let mut link = self.link_task;
        if tokio::time::timeout(Duration::from_secs(5), &mut link)
            .await
            .is_err()
        {
            link.abort();
        }
        info!("game server stopped");
    }
}
