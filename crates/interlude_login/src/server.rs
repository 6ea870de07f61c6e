use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use interlude_net::{accept_loop, shutdown_channel, AcceptConfig};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::account::AccountStore;
use crate::config::LoginConfig;
use crate::{client, gs_link, LoginContext};

/// A running login server: both listeners plus the session sweeper,
/// under one shutdown switch.
///
/// The binary builds one from the loaded config; integration tests build
/// one on ephemeral ports and talk to `client_addr`/`gs_addr` directly.
pub struct LoginServer {
    pub client_addr: SocketAddr,
    pub gs_addr: SocketAddr,
    ctx: Arc<LoginContext>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl LoginServer {
    pub async fn spawn(
        config: LoginConfig,
        accounts: Arc<dyn AccountStore>,
    ) -> anyhow::Result<Self> {
        // Key generation is CPU-bound and takes a while for a full pool;
        // keep it off the runtime workers.
        let ctx = {
            let config = config.clone();
            tokio::task::spawn_blocking(move || LoginContext::new(config, accounts)).await??
        };

        let client_listener =
            TcpListener::bind((config.bind_address.as_str(), config.port)).await?;
        let gs_listener =
            TcpListener::bind((config.gs_listen_host.as_str(), config.gs_listen_port)).await?;

        let client_addr = client_listener.local_addr()?;
        let gs_addr = gs_listener.local_addr()?;
        info!(%client_addr, %gs_addr, "login server listening");

        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let mut tasks = Vec::new();

        {
            let ctx = ctx.clone();
            let accept = AcceptConfig {
                max_connections: config.max_connections,
            };
            tasks.push(tokio::spawn(accept_loop(
                client_listener,
                shutdown_rx.clone(),
                accept,
                move |stream, addr| client::handle_client(ctx.clone(), stream, addr),
            )));
        }

        {
            let ctx = ctx.clone();
            // Game servers are few; a small cap keeps strays out.
            let accept = AcceptConfig {
                max_connections: 128,
            };
            tasks.push(tokio::spawn(accept_loop(
                gs_listener,
                shutdown_rx.clone(),
                accept,
                move |stream, addr| gs_link::handle_gameserver(ctx.clone(), stream, addr),
            )));
        }

        tasks.push(tokio::spawn(session_sweeper(ctx.clone(), shutdown_rx)));

        Ok(Self {
            client_addr,
            gs_addr,
            ctx,
            shutdown_tx,
            tasks,
        })
    }

    pub fn context(&self) -> &Arc<LoginContext> {
        &self.ctx
    }

    /// Flips the shutdown switch and waits briefly for the tasks to wind
    /// down; stragglers are aborted.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for mut task in self.tasks {
            if tokio::time::timeout(Duration::from_secs(5), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
        info!("login server stopped");
    }
}

async fn session_sweeper(ctx: Arc<LoginContext>, mut shutdown: interlude_net::ShutdownRx) {
    let mut ticker = tokio::time::interval(ctx.config.session_sweep_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                ctx.sessions.clean_expired(ctx.config.session_ttl());
            }
            _ = shutdown.changed() => return,
        }
    }
}
