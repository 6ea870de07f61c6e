use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::error;

use crate::ShutdownRx;

#[derive(Clone, Copy, Debug)]
pub struct AcceptConfig {
    /// Simultaneous connections this listener will hold open.
    pub max_connections: usize,
}

impl Default for AcceptConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
        }
    }
}

/// Accepts connections until shutdown, spawning `handler` per peer.
///
/// A semaphore bounds live connections; the permit rides along with the
/// handler task and frees the slot when the connection ends. On shutdown
/// the loop returns, which closes the listener — established connections
/// are the orchestrator's problem, not this loop's.
pub async fn accept_loop<F, Fut>(
    listener: TcpListener,
    mut shutdown: ShutdownRx,
    config: AcceptConfig,
    handler: F,
) where
    F: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let sema = Arc::new(Semaphore::new(config.max_connections));

    loop {
        let permit = tokio::select! {
            permit = sema.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = shutdown.changed() => return,
        };

        let (stream, remote_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!("failed to accept incoming connection: {e}");
                    continue;
                }
            },
            _ = shutdown.changed() => return,
        };

        if let Err(e) = stream.set_nodelay(true) {
            error!("failed to set TCP_NODELAY: {e}");
        }

        let fut = handler(stream, remote_addr);
        tokio::spawn(async move {
            fut.await;
            drop(permit);
        });
    }
}
