//! Connection registry and broadcast fan-out.

use std::sync::Arc;

use bytes::Bytes;
use interlude_net::{encode_packet_body, Outbox};
use interlude_protocol::{Encode, Packet};
use interlude_world::{ObjectId, VisibilityEngine, WorldGrid};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum SendError {
    #[error("player {0:?} has no connection")]
    UnknownPlayer(ObjectId),
    #[error("outbound queue overflowed; packet dropped")]
    Dropped,
}

#[derive(Clone)]
struct ClientHandle {
    account: String,
    outbox: Outbox,
}

/// Owns the connection → player mapping and every packet fan-out path.
///
/// Broadcasts encode the packet once and hand the same body to each
/// recipient's outbox; sealing (and therefore cipher state) stays inside
/// each connection's writer task.
pub struct ClientManager {
    grid: Arc<WorldGrid>,
    visibility: Arc<VisibilityEngine>,
    clients: RwLock<FxHashMap<ObjectId, ClientHandle>>,
}

impl ClientManager {
    pub fn new(grid: Arc<WorldGrid>, visibility: Arc<VisibilityEngine>) -> Self {
        Self {
            grid,
            visibility,
            clients: RwLock::new(FxHashMap::default()),
        }
    }

    /// Attaches a connection to a player object and starts tracking its
    /// visibility.
    pub fn register(&self, player: ObjectId, account: &str, outbox: Outbox) {
        self.clients.write().insert(
            player,
            ClientHandle {
                account: account.to_owned(),
                outbox,
            },
        );
        self.visibility.add_player(player);
    }

    /// Severs a connection: visibility tracking ends and the player
    /// leaves the grid. Grid removal lives here on purpose — a player
    /// exists in the world exactly as long as its connection does.
    pub fn unregister(&self, player: ObjectId) -> Option<String> {
        let handle = self.clients.write().remove(&player)?;
        self.visibility.remove_player(player);
        self.grid.remove_object(player);
        debug!(account = %handle.account, "client unregistered");
        Some(handle.account)
    }

    pub fn account_of(&self, player: ObjectId) -> Option<String> {
        self.clients.read().get(&player).map(|h| h.account.clone())
    }

    pub fn count(&self) -> usize {
        self.clients.read().len()
    }

    pub fn accounts(&self) -> Vec<String> {
        self.clients.read().values().map(|h| h.account.clone()).collect()
    }

    /// Queues a pre-encoded body for one player.
    pub fn send_to_player(&self, player: ObjectId, body: Bytes) -> Result<(), SendError> {
        let clients = self.clients.read();
        let handle = clients.get(&player).ok_or(SendError::UnknownPlayer(player))?;
        if handle.outbox.send(body) {
            Ok(())
        } else {
            Err(SendError::Dropped)
        }
    }

    pub fn send_packet_to_player<P>(&self, player: ObjectId, pkt: &P) -> Result<(), SendError>
    where
        P: Packet + Encode,
    {
        let body = encode_packet_body(pkt).map_err(|e| {
            warn!("failed to encode '{}': {e:#}", P::NAME);
            SendError::Dropped
        })?;
        self.send_to_player(player, body)
    }

    /// Sends to everyone currently observing `source`, resolved through
    /// the reverse-observer index in O(observers).
    pub fn broadcast_to_visible(&self, source: ObjectId, body: &Bytes) -> usize {
        let mut delivered = 0;
        let clients = self.clients.read();
        for observer in self.visibility.observers_of(source) {
            if let Some(handle) = clients.get(&observer) {
                if handle.outbox.send(body.clone()) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Sends to every tracked player in visual range of a position,
    /// resolved through the grid regions around it. For sources that are
    /// no longer in the world — a corpse that just despawned, a ground
    /// effect.
    pub fn broadcast_from_position(&self, x: i32, y: i32, body: &Bytes) -> usize {
        let mut delivered = 0;
        let clients = self.clients.read();
        for observer in self.visibility.observers_at(&self.grid, x, y) {
            if let Some(handle) = clients.get(&observer) {
                if handle.outbox.send(body.clone()) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub fn broadcast_packet_to_visible<P>(&self, source: ObjectId, pkt: &P) -> usize
    where
        P: Packet + Encode,
    {
        match encode_packet_body(pkt) {
            Ok(body) => self.broadcast_to_visible(source, &body),
            Err(e) => {
                warn!("failed to encode '{}': {e:#}", P::NAME);
                0
            }
        }
    }

    pub fn broadcast_packet_from_position<P>(&self, x: i32, y: i32, pkt: &P) -> usize
    where
        P: Packet + Encode,
    {
        match encode_packet_body(pkt) {
            Ok(body) => self.broadcast_from_position(x, y, &body),
            Err(e) => {
                warn!("failed to encode '{}': {e:#}", P::NAME);
                0
            }
        }
    }
}
