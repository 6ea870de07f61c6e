use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

/// Registered game server ids run 1..=127.
pub const MIN_SERVER_ID: u8 = 1;
pub const MAX_SERVER_ID: u8 = 127;

/// One registered game server. `authed` flips while a live connection
/// holds the slot; the row itself survives disconnects so the installation
/// can reclaim its id by hex id.
#[derive(Clone, Debug)]
pub struct GameServerInfo {
    pub id: u8,
    pub hex_id: Vec<u8>,
    pub port: u16,
    pub max_players: i32,
    pub hosts: Vec<String>,
    pub status: i32,
    pub age_limit: u8,
    pub server_type: i32,
    pub show_brackets: bool,
    pub authed: bool,
    pub current_players: u16,
}

impl GameServerInfo {
    pub fn new(id: u8, hex_id: Vec<u8>) -> Self {
        Self {
            id,
            hex_id,
            port: interlude_protocol::GAME_CLIENT_PORT,
            max_players: 0,
            hosts: Vec::new(),
            status: interlude_protocol::packets::inter_gs::server_status::STATUS_AUTO,
            age_limit: 0,
            server_type: 1,
            show_brackets: false,
            authed: false,
            current_players: 0,
        }
    }
}

/// The table of game servers keyed by id, plus the bitmap allocator that
/// makes concurrent first-free-id claims race-safe.
///
/// Reads (server list assembly, id validation) take the map read lock
/// only; the claim bitmap is touched exclusively on registration paths.
#[derive(Default)]
pub struct GsRegistry {
    servers: RwLock<FxHashMap<u8, Arc<RwLock<GameServerInfo>>>>,
    claimed: Mutex<u128>,
}

impl GsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `id` and installs `info`. False if the slot is already
    /// claimed — the caller lost the race and answers IDReserved.
    pub fn register(&self, id: u8, info: GameServerInfo) -> bool {
        if !(MIN_SERVER_ID..=MAX_SERVER_ID).contains(&id) {
            return false;
        }

        let mut claimed = self.claimed.lock();
        let bit = 1u128 << id;
        if *claimed & bit != 0 {
            return false;
        }
        *claimed |= bit;
        self.servers.write().insert(id, Arc::new(RwLock::new(info)));
        true
    }

    /// Claims the lowest free id and installs `info` under it.
    pub fn register_first_available(&self, mut info: GameServerInfo) -> Option<u8> {
        let mut claimed = self.claimed.lock();
        let id = (MIN_SERVER_ID..=MAX_SERVER_ID).find(|id| *claimed & (1u128 << id) == 0)?;

        *claimed |= 1u128 << id;
        info.id = id;
        self.servers.write().insert(id, Arc::new(RwLock::new(info)));
        Some(id)
    }

    pub fn get(&self, id: u8) -> Option<Arc<RwLock<GameServerInfo>>> {
        self.servers.read().get(&id).cloned()
    }

    /// Frees the slot entirely. Disconnects do not call this — they only
    /// clear `authed` — so a registered installation keeps its id.
    pub fn remove(&self, id: u8) {
        self.servers.write().remove(&id);
        *self.claimed.lock() &= !(1u128 << id);
    }

    /// Snapshot copy for server-list assembly.
    pub fn list(&self) -> Vec<GameServerInfo> {
        let servers = self.servers.read();
        let mut out: Vec<GameServerInfo> = servers.values().map(|s| s.read().clone()).collect();
        out.sort_by_key(|s| s.id);
        out
    }

    pub fn validate_hex_id(&self, id: u8, hex_id: &[u8]) -> bool {
        self.get(id).is_some_and(|s| s.read().hex_id == hex_id)
    }

    pub fn count(&self) -> usize {
        self.servers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_register_same_id_fails() {
        let reg = GsRegistry::new();
        assert!(reg.register(1, GameServerInfo::new(1, vec![1])));
        assert!(!reg.register(1, GameServerInfo::new(1, vec![2])));
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn out_of_range_ids_are_rejected() {
        let reg = GsRegistry::new();
        assert!(!reg.register(0, GameServerInfo::new(0, vec![])));
        assert!(!reg.register(128, GameServerInfo::new(128, vec![])));
    }

    #[test]
    fn first_available_skips_claimed_slots() {
        let reg = GsRegistry::new();
        assert!(reg.register(1, GameServerInfo::new(1, vec![1])));
        assert!(reg.register(2, GameServerInfo::new(2, vec![2])));

        let id = reg
            .register_first_available(GameServerInfo::new(0, vec![3]))
            .unwrap();
        assert_eq!(id, 3);
    }

    #[test]
    fn remove_frees_the_slot_for_reuse() {
        let reg = GsRegistry::new();
        assert!(reg.register(1, GameServerInfo::new(1, vec![1])));
        reg.remove(1);
        assert!(reg.register(1, GameServerInfo::new(1, vec![9])));
    }

    #[test]
    fn concurrent_first_available_never_collides() {
        let reg = Arc::new(GsRegistry::new());

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    reg.register_first_available(GameServerInfo::new(0, vec![i]))
                        .unwrap()
                })
            })
            .collect();

        let mut ids: Vec<u8> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 64, "an id was handed out twice");
        assert!(ids.iter().all(|id| (1..=127).contains(id)));
    }

    #[test]
    fn full_table_yields_none() {
        let reg = GsRegistry::new();
        for _ in 1..=127 {
            assert!(reg.register_first_available(GameServerInfo::new(0, vec![])).is_some());
        }
        assert!(reg.register_first_available(GameServerInfo::new(0, vec![])).is_none());
    }

    #[test]
    fn hex_id_validation() {
        let reg = GsRegistry::new();
        assert!(reg.register(5, GameServerInfo::new(5, vec![0xaa, 0xbb])));
        assert!(reg.validate_hex_id(5, &[0xaa, 0xbb]));
        assert!(!reg.validate_hex_id(5, &[0xaa]));
        assert!(!reg.validate_hex_id(6, &[0xaa, 0xbb]));
    }
}
