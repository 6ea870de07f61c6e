//! Raid and grand-boss lifecycle registries.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rand::Rng;
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::store::{
    GrandBossEntry, GrandBossStatus, GrandBossStore, RaidEntry, RaidPointsStore, RaidStore,
};

/// Injected by the assembly; receives the boss id to put back into the
/// world. The registries never touch the grid themselves.
pub type SpawnFn = Arc<dyn Fn(i32) + Send + Sync>;

/// Raid points posted to every participant of a boss kill.
pub const RAID_KILL_POINTS: i32 = 250;

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Regular raid bosses: alive or waiting out a persisted respawn window.
/// Every state change is written through to the store synchronously.
pub struct RaidRegistry {
    store: Arc<dyn RaidStore>,
    points: Arc<dyn RaidPointsStore>,
    entries: RwLock<FxHashMap<i32, RaidEntry>>,
    respawn_window: RangeInclusive<i64>,
    spawn: SpawnFn,
}

impl RaidRegistry {
    pub fn new(
        store: Arc<dyn RaidStore>,
        points: Arc<dyn RaidPointsStore>,
        respawn_window: RangeInclusive<i64>,
        spawn: SpawnFn,
    ) -> Self {
        Self {
            store,
            points,
            entries: RwLock::new(FxHashMap::default()),
            respawn_window,
            spawn,
        }
    }

    /// Loads persisted state. Entries whose respawn time has already
    /// passed spawn immediately; the rest wait for the respawn loop.
    pub async fn init(&self) -> anyhow::Result<()> {
        let now = now_secs();
        let loaded = self.store.load_all().await?;
        let mut spawned = 0usize;

        let mut entries = self.entries.write();
        for mut entry in loaded {
            if entry.is_alive || entry.respawn_at <= now {
                entry.is_alive = true;
                entry.respawn_at = 0;
                (self.spawn)(entry.boss_id);
                spawned += 1;
            }
            entries.insert(entry.boss_id, entry);
        }
        drop(entries);

        info!(spawned, total = self.entries.read().len(), "raid bosses initialized");
        Ok(())
    }

    /// Marks a boss dead, schedules its respawn uniformly inside the
    /// configured window, and credits every participating character.
    /// Persisted before returning.
    pub async fn on_boss_death(&self, boss_id: i32, participants: &[i32]) -> anyhow::Result<()> {
        let respawn_at = now_secs() + rand::thread_rng().gen_range(self.respawn_window.clone());

        let entry = {
            let mut entries = self.entries.write();
            let entry = entries.entry(boss_id).or_insert_with(|| RaidEntry {
                boss_id,
                respawn_at: 0,
                is_alive: true,
                hp: 0.0,
                mp: 0.0,
            });
            entry.is_alive = false;
            entry.respawn_at = respawn_at;
            entry.clone()
        };

        self.store.save(&entry).await?;
        award_raid_points(&*self.points, boss_id, participants).await;
        info!(boss_id, respawn_at, "raid boss died");
        Ok(())
    }

    /// Ids whose respawn time has passed.
    pub fn check_pending_respawns(&self) -> Vec<i32> {
        let now = now_secs();
        self.entries
            .read()
            .values()
            .filter(|e| !e.is_alive && e.respawn_at <= now)
            .map(|e| e.boss_id)
            .collect()
    }

    /// The respawn loop body: spawn everything due, persisting each flip.
    pub async fn respawn_due(&self) {
        for boss_id in self.check_pending_respawns() {
            let entry = {
                let mut entries = self.entries.write();
                let Some(entry) = entries.get_mut(&boss_id) else {
                    continue;
                };
                entry.is_alive = true;
                entry.respawn_at = 0;
                entry.clone()
            };

            if let Err(e) = self.store.save(&entry).await {
                warn!(boss_id, "failed to persist raid respawn: {e:#}");
            }
            (self.spawn)(boss_id);
            info!(boss_id, "raid boss respawned");
        }
    }

    pub fn is_alive(&self, boss_id: i32) -> bool {
        self.entries.read().get(&boss_id).is_some_and(|e| e.is_alive)
    }
}

/// Grand bosses: the four-state machine persisted on a timer rather than
/// per transition.
pub struct GrandBossRegistry {
    store: Arc<dyn GrandBossStore>,
    points: Arc<dyn RaidPointsStore>,
    entries: RwLock<FxHashMap<i32, GrandBossEntry>>,
    spawn: SpawnFn,
}

impl GrandBossRegistry {
    pub fn new(
        store: Arc<dyn GrandBossStore>,
        points: Arc<dyn RaidPointsStore>,
        spawn: SpawnFn,
    ) -> Self {
        Self {
            store,
            points,
            entries: RwLock::new(FxHashMap::default()),
            spawn,
        }
    }

    /// Loads persisted state and applies the restart policy per status:
    /// ALIVE spawns now; DEAD with an elapsed window respawns now; DEAD
    /// with a future window waits; FIGHTING is forfeit by the restart and
    /// treated as ALIVE; WAITING keeps waiting for its stored time.
    pub async fn init(&self) -> anyhow::Result<()> {
        let now = now_secs();
        let loaded = self.store.load_all().await?;

        let mut entries = self.entries.write();
        for mut entry in loaded {
            match entry.status {
                GrandBossStatus::Alive => (self.spawn)(entry.boss_id),
                GrandBossStatus::Fighting => {
                    entry.status = GrandBossStatus::Alive;
                    (self.spawn)(entry.boss_id);
                }
                GrandBossStatus::Dead if entry.respawn_at <= now => {
                    entry.status = GrandBossStatus::Alive;
                    entry.respawn_at = 0;
                    (self.spawn)(entry.boss_id);
                }
                GrandBossStatus::Dead | GrandBossStatus::Waiting => {}
            }
            entries.insert(entry.boss_id, entry);
        }
        drop(entries);

        info!(total = self.entries.read().len(), "grand bosses initialized");
        Ok(())
    }

    pub fn set_status(&self, boss_id: i32, status: GrandBossStatus) {
        if let Some(entry) = self.entries.write().get_mut(&boss_id) {
            entry.status = status;
        }
    }

    /// Marks a grand boss dead with an absolute respawn time and credits
    /// every participating character. Entry persistence happens on the
    /// save timer (and shutdown), not here.
    pub async fn on_boss_death(&self, boss_id: i32, respawn_at: i64, participants: &[i32]) {
        let known = {
            let mut entries = self.entries.write();
            match entries.get_mut(&boss_id) {
                Some(entry) => {
                    entry.status = GrandBossStatus::Dead;
                    entry.respawn_at = respawn_at;
                    true
                }
                None => false,
            }
        };

        if known {
            award_raid_points(&*self.points, boss_id, participants).await;
            info!(boss_id, respawn_at, "grand boss died");
        }
    }

    pub fn status_of(&self, boss_id: i32) -> Option<GrandBossStatus> {
        self.entries.read().get(&boss_id).map(|e| e.status)
    }

    /// Ids whose respawn time has passed while dead or waiting.
    pub fn check_pending_respawns(&self) -> Vec<i32> {
        let now = now_secs();
        self.entries
            .read()
            .values()
            .filter(|e| {
                matches!(e.status, GrandBossStatus::Dead | GrandBossStatus::Waiting)
                    && e.respawn_at <= now
            })
            .map(|e| e.boss_id)
            .collect()
    }

    /// The respawn loop body.
    pub fn respawn_due(&self) {
        for boss_id in self.check_pending_respawns() {
            {
                let mut entries = self.entries.write();
                let Some(entry) = entries.get_mut(&boss_id) else {
                    continue;
                };
                entry.status = GrandBossStatus::Alive;
                entry.respawn_at = 0;
            }
            (self.spawn)(boss_id);
            info!(boss_id, "grand boss respawned");
        }
    }

    /// Writes every entry through to the store. The save loop runs this
    /// every five minutes, and the orchestrator runs it once more on the
    /// way down.
    pub async fn save_all(&self) {
        let snapshot: Vec<GrandBossEntry> = self.entries.read().values().cloned().collect();
        for entry in &snapshot {
            if let Err(e) = self.store.upsert(entry).await {
                warn!(boss_id = entry.boss_id, "failed to persist grand boss: {e:#}");
            }
        }
    }
}

/// Posts the kill to every participant; a store failure costs the points,
/// not the kill.
async fn award_raid_points(points: &dyn RaidPointsStore, boss_id: i32, participants: &[i32]) {
    for &character in participants {
        if let Err(e) = points.add_points(character, boss_id, RAID_KILL_POINTS).await {
            warn!(character, boss_id, "failed to post raid points: {e:#}");
        }
    }
}
