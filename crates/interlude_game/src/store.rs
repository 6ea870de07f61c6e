//! Persistence contracts the game core consumes. The deployment backs
//! these with the world database; tests and the default binary run on the
//! in-memory implementations.

use async_trait::async_trait;
use interlude_world::Location;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Persisted state of a regular raid boss.
#[derive(Clone, Debug, PartialEq)]
pub struct RaidEntry {
    pub boss_id: i32,
    /// Unix seconds; 0 while the boss is alive.
    pub respawn_at: i64,
    pub is_alive: bool,
    pub hp: f64,
    pub mp: f64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GrandBossStatus {
    Alive,
    Dead,
    Fighting,
    Waiting,
}

/// Persisted state of a grand boss.
#[derive(Clone, Debug, PartialEq)]
pub struct GrandBossEntry {
    pub boss_id: i32,
    pub status: GrandBossStatus,
    /// Unix seconds; meaningful for Dead and Waiting.
    pub respawn_at: i64,
    pub loc: Location,
    pub hp: f64,
    pub mp: f64,
}

#[async_trait]
pub trait RaidStore: Send + Sync + 'static {
    async fn load_all(&self) -> anyhow::Result<Vec<RaidEntry>>;
    async fn save(&self, entry: &RaidEntry) -> anyhow::Result<()>;
    async fn delete(&self, boss_id: i32) -> anyhow::Result<()>;
}

#[async_trait]
pub trait GrandBossStore: Send + Sync + 'static {
    async fn load_all(&self) -> anyhow::Result<Vec<GrandBossEntry>>;
    async fn upsert(&self, entry: &GrandBossEntry) -> anyhow::Result<()>;
}

#[async_trait]
pub trait RaidPointsStore: Send + Sync + 'static {
    async fn add_points(&self, character_id: i32, boss_id: i32, points: i32) -> anyhow::Result<()>;
    async fn total_points(&self, character_id: i32) -> anyhow::Result<i32>;
    /// Top earners as (character id, total), descending.
    async fn top_players(&self, limit: usize) -> anyhow::Result<Vec<(i32, i32)>>;
    async fn reset_all(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait CharacterStore: Send + Sync + 'static {
    async fn character_count(&self, account: &str) -> anyhow::Result<i32>;
}

#[derive(Default)]
pub struct MemoryRaidStore {
    entries: RwLock<FxHashMap<i32, RaidEntry>>,
}

impl MemoryRaidStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, entry: RaidEntry) {
        self.entries.write().insert(entry.boss_id, entry);
    }
}

#[async_trait]
impl RaidStore for MemoryRaidStore {
    async fn load_all(&self) -> anyhow::Result<Vec<RaidEntry>> {
        Ok(self.entries.read().values().cloned().collect())
    }

    async fn save(&self, entry: &RaidEntry) -> anyhow::Result<()> {
        self.entries.write().insert(entry.boss_id, entry.clone());
        Ok(())
    }

    async fn delete(&self, boss_id: i32) -> anyhow::Result<()> {
        self.entries.write().remove(&boss_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryGrandBossStore {
    entries: RwLock<FxHashMap<i32, GrandBossEntry>>,
}

impl MemoryGrandBossStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, entry: GrandBossEntry) {
        self.entries.write().insert(entry.boss_id, entry);
    }

    pub fn get(&self, boss_id: i32) -> Option<GrandBossEntry> {
        self.entries.read().get(&boss_id).cloned()
    }
}

#[async_trait]
impl GrandBossStore for MemoryGrandBossStore {
    async fn load_all(&self) -> anyhow::Result<Vec<GrandBossEntry>> {
        Ok(self.entries.read().values().cloned().collect())
    }

    async fn upsert(&self, entry: &GrandBossEntry) -> anyhow::Result<()> {
        self.entries.write().insert(entry.boss_id, entry.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRaidPointsStore {
    points: RwLock<FxHashMap<i32, FxHashMap<i32, i32>>>,
}

impl MemoryRaidPointsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RaidPointsStore for MemoryRaidPointsStore {
    async fn add_points(&self, character_id: i32, boss_id: i32, points: i32) -> anyhow::Result<()> {
        *self
            .points
            .write()
            .entry(character_id)
            .or_default()
            .entry(boss_id)
            .or_default() += points;
        Ok(())
    }

    async fn total_points(&self, character_id: i32) -> anyhow::Result<i32> {
        Ok(self
            .points
            .read()
            .get(&character_id)
            .map(|per_boss| per_boss.values().sum())
            .unwrap_or(0))
    }

    async fn top_players(&self, limit: usize) -> anyhow::Result<Vec<(i32, i32)>> {
        let mut totals: Vec<(i32, i32)> = self
            .points
            .read()
            .iter()
            .map(|(character, per_boss)| (*character, per_boss.values().sum()))
            .collect();
        totals.sort_by_key(|(character, total)| (std::cmp::Reverse(*total), *character));
        totals.truncate(limit);
        Ok(totals)
    }

    async fn reset_all(&self) -> anyhow::Result<()> {
        self.points.write().clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCharacterStore {
    counts: RwLock<FxHashMap<String, i32>>,
}

impl MemoryCharacterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_count(&self, account: &str, count: i32) {
        self.counts.write().insert(account.to_owned(), count);
    }
}

#[async_trait]
impl CharacterStore for MemoryCharacterStore {
    async fn character_count(&self, account: &str) -> anyhow::Result<i32> {
        Ok(self.counts.read().get(account).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn raid_points_accumulate_and_rank() {
        let store = MemoryRaidPointsStore::new();
        store.add_points(1, 29001, 10).await.unwrap();
        store.add_points(1, 29006, 5).await.unwrap();
        store.add_points(2, 29001, 40).await.unwrap();

        assert_eq!(store.total_points(1).await.unwrap(), 15);
        assert_eq!(
            store.top_players(10).await.unwrap(),
            vec![(2, 40), (1, 15)]
        );

        store.reset_all().await.unwrap();
        assert_eq!(store.total_points(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn raid_store_round_trips() {
        let store = MemoryRaidStore::new();
        let entry = RaidEntry {
            boss_id: 25044,
            respawn_at: 0,
            is_alive: true,
            hp: 1000.0,
            mp: 500.0,
        };
        store.save(&entry).await.unwrap();
        assert_eq!(store.load_all().await.unwrap(), vec![entry]);

        store.delete(25044).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
