use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::grid::WorldGrid;
use crate::object::{Location, ObjectId};

/// Distance classes and refresh cadence.
#[derive(Clone, Copy, Debug)]
pub struct VisibilityConfig {
    pub near_radius: i32,
    pub medium_radius: i32,
    pub far_radius: i32,
    /// A cache older than this is due for recomputation.
    pub max_age: Duration,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            near_radius: 600,
            medium_radius: 1200,
            far_radius: 2000,
            max_age: Duration::from_millis(200),
        }
    }
}

/// Which distance class an observed object fell into.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Bucket {
    Near,
    Medium,
    Far,
}

/// One player's observed set, immutable once published. The buckets are
/// disjoint; an object appears in exactly one.
#[derive(Clone, Debug)]
pub struct VisibilityCache {
    pub near: Vec<ObjectId>,
    pub medium: Vec<ObjectId>,
    pub far: Vec<ObjectId>,
    pub as_of: Instant,
}

impl VisibilityCache {
    fn empty() -> Self {
        Self {
            near: Vec::new(),
            medium: Vec::new(),
            far: Vec::new(),
            as_of: Instant::now(),
        }
    }

    /// The bucket `id` currently sits in, if observed at all.
    pub fn bucket_of(&self, id: ObjectId) -> Option<Bucket> {
        if self.near.contains(&id) {
            Some(Bucket::Near)
        } else if self.medium.contains(&id) {
            Some(Bucket::Medium)
        } else if self.far.contains(&id) {
            Some(Bucket::Far)
        } else {
            None
        }
    }

    pub fn iter_all(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.near
            .iter()
            .chain(&self.medium)
            .chain(&self.far)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.near.len() + self.medium.len() + self.far.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct PlayerSight {
    cache: RwLock<Arc<VisibilityCache>>,
    never_computed: AtomicBool,
}

/// Maintains per-player observed-set snapshots and the reverse index from
/// any object to the players observing it.
///
/// The engine only ever reads the grid. Caches are published by swapping
/// an `Arc` under a short write lock, so a concurrent reader holds either
/// the old snapshot or the new one, never a blend.
pub struct VisibilityEngine {
    config: VisibilityConfig,
    players: RwLock<FxHashMap<ObjectId, Arc<PlayerSight>>>,
    observers: RwLock<FxHashMap<ObjectId, FxHashSet<ObjectId>>>,
}

impl VisibilityEngine {
    pub fn new(config: VisibilityConfig) -> Self {
        Self {
            config,
            players: RwLock::new(FxHashMap::default()),
            observers: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &VisibilityConfig {
        &self.config
    }

    /// Starts tracking a player. Its first snapshot is computed on the
    /// next refresh.
    pub fn add_player(&self, id: ObjectId) {
        self.players.write().insert(
            id,
            Arc::new(PlayerSight {
                cache: RwLock::new(Arc::new(VisibilityCache::empty())),
                never_computed: AtomicBool::new(true),
            }),
        );
    }

    /// Stops tracking a player and clears it out of every reverse-observer
    /// set, both as observer and as observed.
    pub fn remove_player(&self, id: ObjectId) {
        let sight = self.players.write().remove(&id);

        let mut observers = self.observers.write();
        if let Some(sight) = sight {
            let cache = sight.cache.read().clone();
            for observed in cache.iter_all() {
                if let Some(set) = observers.get_mut(&observed) {
                    set.remove(&id);
                    if set.is_empty() {
                        observers.remove(&observed);
                    }
                }
            }
        }
        observers.remove(&id);
    }

    /// Forgets a non-player object that left the world. Observer entries
    /// for it disappear; player caches catch up on their next refresh.
    pub fn remove_object(&self, id: ObjectId) {
        self.observers.write().remove(&id);
    }

    /// The current snapshot for `player`.
    pub fn cache_of(&self, player: ObjectId) -> Option<Arc<VisibilityCache>> {
        let players = self.players.read();
        players.get(&player).map(|s| s.cache.read().clone())
    }

    /// Players currently observing `object`, as a copy.
    pub fn observers_of(&self, object: ObjectId) -> Vec<ObjectId> {
        self.observers
            .read()
            .get(&object)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Players whose snapshot could include the position: tracked players
    /// within the far radius, resolved through the grid's neighbor
    /// regions.
    pub fn observers_at(&self, grid: &WorldGrid, x: i32, y: i32) -> Vec<ObjectId> {
        let here = Location::new(x, y, 0);
        let far_sq = i64::from(self.config.far_radius) * i64::from(self.config.far_radius);

        let players = self.players.read();
        let mut out = Vec::new();
        grid.for_each_nearby(&here, |id, loc| {
            if players.contains_key(&id) && here.planar_distance_sq(loc) <= far_sq {
                out.push(id);
            }
        });
        out
    }

    /// Recomputes every tracked player's snapshot whose cache is older
    /// than `max_age` (or was never computed). Called from the visibility
    /// tick loop.
    pub fn refresh_due(&self, grid: &WorldGrid) {
        let now = Instant::now();
        let due: Vec<(ObjectId, Arc<PlayerSight>)> = {
            let players = self.players.read();
            players
                .iter()
                .filter(|(_, sight)| {
                    sight.never_computed.load(Ordering::Relaxed)
                        || now.duration_since(sight.cache.read().as_of) >= self.config.max_age
                })
                .map(|(id, sight)| (*id, sight.clone()))
                .collect()
        };

        for (id, sight) in due {
            self.refresh_player(grid, id, &sight);
        }
    }

    /// Recomputes every tracked player's snapshot unconditionally.
    pub fn refresh_all(&self, grid: &WorldGrid) {
        let entries: Vec<(ObjectId, Arc<PlayerSight>)> = {
            let players = self.players.read();
            players.iter().map(|(id, s)| (*id, s.clone())).collect()
        };
        for (id, sight) in entries {
            self.refresh_player(grid, id, &sight);
        }
    }

    fn refresh_player(&self, grid: &WorldGrid, player: ObjectId, sight: &PlayerSight) {
        let Some(here) = grid.location_of(player) else {
            // Not placed yet (or already gone); leave the old snapshot.
            return;
        };

        let near_sq = i64::from(self.config.near_radius) * i64::from(self.config.near_radius);
        let med_sq = i64::from(self.config.medium_radius) * i64::from(self.config.medium_radius);
        let far_sq = i64::from(self.config.far_radius) * i64::from(self.config.far_radius);

        let mut fresh = VisibilityCache::empty();
        grid.for_each_nearby(&here, |id, loc| {
            if id == player {
                return;
            }
            let d = here.planar_distance_sq(loc);
            if d <= near_sq {
                fresh.near.push(id);
            } else if d <= med_sq {
                fresh.medium.push(id);
            } else if d <= far_sq {
                fresh.far.push(id);
            }
        });

        let fresh = Arc::new(fresh);
        let old = {
            let mut slot = sight.cache.write();
            std::mem::replace(&mut *slot, fresh.clone())
        };
        sight.never_computed.store(false, Ordering::Relaxed);

        self.apply_diff(player, &old, &fresh);
        trace!(player = player.0, observed = fresh.len(), "visibility refreshed");
    }

    fn apply_diff(&self, player: ObjectId, old: &VisibilityCache, new: &VisibilityCache) {
        let old_set: FxHashSet<ObjectId> = old.iter_all().collect();
        let new_set: FxHashSet<ObjectId> = new.iter_all().collect();

        if old_set == new_set {
            return;
        }

        let mut observers = self.observers.write();
        for added in new_set.difference(&old_set) {
            observers.entry(*added).or_default().insert(player);
        }
        for removed in old_set.difference(&new_set) {
            if let Some(set) = observers.get_mut(removed) {
                set.remove(&player);
                if set.is_empty() {
                    observers.remove(removed);
                }
            }
        }
    }

    pub fn tracked_players(&self) -> usize {
        self.players.read().len()
    }
}

#[cfg(test)]
mod tests {
    use crate::grid::GridConfig;
    use crate::object::{ObjectKind, WorldObject};

    use super::*;

    fn player(grid: &WorldGrid, id: u32, x: i32, y: i32) -> ObjectId {
        let oid = ObjectId(id);
        grid.add_object(
            WorldObject::new(oid, format!("p{id}"), ObjectKind::Player),
            Location::new(x, y, 0),
        )
        .unwrap();
        oid
    }

    fn npc(grid: &WorldGrid, id: u32, x: i32, y: i32) -> ObjectId {
        let oid = ObjectId(id);
        grid.add_object(
            WorldObject::new(oid, format!("n{id}"), ObjectKind::Monster),
            Location::new(x, y, 0),
        )
        .unwrap();
        oid
    }

    fn engine_and_grid() -> (VisibilityEngine, WorldGrid) {
        (
            VisibilityEngine::new(VisibilityConfig::default()),
            WorldGrid::new(GridConfig::default()),
        )
    }

    #[test]
    fn buckets_track_distance() {
        let (engine, grid) = engine_and_grid();
        let a = player(&grid, 1, 0, 0);
        let b = player(&grid, 2, 500, 0);
        engine.add_player(a);
        engine.add_player(b);

        engine.refresh_all(&grid);
        assert_eq!(engine.cache_of(a).unwrap().bucket_of(b), Some(Bucket::Near));
        assert_eq!(engine.cache_of(b).unwrap().bucket_of(a), Some(Bucket::Near));

        grid.move_object(b, Location::new(1500, 0, 0)).unwrap();
        engine.refresh_all(&grid);
        assert_eq!(engine.cache_of(a).unwrap().bucket_of(b), Some(Bucket::Medium));
        assert_eq!(engine.cache_of(b).unwrap().bucket_of(a), Some(Bucket::Medium));

        grid.move_object(b, Location::new(3000, 0, 0)).unwrap();
        engine.refresh_all(&grid);
        assert_eq!(engine.cache_of(a).unwrap().bucket_of(b), None);
        assert_eq!(engine.cache_of(b).unwrap().bucket_of(a), None);
    }

    #[test]
    fn buckets_are_disjoint() {
        let (engine, grid) = engine_and_grid();
        let p = player(&grid, 1, 0, 0);
        engine.add_player(p);
        for i in 0..40 {
            npc(&grid, 100 + i, (i as i32) * 60, 0);
        }

        engine.refresh_all(&grid);
        let cache = engine.cache_of(p).unwrap();
        let total = cache.len();
        let unique: FxHashSet<ObjectId> = cache.iter_all().collect();
        assert_eq!(unique.len(), total);
    }

    #[test]
    fn reverse_observers_follow_the_cache() {
        let (engine, grid) = engine_and_grid();
        let p = player(&grid, 1, 0, 0);
        let m = npc(&grid, 2, 300, 0);
        engine.add_player(p);

        engine.refresh_all(&grid);
        assert_eq!(engine.observers_of(m), [p]);

        grid.move_object(m, Location::new(100_000, 0, 0)).unwrap();
        engine.refresh_all(&grid);
        assert!(engine.observers_of(m).is_empty());
    }

    #[test]
    fn departure_clears_reverse_sets() {
        let (engine, grid) = engine_and_grid();
        let a = player(&grid, 1, 0, 0);
        let b = player(&grid, 2, 400, 0);
        engine.add_player(a);
        engine.add_player(b);
        engine.refresh_all(&grid);

        assert_eq!(engine.observers_of(a), [b]);

        engine.remove_player(b);
        grid.remove_object(b);
        assert!(engine.observers_of(a).is_empty());
        // And b itself is no longer observable.
        assert!(engine.observers_of(b).is_empty());
    }

    #[test]
    fn refresh_due_respects_max_age() {
        let (engine, grid) = engine_and_grid();
        let p = player(&grid, 1, 0, 0);
        let m = npc(&grid, 2, 100, 0);
        engine.add_player(p);

        // First refresh always runs.
        engine.refresh_due(&grid);
        assert_eq!(engine.cache_of(p).unwrap().bucket_of(m), Some(Bucket::Near));

        // Still fresh: the world may change but the snapshot stays.
        grid.move_object(m, Location::new(100_000, 0, 0)).unwrap();
        engine.refresh_due(&grid);
        assert_eq!(engine.cache_of(p).unwrap().bucket_of(m), Some(Bucket::Near));

        std::thread::sleep(Duration::from_millis(210));
        engine.refresh_due(&grid);
        assert_eq!(engine.cache_of(p).unwrap().bucket_of(m), None);
    }

    #[test]
    fn observers_at_resolves_by_position() {
        let (engine, grid) = engine_and_grid();
        let a = player(&grid, 1, 0, 0);
        let b = player(&grid, 2, 10_000, 0);
        engine.add_player(a);
        engine.add_player(b);
        engine.refresh_all(&grid);

        let here = engine.observers_at(&grid, 100, 0);
        assert_eq!(here, [a]);
        let there = engine.observers_at(&grid, 10_100, 0);
        assert_eq!(there, [b]);
    }
}
