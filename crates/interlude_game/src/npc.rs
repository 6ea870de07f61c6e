//! NPC lifecycle: spawns, AI registration, attack stances, corpse decay
//! and scheduled respawn.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use interlude_protocol::packets::game::DeleteObject;
use interlude_world::{
    Location, ObjectId, ObjectIdAllocator, ObjectKind, VisibilityEngine, WorldGrid, WorldObject,
};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::clients::ClientManager;

/// How long a corpse stays before the object leaves the world.
pub const CORPSE_DECAY: Duration = Duration::from_secs(8);

/// Combat stance outlives the last swing by this much.
pub const ATTACK_STANCE: Duration = Duration::from_secs(15);

/// A spawn definition: what to place, where, and how long after death it
/// comes back.
#[derive(Clone, Debug)]
pub struct NpcSpawn {
    pub npc_id: i32,
    pub name: String,
    pub kind: ObjectKind,
    pub loc: Location,
    pub respawn_delay: Duration,
}

struct DecayingCorpse {
    object: ObjectId,
    loc: Location,
    due: Instant,
    respawn: Option<(NpcSpawn, Instant)>,
}

/// Drives the NPC side of the world: who has AI, who is decaying, who is
/// due back. The tick loops call into this; it owns no tasks itself.
pub struct NpcDirector {
    grid: Arc<WorldGrid>,
    visibility: Arc<VisibilityEngine>,
    clients: Arc<ClientManager>,
    allocator: Arc<ObjectIdAllocator>,
    /// Objects with a live AI; the 1 s loop thinks for each.
    ai: RwLock<FxHashMap<ObjectId, NpcSpawn>>,
    corpses: Mutex<Vec<DecayingCorpse>>,
    pending_respawns: Mutex<Vec<(NpcSpawn, Instant)>>,
    stances: Mutex<FxHashMap<ObjectId, Instant>>,
    /// Boss id → spawn template, filled by the data loaders. The raid
    /// registries respawn through this.
    boss_templates: RwLock<FxHashMap<i32, NpcSpawn>>,
    corpse_decay: Duration,
    think_count: AtomicU64,
}

impl NpcDirector {
    pub fn new(
        grid: Arc<WorldGrid>,
        visibility: Arc<VisibilityEngine>,
        clients: Arc<ClientManager>,
        allocator: Arc<ObjectIdAllocator>,
    ) -> Self {
        Self {
            grid,
            visibility,
            clients,
            allocator,
            ai: RwLock::new(FxHashMap::default()),
            corpses: Mutex::new(Vec::new()),
            pending_respawns: Mutex::new(Vec::new()),
            stances: Mutex::new(FxHashMap::default()),
            boss_templates: RwLock::new(FxHashMap::default()),
            corpse_decay: CORPSE_DECAY,
            think_count: AtomicU64::new(0),
        }
    }

    /// Overrides the corpse decay window. Tests compress it; production
    /// keeps [`CORPSE_DECAY`].
    #[must_use]
    pub fn with_corpse_decay(mut self, corpse_decay: Duration) -> Self {
        self.corpse_decay = corpse_decay;
        self
    }

    /// Registers where a boss stands when it (re)spawns.
    pub fn register_boss_template(&self, boss_id: i32, spawn: NpcSpawn) {
        self.boss_templates.write().insert(boss_id, spawn);
    }

    /// Puts a boss back into the world from its template. Unknown ids are
    /// data holes, logged and skipped.
    pub fn spawn_boss(&self, boss_id: i32) -> Option<ObjectId> {
        let template = self.boss_templates.read().get(&boss_id).cloned();
        match template {
            Some(spawn) => self.spawn_npc(&spawn),
            None => {
                warn!(boss_id, "no spawn template registered for boss");
                None
            }
        }
    }

    /// Places an NPC into the world and registers its AI.
    pub fn spawn_npc(&self, spawn: &NpcSpawn) -> Option<ObjectId> {
        let id = self.allocator.allocate();
        let object = WorldObject::new(id, spawn.name.clone(), spawn.kind);

        if let Err(e) = self.grid.add_object(object, spawn.loc) {
            warn!(npc_id = spawn.npc_id, "failed to place npc: {e}");
            return None;
        }
        self.ai.write().insert(id, spawn.clone());
        debug!(npc_id = spawn.npc_id, object = id.0, "npc spawned");
        Some(id)
    }

    /// Kills an NPC: AI stops immediately, the corpse stays in the grid
    /// for [`CORPSE_DECAY`], and a respawn is scheduled from the spawn's
    /// configured delay.
    pub fn on_npc_death(&self, id: ObjectId) {
        let spawn = self.ai.write().remove(&id);
        self.stances.lock().remove(&id);

        let Some(loc) = self.grid.location_of(id) else {
            return;
        };
        let now = Instant::now();
        self.corpses.lock().push(DecayingCorpse {
            object: id,
            loc,
            due: now + self.corpse_decay,
            respawn: spawn.map(|s| {
                let at = now + self.corpse_decay + s.respawn_delay;
                (s, at)
            }),
        });
    }

    /// The 1 s AI loop body. Gameplay decisions live with the combat and
    /// skill systems; the core only guarantees each registered AI gets a
    /// turn.
    pub fn ai_tick(&self) {
        let ai = self.ai.read();
        self.think_count.fetch_add(ai.len() as u64, Ordering::Relaxed);
    }

    /// The 1 s respawn loop body: decay due corpses, then bring back due
    /// spawns.
    pub fn lifecycle_tick(&self) {
        let now = Instant::now();

        let due: Vec<DecayingCorpse> = {
            let mut corpses = self.corpses.lock();
            drain_where(&mut corpses, |c| c.due <= now)
        };

        for corpse in due {
            self.grid.remove_object(corpse.object);
            self.visibility.remove_object(corpse.object);
            self.clients.broadcast_packet_from_position(
                corpse.loc.x,
                corpse.loc.y,
                &DeleteObject {
                    object_id: corpse.object.as_i32(),
                },
            );
            debug!(object = corpse.object.0, "corpse decayed");

            if let Some(pending) = corpse.respawn {
                self.pending_respawns.lock().push(pending);
            }
        }

        let ready: Vec<NpcSpawn> = {
            let mut pending = self.pending_respawns.lock();
            drain_where(&mut pending, |(_, at)| *at <= now)
                .into_iter()
                .map(|(spawn, _)| spawn)
                .collect()
        };
        for spawn in ready {
            self.spawn_npc(&spawn);
        }
    }

    /// Marks a combatant as in stance; the clock restarts on every call.
    pub fn enter_attack_stance(&self, id: ObjectId) {
        self.stances.lock().insert(id, Instant::now() + ATTACK_STANCE);
    }

    pub fn in_attack_stance(&self, id: ObjectId) -> bool {
        self.stances.lock().get(&id).is_some_and(|due| *due > Instant::now())
    }

    /// The 1 s attack-stance loop body.
    pub fn stance_tick(&self) {
        let now = Instant::now();
        self.stances.lock().retain(|_, due| *due > now);
    }

    pub fn has_ai(&self, id: ObjectId) -> bool {
        self.ai.read().contains_key(&id)
    }

    pub fn ai_count(&self) -> usize {
        self.ai.read().len()
    }

    pub fn thinks(&self) -> u64 {
        self.think_count.load(Ordering::Relaxed)
    }

    /// Corpses currently waiting out their decay.
    pub fn decaying_count(&self) -> usize {
        self.corpses.lock().len()
    }

    pub fn pending_respawn_count(&self) -> usize {
        self.pending_respawns.lock().len()
    }
}

/// Drains the elements matching `pred` out of `v`, preserving the order
/// of both halves.
fn drain_where<T>(v: &mut Vec<T>, pred: impl Fn(&T) -> bool) -> Vec<T> {
    let mut taken = Vec::new();
    let mut i = 0;
    while i < v.len() {
        if pred(&v[i]) {
            taken.push(v.remove(i));
        } else {
            i += 1;
        }
    }
    taken
}

#[cfg(test)]
mod tests {
    use interlude_world::{GridConfig, VisibilityConfig};

    use super::*;

    fn director() -> NpcDirector {
        let grid = Arc::new(WorldGrid::new(GridConfig::default()));
        let visibility = Arc::new(VisibilityEngine::new(VisibilityConfig::default()));
        let clients = Arc::new(ClientManager::new(grid.clone(), visibility.clone()));
        NpcDirector::new(grid, visibility, clients, Arc::new(ObjectIdAllocator::new()))
    }

    fn wolf_spawn() -> NpcSpawn {
        NpcSpawn {
            npc_id: 20120,
            name: "Wolf".to_owned(),
            kind: ObjectKind::Monster,
            loc: Location::new(1000, 2000, -300),
            respawn_delay: Duration::from_secs(30),
        }
    }

    #[test]
    fn spawn_registers_ai_and_places_object() {
        let director = director();
        let id = director.spawn_npc(&wolf_spawn()).unwrap();

        assert!(director.has_ai(id));
        assert!(director.grid.contains(id));

        director.ai_tick();
        assert_eq!(director.thinks(), 1);
    }

    #[test]
    fn death_stops_ai_and_queues_decay() {
        let director = director();
        let id = director.spawn_npc(&wolf_spawn()).unwrap();

        director.on_npc_death(id);
        assert!(!director.has_ai(id));
        assert_eq!(director.decaying_count(), 1);
        // The corpse is still in the world until decay.
        assert!(director.grid.contains(id));

        director.lifecycle_tick();
        assert!(director.grid.contains(id), "decayed before its time");
    }

    #[test]
    fn stances_expire_only_after_the_window() {
        let director = director();
        let id = ObjectId(55);

        director.enter_attack_stance(id);
        assert!(director.in_attack_stance(id));

        director.stance_tick();
        assert!(director.in_attack_stance(id), "stance expired immediately");
    }

    #[test]
    fn partition_splits_and_preserves() {
        let mut v = vec![1, 2, 3, 4, 5, 6];
        let even = drain_where(&mut v, |n| n % 2 == 0);
        assert_eq!(even, [2, 4, 6]);
        assert_eq!(v, [1, 3, 5]);
    }
}
