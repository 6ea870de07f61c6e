use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::object::{Location, ObjectId, WorldObject};
use crate::WorldError;

/// Region layout. The tile size is chosen so that one ring of neighbor
/// regions covers the largest visibility radius: 4096 > 2000.
#[derive(Clone, Copy, Debug)]
pub struct GridConfig {
    pub tile_size: i32,
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            tile_size: 4096,
            min_x: -262_144,
            max_x: 262_144,
            min_y: -262_144,
            max_y: 262_144,
        }
    }
}

struct Region {
    objects: RwLock<FxHashSet<ObjectId>>,
}

struct Slot {
    object: WorldObject,
    loc: Location,
    region: usize,
}

/// The region-sharded index of everything standing in the world.
///
/// The grid is the sole owner of the canonical object set; everything else
/// (visibility caches, client registries, AI tables) refers to objects by
/// id. The region table is fixed at startup — only membership changes.
pub struct WorldGrid {
    config: GridConfig,
    width: i32,
    height: i32,
    regions: Box<[Region]>,
    objects: RwLock<FxHashMap<ObjectId, Slot>>,
}

impl WorldGrid {
    pub fn new(config: GridConfig) -> Self {
        let width = (config.max_x - config.min_x) / config.tile_size;
        let height = (config.max_y - config.min_y) / config.tile_size;
        assert!(width > 0 && height > 0, "degenerate grid bounds");

        let regions = (0..width * height)
            .map(|_| Region {
                objects: RwLock::new(FxHashSet::default()),
            })
            .collect();

        Self {
            config,
            width,
            height,
            regions,
            objects: RwLock::new(FxHashMap::default()),
        }
    }

    /// Inserts an object at `loc`. A second insert of the same id is an
    /// error — ids are never reused, so this always means a logic bug
    /// upstream.
    pub fn add_object(&self, object: WorldObject, loc: Location) -> Result<(), WorldError> {
        let id = object.id;
        let region = self.region_index(&loc);

        let mut objects = self.objects.write();
        if objects.contains_key(&id) {
            return Err(WorldError::DuplicateObject(id));
        }
        objects.insert(
            id,
            Slot {
                object,
                loc,
                region,
            },
        );
        self.regions[region].objects.write().insert(id);
        Ok(())
    }

    /// Moves an object. Region membership only changes when the move
    /// crosses a tile boundary.
    pub fn move_object(&self, id: ObjectId, new_loc: Location) -> Result<(), WorldError> {
        let new_region = self.region_index(&new_loc);

        let mut objects = self.objects.write();
        let slot = objects.get_mut(&id).ok_or(WorldError::UnknownObject(id))?;

        let old_region = slot.region;
        slot.loc = new_loc;
        if old_region != new_region {
            slot.region = new_region;
            self.regions[old_region].objects.write().remove(&id);
            self.regions[new_region].objects.write().insert(id);
        }
        Ok(())
    }

    /// Removes and returns an object.
    pub fn remove_object(&self, id: ObjectId) -> Option<WorldObject> {
        let mut objects = self.objects.write();
        let slot = objects.remove(&id)?;
        self.regions[slot.region].objects.write().remove(&id);
        Some(slot.object)
    }

    pub fn get_object(&self, id: ObjectId) -> Option<WorldObject> {
        self.objects.read().get(&id).map(|s| s.object.clone())
    }

    pub fn location_of(&self, id: ObjectId) -> Option<Location> {
        self.objects.read().get(&id).map(|s| s.loc)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.read().contains_key(&id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Visits every object in the up-to-9 regions around `loc` without
    /// allocating. The callback gets the id and the object's location.
    pub fn for_each_nearby(&self, loc: &Location, mut f: impl FnMut(ObjectId, &Location)) {
        let (rx, ry) = self.region_coords(loc);
        let objects = self.objects.read();

        for ny in (ry - 1).max(0)..=(ry + 1).min(self.height - 1) {
            for nx in (rx - 1).max(0)..=(rx + 1).min(self.width - 1) {
                let region = &self.regions[(ny * self.width + nx) as usize];
                let members = region.objects.read();
                for id in &*members {
                    if let Some(slot) = objects.get(id) {
                        f(*id, &slot.loc);
                    }
                }
            }
        }
    }

    /// Number of neighbor regions `for_each_nearby` would visit for `loc`.
    pub fn nearby_region_count(&self, loc: &Location) -> usize {
        let (rx, ry) = self.region_coords(loc);
        let xs = ((rx + 1).min(self.width - 1) - (rx - 1).max(0) + 1) as usize;
        let ys = ((ry + 1).min(self.height - 1) - (ry - 1).max(0) + 1) as usize;
        xs * ys
    }

    fn region_coords(&self, loc: &Location) -> (i32, i32) {
        let rx = (loc.x.clamp(self.config.min_x, self.config.max_x - 1) - self.config.min_x)
            / self.config.tile_size;
        let ry = (loc.y.clamp(self.config.min_y, self.config.max_y - 1) - self.config.min_y)
            / self.config.tile_size;
        (rx, ry)
    }

    fn region_index(&self, loc: &Location) -> usize {
        let (rx, ry) = self.region_coords(loc);
        (ry * self.width + rx) as usize
    }
}

#[cfg(test)]
mod tests {
    use crate::object::ObjectKind;

    use super::*;

    fn obj(id: u32, name: &str) -> WorldObject {
        WorldObject::new(ObjectId(id), name, ObjectKind::Npc)
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let grid = WorldGrid::new(GridConfig::default());
        grid.add_object(obj(1, "wolf"), Location::new(0, 0, 0)).unwrap();

        let err = grid
            .add_object(obj(1, "wolf"), Location::new(10, 10, 0))
            .unwrap_err();
        assert_eq!(err, WorldError::DuplicateObject(ObjectId(1)));
        assert_eq!(grid.object_count(), 1);
    }

    #[test]
    fn move_within_a_region_keeps_membership() {
        let grid = WorldGrid::new(GridConfig::default());
        grid.add_object(obj(1, "wolf"), Location::new(0, 0, 0)).unwrap();

        grid.move_object(ObjectId(1), Location::new(100, 100, 0)).unwrap();
        assert_eq!(grid.location_of(ObjectId(1)), Some(Location::new(100, 100, 0)));

        let mut seen = Vec::new();
        grid.for_each_nearby(&Location::new(0, 0, 0), |id, _| seen.push(id));
        assert_eq!(seen, [ObjectId(1)]);
    }

    #[test]
    fn move_across_regions_reshards() {
        let grid = WorldGrid::new(GridConfig::default());
        grid.add_object(obj(1, "wolf"), Location::new(0, 0, 0)).unwrap();

        // Far enough that the old neighborhood no longer sees it.
        grid.move_object(ObjectId(1), Location::new(50_000, 50_000, 0)).unwrap();

        let mut seen = Vec::new();
        grid.for_each_nearby(&Location::new(0, 0, 0), |id, _| seen.push(id));
        assert!(seen.is_empty());

        seen.clear();
        grid.for_each_nearby(&Location::new(50_000, 50_000, 0), |id, _| seen.push(id));
        assert_eq!(seen, [ObjectId(1)]);
    }

    #[test]
    fn removal_clears_region_membership() {
        let grid = WorldGrid::new(GridConfig::default());
        grid.add_object(obj(7, "spider"), Location::new(5, 5, 0)).unwrap();

        let removed = grid.remove_object(ObjectId(7)).unwrap();
        assert_eq!(removed.name, "spider");
        assert!(!grid.contains(ObjectId(7)));

        let mut seen = Vec::new();
        grid.for_each_nearby(&Location::new(5, 5, 0), |id, _| seen.push(id));
        assert!(seen.is_empty());
    }

    #[test]
    fn nearby_covers_adjacent_regions() {
        let grid = WorldGrid::new(GridConfig::default());
        // Two objects in adjacent regions, close to the shared border.
        grid.add_object(obj(1, "a"), Location::new(4000, 0, 0)).unwrap();
        grid.add_object(obj(2, "b"), Location::new(4200, 0, 0)).unwrap();

        let mut seen = Vec::new();
        grid.for_each_nearby(&Location::new(4000, 0, 0), |id, _| seen.push(id));
        seen.sort();
        assert_eq!(seen, [ObjectId(1), ObjectId(2)]);
    }

    #[test]
    fn interior_points_have_nine_neighbors_and_corners_four() {
        let grid = WorldGrid::new(GridConfig::default());
        assert_eq!(grid.nearby_region_count(&Location::new(0, 0, 0)), 9);
        assert_eq!(
            grid.nearby_region_count(&Location::new(-262_144, -262_144, 0)),
            4
        );
    }

    #[test]
    fn out_of_bounds_locations_clamp_to_edge_regions() {
        let grid = WorldGrid::new(GridConfig::default());
        grid.add_object(obj(1, "stray"), Location::new(9_999_999, 0, 0)).unwrap();
        assert!(grid.contains(ObjectId(1)));
        assert_eq!(grid.region_count(), 128 * 128);
    }
}
