use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use serde_json::Value;

use super::{
    DecalRestoreCounts, EntityId, GridHandle, HostError, LifeStage, MapId, PrototypeRegistry,
    SceneHost, SolutionState, TileCoord, Vec2,
};

const MAX_DEFAULT_CONTENT_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialParent {
    Grid(GridHandle),
    Entity(EntityId),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySlot {
    pub capacity: usize,
    pub contents: Vec<EntityId>,
}

#[derive(Debug, Clone)]
pub struct MemoryEntity {
    pub id: EntityId,
    pub prototype_id: String,
    pub life_stage: LifeStage,
    pub parent: SpatialParent,
    pub position: Vec2,
    pub rotation: f32,
    pub anchored: bool,
    pub slots: BTreeMap<String, MemorySlot>,
    pub components: BTreeMap<String, Value>,
    pub solutions: BTreeMap<String, SolutionState>,
}

#[derive(Debug, Clone)]
struct MemoryGrid {
    offset: Vec2,
    rotation: f32,
    tiles: BTreeMap<TileCoord, String>,
    decals: Vec<Value>,
}

#[derive(Debug, Default)]
struct EntityIdAllocator {
    next: u64,
}

impl EntityIdAllocator {
    fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}

/// In-memory scene graph implementing [`SceneHost`].
///
/// Entities spawned from a prototype receive its components, solutions and
/// slots, and every slot is filled with its default contents.
#[derive(Debug, Default)]
pub struct MemoryScene {
    allocator: EntityIdAllocator,
    entities: BTreeMap<EntityId, MemoryEntity>,
    grids: BTreeMap<GridHandle, MemoryGrid>,
    next_grid: u64,
    maps: BTreeSet<MapId>,
    prototypes: PrototypeRegistry,
    unreadable_components: HashSet<String>,
}

impl MemoryScene {
    pub fn new(prototypes: PrototypeRegistry) -> Self {
        Self {
            prototypes,
            ..Self::default()
        }
    }

    pub fn add_map(&mut self, map: MapId) {
        self.maps.insert(map);
    }

    pub fn prototypes(&self) -> &PrototypeRegistry {
        &self.prototypes
    }

    pub fn entity(&self, id: EntityId) -> Option<&MemoryEntity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut MemoryEntity> {
        self.entities.get_mut(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Every entity on the grid, contained or not.
    pub fn entities_on_grid(&self, grid: GridHandle) -> Vec<EntityId> {
        self.entities
            .keys()
            .copied()
            .filter(|id| self.root_grid_of(*id) == Some(grid))
            .collect()
    }

    pub fn containing_slot(&self, entity: EntityId) -> Option<(EntityId, String)> {
        let SpatialParent::Entity(container) = self.entities.get(&entity)?.parent else {
            return None;
        };
        let owner = self.entities.get(&container)?;
        owner
            .slots
            .iter()
            .find(|(_, slot)| slot.contents.contains(&entity))
            .map(|(name, _)| (container, name.clone()))
    }

    /// Makes [`SceneHost::read_component`] fail for a component type.
    pub fn fail_component_reads(&mut self, component_type: &str) {
        self.unreadable_components
            .insert(component_type.to_string());
    }

    pub fn set_life_stage(&mut self, entity: EntityId, stage: LifeStage) {
        if let Some(entity) = self.entities.get_mut(&entity) {
            entity.life_stage = stage;
        }
    }

    pub fn decals(&self, grid: GridHandle) -> &[Value] {
        self.grids
            .get(&grid)
            .map(|grid| grid.decals.as_slice())
            .unwrap_or_default()
    }

    pub fn set_decals(&mut self, grid: GridHandle, decals: Vec<Value>) {
        if let Some(grid) = self.grids.get_mut(&grid) {
            grid.decals = decals;
        }
    }

    /// Number of 4-connected tile fragments on the grid.
    pub fn tile_fragment_count(&self, grid: GridHandle) -> usize {
        let Some(grid) = self.grids.get(&grid) else {
            return 0;
        };
        let mut seen = HashSet::<TileCoord>::new();
        let mut fragments = 0usize;
        for coord in grid.tiles.keys() {
            if !seen.insert(*coord) {
                continue;
            }
            fragments += 1;
            let mut frontier = VecDeque::from([*coord]);
            while let Some(current) = frontier.pop_front() {
                for neighbor in current.neighbors() {
                    if grid.tiles.contains_key(&neighbor) && seen.insert(neighbor) {
                        frontier.push_back(neighbor);
                    }
                }
            }
        }
        fragments
    }

    fn root_grid_of(&self, entity: EntityId) -> Option<GridHandle> {
        let mut current = entity;
        for _ in 0..=self.entities.len() {
            match self.entities.get(&current)?.parent {
                SpatialParent::Grid(grid) => return Some(grid),
                SpatialParent::Entity(parent) => current = parent,
            }
        }
        None
    }

    fn is_ancestor(&self, candidate: EntityId, of: EntityId) -> bool {
        let mut current = of;
        for _ in 0..=self.entities.len() {
            let Some(entity) = self.entities.get(&current) else {
                return false;
            };
            match entity.parent {
                SpatialParent::Entity(parent) if parent == candidate => return true,
                SpatialParent::Entity(parent) => current = parent,
                SpatialParent::Grid(_) => return false,
            }
        }
        false
    }

    fn spawn_with_parent(
        &mut self,
        prototype_id: &str,
        parent: SpatialParent,
        position: Vec2,
        rotation: f32,
        depth: usize,
    ) -> Result<EntityId, HostError> {
        let def = self
            .prototypes
            .get(prototype_id)
            .cloned()
            .ok_or_else(|| HostError::UnknownPrototype {
                prototype_id: prototype_id.to_string(),
            })?;

        let id = self.allocator.allocate();
        let slots = def
            .slots
            .iter()
            .map(|slot| {
                (
                    slot.name.clone(),
                    MemorySlot {
                        capacity: slot.capacity,
                        contents: Vec::new(),
                    },
                )
            })
            .collect();
        self.entities.insert(
            id,
            MemoryEntity {
                id,
                prototype_id: def.id.clone(),
                life_stage: LifeStage::Running,
                parent,
                position,
                rotation,
                anchored: def.anchored && matches!(parent, SpatialParent::Grid(_)),
                slots,
                components: def.components.clone(),
                solutions: def.solutions.clone(),
            },
        );

        if depth < MAX_DEFAULT_CONTENT_DEPTH {
            for slot in &def.slots {
                for item in &slot.default_contents {
                    let child = match self.spawn_with_parent(
                        item,
                        SpatialParent::Entity(id),
                        Vec2::ZERO,
                        0.0,
                        depth + 1,
                    ) {
                        Ok(child) => child,
                        Err(error) => {
                            // Takes the default contents spawned so far with it.
                            self.delete(id);
                            return Err(error);
                        }
                    };
                    if let Some(entry) = self
                        .entities
                        .get_mut(&id)
                        .and_then(|owner| owner.slots.get_mut(&slot.name))
                    {
                        entry.contents.push(child);
                    }
                }
            }
        }
        Ok(id)
    }

    fn detach(&mut self, entity: EntityId) {
        let Some((container, slot)) = self.containing_slot(entity) else {
            return;
        };
        if let Some(entry) = self
            .entities
            .get_mut(&container)
            .and_then(|owner| owner.slots.get_mut(&slot))
        {
            entry.contents.retain(|id| *id != entity);
        }
    }

    fn entity_or_err(&self, entity: EntityId) -> Result<&MemoryEntity, HostError> {
        self.entities
            .get(&entity)
            .ok_or(HostError::UnknownEntity(entity))
    }

    fn entity_mut_or_err(&mut self, entity: EntityId) -> Result<&mut MemoryEntity, HostError> {
        self.entities
            .get_mut(&entity)
            .ok_or(HostError::UnknownEntity(entity))
    }
}

impl SceneHost for MemoryScene {
    fn create_grid(
        &mut self,
        map: MapId,
        offset: Vec2,
        rotation: f32,
    ) -> Result<GridHandle, HostError> {
        if !self.maps.contains(&map) {
            return Err(HostError::UnknownMap(map));
        }
        let handle = GridHandle(self.next_grid);
        self.next_grid = self.next_grid.saturating_add(1);
        self.grids.insert(
            handle,
            MemoryGrid {
                offset,
                rotation,
                tiles: BTreeMap::new(),
                decals: Vec::new(),
            },
        );
        Ok(handle)
    }

    fn grid_exists(&self, grid: GridHandle) -> bool {
        self.grids.contains_key(&grid)
    }

    fn delete_grid(&mut self, grid: GridHandle) {
        let children = self.grid_children(grid);
        for child in children {
            self.delete(child);
        }
        self.grids.remove(&grid);
    }

    fn grid_rotation(&self, grid: GridHandle) -> Option<f32> {
        self.grids.get(&grid).map(|grid| grid.rotation)
    }

    fn tiles(&self, grid: GridHandle) -> Vec<(TileCoord, String)> {
        self.grids
            .get(&grid)
            .map(|grid| {
                grid.tiles
                    .iter()
                    .map(|(coord, tile_type)| (*coord, tile_type.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_tile(
        &mut self,
        grid: GridHandle,
        coord: TileCoord,
        tile_type: &str,
    ) -> Result<(), HostError> {
        let entry = self
            .grids
            .get_mut(&grid)
            .ok_or(HostError::UnknownGrid(grid))?;
        entry.tiles.insert(coord, tile_type.to_string());
        Ok(())
    }

    fn grid_children(&self, grid: GridHandle) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|entity| entity.parent == SpatialParent::Grid(grid))
            .map(|entity| entity.id)
            .collect()
    }

    fn export_decals(&self, grid: GridHandle) -> Option<Value> {
        let grid = self.grids.get(&grid)?;
        if grid.decals.is_empty() {
            return None;
        }
        Some(Value::Array(grid.decals.clone()))
    }

    fn restore_decals(&mut self, grid: GridHandle, payload: &Value) -> DecalRestoreCounts {
        let mut counts = DecalRestoreCounts::default();
        let Some(entry) = self.grids.get_mut(&grid) else {
            return counts;
        };
        let Some(items) = payload.as_array() else {
            counts.failed = 1;
            return counts;
        };
        for item in items {
            if item.is_object() {
                entry.decals.push(item.clone());
                counts.restored += 1;
            } else {
                counts.failed += 1;
            }
        }
        counts
    }

    fn spawn(
        &mut self,
        prototype_id: &str,
        grid: GridHandle,
        position: Vec2,
        rotation: f32,
    ) -> Result<EntityId, HostError> {
        if !self.grids.contains_key(&grid) {
            return Err(HostError::UnknownGrid(grid));
        }
        self.spawn_with_parent(prototype_id, SpatialParent::Grid(grid), position, rotation, 0)
    }

    fn delete(&mut self, entity: EntityId) {
        if !self.entities.contains_key(&entity) {
            return;
        }
        self.detach(entity);
        let mut pending = vec![entity];
        while let Some(current) = pending.pop() {
            if let Some(removed) = self.entities.remove(&current) {
                for slot in removed.slots.into_values() {
                    pending.extend(slot.contents);
                }
            }
        }
    }

    fn exists(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    fn life_stage(&self, entity: EntityId) -> Option<LifeStage> {
        self.entities.get(&entity).map(|entity| entity.life_stage)
    }

    fn prototype_id(&self, entity: EntityId) -> Option<String> {
        self.entities
            .get(&entity)
            .map(|entity| entity.prototype_id.clone())
            .filter(|id| !id.is_empty())
    }

    fn local_transform(&self, entity: EntityId) -> Option<(Vec2, f32)> {
        self.entities
            .get(&entity)
            .map(|entity| (entity.position, entity.rotation))
    }

    fn is_anchored(&self, entity: EntityId) -> bool {
        self.entities
            .get(&entity)
            .is_some_and(|entity| entity.anchored)
    }

    fn set_anchored(&mut self, entity: EntityId, anchored: bool) -> Result<(), HostError> {
        self.entity_mut_or_err(entity)?.anchored = anchored;
        Ok(())
    }

    fn container_slots(&self, entity: EntityId) -> Vec<String> {
        self.entities
            .get(&entity)
            .map(|entity| entity.slots.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn slot_contents(&self, entity: EntityId, slot: &str) -> Vec<EntityId> {
        self.entities
            .get(&entity)
            .and_then(|entity| entity.slots.get(slot))
            .map(|slot| slot.contents.clone())
            .unwrap_or_default()
    }

    fn insert_into(
        &mut self,
        entity: EntityId,
        container: EntityId,
        slot: &str,
    ) -> Result<(), HostError> {
        self.entity_or_err(entity)?;
        let owner = self.entity_or_err(container)?;
        let reject = |reason: &str| HostError::SlotRejected {
            entity,
            container,
            slot: slot.to_string(),
            reason: reason.to_string(),
        };
        let Some(target) = owner.slots.get(slot) else {
            return Err(HostError::UnknownSlot {
                entity: container,
                slot: slot.to_string(),
            });
        };
        if target.contents.contains(&entity) {
            return Ok(());
        }
        if target.contents.len() >= target.capacity {
            return Err(reject("slot is full"));
        }
        if entity == container || self.is_ancestor(entity, container) {
            return Err(reject("insertion would create a containment cycle"));
        }

        self.detach(entity);
        if let Some(target) = self
            .entities
            .get_mut(&container)
            .and_then(|owner| owner.slots.get_mut(slot))
        {
            target.contents.push(entity);
        }
        let moved = self.entity_mut_or_err(entity)?;
        moved.parent = SpatialParent::Entity(container);
        moved.anchored = false;
        moved.position = Vec2::ZERO;
        Ok(())
    }

    fn remove_from(
        &mut self,
        entity: EntityId,
        container: EntityId,
        slot: &str,
    ) -> Result<(), HostError> {
        let Some(grid) = self.root_grid_of(container) else {
            return Err(HostError::UnknownEntity(container));
        };
        let target = self
            .entities
            .get_mut(&container)
            .and_then(|owner| owner.slots.get_mut(slot))
            .ok_or_else(|| HostError::UnknownSlot {
                entity: container,
                slot: slot.to_string(),
            })?;
        let before = target.contents.len();
        target.contents.retain(|id| *id != entity);
        if target.contents.len() == before {
            return Err(HostError::SlotRejected {
                entity,
                container,
                slot: slot.to_string(),
                reason: "entity is not in this slot".to_string(),
            });
        }
        self.entity_mut_or_err(entity)?.parent = SpatialParent::Grid(grid);
        Ok(())
    }

    fn component_types(&self, entity: EntityId) -> Vec<String> {
        self.entities
            .get(&entity)
            .map(|entity| {
                entity
                    .components
                    .keys()
                    .chain(entity.solutions.keys())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn has_component(&self, entity: EntityId, component_type: &str) -> bool {
        self.entities.get(&entity).is_some_and(|entity| {
            entity.components.contains_key(component_type)
                || entity.solutions.contains_key(component_type)
        })
    }

    fn add_component(&mut self, entity: EntityId, component_type: &str) -> Result<(), HostError> {
        self.entity_mut_or_err(entity)?
            .components
            .entry(component_type.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        Ok(())
    }

    fn read_component(&self, entity: EntityId, component_type: &str) -> Result<Value, HostError> {
        let owner = self.entity_or_err(entity)?;
        let component_error = |message: &str| HostError::Component {
            entity,
            component_type: component_type.to_string(),
            message: message.to_string(),
        };
        if self.unreadable_components.contains(component_type) {
            return Err(component_error("state is not serializable"));
        }
        owner
            .components
            .get(component_type)
            .cloned()
            .ok_or_else(|| component_error("component not present"))
    }

    fn write_component(
        &mut self,
        entity: EntityId,
        component_type: &str,
        payload: &Value,
    ) -> Result<(), HostError> {
        let owner = self.entity_mut_or_err(entity)?;
        let Some(slot) = owner.components.get_mut(component_type) else {
            return Err(HostError::Component {
                entity,
                component_type: component_type.to_string(),
                message: "component not present".to_string(),
            });
        };
        *slot = payload.clone();
        Ok(())
    }

    fn read_solution(
        &self,
        entity: EntityId,
        component_type: &str,
    ) -> Result<SolutionState, HostError> {
        self.entity_or_err(entity)?
            .solutions
            .get(component_type)
            .cloned()
            .ok_or_else(|| HostError::Component {
                entity,
                component_type: component_type.to_string(),
                message: "solution not present".to_string(),
            })
    }

    fn write_solution(
        &mut self,
        entity: EntityId,
        component_type: &str,
        state: &SolutionState,
    ) -> Result<(), HostError> {
        self.entity_mut_or_err(entity)?
            .solutions
            .insert(component_type.to_string(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::PrototypeDef;

    fn scene() -> (MemoryScene, GridHandle) {
        let registry = PrototypeRegistry::from_defs(vec![
            PrototypeDef::new("Locker")
                .anchored(true)
                .with_slot("storage", 2, &["Crowbar"]),
            PrototypeDef::new("Crowbar"),
            PrototypeDef::new("Box").with_slot("inside", 1, &[]),
            PrototypeDef::new("Crate").with_slot("inside", 2, &["Crowbar", "Ghost"]),
        ]);
        let mut scene = MemoryScene::new(registry);
        scene.add_map(MapId(1));
        let grid = scene
            .create_grid(MapId(1), Vec2::ZERO, 0.0)
            .expect("grid");
        (scene, grid)
    }

    #[test]
    fn failed_default_content_spawn_leaves_nothing_behind() {
        let (mut scene, grid) = scene();
        let err = scene
            .spawn("Crate", grid, Vec2::ZERO, 0.0)
            .expect_err("unknown default content");
        assert_eq!(
            err,
            HostError::UnknownPrototype {
                prototype_id: "Ghost".to_string()
            }
        );
        assert_eq!(scene.entity_count(), 0);
        assert!(scene.grid_children(grid).is_empty());
    }

    #[test]
    fn spawn_fills_default_contents() {
        let (mut scene, grid) = scene();
        let locker = scene
            .spawn("Locker", grid, Vec2::new(1.0, 2.0), 0.0)
            .expect("spawn");
        assert!(scene.is_anchored(locker));
        let contents = scene.slot_contents(locker, "storage");
        assert_eq!(contents.len(), 1);
        assert_eq!(scene.prototype_id(contents[0]).as_deref(), Some("Crowbar"));
        assert_eq!(scene.grid_children(grid), vec![locker]);
        assert_eq!(scene.entities_on_grid(grid).len(), 2);
    }

    #[test]
    fn unknown_map_is_rejected() {
        let (mut scene, _) = scene();
        let err = scene
            .create_grid(MapId(9), Vec2::ZERO, 0.0)
            .expect_err("unknown map");
        assert_eq!(err, HostError::UnknownMap(MapId(9)));
    }

    #[test]
    fn insert_respects_capacity_and_cycles() {
        let (mut scene, grid) = scene();
        let outer = scene.spawn("Box", grid, Vec2::ZERO, 0.0).expect("outer");
        let inner = scene.spawn("Box", grid, Vec2::ZERO, 0.0).expect("inner");
        let extra = scene.spawn("Crowbar", grid, Vec2::ZERO, 0.0).expect("extra");
        scene.insert_into(inner, outer, "inside").expect("insert");
        assert_eq!(scene.containing_slot(inner), Some((outer, "inside".to_string())));
        assert!(matches!(
            scene.insert_into(extra, outer, "inside"),
            Err(HostError::SlotRejected { .. })
        ));
        assert!(matches!(
            scene.insert_into(outer, inner, "inside"),
            Err(HostError::SlotRejected { .. })
        ));
    }

    #[test]
    fn delete_removes_contents_and_detaches() {
        let (mut scene, grid) = scene();
        let locker = scene.spawn("Locker", grid, Vec2::ZERO, 0.0).expect("spawn");
        let crowbar = scene.slot_contents(locker, "storage")[0];
        scene.delete(crowbar);
        assert!(scene.slot_contents(locker, "storage").is_empty());
        scene.delete(locker);
        assert_eq!(scene.entity_count(), 0);
    }

    #[test]
    fn fragment_count_tracks_disconnected_tiles() {
        let (mut scene, grid) = scene();
        scene.set_tile(grid, TileCoord::new(0, 0), "Floor").expect("tile");
        scene.set_tile(grid, TileCoord::new(1, 0), "Floor").expect("tile");
        scene.set_tile(grid, TileCoord::new(5, 5), "Floor").expect("tile");
        assert_eq!(scene.tile_fragment_count(grid), 2);
    }
}
