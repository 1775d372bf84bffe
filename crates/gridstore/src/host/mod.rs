//! The boundary between the persistence engine and the live scene graph.
//!
//! The engine never owns entities, tiles or components. Everything it reads
//! or mutates goes through [`SceneHost`], so any scene graph that can answer
//! these calls can be saved and rebuilt.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

mod memory;
mod prototypes;

pub use memory::{MemoryEntity, MemoryScene, MemorySlot, SpatialParent};
pub use prototypes::{
    load_prototype_registry, parse_prototype_defs, PrototypeDef, PrototypeDefError,
    PrototypeErrorCode, PrototypeRegistry, SlotDef, SourceLocation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridHandle(pub u64);

impl fmt::Display for GridHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapId(pub u32);

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "map#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Integer lattice coordinate of one tile on a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn neighbors(self) -> [TileCoord; 4] {
        [
            TileCoord::new(self.x + 1, self.y),
            TileCoord::new(self.x - 1, self.y),
            TileCoord::new(self.x, self.y + 1),
            TileCoord::new(self.x, self.y - 1),
        ]
    }

    pub fn distance_sq_to_origin(self) -> i64 {
        let x = i64::from(self.x);
        let y = i64::from(self.y);
        x * x + y * y
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Observable lifecycle of a host entity. Ordered, so `>= Terminating`
/// means the entity is on its way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifeStage {
    PreInit,
    Initializing,
    Running,
    Terminating,
    Deleted,
}

impl LifeStage {
    pub fn is_terminating(self) -> bool {
        self >= LifeStage::Terminating
    }
}

/// Stored chemical payload of a solution container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolutionState {
    pub volume: f32,
    pub temperature: f32,
    pub contents: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecalRestoreCounts {
    pub restored: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("unknown prototype '{prototype_id}'")]
    UnknownPrototype { prototype_id: String },
    #[error("{0} does not exist")]
    UnknownEntity(EntityId),
    #[error("{0} does not exist")]
    UnknownGrid(GridHandle),
    #[error("{0} is not available for new grids")]
    UnknownMap(MapId),
    #[error("{entity} has no container slot '{slot}'")]
    UnknownSlot { entity: EntityId, slot: String },
    #[error("slot '{slot}' on {container} rejected {entity}: {reason}")]
    SlotRejected {
        entity: EntityId,
        container: EntityId,
        slot: String,
        reason: String,
    },
    #[error("component '{component_type}' on {entity}: {message}")]
    Component {
        entity: EntityId,
        component_type: String,
        message: String,
    },
}

/// Operations the persistence engine consumes from the live scene graph.
pub trait SceneHost {
    fn create_grid(&mut self, map: MapId, offset: Vec2, rotation: f32)
        -> Result<GridHandle, HostError>;
    fn grid_exists(&self, grid: GridHandle) -> bool;
    fn delete_grid(&mut self, grid: GridHandle);
    fn grid_rotation(&self, grid: GridHandle) -> Option<f32>;
    fn tiles(&self, grid: GridHandle) -> Vec<(TileCoord, String)>;
    fn set_tile(
        &mut self,
        grid: GridHandle,
        coord: TileCoord,
        tile_type: &str,
    ) -> Result<(), HostError>;
    /// Entities whose spatial parent is the grid itself.
    fn grid_children(&self, grid: GridHandle) -> Vec<EntityId>;
    fn export_decals(&self, grid: GridHandle) -> Option<Value>;
    fn restore_decals(&mut self, grid: GridHandle, payload: &Value) -> DecalRestoreCounts;

    fn spawn(
        &mut self,
        prototype_id: &str,
        grid: GridHandle,
        position: Vec2,
        rotation: f32,
    ) -> Result<EntityId, HostError>;
    /// Deletes the entity and everything it contains.
    fn delete(&mut self, entity: EntityId);
    fn exists(&self, entity: EntityId) -> bool;
    fn life_stage(&self, entity: EntityId) -> Option<LifeStage>;
    fn prototype_id(&self, entity: EntityId) -> Option<String>;
    fn local_transform(&self, entity: EntityId) -> Option<(Vec2, f32)>;
    fn is_anchored(&self, entity: EntityId) -> bool;
    fn set_anchored(&mut self, entity: EntityId, anchored: bool) -> Result<(), HostError>;

    fn container_slots(&self, entity: EntityId) -> Vec<String>;
    fn slot_contents(&self, entity: EntityId, slot: &str) -> Vec<EntityId>;
    fn insert_into(
        &mut self,
        entity: EntityId,
        container: EntityId,
        slot: &str,
    ) -> Result<(), HostError>;
    fn remove_from(
        &mut self,
        entity: EntityId,
        container: EntityId,
        slot: &str,
    ) -> Result<(), HostError>;

    fn component_types(&self, entity: EntityId) -> Vec<String>;
    fn has_component(&self, entity: EntityId, component_type: &str) -> bool;
    fn add_component(&mut self, entity: EntityId, component_type: &str) -> Result<(), HostError>;
    /// Generic reflective read of a component's state.
    fn read_component(&self, entity: EntityId, component_type: &str) -> Result<Value, HostError>;
    /// Generic reflective write of a component's state.
    fn write_component(
        &mut self,
        entity: EntityId,
        component_type: &str,
        payload: &Value,
    ) -> Result<(), HostError>;
    fn read_solution(
        &self,
        entity: EntityId,
        component_type: &str,
    ) -> Result<SolutionState, HostError>;
    fn write_solution(
        &mut self,
        entity: EntityId,
        component_type: &str,
        state: &SolutionState,
    ) -> Result<(), HostError>;
}
