use std::fmt;

use crate::document::ValidationWarning;
use crate::host::{DecalRestoreCounts, GridHandle, TileCoord};

/// Something wrong with the shape of the data that did not stop the
/// operation.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralWarning {
    DisconnectedTiles {
        seed: TileCoord,
        tiles: usize,
    },
    OrphanedReference {
        entity_id: String,
        parent_id: Option<String>,
    },
    ImportantComponentFailed {
        entity_id: String,
        component_type: String,
        message: String,
    },
    Document(ValidationWarning),
}

impl fmt::Display for StructuralWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DisconnectedTiles { seed, tiles } => {
                write!(f, "{tiles} tile(s) starting at {seed} are disconnected from the lattice")
            }
            Self::OrphanedReference {
                entity_id,
                parent_id: Some(parent_id),
            } => write!(
                f,
                "entity '{entity_id}' references missing container '{parent_id}'"
            ),
            Self::OrphanedReference {
                entity_id,
                parent_id: None,
            } => write!(f, "contained entity '{entity_id}' has no container reference"),
            Self::ImportantComponentFailed {
                entity_id,
                component_type,
                message,
            } => write!(
                f,
                "component '{component_type}' on entity '{entity_id}' failed: {message}"
            ),
            Self::Document(warning) => warning.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseCounts {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Records without a prototype. Not included in `attempted`.
    pub skipped: usize,
}

impl PhaseCounts {
    pub fn merge(&mut self, other: PhaseCounts) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadSummary {
    pub grid: GridHandle,
    pub legacy_mode: bool,
    pub tiles_placed: usize,
    pub tiles_failed: usize,
    pub phase1: PhaseCounts,
    pub phase2: PhaseCounts,
    pub decals: Option<DecalRestoreCounts>,
    /// Scheduler ticks spent on the job; zero for synchronous loads.
    pub ticks: u32,
    pub warnings: Vec<StructuralWarning>,
}

impl LoadSummary {
    pub fn new(grid: GridHandle) -> Self {
        Self {
            grid,
            legacy_mode: false,
            tiles_placed: 0,
            tiles_failed: 0,
            phase1: PhaseCounts::default(),
            phase2: PhaseCounts::default(),
            decals: None,
            ticks: 0,
            warnings: Vec::new(),
        }
    }

    pub fn entities_failed(&self) -> usize {
        self.phase1.failed + self.phase2.failed
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveSummary {
    pub tiles_written: usize,
    pub entities_written: usize,
    /// Walked entities that produced no record, plus anything inside them.
    pub entities_skipped: usize,
    pub components_written: usize,
    pub warnings: Vec<StructuralWarning>,
}
