use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::config::PersistConfig;
use crate::document::{Document, DocumentMetadata, GridRecord, TileRecord, FORMAT_VERSION};
use crate::host::{EntityId, GridHandle, SceneHost};

use super::report::SaveSummary;
use super::snapshot::EntitySnapshotter;
use super::walker::walk_grid;
use super::SaveError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveRequest {
    pub display_name: String,
    pub category: Option<String>,
    /// Replaces the wall-clock creation time.
    pub timestamp: Option<u64>,
}

impl SaveRequest {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn at_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SavedGrid {
    pub document: Document,
    pub summary: SaveSummary,
}

pub fn save_grid<H: SceneHost + ?Sized>(
    host: &H,
    grid: GridHandle,
    request: &SaveRequest,
    config: &PersistConfig,
) -> Result<SavedGrid, SaveError> {
    if !host.grid_exists(grid) {
        return Err(SaveError::GridMissing(grid));
    }
    let mut summary = SaveSummary::default();

    let mut tiles = host
        .tiles(grid)
        .into_iter()
        .filter(|(_, tile_type)| !tile_type.is_empty() && *tile_type != config.empty_tile_type)
        .collect::<Vec<_>>();
    tiles.sort_by_key(|(coord, _)| *coord);
    let tiles = tiles
        .into_iter()
        .map(|(coord, tile_type)| TileRecord {
            x: coord.x,
            y: coord.y,
            tile_type,
        })
        .collect::<Vec<_>>();
    summary.tiles_written = tiles.len();

    let walk = walk_grid(host, grid);
    let mut snapshotter = EntitySnapshotter::new(config.position_decimals);
    let mut ids = HashMap::<EntityId, String>::with_capacity(walk.entities.len());
    let mut entities = Vec::with_capacity(walk.entities.len());

    for walked in &walk.entities {
        let parent_id = match &walked.containment {
            Some(edge) => match ids.get(&edge.parent) {
                Some(parent_id) => Some((parent_id.clone(), edge.slot.as_str())),
                None => {
                    // Container produced no record; its contents go with it.
                    summary.entities_skipped += 1;
                    continue;
                }
            },
            None => None,
        };

        let entity_id = entities.len().to_string();
        let Some(mut record) =
            snapshotter.snapshot(host, walked.entity, &entity_id, &mut summary.warnings)
        else {
            summary.entities_skipped += 1;
            debug!(grid = %grid, entity = %walked.entity, "entity_snapshot_skipped");
            continue;
        };
        record.is_container = walked.is_container;
        match parent_id {
            Some((parent_id, slot)) => record = record.contained_in(&parent_id, slot),
            None => record.anchored = Some(host.is_anchored(walked.entity)),
        }
        summary.components_written += record.components.len();
        ids.insert(walked.entity, entity_id);
        entities.push(record);
    }
    summary.entities_written = entities.len();

    let decal_data = if config.decals_enabled {
        host.export_decals(grid)
    } else {
        None
    };

    let timestamp = request.timestamp.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default()
    });
    let document = Document {
        format_version: FORMAT_VERSION,
        metadata: DocumentMetadata {
            original_id: grid.to_string(),
            author_id: config.author_id.clone(),
            display_name: request.display_name.clone(),
            timestamp,
            original_rotation: host.grid_rotation(grid),
            category: request.category.clone(),
        },
        grids: vec![GridRecord {
            grid_id: "0".to_string(),
            tiles,
            entities,
            decal_data,
        }],
    };

    info!(
        grid = %grid,
        tiles = summary.tiles_written,
        entities = summary.entities_written,
        skipped = summary.entities_skipped,
        components = summary.components_written,
        warnings = summary.warnings.len(),
        "grid_save_completed"
    );
    Ok(SavedGrid { document, summary })
}
