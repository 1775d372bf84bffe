use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{LoadBudgets, PersistConfig};
use crate::document::{ComponentData, EntityRecord, GridRecord};
use crate::host::{DecalRestoreCounts, EntityId, GridHandle, MapId, SceneHost, Vec2};

use super::classify::{ComponentClass, ComponentClassifier};
use super::connectivity::{sort_for_connectivity, TilePlacement};
use super::report::{LoadSummary, StructuralWarning};
use super::snapshot::report_component_failure;

/// Where and how a document's grids are created.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub map: MapId,
    pub offset: Vec2,
    pub rotation: f32,
    /// Reject documents whose metadata declares another category.
    pub expected_category: Option<String>,
}

impl LoadRequest {
    pub fn new(map: MapId) -> Self {
        Self {
            map,
            offset: Vec2::ZERO,
            rotation: 0.0,
            expected_category: None,
        }
    }

    pub fn at(mut self, offset: Vec2, rotation: f32) -> Self {
        self.offset = offset;
        self.rotation = rotation;
        self
    }

    pub fn expecting_category(mut self, category: impl Into<String>) -> Self {
        self.expected_category = Some(category.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadPhase {
    Tiles,
    /// Non-contained records.
    Phase1,
    /// Contained records, parents first.
    Phase2,
    Decals,
    Done,
}

#[derive(Debug, Clone)]
struct PendingEntity {
    /// Distinguishes records from different documents merged into one job;
    /// document-local ids are only unique within their own document.
    scope: u32,
    record: EntityRecord,
    clear_defaults: bool,
}

/// One reconstruction of a grid record onto a live grid, advanced either all
/// at once or a budgeted slice per scheduler tick.
#[derive(Debug)]
pub struct LoadJob {
    grid: GridHandle,
    phase: LoadPhase,
    tiles: VecDeque<TilePlacement>,
    roots: VecDeque<PendingEntity>,
    contained: VecDeque<PendingEntity>,
    id_map: HashMap<(u32, String), EntityId>,
    scopes: u32,
    decals: Vec<Value>,
    protected_slots: BTreeSet<String>,
    classifier: ComponentClassifier,
    summary: LoadSummary,
    completed: bool,
}

impl LoadJob {
    pub fn new(grid: GridHandle, record: GridRecord, config: &PersistConfig) -> Self {
        let mut job = Self {
            grid,
            phase: LoadPhase::Tiles,
            tiles: VecDeque::new(),
            roots: VecDeque::new(),
            contained: VecDeque::new(),
            id_map: HashMap::new(),
            scopes: 0,
            decals: Vec::new(),
            protected_slots: config.protected_slots.clone(),
            classifier: ComponentClassifier::new(),
            summary: LoadSummary::new(grid),
            completed: false,
        };
        job.queue_record(record, config);
        job.settle();
        job
    }

    pub fn grid(&self) -> GridHandle {
        self.grid
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn summary(&self) -> &LoadSummary {
        &self.summary
    }

    pub fn into_summary(self) -> LoadSummary {
        self.summary
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn pending_tiles(&self) -> usize {
        self.tiles.len()
    }

    pub fn pending_entities(&self) -> usize {
        self.roots.len() + self.contained.len()
    }

    pub fn has_pending_decals(&self) -> bool {
        !self.decals.is_empty()
    }

    pub(crate) fn record_warning(&mut self, warning: StructuralWarning) {
        self.summary.warnings.push(warning);
    }

    /// Appends another job for the same grid. Queues are concatenated, id
    /// maps kept apart, and the state rewinds to the earliest pending work.
    pub fn merge(&mut self, other: LoadJob) {
        let offset = self.scopes;
        let rescope = |mut pending: PendingEntity| {
            pending.scope += offset;
            pending
        };
        self.tiles.extend(other.tiles);
        self.roots.extend(other.roots.into_iter().map(rescope));
        self.contained.extend(other.contained.into_iter().map(rescope));
        self.id_map.extend(
            other
                .id_map
                .into_iter()
                .map(|((scope, id), entity)| ((scope + offset, id), entity)),
        );
        self.scopes += other.scopes;
        self.decals.extend(other.decals);

        let summary = other.summary;
        self.summary.legacy_mode |= summary.legacy_mode;
        self.summary.tiles_placed += summary.tiles_placed;
        self.summary.tiles_failed += summary.tiles_failed;
        self.summary.phase1.merge(summary.phase1);
        self.summary.phase2.merge(summary.phase2);
        self.summary.warnings.extend(summary.warnings);

        self.phase = LoadPhase::Tiles;
        self.completed = false;
        self.settle();
    }

    /// Performs one tick of work for the current state, within `budgets`.
    pub fn advance<H: SceneHost + ?Sized>(
        &mut self,
        host: &mut H,
        budgets: &LoadBudgets,
    ) -> LoadPhase {
        if self.phase == LoadPhase::Done {
            self.finish();
            return self.phase;
        }
        self.summary.ticks += 1;
        let started = Instant::now();
        let mut done = 0usize;
        match self.phase {
            LoadPhase::Tiles => {
                while within_budget(done, budgets.tiles_per_tick, started, budgets.max_tick_time) {
                    let Some(placement) = self.tiles.pop_front() else {
                        break;
                    };
                    self.place_tile(host, placement);
                    done += 1;
                }
            }
            LoadPhase::Phase1 => {
                while within_budget(done, budgets.entities_per_tick, started, budgets.max_tick_time)
                {
                    let Some(pending) = self.roots.pop_front() else {
                        break;
                    };
                    self.spawn_root(host, pending);
                    done += 1;
                }
            }
            LoadPhase::Phase2 => {
                while within_budget(done, budgets.entities_per_tick, started, budgets.max_tick_time)
                {
                    let Some(pending) = self.contained.pop_front() else {
                        break;
                    };
                    self.spawn_contained(host, pending);
                    done += 1;
                }
            }
            LoadPhase::Decals => self.restore_decals(host),
            LoadPhase::Done => {}
        }
        debug!(
            grid = %self.grid,
            tick = self.summary.ticks,
            units = done,
            elapsed_us = started.elapsed().as_micros() as u64,
            "load_job_advanced"
        );
        self.settle();
        if self.phase == LoadPhase::Done {
            self.finish();
        }
        self.phase
    }

    /// Synchronous path: tiles, then decals, then both spawn phases.
    pub fn run_to_completion<H: SceneHost + ?Sized>(mut self, host: &mut H) -> LoadSummary {
        while let Some(placement) = self.tiles.pop_front() {
            self.place_tile(host, placement);
        }
        self.restore_decals(host);
        while let Some(pending) = self.roots.pop_front() {
            self.spawn_root(host, pending);
        }
        while let Some(pending) = self.contained.pop_front() {
            self.spawn_contained(host, pending);
        }
        self.phase = LoadPhase::Done;
        self.finish();
        self.summary
    }

    fn queue_record(&mut self, record: GridRecord, config: &PersistConfig) {
        let scope = self.scopes;
        self.scopes += 1;

        let placements = record
            .tiles
            .iter()
            .filter(|tile| !tile.tile_type.is_empty() && tile.tile_type != config.empty_tile_type)
            .map(|tile| TilePlacement {
                coord: tile.coord(),
                tile_type: tile.tile_type.clone(),
            })
            .collect::<Vec<_>>();
        let sorted = sort_for_connectivity(placements);
        for fragment in &sorted.detached {
            warn!(
                grid = %self.grid,
                seed = %fragment.seed,
                tiles = fragment.tiles,
                "tiles_disconnected"
            );
            self.summary.warnings.push(StructuralWarning::DisconnectedTiles {
                seed: fragment.seed,
                tiles: fragment.tiles,
            });
        }
        self.tiles.extend(sorted.placements);

        let legacy = !record
            .entities
            .iter()
            .any(|entity| entity.is_container || entity.is_contained);
        if legacy && !record.entities.is_empty() {
            info!(
                grid = %self.grid,
                entities = record.entities.len(),
                "legacy_document_detected"
            );
            self.summary.legacy_mode = true;
        }

        let mut contained = Vec::new();
        for entity in record.entities {
            if legacy || !entity.is_contained {
                self.roots.push_back(PendingEntity {
                    scope,
                    record: entity,
                    clear_defaults: !legacy,
                });
            } else {
                contained.push(entity);
            }
        }
        self.contained
            .extend(order_parents_first(contained).into_iter().map(|record| {
                PendingEntity {
                    scope,
                    record,
                    clear_defaults: true,
                }
            }));

        if config.decals_enabled {
            if let Some(decals) = record.decal_data {
                self.decals.push(decals);
            }
        }
    }

    fn settle(&mut self) {
        loop {
            let next = match self.phase {
                LoadPhase::Tiles if self.tiles.is_empty() => LoadPhase::Phase1,
                LoadPhase::Phase1 if self.roots.is_empty() => LoadPhase::Phase2,
                LoadPhase::Phase2 if self.contained.is_empty() => LoadPhase::Decals,
                LoadPhase::Decals if self.decals.is_empty() => LoadPhase::Done,
                _ => return,
            };
            self.phase = next;
        }
    }

    fn finish(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let summary = &self.summary;
        info!(
            grid = %self.grid,
            legacy_mode = summary.legacy_mode,
            tiles_placed = summary.tiles_placed,
            tiles_failed = summary.tiles_failed,
            phase1_attempted = summary.phase1.attempted,
            phase1_succeeded = summary.phase1.succeeded,
            phase1_failed = summary.phase1.failed,
            phase2_attempted = summary.phase2.attempted,
            phase2_succeeded = summary.phase2.succeeded,
            phase2_failed = summary.phase2.failed,
            skipped = summary.phase1.skipped + summary.phase2.skipped,
            ticks = summary.ticks,
            warnings = summary.warnings.len(),
            "grid_load_completed"
        );
    }

    fn place_tile<H: SceneHost + ?Sized>(&mut self, host: &mut H, placement: TilePlacement) {
        match host.set_tile(self.grid, placement.coord, &placement.tile_type) {
            Ok(()) => self.summary.tiles_placed += 1,
            Err(error) => {
                self.summary.tiles_failed += 1;
                warn!(
                    grid = %self.grid,
                    coord = %placement.coord,
                    tile_type = %placement.tile_type,
                    error = %error,
                    "tile_place_failed"
                );
            }
        }
    }

    fn restore_decals<H: SceneHost + ?Sized>(&mut self, host: &mut H) {
        for payload in std::mem::take(&mut self.decals) {
            let counts = host.restore_decals(self.grid, &payload);
            let total = self.summary.decals.get_or_insert_with(DecalRestoreCounts::default);
            total.restored += counts.restored;
            total.failed += counts.failed;
            info!(
                grid = %self.grid,
                restored = counts.restored,
                failed = counts.failed,
                "decals_restored"
            );
        }
    }

    fn spawn_root<H: SceneHost + ?Sized>(&mut self, host: &mut H, pending: PendingEntity) {
        let PendingEntity {
            scope,
            record,
            clear_defaults,
        } = pending;
        if record.prototype_id.is_empty() {
            self.summary.phase1.skipped += 1;
            debug!(grid = %self.grid, entity_id = %record.entity_id, "entity_without_prototype_skipped");
            return;
        }
        self.summary.phase1.attempted += 1;

        let (position, rotation) = sanitized_transform(&record);
        let entity = match host.spawn(&record.prototype_id, self.grid, position, rotation) {
            Ok(entity) => entity,
            Err(error) => {
                self.summary.phase1.failed += 1;
                warn!(
                    grid = %self.grid,
                    entity_id = %record.entity_id,
                    prototype_id = %record.prototype_id,
                    error = %error,
                    "entity_spawn_failed"
                );
                return;
            }
        };
        if let Some(anchored) = record.anchored {
            if host.is_anchored(entity) != anchored {
                if let Err(error) = host.set_anchored(entity, anchored) {
                    debug!(entity = %entity, error = %error, "anchor_restore_failed");
                }
            }
        }
        if clear_defaults && record.is_container {
            self.clear_default_contents(host, entity);
        }
        self.restore_components(host, entity, &record);
        self.id_map.insert((scope, record.entity_id), entity);
        self.summary.phase1.succeeded += 1;
    }

    fn spawn_contained<H: SceneHost + ?Sized>(&mut self, host: &mut H, pending: PendingEntity) {
        let PendingEntity {
            scope,
            record,
            clear_defaults,
        } = pending;
        if record.prototype_id.is_empty() {
            self.summary.phase2.skipped += 1;
            debug!(grid = %self.grid, entity_id = %record.entity_id, "entity_without_prototype_skipped");
            return;
        }
        self.summary.phase2.attempted += 1;

        let entity = match host.spawn(&record.prototype_id, self.grid, Vec2::ZERO, 0.0) {
            Ok(entity) => entity,
            Err(error) => {
                self.summary.phase2.failed += 1;
                warn!(
                    grid = %self.grid,
                    entity_id = %record.entity_id,
                    prototype_id = %record.prototype_id,
                    error = %error,
                    "entity_spawn_failed"
                );
                return;
            }
        };

        let parent = record
            .parent_container_entity
            .as_ref()
            .and_then(|parent_id| self.id_map.get(&(scope, parent_id.clone())).copied());
        let Some(parent) = parent else {
            host.delete(entity);
            self.summary.phase2.failed += 1;
            warn!(
                grid = %self.grid,
                entity_id = %record.entity_id,
                parent_id = ?record.parent_container_entity,
                "contained_parent_missing"
            );
            self.summary.warnings.push(StructuralWarning::OrphanedReference {
                entity_id: record.entity_id.clone(),
                parent_id: record.parent_container_entity.clone(),
            });
            return;
        };
        let Some(slot) = record.container_slot.as_deref().filter(|slot| !slot.is_empty()) else {
            host.delete(entity);
            self.summary.phase2.failed += 1;
            warn!(grid = %self.grid, entity_id = %record.entity_id, "contained_slot_missing");
            return;
        };

        if clear_defaults && record.is_container {
            self.clear_default_contents(host, entity);
        }
        if let Err(error) = host.insert_into(entity, parent, slot) {
            host.delete(entity);
            self.summary.phase2.failed += 1;
            warn!(
                grid = %self.grid,
                entity_id = %record.entity_id,
                container = %parent,
                slot,
                error = %error,
                "container_insert_failed"
            );
            return;
        }
        self.restore_components(host, entity, &record);
        self.id_map.insert((scope, record.entity_id), entity);
        self.summary.phase2.succeeded += 1;
    }

    fn clear_default_contents<H: SceneHost + ?Sized>(&mut self, host: &mut H, container: EntityId) {
        for slot in host.container_slots(container) {
            if self.protected_slots.contains(&slot) {
                debug!(container = %container, slot = %slot, "protected_slot_kept");
                continue;
            }
            for child in host.slot_contents(container, &slot) {
                if let Err(error) = host.remove_from(child, container, &slot) {
                    debug!(container = %container, entity = %child, error = %error, "default_content_remove_failed");
                }
                host.delete(child);
            }
        }
    }

    fn restore_components<H: SceneHost + ?Sized>(
        &mut self,
        host: &mut H,
        entity: EntityId,
        record: &EntityRecord,
    ) {
        for component in &record.components {
            let component_type = component.component_type.as_str();
            let class = self.classifier.classify(component_type);
            if let ComponentClass::Skip(_) = class {
                continue;
            }
            let result = match &component.data {
                ComponentData::Solution(payload) => {
                    host.write_solution(entity, component_type, &payload.to_state())
                }
                ComponentData::Payload(payload) => {
                    let present = if host.has_component(entity, component_type) {
                        Ok(())
                    } else {
                        host.add_component(entity, component_type)
                    };
                    present.and_then(|()| host.write_component(entity, component_type, payload))
                }
            };
            if let Err(error) = result {
                report_component_failure(
                    class,
                    &record.entity_id,
                    component_type,
                    &error,
                    &mut self.summary.warnings,
                );
            }
        }
    }
}

fn within_budget(done: usize, limit: usize, started: Instant, max_time: Duration) -> bool {
    // A zero count limit still admits one unit per tick.
    if done >= limit.max(1) {
        return false;
    }
    // Always make progress, even when the host is already over budget.
    done == 0 || started.elapsed() < max_time
}

fn sanitized_transform(record: &EntityRecord) -> (Vec2, f32) {
    let finite = |value: f32| if value.is_finite() { value } else { 0.0 };
    (
        Vec2::new(finite(record.position.x), finite(record.position.y)),
        finite(record.rotation),
    )
}

/// Stable reorder by containment depth so that every record whose parent is
/// itself contained comes after that parent.
fn order_parents_first(records: Vec<EntityRecord>) -> Vec<EntityRecord> {
    let depths = {
        let parent_of = records
            .iter()
            .filter_map(|record| {
                Some((
                    record.entity_id.as_str(),
                    record.parent_container_entity.as_deref()?,
                ))
            })
            .collect::<HashMap<_, _>>();
        records
            .iter()
            .map(|record| {
                let mut depth = 0usize;
                let mut seen = HashSet::new();
                let mut current = record.entity_id.as_str();
                while let Some(parent) = parent_of.get(current) {
                    if !seen.insert(*parent) {
                        break;
                    }
                    depth += 1;
                    current = *parent;
                }
                depth
            })
            .collect::<Vec<_>>()
    };
    let mut indexed = depths.into_iter().zip(records).collect::<Vec<_>>();
    indexed.sort_by_key(|(depth, _)| *depth);
    indexed.into_iter().map(|(_, record)| record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contained_records_are_ordered_parents_first() {
        let records = vec![
            EntityRecord::new("3", "Pen", Vec2::ZERO).contained_in("2", "pocket"),
            EntityRecord::new("2", "Jacket", Vec2::ZERO).contained_in("1", "storage"),
            EntityRecord::new("4", "Map", Vec2::ZERO).contained_in("1", "storage"),
        ];
        let ordered = order_parents_first(records)
            .into_iter()
            .map(|record| record.entity_id)
            .collect::<Vec<_>>();
        assert_eq!(ordered, vec!["2", "4", "3"]);
    }

    #[test]
    fn budget_allows_first_unit_past_the_deadline() {
        let started = Instant::now();
        assert!(within_budget(0, 2, started, Duration::ZERO));
        assert!(!within_budget(1, 2, started, Duration::ZERO));
        assert!(!within_budget(2, 2, started, Duration::MAX));
        assert!(within_budget(1, 2, started, Duration::MAX));
        assert!(within_budget(0, 0, started, Duration::MAX));
        assert!(!within_budget(1, 0, started, Duration::MAX));
    }

    #[test]
    fn non_finite_transforms_are_zeroed() {
        let mut record = EntityRecord::new("0", "Wall", Vec2::new(f32::NAN, 2.0));
        record.rotation = f32::INFINITY;
        assert_eq!(sanitized_transform(&record), (Vec2::new(0.0, 2.0), 0.0));
    }
}
