use tracing::{debug, warn};

use crate::document::{ComponentData, ComponentRecord, EntityRecord, RecordVec2, SolutionPayload};
use crate::host::{EntityId, HostError, SceneHost, Vec2};

use super::classify::{ComponentClass, ComponentClassifier};
use super::report::StructuralWarning;

/// Converts live entities into document records. One instance per save; the
/// classification memo lives as long as the snapshotter.
#[derive(Debug)]
pub struct EntitySnapshotter {
    classifier: ComponentClassifier,
    position_decimals: u32,
}

impl EntitySnapshotter {
    pub fn new(position_decimals: u32) -> Self {
        Self {
            classifier: ComponentClassifier::new(),
            position_decimals,
        }
    }

    /// Returns `None` for entities without a prototype or already being torn
    /// down. Component failures never prevent the record.
    pub fn snapshot<H: SceneHost + ?Sized>(
        &mut self,
        host: &H,
        entity: EntityId,
        entity_id: &str,
        warnings: &mut Vec<StructuralWarning>,
    ) -> Option<EntityRecord> {
        let prototype_id = host.prototype_id(entity)?;
        match host.life_stage(entity) {
            Some(stage) if !stage.is_terminating() => {}
            _ => return None,
        }
        let (position, rotation) = host.local_transform(entity).unwrap_or((Vec2::ZERO, 0.0));

        let mut record = EntityRecord::new(entity_id, prototype_id, Vec2::ZERO);
        record.position = RecordVec2 {
            x: round_to(position.x, self.position_decimals),
            y: round_to(position.y, self.position_decimals),
        };
        record.rotation = round_to(rotation, self.position_decimals);

        let mut component_types = host.component_types(entity);
        component_types.sort();
        component_types.dedup();
        for component_type in component_types {
            let class = self.classifier.classify(&component_type);
            let data = match class {
                ComponentClass::Skip(_) => continue,
                ComponentClass::Solution => host
                    .read_solution(entity, &component_type)
                    .map(|state| ComponentData::Solution(SolutionPayload::from_state(&state))),
                ComponentClass::Generic(_) => host
                    .read_component(entity, &component_type)
                    .map(ComponentData::Payload),
            };
            match data {
                Ok(data) => record.components.push(ComponentRecord {
                    component_type,
                    data,
                }),
                Err(error) => {
                    report_component_failure(class, entity_id, &component_type, &error, warnings)
                }
            }
        }
        Some(record)
    }
}

pub(crate) fn report_component_failure(
    class: ComponentClass,
    entity_id: &str,
    component_type: &str,
    error: &HostError,
    warnings: &mut Vec<StructuralWarning>,
) {
    if class.is_important() {
        warn!(
            entity_id,
            component_type,
            error = %error,
            "important_component_failed"
        );
        warnings.push(StructuralWarning::ImportantComponentFailed {
            entity_id: entity_id.to_string(),
            component_type: component_type.to_string(),
            message: error.to_string(),
        });
    } else {
        debug!(
            entity_id,
            component_type,
            error = %error,
            "component_dropped"
        );
    }
}

/// Rounds to a fixed number of decimals. Non-finite values become zero.
pub(crate) fn round_to(value: f32, decimals: u32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    let scale = 10f64.powi(decimals.min(9) as i32);
    let rounded = ((f64::from(value) * scale).round() / scale) as f32;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::host::{
        GridHandle, LifeStage, MapId, MemoryScene, PrototypeDef, PrototypeRegistry, SolutionState,
    };

    fn scene() -> (MemoryScene, GridHandle) {
        let registry = PrototypeRegistry::from_defs(vec![
            PrototypeDef::new("Beaker")
                .with_component("Label", json!({"text": "acid"}))
                .with_component("Sprite", json!({"state": "full"}))
                .with_component("Battery", json!({"charge": 10}))
                .with_solution(
                    "SolutionContainerManager",
                    SolutionState {
                        volume: 50.0,
                        temperature: 293.15,
                        contents: BTreeMap::from([("Water".to_string(), 20.0)]),
                    },
                ),
        ]);
        let mut scene = MemoryScene::new(registry);
        scene.add_map(MapId(0));
        let grid = scene.create_grid(MapId(0), Vec2::ZERO, 0.0).expect("grid");
        (scene, grid)
    }

    #[test]
    fn snapshot_rounds_transform_and_sorts_components() {
        let (mut scene, grid) = scene();
        let beaker = scene
            .spawn("Beaker", grid, Vec2::new(1.23456, -0.0004), 0.78539)
            .expect("spawn");
        let mut warnings = Vec::new();
        let record = EntitySnapshotter::new(3)
            .snapshot(&scene, beaker, "0", &mut warnings)
            .expect("record");

        assert_eq!(record.prototype_id, "Beaker");
        assert_eq!(record.position, RecordVec2 { x: 1.235, y: 0.0 });
        assert_eq!(record.rotation, 0.785);
        let types = record
            .components
            .iter()
            .map(|component| component.component_type.as_str())
            .collect::<Vec<_>>();
        assert_eq!(types, vec!["Battery", "Label", "SolutionContainerManager"]);
        assert!(matches!(
            record.components[2].data,
            ComponentData::Solution(ref payload) if payload.contents.get("Water") == Some(&20.0)
        ));
        assert!(warnings.is_empty());
    }

    #[test]
    fn failing_components_are_dropped_with_severity_by_family() {
        let (mut scene, grid) = scene();
        let beaker = scene.spawn("Beaker", grid, Vec2::ZERO, 0.0).expect("spawn");
        scene.fail_component_reads("Battery");
        scene.fail_component_reads("Label");
        let mut warnings = Vec::new();
        let record = EntitySnapshotter::new(3)
            .snapshot(&scene, beaker, "7", &mut warnings)
            .expect("record");

        assert_eq!(record.components.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            &warnings[0],
            StructuralWarning::ImportantComponentFailed { entity_id, component_type, .. }
                if entity_id == "7" && component_type == "Battery"
        ));
    }

    #[test]
    fn terminating_entities_produce_no_record() {
        let (mut scene, grid) = scene();
        let beaker = scene.spawn("Beaker", grid, Vec2::ZERO, 0.0).expect("spawn");
        scene.set_life_stage(beaker, LifeStage::Terminating);
        let mut warnings = Vec::new();
        assert!(EntitySnapshotter::new(3)
            .snapshot(&scene, beaker, "0", &mut warnings)
            .is_none());
    }

    #[test]
    fn non_finite_values_round_to_zero() {
        assert_eq!(round_to(f32::NAN, 3), 0.0);
        assert_eq!(round_to(f32::INFINITY, 3), 0.0);
        assert_eq!(round_to(2.0004, 3), 2.0);
    }
}
