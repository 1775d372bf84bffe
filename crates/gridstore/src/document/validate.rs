use std::collections::BTreeSet;
use std::fmt;

use super::Document;

/// A structural problem found in a decoded document. None of these stop a
/// load; they are surfaced so the caller can log or display them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed at {}: {}", self.path, self.message)
    }
}

pub fn validate_document(document: &Document) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    if document.grids.is_empty() {
        warnings.push(warning("grids", "document contains no grids"));
    }

    for (grid_index, grid) in document.grids.iter().enumerate() {
        let mut seen_tiles = BTreeSet::new();
        for (tile_index, tile) in grid.tiles.iter().enumerate() {
            if !seen_tiles.insert((tile.x, tile.y)) {
                warnings.push(warning(
                    format!("grids[{grid_index}].tiles[{tile_index}]"),
                    format!("duplicate tile at ({}, {})", tile.x, tile.y),
                ));
            }
        }

        let mut ids = BTreeSet::new();
        for (entity_index, entity) in grid.entities.iter().enumerate() {
            if !ids.insert(entity.entity_id.as_str()) {
                warnings.push(warning(
                    format!("grids[{grid_index}].entities[{entity_index}].entityId"),
                    format!("duplicate entity id '{}'", entity.entity_id),
                ));
            }
        }

        for (entity_index, entity) in grid.entities.iter().enumerate() {
            let base = format!("grids[{grid_index}].entities[{entity_index}]");
            if entity.prototype_id.is_empty() {
                warnings.push(warning(
                    format!("{base}.prototypeId"),
                    "entity has no prototype and will be skipped",
                ));
            }
            if !entity.position.x.is_finite()
                || !entity.position.y.is_finite()
                || !entity.rotation.is_finite()
            {
                warnings.push(warning(
                    format!("{base}.position"),
                    "transform contains a non-finite value",
                ));
            }
            match (&entity.parent_container_entity, entity.is_contained) {
                (Some(parent), true) => {
                    if !ids.contains(parent.as_str()) {
                        warnings.push(warning(
                            format!("{base}.parentContainerEntity"),
                            format!("parent '{parent}' is not in this grid"),
                        ));
                    }
                    if parent == &entity.entity_id {
                        warnings.push(warning(
                            format!("{base}.parentContainerEntity"),
                            "entity names itself as its container",
                        ));
                    }
                    if entity.container_slot.as_deref().unwrap_or_default().is_empty() {
                        warnings.push(warning(
                            format!("{base}.containerSlot"),
                            "contained entity has no slot name",
                        ));
                    }
                }
                (None, true) => warnings.push(warning(
                    format!("{base}.parentContainerEntity"),
                    "contained entity has no parent reference",
                )),
                (Some(_), false) => warnings.push(warning(
                    format!("{base}.isContained"),
                    "parent reference set on an entity not marked contained",
                )),
                (None, false) => {}
            }
        }
    }
    warnings
}

fn warning(path: impl Into<String>, message: impl Into<String>) -> ValidationWarning {
    ValidationWarning {
        path: path.into(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentMetadata, EntityRecord, GridRecord, FORMAT_VERSION};
    use crate::host::Vec2;

    fn document_with(entities: Vec<EntityRecord>) -> Document {
        Document {
            format_version: FORMAT_VERSION,
            metadata: DocumentMetadata {
                original_id: "grid#1".to_string(),
                author_id: String::new(),
                display_name: String::new(),
                timestamp: 0,
                original_rotation: None,
                category: None,
            },
            grids: vec![GridRecord {
                grid_id: "0".to_string(),
                tiles: Vec::new(),
                entities,
                decal_data: None,
            }],
        }
    }

    #[test]
    fn well_formed_document_has_no_warnings() {
        let document = document_with(vec![
            EntityRecord::new("0", "Locker", Vec2::ZERO).as_container(),
            EntityRecord::new("1", "Crowbar", Vec2::ZERO).contained_in("0", "storage"),
        ]);
        assert!(validate_document(&document).is_empty());
    }

    #[test]
    fn dangling_parent_and_duplicate_ids_are_reported() {
        let document = document_with(vec![
            EntityRecord::new("0", "Locker", Vec2::ZERO),
            EntityRecord::new("0", "Crate", Vec2::ZERO),
            EntityRecord::new("2", "Crowbar", Vec2::ZERO).contained_in("9", "storage"),
        ]);
        let warnings = validate_document(&document);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].path, "grids[0].entities[1].entityId");
        assert_eq!(warnings[1].path, "grids[0].entities[2].parentContainerEntity");
        assert!(warnings[1]
            .to_string()
            .starts_with("validation failed at grids[0].entities[2]"));
    }

    #[test]
    fn inconsistent_containment_flags_are_reported() {
        let mut stray = EntityRecord::new("1", "Crowbar", Vec2::ZERO);
        stray.parent_container_entity = Some("0".to_string());
        let mut no_slot = EntityRecord::new("2", "Wrench", Vec2::ZERO).contained_in("0", "storage");
        no_slot.container_slot = None;
        let blank_slot = EntityRecord::new("3", "Flare", Vec2::ZERO).contained_in("0", "");
        let document = document_with(vec![
            EntityRecord::new("0", "Locker", Vec2::new(f32::NAN, 0.0)),
            stray,
            no_slot,
            blank_slot,
        ]);
        let messages = validate_document(&document)
            .into_iter()
            .map(|warning| warning.path)
            .collect::<Vec<_>>();
        assert_eq!(
            messages,
            vec![
                "grids[0].entities[0].position".to_string(),
                "grids[0].entities[1].isContained".to_string(),
                "grids[0].entities[2].containerSlot".to_string(),
                "grids[0].entities[3].containerSlot".to_string(),
            ]
        );
    }
}
