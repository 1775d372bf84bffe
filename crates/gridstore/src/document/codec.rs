use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::{Document, FORMAT_VERSION};

const METADATA_KEY: &str = "metadata";
const LEGACY_METADATA_KEY: &str = "meta";
const VERSION_KEY: &str = "formatVersion";
const UNDERSCORED_VERSION_KEY: &str = "format_version";
const LEGACY_VERSION_KEY: &str = "version";
/// Keys whose values belong to other subsystems and keep their own naming.
const OPAQUE_KEYS: &[&str] = &["payload", "contents", "decalData", "decal_data"];
const CONVENTION_SAMPLE_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldConvention {
    /// `formatVersion`, `entityId`, ... The only convention written.
    CamelCase,
    /// `format_version`, `entity_id`, ... Accepted on read.
    Underscored,
}

impl FieldConvention {
    fn other(self) -> Self {
        match self {
            Self::CamelCase => Self::Underscored,
            Self::Underscored => Self::CamelCase,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::CamelCase => "camelCase",
            Self::Underscored => "underscored",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub renamed_metadata_key: bool,
    pub renamed_version_key: bool,
}

impl MigrationReport {
    pub fn is_empty(&self) -> bool {
        !self.renamed_metadata_key && !self.renamed_version_key
    }
}

#[derive(Debug, Clone)]
pub struct DecodedDocument {
    pub document: Document,
    pub convention: FieldConvention,
    pub migration: MigrationReport,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("document is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("document root must be a JSON object")]
    NotAnObject,
    #[error(
        "document matches no known layout; {} parse failed: {first_error}; {} parse failed: {second_error}",
        first.as_str(),
        second.as_str()
    )]
    Unparseable {
        first: FieldConvention,
        first_error: String,
        second: FieldConvention,
        second_error: String,
    },
    #[error("failed to encode document: {0}")]
    Encode(#[source] serde_json::Error),
}

pub fn encode_document(document: &Document) -> Result<String, CodecError> {
    serde_json::to_string_pretty(document).map_err(CodecError::Encode)
}

pub fn encode_value(document: &Document) -> Result<Value, CodecError> {
    serde_json::to_value(document).map_err(CodecError::Encode)
}

pub fn decode_document(raw: &str) -> Result<DecodedDocument, CodecError> {
    let value = serde_json::from_str::<Value>(raw).map_err(CodecError::Malformed)?;
    decode_value(value)
}

/// Decodes a structured document, migrating legacy keys and falling back
/// across field-name conventions.
pub fn decode_value(mut value: Value) -> Result<DecodedDocument, CodecError> {
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }
    let migration = migrate_legacy_keys(&mut value);
    if !migration.is_empty() {
        debug!(
            renamed_metadata_key = migration.renamed_metadata_key,
            renamed_version_key = migration.renamed_version_key,
            "document_legacy_keys_migrated"
        );
    }

    let first = detect_convention(&value);
    let second = first.other();
    let (document, convention) = match parse_with(first, value.clone()) {
        Ok(document) => (document, first),
        Err(first_error) => match parse_with(second, value) {
            Ok(document) => {
                debug!(
                    sniffed = first.as_str(),
                    parsed = second.as_str(),
                    first_error = %first_error,
                    "document_convention_fallback"
                );
                (document, second)
            }
            Err(second_error) => {
                return Err(CodecError::Unparseable {
                    first,
                    first_error,
                    second,
                    second_error,
                })
            }
        },
    };

    if document.format_version > FORMAT_VERSION {
        warn!(
            format_version = document.format_version,
            supported = FORMAT_VERSION,
            "document_newer_than_supported"
        );
    }

    Ok(DecodedDocument {
        document,
        convention,
        migration,
    })
}

/// Renames the legacy metadata and version keys in place. Running it on an
/// already-migrated document changes nothing.
pub fn migrate_legacy_keys(value: &mut Value) -> MigrationReport {
    let mut report = MigrationReport::default();
    let Value::Object(root) = value else {
        return report;
    };
    if !root.contains_key(METADATA_KEY) {
        if let Some(metadata) = root.remove(LEGACY_METADATA_KEY) {
            root.insert(METADATA_KEY.to_string(), metadata);
            report.renamed_metadata_key = true;
        }
    }
    if !root.contains_key(VERSION_KEY) && !root.contains_key(UNDERSCORED_VERSION_KEY) {
        if let Some(version) = root.remove(LEGACY_VERSION_KEY) {
            root.insert(VERSION_KEY.to_string(), version);
            report.renamed_version_key = true;
        }
    }
    report
}

/// Samples field names outside opaque payloads. Ties go to camelCase.
pub fn detect_convention(value: &Value) -> FieldConvention {
    let mut underscored = 0usize;
    let mut camel = 0usize;
    let mut sampled = 0usize;
    let mut pending = vec![value];
    while let Some(current) = pending.pop() {
        match current {
            Value::Object(map) => {
                for (key, child) in map {
                    if sampled >= CONVENTION_SAMPLE_LIMIT {
                        break;
                    }
                    sampled += 1;
                    if key.contains('_') {
                        underscored += 1;
                    } else if key.chars().any(|c| c.is_ascii_uppercase()) {
                        camel += 1;
                    }
                    if !OPAQUE_KEYS.contains(&key.as_str()) {
                        pending.push(child);
                    }
                }
            }
            Value::Array(items) => pending.extend(items.iter()),
            _ => {}
        }
        if sampled >= CONVENTION_SAMPLE_LIMIT {
            break;
        }
    }
    if underscored > camel {
        FieldConvention::Underscored
    } else {
        FieldConvention::CamelCase
    }
}

fn parse_with(convention: FieldConvention, value: Value) -> Result<Document, String> {
    let value = match convention {
        FieldConvention::CamelCase => value,
        FieldConvention::Underscored => underscored_to_camel(value),
    };
    match serde_path_to_error::deserialize::<_, Document>(value) {
        Ok(document) => Ok(document),
        Err(error) => {
            let path = error.path().to_string();
            let source = error.into_inner();
            if path.is_empty() || path == "." {
                Err(source.to_string())
            } else {
                Err(format!("at {path}: {source}"))
            }
        }
    }
}

fn underscored_to_camel(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut converted = Map::with_capacity(map.len());
            for (key, child) in map {
                let child = if OPAQUE_KEYS.contains(&key.as_str()) {
                    child
                } else {
                    underscored_to_camel(child)
                };
                converted.insert(camel_case_key(&key), child);
            }
            Value::Object(converted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(underscored_to_camel).collect()),
        other => other,
    }
}

fn camel_case_key(key: &str) -> String {
    if !key.contains('_') || key.starts_with('_') {
        return key.to_string();
    }
    let mut output = String::with_capacity(key.len());
    for (index, part) in key.split('_').filter(|part| !part.is_empty()).enumerate() {
        if index == 0 {
            output.push_str(part);
            continue;
        }
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            output.extend(first.to_uppercase());
            output.push_str(chars.as_str());
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::{ComponentData, DocumentMetadata, EntityRecord, GridRecord, TileRecord};
    use crate::host::Vec2;

    fn sample_document() -> Document {
        let mut locker = EntityRecord::new("0", "Locker", Vec2::new(1.5, -2.0)).as_container();
        locker.anchored = Some(true);
        locker.components.push(crate::document::ComponentRecord {
            component_type: "AccessReader".to_string(),
            data: ComponentData::Payload(json!({"access_levels": ["Security"]})),
        });
        Document {
            format_version: FORMAT_VERSION,
            metadata: DocumentMetadata {
                original_id: "grid#4".to_string(),
                author_id: "tester".to_string(),
                display_name: "Outpost".to_string(),
                timestamp: 1_700_000_000,
                original_rotation: Some(0.5),
                category: None,
            },
            grids: vec![GridRecord {
                grid_id: "0".to_string(),
                tiles: vec![TileRecord {
                    x: 0,
                    y: 0,
                    tile_type: "Floor".to_string(),
                }],
                entities: vec![
                    locker,
                    EntityRecord::new("1", "Crowbar", Vec2::ZERO).contained_in("0", "storage"),
                ],
                decal_data: Some(json!([{"decal_id": "Dirt"}])),
            }],
        }
    }

    #[test]
    fn encoded_document_uses_camel_case_and_decodes_back() {
        let document = sample_document();
        let text = encode_document(&document).expect("encode");
        assert!(text.contains("\"formatVersion\""));
        assert!(text.contains("\"parentContainerEntity\""));
        assert!(!text.contains("format_version"));

        let decoded = decode_document(&text).expect("decode");
        assert_eq!(decoded.convention, FieldConvention::CamelCase);
        assert!(decoded.migration.is_empty());
        assert_eq!(decoded.document, document);
    }

    #[test]
    fn underscored_document_decodes_and_keeps_opaque_keys() {
        let raw = json!({
            "format_version": 3,
            "metadata": {"original_id": "grid#1", "author_id": "a", "display_name": "d", "timestamp": 5},
            "grids": [{
                "grid_id": "0",
                "tiles": [{"x": 1, "y": 2, "tile_type": "Floor"}],
                "entities": [{
                    "entity_id": "0",
                    "prototype_id": "Beaker",
                    "position": {"x": 0.0, "y": 0.0},
                    "rotation": 0.0,
                    "components": [
                        {"type": "SolutionContainerManager", "solution": {"volume": 30.0, "temperature": 293.0, "contents": {"space_lube": 5.0}}},
                        {"type": "Label", "payload": {"current_label": "x"}}
                    ],
                    "is_container": false,
                    "is_contained": false
                }],
                "decal_data": {"chunk_size": 16}
            }]
        });
        let decoded = decode_value(raw).expect("decode");
        assert_eq!(decoded.convention, FieldConvention::Underscored);
        let grid = &decoded.document.grids[0];
        assert_eq!(grid.tiles[0].tile_type, "Floor");
        assert_eq!(grid.decal_data, Some(json!({"chunk_size": 16})));
        let components = &grid.entities[0].components;
        match &components[0].data {
            ComponentData::Solution(solution) => {
                assert_eq!(solution.contents.get("space_lube").copied(), Some(5.0));
            }
            other => panic!("expected solution, got {other:?}"),
        }
        assert_eq!(
            components[1].data,
            ComponentData::Payload(json!({"current_label": "x"}))
        );
    }

    #[test]
    fn legacy_metadata_and_version_keys_are_migrated() {
        let raw = json!({
            "version": 1,
            "meta": {"originalId": "grid#9", "authorId": "old", "displayName": "Old", "timestamp": 1},
            "grids": [{"gridId": "0"}]
        });
        let decoded = decode_value(raw).expect("decode");
        assert!(decoded.migration.renamed_metadata_key);
        assert!(decoded.migration.renamed_version_key);
        assert_eq!(decoded.document.format_version, 1);
        assert_eq!(decoded.document.metadata.display_name, "Old");
    }

    #[test]
    fn migration_is_idempotent() {
        let mut value = json!({"version": 2, "meta": {"originalId": "g"}, "grids": []});
        let first = migrate_legacy_keys(&mut value);
        assert!(!first.is_empty());
        let migrated = value.clone();
        let second = migrate_legacy_keys(&mut value);
        assert!(second.is_empty());
        assert_eq!(value, migrated);
    }

    #[test]
    fn sniffing_tie_falls_back_to_the_other_parser() {
        let raw = json!({
            "version": 3,
            "metadata": {"original_id": "grid#2"},
            "grids": []
        });
        assert_eq!(
            detect_convention(&{
                let mut value = raw.clone();
                migrate_legacy_keys(&mut value);
                value
            }),
            FieldConvention::CamelCase
        );
        let decoded = decode_value(raw).expect("decode");
        assert_eq!(decoded.convention, FieldConvention::Underscored);
        assert_eq!(decoded.document.metadata.original_id, "grid#2");
    }

    #[test]
    fn unparseable_document_reports_both_attempts() {
        let raw = json!({
            "formatVersion": 3,
            "metadata": {"originalId": "g"},
            "grids": [{"gridId": "0", "entities": [{"entityId": "0", "position": "nowhere"}]}]
        });
        let err = decode_value(raw).expect_err("unparseable");
        let CodecError::Unparseable {
            first,
            first_error,
            second,
            second_error,
        } = &err
        else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(*first, FieldConvention::CamelCase);
        assert_eq!(*second, FieldConvention::Underscored);
        assert!(first_error.contains("grids[0].entities[0].position"));
        assert!(!second_error.is_empty());
        let message = err.to_string();
        assert!(message.contains("camelCase parse failed"));
        assert!(message.contains("underscored parse failed"));
    }

    #[test]
    fn non_object_roots_are_rejected() {
        assert!(matches!(
            decode_document("[1, 2]"),
            Err(CodecError::NotAnObject)
        ));
        assert!(matches!(
            decode_document("{not json"),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn camel_case_keys_convert() {
        assert_eq!(camel_case_key("parent_container_entity"), "parentContainerEntity");
        assert_eq!(camel_case_key("x"), "x");
        assert_eq!(camel_case_key("_private"), "_private");
    }
}
