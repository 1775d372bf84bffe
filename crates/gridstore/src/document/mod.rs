//! The portable grid document and its codec.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::host::{SolutionState, TileCoord, Vec2};

mod codec;
mod validate;

pub use codec::{
    decode_document, decode_value, detect_convention, encode_document, encode_value,
    migrate_legacy_keys, CodecError, DecodedDocument, FieldConvention, MigrationReport,
};
pub use validate::{validate_document, ValidationWarning};

/// Version written by this crate. Version 1 documents used the legacy
/// `meta`/`version` keys, version 2 predates containment flags.
pub const FORMAT_VERSION: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub format_version: u32,
    pub metadata: DocumentMetadata,
    pub grids: Vec<GridRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub original_id: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub display_name: String,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_rotation: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRecord {
    pub grid_id: String,
    #[serde(default)]
    pub tiles: Vec<TileRecord>,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    /// Owned by the decal subsystem; passed through unexamined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decal_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileRecord {
    pub x: i32,
    pub y: i32,
    pub tile_type: String,
}

impl TileRecord {
    pub fn coord(&self) -> TileCoord {
        TileCoord::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordVec2 {
    pub x: f32,
    pub y: f32,
}

impl RecordVec2 {
    pub fn from_vec2(value: Vec2) -> Self {
        Self {
            x: value.x,
            y: value.y,
        }
    }

    pub fn to_vec2(self) -> Vec2 {
        Vec2 {
            x: self.x,
            y: self.y,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub entity_id: String,
    #[serde(default)]
    pub prototype_id: String,
    pub position: RecordVec2,
    #[serde(default)]
    pub rotation: f32,
    #[serde(default)]
    pub components: Vec<ComponentRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_container_entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_slot: Option<String>,
    #[serde(default)]
    pub is_container: bool,
    #[serde(default)]
    pub is_contained: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchored: Option<bool>,
}

impl EntityRecord {
    pub fn new(entity_id: impl Into<String>, prototype_id: impl Into<String>, position: Vec2) -> Self {
        Self {
            entity_id: entity_id.into(),
            prototype_id: prototype_id.into(),
            position: RecordVec2::from_vec2(position),
            rotation: 0.0,
            components: Vec::new(),
            parent_container_entity: None,
            container_slot: None,
            is_container: false,
            is_contained: false,
            anchored: None,
        }
    }

    pub fn contained_in(mut self, parent: &str, slot: &str) -> Self {
        self.parent_container_entity = Some(parent.to_string());
        self.container_slot = Some(slot.to_string());
        self.is_contained = true;
        self
    }

    pub fn as_container(mut self) -> Self {
        self.is_container = true;
        self
    }
}

/// One persisted component: the host's type name plus either a schema-less
/// payload or one of the specialized record types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(flatten)]
    pub data: ComponentData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentData {
    Payload(Value),
    Solution(SolutionPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionPayload {
    pub volume: f32,
    pub temperature: f32,
    #[serde(default)]
    pub contents: BTreeMap<String, f32>,
}

impl SolutionPayload {
    pub fn from_state(state: &SolutionState) -> Self {
        Self {
            volume: state.volume,
            temperature: state.temperature,
            contents: state.contents.clone(),
        }
    }

    pub fn to_state(&self) -> SolutionState {
        SolutionState {
            volume: self.volume,
            temperature: self.temperature,
            contents: self.contents.clone(),
        }
    }
}
