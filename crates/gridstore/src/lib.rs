pub mod config;
pub mod document;
pub mod host;
pub mod persist;
pub mod transport;

pub use config::{
    ConfigError, LoadBudgets, PersistConfig, ENTITIES_PER_TICK_ENV_VAR, INCREMENTAL_ENV_VAR,
    PROTECTED_SLOTS_ENV_VAR, TICK_BUDGET_MS_ENV_VAR, TILES_PER_TICK_ENV_VAR,
};
pub use document::{
    decode_document, decode_value, encode_document, encode_value, validate_document, CodecError,
    ComponentData, ComponentRecord, DecodedDocument, Document, DocumentMetadata, EntityRecord,
    FieldConvention, GridRecord, MigrationReport, SolutionPayload, TileRecord, ValidationWarning,
    FORMAT_VERSION,
};
pub use host::{
    EntityId, GridHandle, HostError, LifeStage, MapId, MemoryScene, PrototypeDef,
    PrototypeRegistry, SceneHost, SolutionState, TileCoord, Vec2,
};
pub use persist::{
    GridPersistence, LoadError, LoadJob, LoadOutcome, LoadPhase, LoadRequest, LoadScheduler,
    LoadSummary, PhaseCounts, SaveError, SaveRequest, SaveSummary, SavedGrid, SchedulerTick,
    StructuralWarning,
};
pub use transport::{read_document_file, write_document_file, TransportError};
