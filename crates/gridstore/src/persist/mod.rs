//! Saving live grids to documents and rebuilding them.

use thiserror::Error;
use tracing::{info, warn};

use crate::config::PersistConfig;
use crate::document::{
    decode_document, encode_document, validate_document, CodecError, Document, DocumentMetadata,
};
use crate::host::{GridHandle, HostError, MapId, SceneHost};

mod classify;
mod connectivity;
mod reconstruct;
mod report;
mod save;
mod scheduler;
mod snapshot;
mod walker;


pub use classify::{ComponentClass, ComponentClassifier, ImportantFamily, SkipFamily};
pub use connectivity::{sort_for_connectivity, DetachedFragment, SortedPlacements, TilePlacement};
pub use reconstruct::{LoadJob, LoadPhase, LoadRequest};
pub use report::{LoadSummary, PhaseCounts, SaveSummary, StructuralWarning};
pub use save::{save_grid, SaveRequest, SavedGrid};
pub use scheduler::{LoadScheduler, SchedulerTick};
pub use snapshot::EntitySnapshotter;
pub use walker::{walk_grid, ContainmentEdge, ContainmentWalk, WalkedEntity};

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("{0} does not exist")]
    GridMissing(GridHandle),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Format(#[from] CodecError),
    #[error("document category {found:?} does not match expected '{expected}'")]
    UnexpectedCategory {
        expected: String,
        found: Option<String>,
    },
    #[error("document contains no grids")]
    NoGrids,
    #[error("host rejected grid creation on {map}: {source}")]
    MapRejected {
        map: MapId,
        #[source]
        source: HostError,
    },
    #[error("{0} does not exist")]
    UnknownGrid(GridHandle),
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// Target grid of each document grid, in document order.
    pub grids: Vec<GridHandle>,
    /// Completed reconstructions. Empty when the load was scheduled.
    pub summaries: Vec<LoadSummary>,
}

impl LoadOutcome {
    pub fn is_scheduled(&self) -> bool {
        self.summaries.is_empty()
    }
}

/// Entry point tying the save path, the codec and the load scheduler to one
/// configuration.
#[derive(Debug, Default)]
pub struct GridPersistence {
    config: PersistConfig,
    scheduler: LoadScheduler,
}

impl GridPersistence {
    pub fn new(config: PersistConfig) -> Self {
        Self {
            config,
            scheduler: LoadScheduler::new(),
        }
    }

    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &LoadScheduler {
        &self.scheduler
    }

    pub fn save_grid<H: SceneHost + ?Sized>(
        &self,
        host: &H,
        grid: GridHandle,
        request: &SaveRequest,
    ) -> Result<SavedGrid, SaveError> {
        save_grid(host, grid, request, &self.config)
    }

    pub fn save_grid_to_string<H: SceneHost + ?Sized>(
        &self,
        host: &H,
        grid: GridHandle,
        request: &SaveRequest,
    ) -> Result<String, SaveError> {
        let saved = self.save_grid(host, grid, request)?;
        Ok(encode_document(&saved.document)?)
    }

    pub fn load_str<H: SceneHost + ?Sized>(
        &mut self,
        host: &mut H,
        raw: &str,
        request: &LoadRequest,
    ) -> Result<LoadOutcome, LoadError> {
        let decoded = decode_document(raw)?;
        self.load_document(host, decoded.document, request)
    }

    /// Creates one new grid per document grid and reconstructs into it,
    /// synchronously or through the scheduler depending on configuration.
    pub fn load_document<H: SceneHost + ?Sized>(
        &mut self,
        host: &mut H,
        document: Document,
        request: &LoadRequest,
    ) -> Result<LoadOutcome, LoadError> {
        check_category(&document.metadata, request.expected_category.as_deref())?;
        if document.grids.is_empty() {
            return Err(LoadError::NoGrids);
        }

        let mut grids = Vec::with_capacity(document.grids.len());
        for _ in &document.grids {
            match host.create_grid(request.map, request.offset, request.rotation) {
                Ok(grid) => grids.push(grid),
                Err(source) => {
                    for grid in grids {
                        host.delete_grid(grid);
                    }
                    return Err(LoadError::MapRejected {
                        map: request.map,
                        source,
                    });
                }
            }
        }
        info!(
            original_id = %document.metadata.original_id,
            format_version = document.format_version,
            grids = grids.len(),
            incremental = self.config.incremental_loading,
            "grid_load_started"
        );
        let jobs = self.build_jobs(&document, grids.iter().copied());
        Ok(self.dispatch(host, grids, jobs))
    }

    /// Reconstructs every grid of the document onto an existing grid.
    pub fn load_onto<H: SceneHost + ?Sized>(
        &mut self,
        host: &mut H,
        grid: GridHandle,
        document: Document,
    ) -> Result<LoadOutcome, LoadError> {
        if !host.grid_exists(grid) {
            return Err(LoadError::UnknownGrid(grid));
        }
        if document.grids.is_empty() {
            return Err(LoadError::NoGrids);
        }
        info!(
            grid = %grid,
            original_id = %document.metadata.original_id,
            format_version = document.format_version,
            incremental = self.config.incremental_loading,
            "grid_load_onto_started"
        );
        let jobs = self.build_jobs(&document, std::iter::repeat(grid));
        Ok(self.dispatch(host, vec![grid; document.grids.len()], jobs))
    }

    pub fn tick<H: SceneHost + ?Sized>(&mut self, host: &mut H) -> SchedulerTick {
        self.scheduler.tick(host, &self.config.budgets)
    }

    fn build_jobs(
        &self,
        document: &Document,
        targets: impl Iterator<Item = GridHandle>,
    ) -> Vec<LoadJob> {
        let validation = validate_document(document);
        for warning in &validation {
            warn!(warning = %warning, "document_validation_warning");
        }
        document
            .grids
            .iter()
            .zip(targets)
            .enumerate()
            .map(|(index, (record, grid))| {
                let mut job = LoadJob::new(grid, record.clone(), &self.config);
                let prefix = format!("grids[{index}]");
                for warning in validation
                    .iter()
                    .filter(|warning| warning.path.starts_with(&prefix))
                {
                    job.record_warning(StructuralWarning::Document(warning.clone()));
                }
                job
            })
            .collect()
    }

    fn dispatch<H: SceneHost + ?Sized>(
        &mut self,
        host: &mut H,
        grids: Vec<GridHandle>,
        jobs: Vec<LoadJob>,
    ) -> LoadOutcome {
        if self.config.incremental_loading {
            for job in jobs {
                self.scheduler.enqueue(job);
            }
            return LoadOutcome {
                grids,
                summaries: Vec::new(),
            };
        }
        let summaries = jobs
            .into_iter()
            .map(|job| job.run_to_completion(host))
            .collect();
        LoadOutcome { grids, summaries }
    }
}

fn check_category(metadata: &DocumentMetadata, expected: Option<&str>) -> Result<(), LoadError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    if metadata.category.as_deref() == Some(expected) {
        return Ok(());
    }
    Err(LoadError::UnexpectedCategory {
        expected: expected.to_string(),
        found: metadata.category.clone(),
    })
}
