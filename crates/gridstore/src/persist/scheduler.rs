use tracing::{debug, info, warn};

use crate::config::LoadBudgets;
use crate::host::{GridHandle, SceneHost};

use super::reconstruct::{LoadJob, LoadPhase};
use super::report::LoadSummary;

#[derive(Debug, Default)]
pub struct SchedulerTick {
    pub completed: Vec<LoadSummary>,
    /// Jobs dropped because their grid disappeared.
    pub abandoned: Vec<GridHandle>,
}

/// Drives active load jobs, one budgeted step per job per tick.
#[derive(Debug, Default)]
pub struct LoadScheduler {
    jobs: Vec<LoadJob>,
}

impl LoadScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a job, merging it into the active job for the same grid if
    /// there is one.
    pub fn enqueue(&mut self, job: LoadJob) {
        if let Some(existing) = self.jobs.iter_mut().find(|active| active.grid() == job.grid()) {
            debug!(
                grid = %job.grid(),
                tiles = job.pending_tiles(),
                entities = job.pending_entities(),
                "load_job_merged"
            );
            existing.merge(job);
            return;
        }
        info!(
            grid = %job.grid(),
            tiles = job.pending_tiles(),
            entities = job.pending_entities(),
            decals = job.has_pending_decals(),
            "load_job_queued"
        );
        self.jobs.push(job);
    }

    pub fn tick<H: SceneHost + ?Sized>(&mut self, host: &mut H, budgets: &LoadBudgets) -> SchedulerTick {
        let mut report = SchedulerTick::default();
        for mut job in std::mem::take(&mut self.jobs) {
            if !host.grid_exists(job.grid()) {
                warn!(
                    grid = %job.grid(),
                    phase = ?job.phase(),
                    tiles = job.pending_tiles(),
                    entities = job.pending_entities(),
                    "load_job_abandoned"
                );
                report.abandoned.push(job.grid());
                continue;
            }
            if job.advance(host, budgets) == LoadPhase::Done {
                report.completed.push(job.into_summary());
            } else {
                self.jobs.push(job);
            }
        }
        report
    }

    pub fn is_idle(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn phase_of(&self, grid: GridHandle) -> Option<LoadPhase> {
        self.job(grid).map(LoadJob::phase)
    }

    pub fn job(&self, grid: GridHandle) -> Option<&LoadJob> {
        self.jobs.iter().find(|job| job.grid() == grid)
    }
}
