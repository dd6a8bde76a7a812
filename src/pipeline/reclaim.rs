//! Per-job cleanup after inference
//!
//! A [`Reclamation`] is created when a job gets the engine and travels with
//! the job onto the worker. Dropping it deletes the job's scratch files,
//! releases engine caches according to the [`Reclaimer`] policy and finally
//! gives the engine back to the gate. Because it is a drop guard this happens
//! on success, on error, on panic, and when the request was abandoned while
//! inference was running.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error};

use super::gate::EnginePermit;
use super::JobStage;
use crate::engine::Engine;
use crate::file_utils::ScratchFile;

/// Cache release policy shared by all jobs
#[derive(Debug)]
pub struct Reclaimer {
    /// Release every `interval` jobs, 0 never releases
    interval: u64,
    jobs: AtomicU64,
}

impl Reclaimer {
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            jobs: AtomicU64::new(0),
        }
    }

    /// Count one finished job and tell whether caches should go now
    fn job_finished(&self) -> bool {
        let count = self.jobs.fetch_add(1, Ordering::SeqCst) + 1;
        self.interval != 0 && count % self.interval == 0
    }
}

/// Drop guard owning everything a job must give back
pub struct Reclamation {
    job_id: String,
    artifacts: Vec<ScratchFile>,
    reclaimer: Arc<Reclaimer>,
    permit: EnginePermit,
}

impl Reclamation {
    pub fn new(job_id: impl Into<String>, permit: EnginePermit, reclaimer: Arc<Reclaimer>) -> Self {
        Self {
            job_id: job_id.into(),
            artifacts: Vec::new(),
            reclaimer,
            permit,
        }
    }

    /// Delete `file` when the job is reclaimed
    pub fn track(&mut self, file: ScratchFile) {
        self.artifacts.push(file);
    }

    /// The engine this job holds
    pub fn engine(&self) -> &dyn Engine {
        &*self.permit
    }
}

impl Drop for Reclamation {
    fn drop(&mut self) {
        for file in self.artifacts.drain(..) {
            let path = file.path().to_path_buf();
            if let Err(e) = file.remove() {
                error!(
                    "Job {}: failed to remove {}: {}",
                    self.job_id,
                    path.display(),
                    e
                );
            }
        }

        if self.reclaimer.job_finished() {
            let engine = &*self.permit;
            // May run while unwinding, a second panic here would abort
            match panic::catch_unwind(AssertUnwindSafe(|| engine.release_caches())) {
                Ok(()) => debug!("Job {}: released {} caches", self.job_id, engine.name()),
                Err(_) => error!("Job {}: releasing engine caches panicked", self.job_id),
            }
        }

        debug!("Job {}: {}", self.job_id, JobStage::Reclaimed);
    }
}
