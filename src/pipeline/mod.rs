//! Transcription pipeline
//!
//! One [`Pipeline`] is built at startup and shared by every request. A job
//! goes through
//!
//! ```text
//! Received -> Transcoding -> AwaitingEngine -> Executing -> Assembling -> Complete
//! ```
//!
//! and ends in `Reclaimed` whether it completed or failed. Transcoding runs
//! on the request task, outside the engine gate. Only inference holds the
//! gate, and it runs on the worker pool.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::audio::{self, TranscodeError, Transcoder};
use crate::config::PipelineConfig;
use crate::engine::{self, Engine, EngineError, VadPass};
use crate::file_utils::new_job_id;
use crate::metrics::Metrics;
use crate::vad::{self, DetectorFactory, VadConfig};

pub mod assemble;
pub mod gate;
pub mod offload;
pub mod reclaim;

#[cfg(test)]
mod tests;

pub use assemble::{assemble, Transcription};
use gate::EngineGate;
use offload::{OffloadError, WorkerPool};
use reclaim::{Reclaimer, Reclamation};

/// Where a job is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Received,
    Transcoding,
    AwaitingEngine,
    Executing,
    Assembling,
    Complete,
    Failed,
    Reclaimed,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStage::Received => "received",
            JobStage::Transcoding => "transcoding",
            JobStage::AwaitingEngine => "awaiting engine",
            JobStage::Executing => "executing",
            JobStage::Assembling => "assembling",
            JobStage::Complete => "complete",
            JobStage::Failed => "failed",
            JobStage::Reclaimed => "reclaimed",
        };
        f.write_str(name)
    }
}

/// Pipeline failures; every variant names the job it belongs to
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("job {job_id}: audio could not be decoded: {reason}")]
    DecodeFailed { job_id: String, reason: String },

    #[error("job {job_id}: inference failed: {reason}")]
    EngineFailure { job_id: String, reason: String },

    #[error("job {job_id}: scratch I/O failed: {source}")]
    Io {
        job_id: String,
        #[source]
        source: io::Error,
    },

    #[error("job {job_id}: deadline of {limit:?} exceeded")]
    DeadlineExceeded { job_id: String, limit: Duration },

    #[error("job {job_id}: inference workers are unavailable")]
    WorkerUnavailable { job_id: String },
}

impl PipelineError {
    pub fn job_id(&self) -> &str {
        match self {
            PipelineError::DecodeFailed { job_id, .. }
            | PipelineError::EngineFailure { job_id, .. }
            | PipelineError::Io { job_id, .. }
            | PipelineError::DeadlineExceeded { job_id, .. }
            | PipelineError::WorkerUnavailable { job_id } => job_id,
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::DecodeFailed { .. } => "decode_failed",
            PipelineError::EngineFailure { .. } => "engine_failure",
            PipelineError::Io { .. } => "io_error",
            PipelineError::DeadlineExceeded { .. } => "deadline_exceeded",
            PipelineError::WorkerUnavailable { .. } => "worker_unavailable",
        }
    }
}

/// Audio submitted by a client
#[derive(Debug, Clone, Copy)]
pub enum AudioInput<'a> {
    /// 16 kHz mono 16-bit little-endian samples
    Pcm(&'a [u8]),
    /// Any container or codec ffmpeg understands
    Container(&'a [u8]),
}

impl AudioInput<'_> {
    fn kind(&self) -> &'static str {
        match self {
            AudioInput::Pcm(_) => "pcm",
            AudioInput::Container(_) => "file",
        }
    }
}

/// One transcription request
#[derive(Debug, Clone)]
pub struct AudioJob<'a> {
    /// Unique id, also the stem of the job's scratch files
    pub id: String,
    pub input: AudioInput<'a>,
    /// `None` transcribes the whole buffer
    pub vad: Option<VadConfig>,
    pub detailed: bool,
}

impl<'a> AudioJob<'a> {
    pub fn new(input: AudioInput<'a>, vad: Option<VadConfig>, detailed: bool) -> Self {
        Self {
            id: new_job_id(),
            input,
            vad,
            detailed,
        }
    }

    pub fn pcm(bytes: &'a [u8], vad: Option<VadConfig>, detailed: bool) -> Self {
        Self::new(AudioInput::Pcm(bytes), vad, detailed)
    }

    pub fn container(bytes: &'a [u8], vad: Option<VadConfig>, detailed: bool) -> Self {
        Self::new(AudioInput::Container(bytes), vad, detailed)
    }
}

/// Current stage of a running job, readable after its future is gone
struct JobTrace {
    id: String,
    stage: Mutex<JobStage>,
}

impl JobTrace {
    fn new(id: &str) -> Self {
        debug!("Job {}: {}", id, JobStage::Received);
        Self {
            id: id.to_string(),
            stage: Mutex::new(JobStage::Received),
        }
    }

    fn enter(&self, stage: JobStage) {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner()) = stage;
        debug!("Job {}: {}", self.id, stage);
    }

    fn current(&self) -> JobStage {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Composition of transcoder, gate, workers and reclaimer
pub struct Pipeline {
    transcoder: Transcoder,
    gate: EngineGate,
    pool: WorkerPool,
    reclaimer: Arc<Reclaimer>,
    metrics: Metrics,
    deadline: Option<Duration>,
    detector: DetectorFactory,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig, engine: Arc<dyn Engine>, metrics: Metrics) -> io::Result<Self> {
        info!(
            "Pipeline: engine={}, workers={}, reclaim every {} job(s), deadline={:?}",
            engine.name(),
            config.worker_pool_size,
            config.reclaim_interval,
            config.request_deadline
        );

        Ok(Self {
            transcoder: Transcoder::new(&config.scratch_dir, &config.ffmpeg_command),
            gate: EngineGate::new(engine),
            pool: WorkerPool::new(config.worker_pool_size)?,
            reclaimer: Arc::new(Reclaimer::new(config.reclaim_interval)),
            metrics,
            deadline: config.request_deadline,
            detector: vad::silero_factory(),
        })
    }

    /// Replace the speech detector used for VAD jobs
    pub fn with_detector(mut self, detector: DetectorFactory) -> Self {
        self.detector = detector;
        self
    }

    /// Run `job` to completion
    pub async fn run(&self, job: AudioJob<'_>) -> Result<Transcription, PipelineError> {
        let started = Instant::now();
        let input_kind = job.input.kind();
        let trace = JobTrace::new(&job.id);

        let outcome = match self.deadline {
            Some(limit) => match tokio::time::timeout(limit, self.execute(job, &trace)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(PipelineError::DeadlineExceeded {
                    job_id: trace.id.clone(),
                    limit,
                }),
            },
            None => self.execute(job, &trace).await,
        };

        let elapsed = started.elapsed().as_secs_f64();
        match &outcome {
            Ok((_, audio_seconds)) => {
                self.metrics
                    .record_transcription(input_kind, "success", elapsed, *audio_seconds)
                    .await;
            }
            Err(e) => {
                let stage = trace.current();
                error!("Job {} failed during {}: {}", e.job_id(), stage, e);
                if stage == JobStage::Executing {
                    warn!(
                        "Job {}: inference keeps running, its result will be discarded",
                        trace.id
                    );
                }
                trace.enter(JobStage::Failed);
                self.metrics
                    .record_transcription(input_kind, e.kind(), elapsed, 0.0)
                    .await;
            }
        }

        outcome.map(|(transcription, _)| transcription)
    }

    async fn execute(
        &self,
        job: AudioJob<'_>,
        trace: &JobTrace,
    ) -> Result<(Transcription, f64), PipelineError> {
        let AudioJob {
            id,
            input,
            vad,
            detailed,
        } = job;

        trace.enter(JobStage::Transcoding);
        let (samples, artifact) = match input {
            AudioInput::Pcm(bytes) => {
                let samples = audio::pcm_to_samples(bytes).map_err(|e| PipelineError::DecodeFailed {
                    job_id: id.clone(),
                    reason: e.to_string(),
                })?;
                (samples, None)
            }
            AudioInput::Container(bytes) => {
                let decoded = self
                    .transcoder
                    .transcode(&id, bytes)
                    .await
                    .map_err(|e| match e {
                        TranscodeError::Scratch(source) => PipelineError::Io {
                            job_id: id.clone(),
                            source,
                        },
                        other => PipelineError::DecodeFailed {
                            job_id: id.clone(),
                            reason: other.to_string(),
                        },
                    })?;
                (decoded.samples, Some(decoded.artifact))
            }
        };

        trace.enter(JobStage::AwaitingEngine);
        let wait_started = Instant::now();
        self.metrics.set_gate_waiters(self.gate.waiters() + 1).await;
        let permit = self.gate.acquire().await;
        let waited = wait_started.elapsed();
        self.metrics.set_gate_waiters(self.gate.waiters()).await;
        self.metrics.record_gate_wait(waited.as_secs_f64()).await;
        info!("Job {}: engine acquired after {:.3}s", id, waited.as_secs_f64());

        trace.enter(JobStage::Executing);
        let mut reclamation = Reclamation::new(id.clone(), permit, Arc::clone(&self.reclaimer));
        if let Some(artifact) = artifact {
            reclamation.track(artifact);
        }

        let detector = Arc::clone(&self.detector);
        let worker_outcome = self
            .pool
            .run(move || {
                let started = Instant::now();
                let result = match vad {
                    Some(config) => detector().map_err(EngineError::from).and_then(|mut speech| {
                        let pass = VadPass {
                            config: &config,
                            detector: speech.as_mut(),
                        };
                        engine::invoke(reclamation.engine(), &samples, Some(pass))
                    }),
                    None => engine::invoke(reclamation.engine(), &samples, None),
                };
                let elapsed = started.elapsed();
                drop(reclamation);
                (result, elapsed)
            })
            .await;

        let result = match worker_outcome {
            Ok((Ok(result), elapsed)) => {
                info!(
                    "Job {}: transcribed {:.2}s of audio in {:.3}s",
                    id,
                    result.duration(),
                    elapsed.as_secs_f64()
                );
                result
            }
            Ok((Err(e), _)) => {
                return Err(PipelineError::EngineFailure {
                    job_id: id,
                    reason: e.to_string(),
                })
            }
            Err(OffloadError::Panicked(message)) => {
                return Err(PipelineError::EngineFailure {
                    job_id: id,
                    reason: format!("engine panicked: {}", message),
                })
            }
            Err(OffloadError::PoolClosed) => {
                return Err(PipelineError::WorkerUnavailable { job_id: id })
            }
        };

        trace.enter(JobStage::Assembling);
        let transcription = assemble(&result, detailed);
        trace.enter(JobStage::Complete);

        Ok((transcription, result.duration()))
    }
}
