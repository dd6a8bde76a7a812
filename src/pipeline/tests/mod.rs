mod lifecycle;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::engine::testing::{energy_factory, StubEngine};
use crate::metrics::Metrics;
use crate::pipeline::Pipeline;

fn config(scratch_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        scratch_dir: scratch_dir.display().to_string(),
        ffmpeg_command: "false".to_string(),
        worker_pool_size: 2,
        reclaim_interval: 1,
        request_deadline: None,
    }
}

fn pipeline(config: &PipelineConfig, engine: &Arc<StubEngine>) -> Pipeline {
    Pipeline::new(config, engine.clone(), Metrics::disabled())
        .unwrap()
        .with_detector(energy_factory())
}

/// Constant-amplitude PCM the stub transcribes to `"level {level}"`
fn pcm(level: i16, seconds: f64) -> Vec<u8> {
    let count = (seconds * 16_000.0) as usize;
    let sample = level * 327;
    (0..count).flat_map(|_| sample.to_le_bytes()).collect()
}

/// Fail the test if the engine gate is still held
async fn assert_gate_free(pipeline: &Pipeline) {
    tokio::time::timeout(Duration::from_secs(1), pipeline.gate.acquire())
        .await
        .expect("engine gate was not released");
}
