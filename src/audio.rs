// Audio normalization for Transcribe API
//
// Everything handed to the engine is 16 kHz mono f32 in [-1, 1]. Raw PCM
// uploads are converted in memory, any other upload goes through ffmpeg.

use std::io::{self, Cursor};
use std::path::PathBuf;
use std::process::Stdio;

use hound::{SampleFormat, WavReader};
use log::{debug, warn};
use thiserror::Error;
use tokio::process::Command;

use crate::file_utils::{ensure_scratch_dir, job_paths, ScratchFile};

/// Sample rate expected by the engine
pub const SAMPLE_RATE: u32 = 16_000;

const PCM_SCALE: f32 = 32768.0;

/// Raw PCM buffers that cannot be decoded
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PcmError {
    #[error("PCM buffer is empty")]
    Empty,

    #[error("PCM buffer length {0} is not a whole number of 16-bit samples")]
    OddLength(usize),
}

/// Convert 16-bit signed little-endian mono PCM into normalized samples
pub fn pcm_to_samples(bytes: &[u8]) -> Result<Vec<f32>, PcmError> {
    if bytes.is_empty() {
        return Err(PcmError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(PcmError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM_SCALE)
        .collect())
}

/// Errors raised while turning an uploaded file into samples
#[derive(Error, Debug)]
pub enum TranscodeError {
    /// The scratch directory or the uploaded copy could not be written
    #[error("Scratch I/O error: {0}")]
    Scratch(#[source] io::Error),

    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Transcoder exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("Failed to read decoded audio: {0}")]
    Output(#[source] io::Error),

    #[error("Decoded audio is not valid WAV: {0}")]
    Wav(#[from] hound::Error),

    #[error("Decoded audio has unexpected format: {0}")]
    Format(String),
}

/// Decoded samples together with the file they were read from
///
/// The artifact stays alive until the job's reclaim step drops it.
#[derive(Debug)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub artifact: ScratchFile,
}

/// ffmpeg-backed converter from arbitrary containers to canonical WAV
#[derive(Clone, Debug)]
pub struct Transcoder {
    scratch_dir: PathBuf,
    ffmpeg_command: String,
}

impl Transcoder {
    pub fn new(scratch_dir: impl Into<PathBuf>, ffmpeg_command: impl Into<String>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            ffmpeg_command: ffmpeg_command.into(),
        }
    }

    /// Decode `data` for job `job_id`
    ///
    /// The uploaded copy is removed before returning whatever the outcome. The
    /// decoded WAV is removed on failure and handed back on success.
    pub async fn transcode(&self, job_id: &str, data: &[u8]) -> Result<DecodedAudio, TranscodeError> {
        ensure_scratch_dir(&self.scratch_dir)
            .await
            .map_err(TranscodeError::Scratch)?;

        let paths = job_paths(&self.scratch_dir, job_id);
        let source = ScratchFile::new(paths.source);
        let decoded = ScratchFile::new(paths.decoded);

        source.write(data).await.map_err(TranscodeError::Scratch)?;
        debug!("Job {}: wrote {} bytes to {}", job_id, data.len(), source.path().display());

        let output = Command::new(&self.ffmpeg_command)
            .arg("-nostdin")
            .arg("-hide_banner")
            .args(["-loglevel", "error"])
            .arg("-y")
            .arg("-i")
            .arg(source.path())
            .arg("-vn")
            .args(["-acodec", "pcm_s16le"])
            .arg("-ar")
            .arg(SAMPLE_RATE.to_string())
            .args(["-ac", "1"])
            .arg(decoded.path())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TranscodeError::Spawn {
                command: self.ffmpeg_command.clone(),
                source: e,
            })?;

        if let Err(e) = source.remove() {
            warn!("Job {}: failed to remove uploaded copy: {}", job_id, e);
        }

        if !output.status.success() {
            return Err(TranscodeError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let bytes = tokio::fs::read(decoded.path())
            .await
            .map_err(TranscodeError::Output)?;
        let samples = read_wav(&bytes)?;

        debug!("Job {}: decoded {} samples", job_id, samples.len());
        Ok(DecodedAudio {
            samples,
            artifact: decoded,
        })
    }
}

/// Read a canonical 16 kHz mono 16-bit WAV into normalized samples
pub fn read_wav(bytes: &[u8]) -> Result<Vec<f32>, TranscodeError> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    if spec.channels != 1
        || spec.sample_rate != SAMPLE_RATE
        || spec.bits_per_sample != 16
        || spec.sample_format != SampleFormat::Int
    {
        return Err(TranscodeError::Format(format!(
            "{} channel(s), {} Hz, {}-bit {:?}",
            spec.channels, spec.sample_rate, spec.bits_per_sample, spec.sample_format
        )));
    }

    let samples = reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32 / PCM_SCALE))
        .collect::<Result<Vec<_>, _>>()?;

    if samples.is_empty() {
        return Err(TranscodeError::Format("no audio samples".to_string()));
    }
    Ok(samples)
}
