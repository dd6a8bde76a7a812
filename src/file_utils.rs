// File utilities for Transcribe API
//
// This module contains the scratch-directory helpers used by the transcoder.
// Every job gets its own uniquely named files so concurrent jobs never touch
// each other's artifacts, and every artifact is owned by a `ScratchFile`
// guard that removes it once the job lets go of it.

use log::{debug, error};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Generate a fresh job identifier
///
/// The identifier is a random v4 UUID in its 32-character simple form, so it
/// can be used directly as a file name.
pub fn new_job_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Paths of the artifacts one transcoding job may create
#[derive(Debug, Clone)]
pub struct JobPaths {
    /// Uploaded bytes, as received
    pub source: PathBuf,
    /// Canonical 16 kHz mono WAV produced by the transcoder
    pub decoded: PathBuf,
}

/// Build the scratch paths for a job inside `scratch_dir`
pub fn job_paths(scratch_dir: &Path, job_id: &str) -> JobPaths {
    JobPaths {
        source: scratch_dir.join(format!("{}.src", job_id)),
        decoded: scratch_dir.join(format!("{}.wav", job_id)),
    }
}

/// Create the scratch directory if it is missing
///
/// Safe to call from many jobs at once, an existing directory is not an error.
pub async fn ensure_scratch_dir(scratch_dir: &Path) -> io::Result<()> {
    tokio::fs::create_dir_all(scratch_dir).await
}

/// A temporary file owned by one job
///
/// The file is deleted when the guard is dropped unless it was already removed
/// through [`ScratchFile::remove`]. This covers early returns, panics and
/// requests whose futures are dropped mid-flight.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    removed: bool,
}

impl ScratchFile {
    /// Take ownership of `path`; the file does not have to exist yet
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `data` to the file, replacing any previous contents
    pub async fn write(&self, data: &[u8]) -> io::Result<()> {
        tokio::fs::write(&self.path, data).await
    }

    /// Remove the file now, reporting the outcome
    ///
    /// A file that never got created counts as removed.
    pub fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        remove_if_exists(&self.path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = remove_if_exists(&self.path) {
            error!("Failed to remove scratch file {}: {}", self.path.display(), e);
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed scratch file: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// List the regular files currently in `dir`
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}

fn is_job_artifact(path: &Path) -> bool {
    let ext_ok = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("src") | Some("wav")
    );
    let stem_ok = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false);
    ext_ok && stem_ok
}

/// Remove job artifacts left in `dir` by a previous run
///
/// Only files named like [`job_paths`] output are touched. Returns how many
/// were removed.
pub fn sweep_stale_artifacts(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for path in list_files(dir)? {
        if is_job_artifact(&path) {
            remove_if_exists(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
