//! Typed errors for episode processing and worker launch.

use std::time::Duration;
use thiserror::Error;

use crate::retry::FetchError;

/// Why one episode could not be downloaded. Aborts that episode only.
#[derive(Debug, Error)]
pub enum EpisodeError {
    #[error("failed to fetch manifest {url}: {source}")]
    ManifestFetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("invalid url {0}")]
    InvalidUrl(String),
    #[error("manifest {url} lists no segments")]
    EmptyManifest { url: String },
    #[error("{failed} of {total} segments failed")]
    SegmentFetch { failed: usize, total: usize },
    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("merge failed: {0}")]
    Merge(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("terminated")]
    Aborted,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl EpisodeError {
    pub fn is_aborted(&self) -> bool {
        match self {
            EpisodeError::Aborted => true,
            EpisodeError::Fetch(e) => e.is_aborted(),
            EpisodeError::ManifestFetch { source, .. } => source.is_aborted(),
            _ => false,
        }
    }
}

/// Why the supervisor could not start a worker for a task.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn worker process: {0}")]
    ProcessLaunch(#[source] std::io::Error),
    #[error("failed to send job to worker: {0}")]
    JobHandoff(#[source] std::io::Error),
    #[error("content detail unavailable: {0}")]
    Detail(String),
    #[error("running marker: {0}")]
    Marker(#[source] std::io::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
