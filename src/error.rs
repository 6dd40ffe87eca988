//! Error types for the publication pipeline
//!
//! Typed errors using thiserror, split by failure domain: configuration
//! problems surface before the orchestrator starts, backend failures carry a
//! retryable/non-retryable classification consumed by the stage retry loops,
//! and storage failures halt the run.

use std::path::PathBuf;

use thiserror::Error;

use crate::state::Stage;

/// Configuration and credential errors. Fatal, raised before any stage runs
/// and before the run's state file is touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("config file is empty")]
    Empty,

    #[error("missing required config field(s): {0}")]
    MissingField(String),

    #[error("unknown {kind} backend '{tag}' (supported: {supported})")]
    UnknownBackend {
        kind: &'static str,
        tag: String,
        supported: &'static str,
    },

    #[error("missing credential for {backend}: {hint}")]
    MissingCredential { backend: String, hint: String },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failure from a generation backend call, classified so the stage retry
/// loop can decide whether another attempt is worthwhile.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{backend}: cannot reach {url}: {reason}")]
    Connection {
        backend: String,
        url: String,
        reason: String,
    },

    #[error("{backend}: request timed out")]
    Timeout { backend: String },

    #[error("{backend}: API error {status}: {body}")]
    Api {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("{backend}: malformed response: {reason}")]
    MalformedResponse { backend: String, reason: String },
}

impl BackendError {
    /// Whether a retry could plausibly succeed. Client errors other than
    /// rate limiting are permanent; everything else is transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Connection { .. } | BackendError::Timeout { .. } => true,
            BackendError::Api { status, .. } => *status == 429 || *status >= 500,
            BackendError::MalformedResponse { .. } => true,
        }
    }
}

/// Storage-layer failures: run namespace creation, artifact writes, state
/// file persistence. Fatal for the run.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Document assembly failures that are not plain I/O.
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("cover image could not be decoded: {reason}")]
    CoverImage { reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Causes a stage can fail with, recorded into run state and surfaced to the
/// caller.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Top-level error type returned by the pipeline orchestrator.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{stage} stage failed: {source}")]
    Stage { stage: Stage, source: StageError },

    #[error("run '{0}' already completed; pass --resume to reuse it or drop --keep-existing to overwrite")]
    AlreadyCompleted(String),
}
