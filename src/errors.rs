//! Typed error hierarchy for the Vanguard pipeline.
//!
//! Four top-level enums cover the four subsystems:
//! - `BackendError`: a single reasoning backend call failing
//! - `SandboxError`: patch staging/validation failures
//! - `StageError`: pipeline stage failures (fatal vs recoverable)
//! - `TaskError`: work-unit-level failures seen by the retrying executor

use std::time::Duration;
use thiserror::Error;

/// Errors from one reasoning backend invocation.
///
/// These are always isolated: a failing backend is dropped from
/// aggregation and the remaining backends continue.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to spawn backend command '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend '{backend}' exited with code {exit_code}")]
    NonZeroExit { backend: String, exit_code: i32 },

    #[error("backend '{backend}' timed out after {timeout:?}")]
    Timeout { backend: String, timeout: Duration },

    #[error("backend '{backend}' produced no output")]
    EmptyOutput { backend: String },

    #[error("failed to write prompt to backend stdin: {0}")]
    StdinWrite(#[source] std::io::Error),
}

/// Errors from the patch validation sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to stage working tree copy from {path}: {source}")]
    StageFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to apply patch to {path}: {source}")]
    ApplyFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to restore original content at {path}: {source}")]
    RestoreFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from a single pipeline stage.
///
/// `Fatal` aborts the remaining stages (Report still runs best-effort);
/// `Recoverable` degrades the stage's contribution and the run continues.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage '{stage}' failed: {message}")]
    Fatal { stage: &'static str, message: String },

    #[error("stage '{stage}' degraded: {message}")]
    Recoverable { stage: &'static str, message: String },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    pub fn fatal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Fatal {
            stage,
            message: message.into(),
        }
    }

    pub fn recoverable(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Recoverable {
            stage,
            message: message.into(),
        }
    }

    /// Whether this error aborts the remaining pipeline stages.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Recoverable { .. })
    }
}

/// Errors surfaced to the retrying task executor.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Soft time limit expired; the attempt aborted gracefully and may retry.
    #[error("soft time limit of {limit:?} exceeded")]
    SoftTimeLimit { limit: Duration },

    /// Hard time limit expired; the attempt was forcibly terminated. Terminal.
    #[error("hard time limit of {limit:?} exceeded")]
    HardTimeLimit { limit: Duration },

    /// The pipeline run itself failed. Retryable.
    #[error("pipeline run failed: {0}")]
    Run(#[source] StageError),

    /// All permitted retries were consumed; the work unit is dead-lettered.
    #[error("task failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

impl TaskError {
    /// Whether the executor may schedule another attempt for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SoftTimeLimit { .. } | Self::Run(_))
    }
}
