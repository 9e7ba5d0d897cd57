//! Error types for certificate expiry checks.
//!
//! Every variant ends up as a CRITICAL verdict; see [`crate::check`].

use std::io;
use std::process::ExitStatus;

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for a single certificate check.
#[derive(Debug, Error)]
pub enum Error {
    /// Conflicting or invalid probe options. Raised before anything is spawned.
    #[error("{reason}")]
    Configuration {
        /// Why the configuration was rejected
        reason: String,
    },

    /// A pipeline stage could not be started or exited unsuccessfully
    #[error("{source}:{stderr}")]
    Pipeline {
        /// What went wrong in the pipeline
        source: PipelineError,
        /// Captured (escaped) standard error of all stages
        stderr: String,
    },

    /// The deadline elapsed before the pipeline finished
    #[error("command timeout")]
    Timeout,

    /// The certificate text could not be understood
    #[error("{reason}")]
    Parse {
        /// Description of the failure, including the offending text
        reason: String,
    },

    /// The worker thread ended without reporting a result
    #[error("check worker exited without a result")]
    Worker,

    /// The server name is not among the certificate subjects
    #[error("servername:{server_name} is not included in {}", .subjects.join(","))]
    Verification {
        /// Configured server name
        server_name: String,
        /// Names found in the certificate
        subjects: Vec<String>,
    },
}

impl Error {
    pub(crate) fn configuration<S: Into<String>>(reason: S) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn parse<S: Into<String>>(reason: S) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }
}

/// Failure of the subprocess pipeline itself.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The command specification is unusable
    #[error("invalid command: {reason}")]
    InvalidCommand {
        /// Why the specification was rejected
        reason: String,
    },

    /// A stage could not be started
    #[error("stage {stage} ({program}): {source}")]
    Spawn {
        /// Zero-based stage index
        stage: usize,
        /// Program name of the stage
        program: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// A stage exited unsuccessfully
    #[error("stage {stage} ({program}): {status}")]
    Exit {
        /// Zero-based stage index
        stage: usize,
        /// Program name of the stage
        program: String,
        /// Exit status reported by the OS
        status: ExitStatus,
    },

    /// Waiting on a stage failed
    #[error("stage {stage} ({program}): wait failed: {source}")]
    Wait {
        /// Zero-based stage index
        stage: usize,
        /// Program name of the stage
        program: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// The context was cancelled or its deadline passed; all stages were killed
    #[error("pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Index of the stage this error is attributed to, if any.
    pub fn stage(&self) -> Option<usize> {
        match self {
            Self::Spawn { stage, .. } | Self::Exit { stage, .. } | Self::Wait { stage, .. } => {
                Some(*stage)
            }
            Self::InvalidCommand { .. } | Self::Cancelled => None,
        }
    }
}
