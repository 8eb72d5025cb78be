use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Everything that can go wrong while running one job.
///
/// Returned as a value so callers can map it to a transport response; cleanup
/// problems are never represented here.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to write document source: {0}")]
    Io(#[source] io::Error),
    #[error("document failed to compile (exit {exit_code:?})")]
    Compilation {
        exit_code: Option<i32>,
        diagnostics: String,
    },
    #[error("engine reported success but produced no PDF at {}", path.display())]
    MissingArtifact { path: PathBuf, diagnostics: String },
    #[error("typesetting engine could not be run: {0}")]
    Engine(#[source] io::Error),
    #[error("compilation did not finish within {}s", limit.as_secs())]
    Timeout { limit: Duration },
    #[error("compilation task was interrupted: {0}")]
    Interrupted(String),
}

/// Coarse classification used for status codes and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Scratch storage could not be written; the engine never ran.
    Io,
    /// The document itself is broken.
    Compilation,
    /// The environment is broken (engine missing, no artifact produced).
    Unexpected,
    Timeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Io => "io_failure",
            FailureKind::Compilation => "compilation_failure",
            FailureKind::Unexpected => "unexpected_failure",
            FailureKind::Timeout => "timeout_failure",
        }
    }
}

impl CompileError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CompileError::Io(_) => FailureKind::Io,
            CompileError::Compilation { .. } => FailureKind::Compilation,
            CompileError::MissingArtifact { .. }
            | CompileError::Engine(_)
            | CompileError::Interrupted(_) => FailureKind::Unexpected,
            CompileError::Timeout { .. } => FailureKind::Timeout,
        }
    }

    /// Captured engine output, when the engine got far enough to produce any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            CompileError::Compilation { diagnostics, .. }
            | CompileError::MissingArtifact { diagnostics, .. } => Some(diagnostics.as_str()),
            _ => None,
        }
    }
}
