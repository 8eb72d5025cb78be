//! Identity, filesystem layout and lifecycle of one compilation job.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use uuid::Uuid;

/// Per-job identifier; every temporary path a job touches is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Paths owned by a single job.
///
/// All files live in a dedicated directory named after the job id, so two
/// jobs never share a path even when their sources are identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    id: JobId,
    dir: PathBuf,
    source_file_name: String,
    output_file_name: String,
}

impl JobPaths {
    pub fn new(scratch_root: &Path, id: JobId, source_extension: &str) -> Self {
        Self {
            id,
            dir: scratch_root.join(id.to_string()),
            source_file_name: format!("{id}.{source_extension}"),
            output_file_name: format!("{id}.pdf"),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name passed to the engine; relative to [`Self::dir`].
    pub fn source_file_name(&self) -> &str {
        &self.source_file_name
    }

    pub fn source(&self) -> PathBuf {
        self.dir.join(&self.source_file_name)
    }

    pub fn output(&self) -> PathBuf {
        self.dir.join(&self.output_file_name)
    }

    /// Side products the engine is known to write next to the output.
    pub fn auxiliaries(&self) -> Vec<PathBuf> {
        ["log", "aux", "out", "toc"]
            .iter()
            .map(|ext| self.dir.join(format!("{}.{ext}", self.id)))
            .collect()
    }
}

/// Lifecycle of a job: `Created → SourceWritten → Compiling → terminal → CleanedUp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    SourceWritten,
    Compiling,
    Succeeded,
    Failed,
    UnexpectedFailure,
    TimedOut,
    CleanedUp,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::SourceWritten => "source_written",
            JobState::Compiling => "compiling",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::UnexpectedFailure => "unexpected_failure",
            JobState::TimedOut => "timed_out",
            JobState::CleanedUp => "cleaned_up",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::UnexpectedFailure | JobState::TimedOut
        )
    }

    /// Whether `next` is a legal successor.
    ///
    /// `Created → CleanedUp` covers a source write failure; every terminal
    /// state may only move to `CleanedUp`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;

        match (*self, next) {
            (Created, SourceWritten) | (Created, CleanedUp) => true,
            (SourceWritten, Compiling) => true,
            (Compiling, Succeeded | Failed | UnexpectedFailure | TimedOut) => true,
            (state, CleanedUp) => state.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
