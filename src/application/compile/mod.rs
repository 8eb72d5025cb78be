//! Compilation job runner: one document in, one PDF (or a failure) out.
//!
//! Every job works inside its own scratch directory keyed by a fresh
//! [`JobId`], so concurrent jobs cannot observe or delete each other's files.
//! All scratch files are removed before [`CompilationRunner::run`] returns,
//! except the PDF of a successful job, which [`PdfArtifact`] removes when it
//! is dropped.

mod artifact;
mod cleanup;
mod error;

pub use artifact::PdfArtifact;
pub use error::{CompileError, FailureKind};

use std::{
    io::{self, ErrorKind},
    os::fd::OwnedFd,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use bytes::Bytes;
use metrics::{counter, histogram};
use tokio::{
    fs,
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::unix::pipe,
    process::Command,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::CompilerSettings,
    domain::job::{JobId, JobPaths, JobState},
    infra::telemetry::{COMPILE_MS, COMPILE_TOTAL},
};

const TARGET: &str = "application::compile";

/// Runs the external typesetting engine once per job.
///
/// Holds only immutable settings; clones are cheap and jobs share nothing.
#[derive(Debug, Clone)]
pub struct CompilationRunner {
    engine_path: PathBuf,
    engine_args: Vec<String>,
    source_extension: String,
    scratch_root: PathBuf,
    timeout: Duration,
}

impl CompilationRunner {
    /// Create a runner, making sure the scratch root exists.
    pub fn new(settings: &CompilerSettings) -> Result<Self, io::Error> {
        std::fs::create_dir_all(&settings.scratch_dir)?;
        Ok(Self {
            engine_path: resolve_engine_path(&settings.engine_path)?,
            engine_args: settings.engine_args.clone(),
            source_extension: settings.source_extension.clone(),
            scratch_root: settings.scratch_dir.clone(),
            timeout: settings.timeout,
        })
    }

    /// Compile `source` and hand back the PDF.
    pub async fn run(&self, source: Bytes) -> Result<PdfArtifact, CompileError> {
        let started_at = Instant::now();
        let mut job = Job::new(JobPaths::new(
            &self.scratch_root,
            JobId::new(),
            &self.source_extension,
        ));

        let result = self.execute(&mut job, &source).await;
        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.kind().as_str(),
        };

        counter!(COMPILE_TOTAL, "outcome" => outcome).increment(1);
        histogram!(COMPILE_MS).record(elapsed_ms as f64);

        match &result {
            Ok(artifact) => info!(
                target = TARGET,
                op = "compile::run",
                result = outcome,
                job_id = %job.id(),
                elapsed_ms,
                source_bytes = source.len(),
                pdf_bytes = artifact.len(),
                "Document compiled"
            ),
            Err(err) => warn!(
                target = TARGET,
                op = "compile::run",
                result = outcome,
                job_id = %job.id(),
                elapsed_ms,
                source_bytes = source.len(),
                error = %err,
                "Document compilation failed"
            ),
        }

        result
    }

    /// Like [`Self::run`], but on a separate task.
    ///
    /// If the caller goes away (client disconnect), the job still runs to
    /// completion or timeout and its result is dropped, which removes its
    /// scratch files; the engine process is never orphaned mid-run.
    pub async fn run_detached(&self, source: Bytes) -> Result<PdfArtifact, CompileError> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(source).await })
            .await
            .map_err(|err| CompileError::Interrupted(err.to_string()))?
    }

    async fn execute(&self, job: &mut Job, source: &[u8]) -> Result<PdfArtifact, CompileError> {
        if let Err(err) = self.create_job_dir(&job.paths).await {
            job.advance(JobState::CleanedUp);
            return Err(CompileError::Io(err));
        }
        if let Err(err) = write_source(&job.paths, source).await {
            cleanup::discard_job(&job.paths).await;
            job.advance(JobState::CleanedUp);
            return Err(CompileError::Io(err));
        }
        job.advance(JobState::SourceWritten);

        job.advance(JobState::Compiling);
        let (status, diagnostics) = match self.invoke_engine(&job.paths).await {
            Ok(completed) => completed,
            Err(err) => {
                job.advance(match err {
                    CompileError::Timeout { .. } => JobState::TimedOut,
                    _ => JobState::UnexpectedFailure,
                });
                cleanup::discard_job(&job.paths).await;
                job.advance(JobState::CleanedUp);
                return Err(err);
            }
        };

        if !status.success() {
            job.advance(JobState::Failed);
            cleanup::discard_job(&job.paths).await;
            job.advance(JobState::CleanedUp);
            return Err(CompileError::Compilation {
                exit_code: status.code(),
                diagnostics,
            });
        }

        let output = job.paths.output();
        match fs::metadata(&output).await {
            Ok(metadata) if metadata.is_file() => {
                job.advance(JobState::Succeeded);
                cleanup::discard_side_products(&job.paths).await;
                Ok(PdfArtifact::new(job.paths.clone(), metadata.len()))
            }
            _ => {
                job.advance(JobState::UnexpectedFailure);
                cleanup::discard_job(&job.paths).await;
                job.advance(JobState::CleanedUp);
                Err(CompileError::MissingArtifact {
                    path: output,
                    diagnostics,
                })
            }
        }
    }

    async fn create_job_dir(&self, paths: &JobPaths) -> io::Result<()> {
        fs::create_dir_all(&self.scratch_root).await?;
        // `create_dir` (not `_all`): an existing directory belongs to another job.
        fs::create_dir(paths.dir()).await
    }

    /// Run the engine in the job directory and collect its output.
    ///
    /// stdout and stderr share one pipe, so the diagnostics keep the order
    /// in which the engine wrote them.
    async fn invoke_engine(&self, paths: &JobPaths) -> Result<(ExitStatus, String), CompileError> {
        let cli_started_at = Instant::now();
        let (output, stdout, stderr) =
            output_pipe().map_err(|err| self.engine_failure(paths, "compile::pipe", err))?;

        // The command and its copies of the write end are dropped at the end
        // of this statement; the reader sees EOF once the engine exits.
        let mut child = Command::new(&self.engine_path)
            .args(&self.engine_args)
            .arg(paths.source_file_name())
            .current_dir(paths.dir())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| self.engine_failure(paths, "compile::spawn", err))?;

        let waited = timeout(self.timeout, async {
            let (status, output) = tokio::join!(child.wait(), read_output(output));
            status.map(|status| (status, output))
        })
        .await;

        match waited {
            Ok(Ok((status, output))) => {
                debug!(
                    target = TARGET,
                    op = "compile::engine",
                    job_id = %paths.id(),
                    cli_elapsed_ms = cli_started_at.elapsed().as_millis() as u64,
                    exit_code = status.code().map(i64::from).unwrap_or(-1),
                    "Typesetting engine exited"
                );
                Ok((status, output))
            }
            Ok(Err(err)) => Err(CompileError::Engine(err)),
            Err(_) => {
                if let Err(err) = child.kill().await {
                    warn!(
                        target = TARGET,
                        op = "compile::kill",
                        job_id = %paths.id(),
                        error = %err,
                        "Failed to terminate timed out typesetting engine"
                    );
                }
                Err(CompileError::Timeout {
                    limit: self.timeout,
                })
            }
        }
    }

    fn engine_failure(&self, paths: &JobPaths, op: &'static str, err: io::Error) -> CompileError {
        let error_code = if err.kind() == ErrorKind::NotFound {
            "engine_missing"
        } else {
            "spawn_engine"
        };
        warn!(
            target = TARGET,
            op,
            result = "error",
            job_id = %paths.id(),
            engine = %self.engine_path.display(),
            error_code,
            error = %err,
            "Failed to start typesetting engine"
        );
        CompileError::Engine(err)
    }
}

/// Anchor relative engine paths such as `./bin/pdflatex` to the launch
/// directory; the engine runs inside the job directory, where they would not
/// resolve. Bare names are left for `PATH` lookup.
fn resolve_engine_path(engine_path: &Path) -> io::Result<PathBuf> {
    if engine_path.is_relative() && engine_path.components().count() > 1 {
        Ok(std::env::current_dir()?.join(engine_path))
    } else {
        Ok(engine_path.to_path_buf())
    }
}

/// Bookkeeping for one job's lifecycle.
struct Job {
    paths: JobPaths,
    state: JobState,
}

impl Job {
    fn new(paths: JobPaths) -> Self {
        Self {
            paths,
            state: JobState::Created,
        }
    }

    fn id(&self) -> JobId {
        self.paths.id()
    }

    fn advance(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal job transition {} -> {}",
            self.state,
            next
        );
        debug!(
            target = TARGET,
            op = "compile::transition",
            job_id = %self.paths.id(),
            from = %self.state,
            to = %next,
            "Job state changed"
        );
        self.state = next;
    }
}

async fn write_source(paths: &JobPaths, source: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(paths.source())
        .await?;
    file.write_all(source).await?;
    file.flush().await
}

/// One pipe for both output streams of the engine.
fn output_pipe() -> io::Result<(pipe::Receiver, Stdio, Stdio)> {
    let (reader, writer) = std::io::pipe()?;
    let for_stderr = writer.try_clone()?;
    let receiver = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
    Ok((receiver, Stdio::from(writer), Stdio::from(for_stderr)))
}

async fn read_output<R>(mut pipe: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    if let Err(err) = pipe.read_to_end(&mut buffer).await {
        debug!(
            target = TARGET,
            op = "compile::read_output",
            error = %err,
            "Engine output stream ended with an error"
        );
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
