use std::{io, path::Path};

use bytes::Bytes;
use futures::Stream;
use tokio::{fs, io::AsyncReadExt};
use tracing::debug;

use crate::domain::job::{JobId, JobPaths, JobState};

use super::cleanup;

const STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// A compiled PDF still sitting in the job's scratch directory.
///
/// The file and its directory are removed exactly once. Consumers that read
/// the file to the end release it on the async file API; an artifact dropped
/// before that (an abandoned transfer) is removed by its guard instead.
#[derive(Debug)]
pub struct PdfArtifact {
    guard: ScratchGuard,
    len: u64,
}

impl PdfArtifact {
    pub(crate) fn new(paths: JobPaths, len: u64) -> Self {
        Self {
            guard: ScratchGuard {
                paths,
                released: false,
            },
            len,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.guard.paths.id()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> std::path::PathBuf {
        self.guard.paths.output()
    }

    pub fn dir(&self) -> &Path {
        self.guard.paths.dir()
    }

    /// Read the whole PDF into memory and release the scratch files.
    pub async fn read_all(self) -> io::Result<Bytes> {
        let data = fs::read(self.path()).await?;
        self.release().await;
        Ok(Bytes::from(data))
    }

    /// Remove the PDF and its job directory without blocking the runtime.
    pub async fn release(mut self) {
        cleanup::remove_file(&self.path()).await;
        cleanup::remove_job_dir(self.dir()).await;
        self.guard.released = true;
        self.guard.log_release();
    }

    /// Turn the artifact into a chunked byte stream that owns the file.
    ///
    /// The file is opened before this returns so that an unreadable artifact
    /// is reported up front instead of as a truncated body.
    pub async fn into_stream(
        self,
    ) -> io::Result<impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static> {
        let mut file = fs::File::open(self.path()).await?;
        let artifact = self;

        Ok(async_stream::try_stream! {
            let mut buffer = vec![0u8; STREAM_CHUNK_BYTES];
            loop {
                let read = file.read(&mut buffer).await?;
                if read == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buffer[..read]);
            }
            drop(file);
            artifact.release().await;
        })
    }
}

#[derive(Debug)]
struct ScratchGuard {
    paths: JobPaths,
    released: bool,
}

impl ScratchGuard {
    fn log_release(&self) {
        debug!(
            target = "application::compile",
            op = "compile::release",
            job_id = %self.paths.id(),
            state = %JobState::CleanedUp,
            "Released compiled artifact"
        );
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        cleanup::remove_file_now(&self.paths.output());
        cleanup::remove_dir_now(self.paths.dir());
        self.log_release();
    }
}
