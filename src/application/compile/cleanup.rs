//! Best-effort removal of job scratch files.
//!
//! A missing file is success. Any other failure is logged as a cleanup
//! warning and counted, but never returned: cleanup must not change the
//! outcome of the job that produced the files.

use std::{
    fs as std_fs,
    io::{self, ErrorKind},
    path::Path,
};

use metrics::counter;
use tokio::fs;
use tracing::warn;

use crate::{domain::job::JobPaths, infra::telemetry::CLEANUP_FAILURES_TOTAL};

const TARGET: &str = "application::compile::cleanup";

/// Remove every file of the job, including its directory.
pub(crate) async fn discard_job(paths: &JobPaths) {
    clear_job_dir(paths, None).await;
    remove_dir(paths.dir()).await;
}

/// Remove everything in the job directory except the output PDF.
pub(crate) async fn discard_side_products(paths: &JobPaths) {
    let output = paths.output();
    clear_job_dir(paths, Some(&output)).await;
}

async fn clear_job_dir(paths: &JobPaths, keep: Option<&Path>) {
    remove_file(&paths.source()).await;
    for auxiliary in paths.auxiliaries() {
        remove_file(&auxiliary).await;
    }
    if keep.is_none() {
        remove_file(&paths.output()).await;
    }

    // The engine may drop files we do not know about; sweep them too.
    let mut entries = match fs::read_dir(paths.dir()).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return,
        Err(err) => {
            report(paths.dir(), &err);
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                report(paths.dir(), &err);
                break;
            }
        };

        let path = entry.path();
        if keep.is_some_and(|keep| keep == path) {
            continue;
        }

        match entry.file_type().await {
            Ok(kind) if kind.is_dir() => remove_tree(&path).await,
            _ => remove_file(&path).await,
        }
    }
}

pub(crate) async fn remove_file(path: &Path) {
    if let Err(err) = ignore_missing(fs::remove_file(path).await) {
        report(path, &err);
    }
}

async fn remove_tree(path: &Path) {
    if let Err(err) = ignore_missing(fs::remove_dir_all(path).await) {
        report(path, &err);
    }
}

async fn remove_dir(path: &Path) {
    if let Err(err) = ignore_missing(fs::remove_dir(path).await) {
        report(path, &err);
    }
}

/// Remove a job directory that should already be empty; falls back to a
/// recursive removal if something was left behind.
pub(crate) async fn remove_job_dir(path: &Path) {
    if ignore_missing(fs::remove_dir(path).await).is_err() {
        remove_tree(path).await;
    }
}

/// Synchronous variant used from `Drop`, where no executor is guaranteed.
pub(crate) fn remove_file_now(path: &Path) {
    if let Err(err) = ignore_missing(std_fs::remove_file(path)) {
        report(path, &err);
    }
}

/// Blocking counterpart of [`remove_job_dir`] for `Drop`.
pub(crate) fn remove_dir_now(path: &Path) {
    match ignore_missing(std_fs::remove_dir(path)) {
        Ok(()) => {}
        Err(_) => {
            if let Err(err) = ignore_missing(std_fs::remove_dir_all(path)) {
                report(path, &err);
            }
        }
    }
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn report(path: &Path, err: &io::Error) {
    counter!(CLEANUP_FAILURES_TOTAL).increment(1);
    warn!(
        target = TARGET,
        op = "compile::cleanup",
        result = "cleanup_warning",
        path = %path.display(),
        error = %err,
        "Failed to remove scratch file"
    );
}
