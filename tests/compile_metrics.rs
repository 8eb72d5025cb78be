#![cfg(unix)]

mod common;

use std::{sync::OnceLock, time::Duration};

use bytes::Bytes;
use latexd::{
    application::compile::{CompilationRunner, CompileError},
    infra::telemetry::{CLEANUP_FAILURES_TOTAL, COMPILE_MS, COMPILE_TOTAL},
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serial_test::serial;

use common::{FAILING_ENGINE, GOOD_ENGINE, SLOW_ENGINE, Workspace, document};

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        snapshotter
    })
}

#[derive(Debug, Default)]
struct Observed {
    outcomes: Vec<(String, u64)>,
    cleanup_failures: u64,
    compile_samples: usize,
}

impl Observed {
    fn take() -> Self {
        let mut observed = Observed::default();
        for (key, _, _, value) in snapshotter().snapshot().into_vec() {
            let key = key.key();
            match (key.name(), value) {
                (COMPILE_TOTAL, DebugValue::Counter(count)) => {
                    let outcome = key
                        .labels()
                        .find(|label| label.key() == "outcome")
                        .map(|label| label.value().to_string())
                        .unwrap_or_default();
                    observed.outcomes.push((outcome, count));
                }
                (CLEANUP_FAILURES_TOTAL, DebugValue::Counter(count)) => {
                    observed.cleanup_failures = count;
                }
                (COMPILE_MS, DebugValue::Histogram(samples)) => {
                    observed.compile_samples += samples.len();
                }
                _ => {}
            }
        }
        observed
    }

    fn outcome(&self, outcome: &str) -> u64 {
        self.outcomes
            .iter()
            .find(|(name, _)| name == outcome)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }
}

/// Like `GOOD_ENGINE`, but the `.log` side product is a directory, so the
/// by-name removal of the log fails with something other than NotFound.
const LOG_DIR_ENGINE: &str = r#"#!/bin/sh
set -eu
for last; do :; done
stem="${last%.*}"
printf '%%PDF-1.4\n' > "$stem.pdf"
cat "$last" >> "$stem.pdf"
mkdir "$stem.log"
"#;

const LOG_DIR_FAILING_ENGINE: &str = r#"#!/bin/sh
for last; do :; done
mkdir "${last%.*}.log"
echo "! Undefined control sequence."
exit 1
"#;

fn runner(workspace: &Workspace, script: &str, timeout: Duration) -> CompilationRunner {
    CompilationRunner::new(&workspace.compiler(workspace.engine(script), timeout)).expect("runner")
}

#[tokio::test]
#[serial]
async fn outcomes_are_counted_by_failure_kind() {
    let before = Observed::take();

    let workspace = Workspace::new();
    let good = runner(&workspace, GOOD_ENGINE, Duration::from_secs(10));
    let artifact = good
        .run(Bytes::from(document("metrics")))
        .await
        .expect("compiled");
    drop(artifact);

    let failing_workspace = Workspace::new();
    let failing = runner(&failing_workspace, FAILING_ENGINE, Duration::from_secs(10));
    failing
        .run(Bytes::from(document("metrics")))
        .await
        .expect_err("compilation failure");

    let slow_workspace = Workspace::new();
    let slow = runner(&slow_workspace, SLOW_ENGINE, Duration::from_millis(200));
    slow.run(Bytes::from(document("metrics")))
        .await
        .expect_err("timeout");

    let after = Observed::take();
    assert_eq!(after.outcome("success") - before.outcome("success"), 1);
    assert_eq!(
        after.outcome("compilation_failure") - before.outcome("compilation_failure"),
        1
    );
    assert_eq!(
        after.outcome("timeout_failure") - before.outcome("timeout_failure"),
        1
    );
    assert!(after.compile_samples >= 3);
}

#[tokio::test]
#[serial]
async fn successful_cleanup_records_no_failures() {
    let before = Observed::take();

    let workspace = Workspace::new();
    let good = runner(&workspace, GOOD_ENGINE, Duration::from_secs(10));
    for _ in 0..3 {
        good.run(Bytes::from(document("clean")))
            .await
            .expect("compiled")
            .read_all()
            .await
            .expect("read");
    }

    let after = Observed::take();
    assert_eq!(after.cleanup_failures, before.cleanup_failures);
    assert!(workspace.residual_entries().is_empty());
}

#[tokio::test]
#[serial]
async fn cleanup_failures_are_counted_without_changing_the_outcome() {
    let before = Observed::take();

    let workspace = Workspace::new();
    let good = runner(&workspace, LOG_DIR_ENGINE, Duration::from_secs(10));
    let pdf = good
        .run(Bytes::from(document("log dir")))
        .await
        .expect("cleanup trouble must not fail a compiled job")
        .read_all()
        .await
        .expect("read");
    assert!(pdf.starts_with(b"%PDF-"));

    let failing_workspace = Workspace::new();
    let failing = runner(
        &failing_workspace,
        LOG_DIR_FAILING_ENGINE,
        Duration::from_secs(10),
    );
    let err = failing
        .run(Bytes::from(document("log dir")))
        .await
        .expect_err("compilation failure");
    assert!(matches!(err, CompileError::Compilation { .. }), "{err:?}");
    assert_eq!(err.diagnostics(), Some("! Undefined control sequence.\n"));

    let after = Observed::take();
    assert!(
        after.cleanup_failures >= before.cleanup_failures + 2,
        "each job should report its failed log removal"
    );
    assert_eq!(after.outcome("success") - before.outcome("success"), 1);
    assert_eq!(
        after.outcome("compilation_failure") - before.outcome("compilation_failure"),
        1
    );
    // The sweep still removes the directory the by-name pass could not.
    assert!(workspace.residual_entries().is_empty());
    assert!(failing_workspace.residual_entries().is_empty());
}
