use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

pub const COMPILE_TOTAL: &str = "latexd_compile_total";
pub const COMPILE_MS: &str = "latexd_compile_ms";
pub const CLEANUP_FAILURES_TOTAL: &str = "latexd_cleanup_failures_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            COMPILE_TOTAL,
            Unit::Count,
            "Total number of compilation jobs, labelled by outcome."
        );
        describe_histogram!(
            COMPILE_MS,
            Unit::Milliseconds,
            "Wall-clock duration of compilation jobs in milliseconds."
        );
        describe_counter!(
            CLEANUP_FAILURES_TOTAL,
            Unit::Count,
            "Total number of scratch files that could not be removed."
        );
    });
}
