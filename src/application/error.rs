use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use latexd_api_types::ErrorResponse;
use thiserror::Error;

use crate::{
    application::compile::{CompileError, FailureKind},
    infra::error::InfraError,
};

/// Diagnostic attached to failing responses for the logging middleware.
///
/// Never serialized to clients.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
    /// Outcome label of the compilation job behind the failure, if any.
    pub failure_kind: Option<&'static str>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
            failure_kind: None,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
            failure_kind: None,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    details: Option<String>,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            details: None,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            details: None,
            report,
        }
    }

    /// Expose `details` to the client in the response body.
    pub fn with_public_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_failure_kind(mut self, kind: FailureKind) -> Self {
        self.report.failure_kind = Some(kind.as_str());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut body = ErrorResponse::new(self.public_message);
        body.details = self.details;
        let mut response = (self.status, Json(body)).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<CompileError> for HttpError {
    fn from(error: CompileError) -> Self {
        const SOURCE: &str = "infra::http::compile_error_to_http_error";

        let kind = error.kind();
        let http_error = match kind {
            FailureKind::Compilation => {
                let details = error.diagnostics().unwrap_or_default().to_string();
                HttpError::from_error(
                    SOURCE,
                    StatusCode::BAD_REQUEST,
                    "LaTeX compilation failed",
                    &error,
                )
                .with_public_details(details)
            }
            FailureKind::Timeout => HttpError::from_error(
                SOURCE,
                StatusCode::GATEWAY_TIMEOUT,
                "LaTeX compilation timed out",
                &error,
            ),
            FailureKind::Io | FailureKind::Unexpected => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected error occurred",
                &error,
            ),
        };
        http_error.with_failure_kind(kind)
    }
}

/// Errors that end the process.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use std::{io, time::Duration};

    use super::*;

    #[test]
    fn compilation_failure_exposes_engine_output() {
        let error = HttpError::from(CompileError::Compilation {
            exit_code: Some(1),
            diagnostics: "! Undefined control sequence.".to_string(),
        });

        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error.public_message, "LaTeX compilation failed");
        assert_eq!(
            error.details.as_deref(),
            Some("! Undefined control sequence.")
        );
        assert_eq!(error.report.failure_kind, Some("compilation_failure"));
    }

    #[test]
    fn environment_failures_hide_internals() {
        let missing = HttpError::from(CompileError::MissingArtifact {
            path: "/scratch/secret/job.pdf".into(),
            diagnostics: "engine chatter".to_string(),
        });
        assert_eq!(missing.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(missing.public_message, "An unexpected error occurred");
        assert!(missing.details.is_none());
        assert!(missing.report.messages[0].contains("/scratch/secret/job.pdf"));
        assert_eq!(missing.report.failure_kind, Some("unexpected_failure"));

        let io = HttpError::from(CompileError::Io(io::Error::other("disk full")));
        assert_eq!(io.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(io.report.failure_kind, Some("io_failure"));
        assert_eq!(io.report.messages, vec![
            "failed to write document source: disk full".to_string(),
            "disk full".to_string(),
        ]);
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let error = HttpError::from(CompileError::Timeout {
            limit: Duration::from_secs(60),
        });
        assert_eq!(error.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(error.details.is_none());
        assert_eq!(error.report.failure_kind, Some("timeout_failure"));
    }

    #[test]
    fn response_carries_report_extension() {
        let response = HttpError::new(
            "tests::http_error",
            StatusCode::BAD_REQUEST,
            "Invalid upload",
            "multipart body had no `file` field",
        )
        .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.source, "tests::http_error");
        assert_eq!(report.messages, vec![
            "multipart body had no `file` field".to_string()
        ]);
        assert!(report.failure_kind.is_none());
    }
}
