use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::{
    Multipart,
    multipart::{MultipartError, MultipartRejection},
};
use bytes::Bytes;
use latexd_api_types::CompileTextRequest;
use tracing::error;

use crate::{
    application::{
        compile::{CompilationRunner, PdfArtifact},
        error::HttpError,
    },
    config::UploadSettings,
};

const SOURCE_BASE: &str = "infra::http::compile";
const UPLOAD_FIELD: &str = "file";

#[derive(Clone)]
pub struct HttpState {
    pub runner: CompilationRunner,
    pub download_filename: Arc<str>,
}

impl HttpState {
    pub fn new(runner: CompilationRunner, uploads: &UploadSettings) -> Self {
        Self {
            runner,
            download_filename: Arc::from(uploads.download_filename.as_str()),
        }
    }
}

pub(super) async fn compile_upload(
    State(state): State<HttpState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, HttpError> {
    const SOURCE: &str = "infra::http::compile::compile_upload";

    let mut multipart = multipart.map_err(|rejection| {
        HttpError::from_error(SOURCE, StatusCode::BAD_REQUEST, "Invalid upload", &rejection)
    })?;
    let source = read_upload_field(&mut multipart).await?;
    compile_and_respond(&state, source).await
}

pub(super) async fn compile_text(
    State(state): State<HttpState>,
    payload: Result<Json<CompileTextRequest>, JsonRejection>,
) -> Result<Response, HttpError> {
    const SOURCE: &str = "infra::http::compile::compile_text";

    let Json(request) = payload.map_err(|rejection| {
        let status = rejection.status();
        let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "Upload too large"
        } else {
            "Invalid request body"
        };
        HttpError::new(SOURCE, status, message, rejection.body_text())
    })?;
    compile_and_respond(&state, Bytes::from(request.tex)).await
}

async fn read_upload_field(multipart: &mut Multipart) -> Result<Bytes, HttpError> {
    const SOURCE: &str = "infra::http::compile::read_upload_field";

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some(UPLOAD_FIELD) {
                    continue;
                }
                return field
                    .bytes()
                    .await
                    .map_err(|err| multipart_error(SOURCE, err));
            }
            Ok(None) => break,
            Err(err) => return Err(multipart_error(SOURCE, err)),
        }
    }

    Err(HttpError::new(
        SOURCE,
        StatusCode::BAD_REQUEST,
        "Invalid upload",
        format!("multipart body had no `{UPLOAD_FIELD}` field"),
    ))
}

fn multipart_error(source: &'static str, err: MultipartError) -> HttpError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        HttpError::from_error(source, status, "Upload too large", &err)
    } else {
        HttpError::from_error(source, StatusCode::BAD_REQUEST, "Invalid upload", &err)
    }
}

async fn compile_and_respond(state: &HttpState, source: Bytes) -> Result<Response, HttpError> {
    let artifact = state.runner.run_detached(source).await?;
    pdf_response(artifact, &state.download_filename).await
}

async fn pdf_response(artifact: PdfArtifact, filename: &str) -> Result<Response, HttpError> {
    const SOURCE: &str = "infra::http::compile::pdf_response";

    let job_id = artifact.job_id();
    let len = artifact.len();
    let stream = artifact.into_stream().await.map_err(|err| {
        error!(
            target = SOURCE_BASE,
            job_id = %job_id,
            error = %err,
            "failed to open compiled artifact"
        );
        HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "An unexpected error occurred",
            &err,
        )
    })?;

    let mut response = Body::from_stream(stream).into_response();
    *response.status_mut() = StatusCode::OK;
    response.extensions_mut().insert(job_id);

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/pdf"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));

    let safe_name = filename.replace('"', "'");
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{safe_name}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}
