#![allow(dead_code)]

use std::{
    fs,
    net::SocketAddr,
    num::NonZeroU64,
    os::unix::fs::PermissionsExt,
    path::PathBuf,
    time::Duration,
};

use axum::{body::Body, response::Response};
use bytes::Bytes;
use http_body_util::BodyExt;
use latexd::config::{
    CompilerSettings, CorsSettings, LogFormat, LoggingSettings, ServerSettings, Settings,
    UploadSettings,
};
use tempfile::TempDir;
use tracing::level_filters::LevelFilter;

/// Copies the source into `<stem>.pdf` behind a PDF header and leaves
/// `.log`/`.aux` side products.
pub const GOOD_ENGINE: &str = r#"#!/bin/sh
set -eu
for last; do :; done
stem="${last%.*}"
printf '%%PDF-1.4\n' > "$stem.pdf"
cat "$last" >> "$stem.pdf"
echo "log" > "$stem.log"
echo "aux" > "$stem.aux"
"#;

pub const FAILING_ENGINE: &str = r#"#!/bin/sh
printf '%s\n' "! LaTeX Error: Missing \begin{document}."
exit 1
"#;

pub const SILENT_ENGINE: &str = r#"#!/bin/sh
exit 0
"#;

pub const SLOW_ENGINE: &str = r#"#!/bin/sh
exec sleep 30
"#;

pub const BOUNDARY: &str = "latexd-test-boundary";

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
        }
    }

    pub fn scratch(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    pub fn engine(&self, script: &str) -> PathBuf {
        let path = self.dir.path().join("fake-pdflatex");
        fs::write(&path, script).expect("write engine script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("set perms");
        path
    }

    pub fn compiler(&self, engine_path: PathBuf, timeout: Duration) -> CompilerSettings {
        CompilerSettings {
            engine_path,
            engine_args: vec!["-interaction=nonstopmode".to_string()],
            source_extension: "tex".to_string(),
            scratch_dir: self.scratch(),
            timeout,
        }
    }

    pub fn settings(&self, script: &str) -> Settings {
        Settings {
            server: ServerSettings {
                addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
                graceful_shutdown: Duration::from_secs(1),
            },
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            compiler: self.compiler(self.engine(script), Duration::from_secs(10)),
            uploads: UploadSettings {
                max_request_bytes: NonZeroU64::new(1024 * 1024).expect("non-zero"),
                download_filename: "resume.pdf".to_string(),
            },
            cors: CorsSettings::AnyOrigin,
        }
    }

    /// Entries left under the scratch root; empty once every job is released.
    pub fn residual_entries(&self) -> Vec<PathBuf> {
        match fs::read_dir(self.scratch()) {
            Ok(entries) => entries
                .map(|entry| entry.expect("entry").path())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

pub fn document(body: &str) -> String {
    format!("\\documentclass{{article}}\n\\begin{{document}}\n{body}\n\\end{{document}}\n")
}

pub fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/x-tex\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes()
}
