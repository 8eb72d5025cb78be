//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::NonZeroU64,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, CompileArgs, CompilerOverrides, LoggingOverrides, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "latexd";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_ENGINE_PATH: &str = "pdflatex";
const DEFAULT_ENGINE_ARGS: &[&str] = &["-interaction=nonstopmode"];
const DEFAULT_SOURCE_EXTENSION: &str = "tex";
const DEFAULT_SCRATCH_DIRNAME: &str = "latexd";
const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_DOWNLOAD_FILENAME: &str = "resume.pdf";
const ANY_ORIGIN: &str = "*";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub compiler: CompilerSettings,
    pub uploads: UploadSettings,
    pub cors: CorsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CompilerSettings {
    pub engine_path: PathBuf,
    pub engine_args: Vec<String>,
    pub source_extension: String,
    pub scratch_dir: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub max_request_bytes: NonZeroU64,
    pub download_filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsSettings {
    Disabled,
    AnyOrigin,
    AllowList(Vec<String>),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("LATEXD")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("compiler.engine_args")
            .with_list_parse_key("cors.allowed_origins")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Compile(args)) => {
            raw.apply_compiler_overrides(&args.compiler);
            raw.apply_logging_overrides(&args.logging);
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    compiler: RawCompilerSettings,
    uploads: RawUploadSettings,
    cors: RawCorsSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(limit) = overrides.uploads_max_request_bytes {
            self.uploads.max_request_bytes = Some(limit);
        }
        if let Some(name) = overrides.uploads_download_filename.as_ref() {
            self.uploads.download_filename = Some(name.clone());
        }
        if !overrides.cors_allowed_origins.is_empty() {
            self.cors.allowed_origins = Some(overrides.cors_allowed_origins.clone());
        }
        self.apply_compiler_overrides(&overrides.compiler);
        self.apply_logging_overrides(&overrides.logging);
    }

    fn apply_compiler_overrides(&mut self, overrides: &CompilerOverrides) {
        if let Some(path) = overrides.engine_path.as_ref() {
            self.compiler.engine_path = Some(path.clone());
        }
        if let Some(dir) = overrides.scratch_dir.as_ref() {
            self.compiler.scratch_dir = Some(dir.clone());
        }
        if let Some(seconds) = overrides.timeout_seconds {
            self.compiler.timeout_seconds = Some(seconds);
        }
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            compiler,
            uploads,
            cors,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            compiler: build_compiler_settings(compiler)?,
            uploads: build_upload_settings(uploads)?,
            cors: build_cors_settings(cors)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_compiler_settings(compiler: RawCompilerSettings) -> Result<CompilerSettings, LoadError> {
    let engine_path = compiler
        .engine_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_PATH));
    if engine_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "compiler.engine_path",
            "path must not be empty",
        ));
    }

    let engine_args = compiler.engine_args.unwrap_or_else(|| {
        DEFAULT_ENGINE_ARGS
            .iter()
            .map(|arg| arg.to_string())
            .collect()
    });

    let source_extension = compiler
        .source_extension
        .map(|ext| ext.trim().trim_start_matches('.').to_string())
        .unwrap_or_else(|| DEFAULT_SOURCE_EXTENSION.to_string());
    if source_extension.is_empty()
        || source_extension.eq_ignore_ascii_case("pdf")
        || source_extension.contains(['/', '\\'])
    {
        return Err(LoadError::invalid(
            "compiler.source_extension",
            "must be a plain extension other than `pdf`",
        ));
    }

    let scratch_dir = compiler
        .scratch_dir
        .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_SCRATCH_DIRNAME));
    if scratch_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "compiler.scratch_dir",
            "path must not be empty",
        ));
    }

    let timeout_seconds = compiler
        .timeout_seconds
        .unwrap_or(DEFAULT_COMPILE_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "compiler.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CompilerSettings {
        engine_path,
        engine_args,
        source_extension,
        scratch_dir,
        timeout: Duration::from_secs(timeout_seconds),
    })
}

fn build_upload_settings(uploads: RawUploadSettings) -> Result<UploadSettings, LoadError> {
    let max_request_bytes_value = uploads
        .max_request_bytes
        .unwrap_or(DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("uploads.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "uploads.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    let download_filename = uploads
        .download_filename
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|| DEFAULT_DOWNLOAD_FILENAME.to_string());
    if download_filename.is_empty()
        || Path::new(&download_filename).file_name().and_then(|n| n.to_str())
            != Some(download_filename.as_str())
        || download_filename.contains(['"', '\r', '\n'])
    {
        return Err(LoadError::invalid(
            "uploads.download_filename",
            "must be a bare file name without quotes or line breaks",
        ));
    }

    Ok(UploadSettings {
        max_request_bytes,
        download_filename,
    })
}

fn build_cors_settings(cors: RawCorsSettings) -> Result<CorsSettings, LoadError> {
    let origins: Vec<String> = cors
        .allowed_origins
        .unwrap_or_else(|| vec![ANY_ORIGIN.to_string()])
        .into_iter()
        .map(|origin| origin.trim().to_string())
        .filter(|origin| !origin.is_empty())
        .collect();

    if origins.is_empty() {
        return Ok(CorsSettings::Disabled);
    }

    if origins.iter().any(|origin| origin == ANY_ORIGIN) {
        if origins.len() > 1 {
            return Err(LoadError::invalid(
                "cors.allowed_origins",
                "`*` cannot be combined with explicit origins",
            ));
        }
        return Ok(CorsSettings::AnyOrigin);
    }

    for origin in &origins {
        if !(origin.starts_with("http://") || origin.starts_with("https://")) {
            return Err(LoadError::invalid(
                "cors.allowed_origins",
                format!("origin `{origin}` must start with http:// or https://"),
            ));
        }
    }

    Ok(CorsSettings::AllowList(origins))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCompilerSettings {
    engine_path: Option<PathBuf>,
    engine_args: Option<Vec<String>>,
    source_extension: Option<String>,
    scratch_dir: Option<PathBuf>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUploadSettings {
    max_request_bytes: Option<u64>,
    download_filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCorsSettings {
    allowed_origins: Option<Vec<String>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
