use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the latexd binary.
#[derive(Debug, Parser)]
#[command(name = "latexd", version, about = "LaTeX to PDF compilation service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "LATEXD_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP compilation service.
    Serve(Box<ServeArgs>),
    /// Compile a single local document and write the resulting PDF.
    #[command(name = "compile")]
    Compile(CompileArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CompilerOverrides {
    /// Override the typesetting engine executable.
    #[arg(long = "compiler-engine-path", value_name = "PATH")]
    pub engine_path: Option<PathBuf>,

    /// Override the directory holding per-job scratch files.
    #[arg(long = "compiler-scratch-dir", value_name = "PATH")]
    pub scratch_dir: Option<PathBuf>,

    /// Override the per-job compilation timeout.
    #[arg(long = "compiler-timeout-seconds", value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub compiler: CompilerOverrides,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the maximum request size for uploads in bytes.
    #[arg(long = "uploads-max-request-bytes", value_name = "BYTES")]
    pub uploads_max_request_bytes: Option<u64>,

    /// Override the filename suggested for downloaded PDFs.
    #[arg(long = "uploads-download-filename", value_name = "NAME")]
    pub uploads_download_filename: Option<String>,

    /// Replace the CORS allow-list; repeat for several origins, `*` allows any.
    #[arg(long = "cors-allowed-origin", value_name = "ORIGIN")]
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct CompileArgs {
    #[command(flatten)]
    pub compiler: CompilerOverrides,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Document source to compile.
    #[arg(value_name = "INPUT", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Where to write the PDF; defaults to INPUT with a `.pdf` extension.
    #[arg(long, short, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

impl CompileArgs {
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.input.with_extension("pdf"))
    }
}
