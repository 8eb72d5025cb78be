use std::{process, sync::Arc};

use latexd::{
    application::{compile::CompilationRunner, error::AppError},
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::{fs, signal, sync::Notify};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Compile(args) => run_compile(settings, args).await,
    }
}

fn build_runner(settings: &config::Settings) -> Result<CompilationRunner, AppError> {
    CompilationRunner::new(&settings.compiler).map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "scratch directory {} is unusable: {err}",
            settings.compiler.scratch_dir.display()
        )))
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let runner = build_runner(&settings)?;
    let state = HttpState::new(runner, &settings.uploads);
    let router = http::build_router(state, &settings);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "latexd::serve",
        addr = %settings.server.addr,
        engine = %settings.compiler.engine_path.display(),
        scratch_dir = %settings.compiler.scratch_dir.display(),
        timeout_secs = settings.compiler.timeout.as_secs(),
        "Listening for compilation requests"
    );

    let draining = Arc::new(Notify::new());
    let trigger = Arc::clone(&draining);
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            trigger.notify_one();
        })
        .into_future();

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = async {
            draining.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "latexd::serve",
                grace_secs = grace.as_secs(),
                "Graceful shutdown period elapsed with requests still in flight"
            );
        }
    }

    info!(target = "latexd::serve", "Server stopped");
    Ok(())
}

async fn run_compile(
    settings: config::Settings,
    args: config::CompileArgs,
) -> Result<(), AppError> {
    let output = args.output_path();
    if output == args.input {
        return Err(AppError::validation(
            "output path must differ from the input document",
        ));
    }

    let source = fs::read(&args.input).await.map_err(|err| {
        AppError::validation(format!("cannot read {}: {err}", args.input.display()))
    })?;

    let runner = build_runner(&settings)?;
    let artifact = match runner.run(source.into()).await {
        Ok(artifact) => artifact,
        Err(err) => {
            if let Some(diagnostics) = err.diagnostics().filter(|text| !text.is_empty()) {
                eprintln!("{diagnostics}");
            }
            return Err(err.into());
        }
    };

    let bytes = artifact.read_all().await.map_err(InfraError::from)?;
    fs::write(&output, &bytes).await.map_err(InfraError::from)?;

    info!(
        target = "latexd::compile",
        input = %args.input.display(),
        output = %output.display(),
        pdf_bytes = bytes.len(),
        "Wrote compiled document"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(target = "latexd::serve", error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(target = "latexd::serve", error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!(target = "latexd::serve", "Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!(target = "latexd::serve", "Received SIGTERM, starting graceful shutdown");
        },
    }
}
