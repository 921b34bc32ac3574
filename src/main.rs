#![forbid(unsafe_code)]

//! Plasmaplace binary entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use plasmaplace::bridge::run_bridge;
use plasmaplace::nrepl::shutdown::{EXIT_FATAL, EXIT_OK};
use plasmaplace::nrepl::{Confirmation, Connection, Shutdown};
use plasmaplace::{AppError, GlobalConfig, Result};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "plasmaplace", about = "nREPL client for editors", version, long_about = None)]
struct Cli {
    /// File containing the nREPL server's port (e.g. `.nrepl-port`).
    port_file: PathBuf,

    /// Project flavour reported by the editor.
    project_type: Option<String>,

    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("plasmaplace: {err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(async {
        match run(args).await {
            Ok(code) => code,
            Err(err) => {
                error!(error = %err, "plasmaplace stopped");
                EXIT_FATAL
            }
        }
    });
    // Blocking stdin reads would otherwise hold the runtime open.
    runtime.shutdown_background();

    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(args: Cli) -> Result<i32> {
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    info!(
        port_file = %args.port_file.display(),
        project_type = args.project_type.as_deref().unwrap_or("clojure"),
        "plasmaplace starting"
    );

    let shutdown = Shutdown::new();
    let connection = Connection::open(&args.port_file, config, shutdown.clone()).await?;

    tokio::select! {
        biased;
        () = shutdown.cancelled() => {
            return Ok(shutdown.exit_code().unwrap_or(EXIT_FATAL));
        }
        result = connection.bootstrap() => result?,
    }
    connection.start_keepalive().await;

    let bridge = run_bridge(tokio::io::stdin(), tokio::io::stdout(), Arc::clone(&connection));
    tokio::select! {
        () = shutdown.cancelled() => {
            error!("nREPL connection lost");
            Ok(shutdown.exit_code().unwrap_or(EXIT_FATAL))
        }
        result = bridge => {
            if let Err(err) = result {
                warn!(error = %err, "editor bridge failed");
            }
            // The bridge has reaped its tasks; nothing else will issue requests.
            shutdown.confirm(Confirmation::Driver);
            match connection.shutdown_gracefully().await {
                Ok(()) => {
                    info!("plasmaplace stopped");
                    Ok(EXIT_OK)
                }
                Err(err) => {
                    error!(error = %err, "graceful shutdown failed");
                    Ok(shutdown.exit_code().unwrap_or(EXIT_FATAL))
                }
            }
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the editor protocol.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
