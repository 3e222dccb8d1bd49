//! subresync daemon entrypoint.
//!
//! Connects to mpv's IPC socket and, a few seconds after a file starts playing
//! from the beginning, seeks back a second so the subtitle renderer
//! re-synchronizes. The daemon survives mpv restarts and exits on SIGINT or
//! SIGTERM.

use clap::Parser;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

mod backoff;
mod config;
mod host;
mod mpv;
mod service;
mod watcher;

use config::FileSettings;
use service::{ServiceMessage, ServiceOptions};

const DEBUG_LOG_ENV: &str = "SUBRESYNC_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "subresync";

#[derive(Parser)]
#[command(name = "subresync-daemon")]
#[command(about = "Seeks mpv back briefly after playback starts so subtitles re-sync")]
#[command(version)]
struct Cli {
    /// mpv IPC socket (as passed to --input-ipc-server)
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Settings file (default: ~/.subresync/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => Ok(path),
        None => config::default_config_path(),
    };
    let loaded = config_path
        .as_ref()
        .map_err(|err| err.to_string())
        .and_then(|path| config::load_settings(path).map_err(|err| err.to_string()));
    let settings = loaded.as_ref().cloned().unwrap_or_default();

    let (_logging_guard, logging_error) = init_logging(settings.logging.directory.as_deref());
    if let Some(err) = logging_error {
        warn!(error = %err, "Failed to open log directory; logging to stdout only");
    }

    let config_path = match config_path {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve settings path");
            std::process::exit(1);
        }
    };
    if let Err(err) = &loaded {
        warn!(error = %err, "Failed to load settings; using defaults");
    }

    let options = ServiceOptions {
        socket_path: config::resolve_socket_path(cli.socket, &settings),
    };
    info!(
        config = %config_path.display(),
        enabled = settings.enabled,
        version = env!("CARGO_PKG_VERSION"),
        "subresync daemon initialized"
    );

    let (sender, messages) = mpsc::channel();
    let shutdown = sender.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        let _ = shutdown.send(ServiceMessage::Shutdown);
    }) {
        error!(error = %err, "Failed to install signal handler");
        std::process::exit(1);
    }

    let live_settings = FileSettings::new(config_path);
    service::run(&options, &live_settings, sender, messages);
}

fn init_logging(directory: Option<&Path>) -> (Option<WorkerGuard>, Option<String>) {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let appender = directory.map(|directory| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .build(directory)
    });

    match appender {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            (Some(guard), None)
        }
        Some(Err(err)) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            (None, Some(err.to_string()))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            (None, None)
        }
    }
}
