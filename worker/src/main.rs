//! Clouding Worker - Entry Point
//!
//! Consumes deployment jobs from the queue, generates their automation
//! artifacts and tracks each run until every host has an outcome.

use std::env;
use std::path::PathBuf;

use clouding_worker::app::options::AppOptions;
use clouding_worker::app::run::run;
use clouding_worker::filesys::file::File;
use clouding_worker::logs::{init_logging, LogOptions};
use clouding_worker::storage::settings::Settings;
use clouding_worker::utils::{parse_cli_args, version_info};

use anyhow::Context;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli_args = parse_cli_args(env::args().skip(1));

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version)?);
        return Ok(());
    }

    // Retrieve the settings file
    let mut settings = match cli_args.get("config") {
        Some(path) => File::new(path)
            .read_json::<Settings>()
            .await
            .with_context(|| format!("unable to read settings file {path}"))?,
        None => Settings::default(),
    };
    settings.apply_env();

    // Initialize logging; the guard flushes the log file on exit
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        stdout: settings.log.stdout,
        log_dir: settings.log.log_dir.as_ref().map(PathBuf::from),
        json_format: settings.log.json,
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(&settings).context("invalid configuration")?;

    info!("Running clouding worker with options: {:?}", options);
    if let Err(e) = run(version.version, options, await_shutdown_signal()).await {
        error!("Failed to run the worker: {e}");
        return Err(e).context("worker stopped with an error");
    }
    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            return;
        }
        info!("Ctrl+C received, shutting down...");
    }
}
