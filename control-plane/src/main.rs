//! Kernex Control Plane - Entry Point

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use kxplane::app::build;
use kxplane::logs::{init_logging, LogOptions};
use kxplane::server::serve::serve;
use kxplane::settings::Settings;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    if cli_args.contains_key("version") {
        println!("kxplane {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let settings_path = cli_args
        .get("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("kxplane.json"));
    let mut settings = match Settings::load(&settings_path).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = settings.apply_overrides(&cli_args) {
        eprintln!("Invalid command line: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = init_logging(LogOptions {
        log_level: settings.log_level,
        json_format: settings.json_logs,
    }) {
        println!("Failed to initialize logging: {e}");
    }

    info!("Running Kernex control plane with settings: {:?}", settings);
    let app = match build(&settings).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to open storage: {}", e);
            std::process::exit(1);
        }
    };

    let handle = match serve(&settings.bind_addr(), app, await_shutdown_signal()).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start the server: {}", e);
            std::process::exit(1);
        }
    };

    match handle.await {
        Ok(Ok(())) => info!("Server stopped"),
        Ok(Err(e)) => {
            error!("Server error: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Server task panicked: {}", e);
            std::process::exit(1);
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("SIGTERM received, shutting down..."),
                    _ = sigint.recv() => info!("SIGINT received, shutting down..."),
                }
                return;
            }
            _ => error!("Unable to install signal handlers, falling back to Ctrl+C"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    info!("Ctrl+C received, shutting down...");
}
