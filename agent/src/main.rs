//! Kernex Agent - Entry Point
//!
//! Polls the Kernex control plane with heartbeats and applies the update
//! bundles it is told to deploy.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use kxagent::app::options::AppOptions;
use kxagent::app::run::run;
use kxagent::app::runtime::RuntimeConfig;
use kxagent::filesys::file::File;
use kxagent::http::client::HttpClient;
use kxagent::installer::register::ensure_registered;
use kxagent::logs::{init_logging, LogOptions};
use kxagent::storage::layout::StorageLayout;
use kxagent::storage::settings::Settings;
use kxagent::utils::version_info;
use kxagent::workers::poller;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(rendered) => println!("{}", rendered),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let settings_file = match cli_args.get("config") {
        Some(path) => File::new(PathBuf::from(path)),
        None => layout.settings_file(),
    };
    let mut settings = match Settings::load(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {:?}: {}", settings_file.path(), e);
            std::process::exit(1);
        }
    };
    if let Err(e) = settings.apply_overrides(&cli_args) {
        eprintln!("Invalid command line: {}", e);
        std::process::exit(1);
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.json_logs,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let logging = match init_logging(log_options) {
        Ok(handle) => Some(Arc::new(handle)),
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let client = match HttpClient::new(&settings.control_plane.base_url) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    // Register once; later runs reuse device.json
    let device = match ensure_registered(&layout, &settings, &client).await {
        Ok(device) => device,
        Err(e) => {
            error!("Device registration failed: {}", e);
            std::process::exit(1);
        }
    };

    if cli_args.contains_key("register") {
        println!("device_id={}", device.device_id);
        return;
    }

    let options = AppOptions {
        control_plane_url: settings.control_plane.base_url.clone(),
        layout,
        poller: poller::Options::default(),
        runtime: RuntimeConfig::from_settings(&settings),
        ..Default::default()
    };

    info!("Running Kernex Agent with options: {:?}", options);
    let result = run(version.version, device, options, logging, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the agent: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, shutting down...");
                    }
                    _ = sigint.recv() => {
                        info!("SIGINT received, shutting down...");
                    }
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
