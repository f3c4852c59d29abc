//! Viewfinder binary — thin CLI shell over the [`viewfinder_server`] library
//! crate.

use axum::routing::{get, post};
use axum::Router;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use viewfinder_server::api::*;
use viewfinder_server::external::DisabledSearch;
use viewfinder_server::manager::{AppContext, Manager};
use viewfinder_server::types::{parse_libraries_toml, LibrarySpec, ServerConfig};

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Local media library server — indexed, change-tracked search over
/// directory trees for the Viewfinder web client.
#[derive(Parser)]
#[command(name = "viewfinder", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Named library (repeatable, format: NAME=PATH)
    #[arg(long = "library", value_name = "NAME=PATH")]
    libraries: Vec<String>,

    /// Load libraries from a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for index databases (default: platform data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Skip the full refresh normally started in the background at startup
    #[arg(long)]
    no_initial_refresh: bool,

    /// Bind to 0.0.0.0 instead of 127.0.0.1 (localhost)
    #[arg(long)]
    bind_all: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_DATA_HOME") {
        return PathBuf::from(dir).join("viewfinder");
    }
    if let Some(local) = std::env::var_os("LOCALAPPDATA") {
        return PathBuf::from(local).join("viewfinder");
    }
    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home).join(".local").join("share").join("viewfinder");
    }
    PathBuf::from("viewfinder-data")
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("viewfinder=info".parse().unwrap())
                .add_directive("viewfinder_server=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "viewfinder", &mut std::io::stdout());
        return;
    }

    // ---------------------------------------------------------------------------
    // Determine library list from CLI args
    // ---------------------------------------------------------------------------

    let mut specs: Vec<LibrarySpec> = Vec::new();

    // --library name=/path flags (repeatable)
    for spec in &cli.libraries {
        if let Some((name, path)) = spec.split_once('=') {
            let root = PathBuf::from(path).canonicalize().unwrap_or_else(|e| {
                error!(library = name, path = path, error = %e, "Library path not found");
                std::process::exit(1);
            });
            specs.push(LibrarySpec { name: name.to_string(), root });
        } else {
            error!(spec = spec.as_str(), "Invalid --library format, expected NAME=PATH");
            std::process::exit(1);
        }
    }

    // --config file
    let mut config_data_dir = None;
    if let Some(config_path) = &cli.config {
        let (parsed, data_dir) = parse_libraries_toml(config_path);
        specs.extend(parsed);
        config_data_dir = data_dir;
    }

    if specs.is_empty() {
        error!("No libraries configured. Use --library NAME=PATH or --config <file>");
        std::process::exit(1);
    }

    let data_dir = cli.data_dir.clone().or(config_data_dir).unwrap_or_else(default_data_dir);
    let config = ServerConfig { libraries: specs, data_dir };

    // The OS content index is an optional backend; no platform backend is
    // built yet, so every search is answered from the library indexes alone.
    info!("No OS content index backend on this platform, using library indexes only");
    let external = Arc::new(DisabledSearch);

    let manager = match Manager::new(&config, external) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "Failed to open libraries");
            std::process::exit(1);
        }
    };

    // ---------------------------------------------------------------------------
    // Background indexing + change monitoring
    // ---------------------------------------------------------------------------

    manager.start_monitoring();

    if !cli.no_initial_refresh {
        for library in manager.libraries() {
            let library = Arc::clone(library);
            tokio::spawn(async move {
                let name = library.name().to_string();
                let progress: viewfinder_server::library::Progress = {
                    let name = name.clone();
                    Arc::new(move |count| {
                        info!(library = name.as_str(), entries = count, "Indexing progress");
                    })
                };
                match library.refresh(None, true, Some(progress)).await {
                    Ok(count) => info!(library = name.as_str(), entries = count, "Initial refresh complete"),
                    Err(e) => warn!(library = name.as_str(), error = %e, "Initial refresh failed"),
                }
            });
        }
    }

    // ---------------------------------------------------------------------------
    // HTTP server
    // ---------------------------------------------------------------------------

    let ctx = AppContext { manager, start_time: Instant::now() };

    let app = Router::new()
        .route("/health", get(api_health))
        .route("/illust/{*id}", post(api_illust))
        .route("/list/{*id}", post(api_list))
        .route("/bookmark/add/{*id}", post(api_bookmark_add))
        .route("/bookmark/delete/{*id}", post(api_bookmark_delete))
        .route("/bookmark/tags", post(api_bookmark_tags))
        .route("/view/{*id}", post(api_view))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(ctx);

    // Bind address: 127.0.0.1 by default, --bind-all for 0.0.0.0
    let bind_addr = if cli.bind_all { "0.0.0.0" } else { "127.0.0.1" };

    let explicit_port: Option<u16> = std::env::var("PORT").ok().and_then(|p| p.parse().ok());

    let listener = if let Some(port) = explicit_port {
        tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await.unwrap_or_else(|e| {
            error!(port = port, error = %e, "Could not bind to port");
            eprintln!("  PORT={port} was set explicitly. Choose a different port.");
            std::process::exit(1);
        })
    } else {
        // Auto-scan: try 8923..=8932
        const BASE: u16 = 8923;
        const RANGE: u16 = 10;
        let mut found = None;
        for port in BASE..BASE + RANGE {
            match tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await {
                Ok(l) => {
                    found = Some(l);
                    break;
                }
                Err(_) => continue,
            }
        }
        found.unwrap_or_else(|| {
            error!(range_start = BASE, range_end = BASE + RANGE - 1, "No free port found");
            eprintln!("  Try: PORT=<port> viewfinder");
            std::process::exit(1);
        })
    };

    let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
    info!(port = port, "http://localhost:{port}");
    // Machine-readable line for scripts (not through tracing)
    eprintln!("VIEWFINDER_PORT={port}");

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
