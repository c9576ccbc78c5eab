//! vrmcast - chat-driven VRM avatar orchestration service
//!
//! Main entry point for the CLI application.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vrmcast::assets::AssetLibrary;
use vrmcast::classify::{Classifier, HttpClassifier, KeywordClassifier};
use vrmcast::config::{ServiceConfig, Settings};
use vrmcast::headless::HeadlessSource;
use vrmcast::stage::Stage;
use vrmcast::web::WebServer;
use vrmcast::{AppState, Notice};

/// Chat-driven VRM avatar orchestration service
#[derive(Parser, Debug)]
#[command(name = "vrmcast", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Asset folder root (overrides config)
    #[arg(short, long)]
    assets_dir: Option<PathBuf>,

    /// Settings file path (overrides config)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// HTTP port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Disable the HTTP server
    #[arg(long)]
    no_http: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting {} v{}", vrmcast::NAME, vrmcast::VERSION);

    // Load configuration with CLI overrides
    let mut config = if let Some(ref path) = args.config {
        ServiceConfig::from_file(path)?
    } else {
        ServiceConfig::default()
    };
    if let Some(assets_dir) = args.assets_dir {
        config.assets_dir = assets_dir;
    }
    if let Some(settings_path) = args.settings {
        config.settings_path = settings_path;
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }
    if args.no_http {
        config.http.enabled = false;
    }
    config.validate()?;

    // Persisted extension settings, healed at load
    let settings = Settings::load(&config.settings_path)?;

    // Asset folders
    let assets = AssetLibrary::scan(&config.assets_dir);
    info!(
        "Assets: {} models, {} animation files ({} groups)",
        assets.models().len(),
        assets.animations().len(),
        assets.animation_groups().len()
    );

    // Classification: remote endpoint when configured, keyword fallback otherwise
    let classifier: Arc<dyn Classifier> = if config.classify.enabled {
        info!("Classifier endpoint: {}", config.classify.endpoint);
        Arc::new(HttpClassifier::new(&config.classify))
    } else {
        info!("Classifier: local keyword matching");
        Arc::new(KeywordClassifier)
    };

    let source = Arc::new(HeadlessSource::new(&config.assets_dir));
    let mut stage = Stage::new(settings, assets, source);
    stage.load_scene();

    let state = AppState::new(config.clone(), stage, classifier);

    // Frame ticker
    tokio::spawn(Arc::clone(&state).run_ticker());

    // Debounced settings persistence
    tokio::spawn(Arc::clone(&state).run_settings_saver());

    // Log outbound notices (a real host forwards these to its chat input)
    let mut notices = state.subscribe_notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            match notice {
                Notice::StagedMessage(staged) => {
                    info!(
                        "Staged message for {}: {} (auto_send={})",
                        staged.character, staged.message, staged.auto_send
                    );
                }
                Notice::LoadError { subject, message } => {
                    warn!("Load error ({}): {}", subject, message);
                }
            }
        }
    });

    // HTTP control surface
    if config.http.enabled {
        let web_state = Arc::clone(&state);
        let http_config = config.http.clone();
        tokio::spawn(async move {
            let server = WebServer::new(web_state, &http_config);
            if let Err(e) = server.serve().await {
                tracing::error!("Web server error: {}", e);
            }
        });
    } else {
        info!("HTTP server disabled");
    }

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    state.shutdown();

    // Final settings flush
    {
        let mut stage = state.stage.write().await;
        if stage.take_settings_dirty() {
            if let Err(e) = stage.settings().save(&config.settings_path) {
                warn!("Failed to persist settings on shutdown: {}", e);
            }
        }
        stage.teardown();
    }

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!("vrmcast stopped");
    Ok(())
}
