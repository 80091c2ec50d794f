//! visual_aoi server binary.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use visual_aoi::capability::Capabilities;
use visual_aoi::config::Settings;
use visual_aoi::golden::GoldenStore;
use visual_aoi::linking::{BarcodeLinker, DisabledLinker, HttpBarcodeLinker};
use visual_aoi::orchestrator::Orchestrator;
use visual_aoi::server::{build_router, AppState};
use visual_aoi::session::{self, SessionManager};

/// How often the session reaper wakes up.
const REAPER_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Parser, Debug)]
#[command(name = "visual_aoi_server", about = "Automated optical inspection server")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "aoi.toml")]
    config: PathBuf,

    /// Override the configured listen address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::load_from(&args.config)?;
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }
    let settings = Arc::new(settings);

    std::fs::create_dir_all(settings.sessions_root())?;
    std::fs::create_dir_all(&settings.products_root)?;

    let sessions = Arc::new(SessionManager::new(
        settings.sessions_root(),
        settings.session_ttl,
    ));
    let store = Arc::new(GoldenStore::new(settings.products_root.clone()));
    let capabilities = Capabilities::builtin();
    let linker: Arc<dyn BarcodeLinker> =
        if settings.barcode_link_enabled && !settings.barcode_link_url.is_empty() {
            Arc::new(HttpBarcodeLinker::new(
                &settings.barcode_link_url,
                settings.barcode_link_timeout,
            )?)
        } else {
            tracing::info!("barcode linking disabled; scanned values pass through verbatim");
            Arc::new(DisabledLinker)
        };

    let orchestrator = Arc::new(Orchestrator::new(
        settings.clone(),
        sessions.clone(),
        store.clone(),
        capabilities,
        linker,
    ));

    let reaper = session::spawn_reaper(sessions.clone(), REAPER_INTERVAL);

    let state = AppState {
        settings: settings.clone(),
        sessions,
        store,
        orchestrator,
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!(addr = %settings.bind_addr, "visual_aoi server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install shutdown handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
