use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use relay_settings::{RelaySettings, StoreBackend};
use relay_store::{Database, KvStore, MemoryKvStore, SqliteKvStore};
use relay_telemetry::TelemetryConfig;

/// Context delivery relay.
#[derive(Debug, Parser)]
#[command(name = "relay", version, about)]
struct Args {
    /// Settings file (defaults to ~/.relay/settings.json).
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address.
    #[arg(long)]
    host: Option<String>,

    /// Bind port; 0 picks a free port.
    #[arg(long)]
    port: Option<u16>,

    /// Store backend: sqlite or memory.
    #[arg(long)]
    store: Option<StoreBackend>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(backend) = self.store {
            settings.store.backend = backend;
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn open_store(settings: &RelaySettings) -> anyhow::Result<Arc<dyn KvStore>> {
    match settings.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store, context will not survive a restart");
            Ok(Arc::new(MemoryKvStore::new()))
        }
        StoreBackend::Sqlite => {
            let path = settings.store.resolved_path(&relay_settings::relay_home());
            let db = Database::open(&path)
                .with_context(|| format!("failed to open store at {}", path.display()))?;
            Ok(Arc::new(SqliteKvStore::new(db)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => relay_settings::load_settings_from_path(path),
        None => relay_settings::load_settings(),
    }
    .context("failed to load settings")?;
    args.apply(&mut settings);
    settings.validate().context("invalid settings")?;

    let telemetry = TelemetryConfig::from_level_str(&settings.logging.level, settings.logging.json);
    let _ = relay_telemetry::init_telemetry(&telemetry);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting relay");

    let store = open_store(&settings)?;
    let handle = relay_server::start(&settings, store)
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port(), "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown(None).await;
    Ok(())
}
