use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use relay_settings::RelaySettings;
use relay_store::{ContextRepository, KvStore, RetentionPolicy};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::handlers;
use crate::registry::SessionRegistry;
use crate::relay::LiveRelay;
use crate::session::SessionConfig;
use crate::shutdown::ShutdownCoordinator;
use crate::tools::{register_provider_tools, ProviderClient, ProviderConfig, ToolGateway, ToolRegistry};

/// Presence keys outlive a few missed heartbeats but never less than this.
const MIN_PRESENCE_TTL_SECS: u64 = 60;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<ContextRepository>,
    pub relay: Arc<LiveRelay>,
    pub tools: Arc<ToolGateway>,
    pub sessions: Arc<SessionRegistry>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub session_config: SessionConfig,
    /// Outbound event buffer per session.
    pub channel_capacity: usize,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        repo: Arc<ContextRepository>,
        tools: ToolGateway,
        session_config: SessionConfig,
        channel_capacity: usize,
    ) -> Self {
        Self {
            repo,
            relay: Arc::new(LiveRelay::new(channel_capacity)),
            tools: Arc::new(tools),
            sessions: Arc::new(SessionRegistry::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            session_config,
            channel_capacity,
            start_time: Instant::now(),
        }
    }

    /// Wire a repository, tool catalog and timings from loaded settings.
    pub fn from_settings(settings: &RelaySettings, store: Arc<dyn KvStore>) -> Self {
        let delivery = &settings.delivery;
        let heartbeat_secs = delivery.heartbeat_interval_ms.div_ceil(1000);
        let policy = RetentionPolicy {
            item_ttl_secs: delivery.item_ttl_secs,
            pending_cap: delivery.pending_cap,
            presence_ttl_secs: (heartbeat_secs * 3).max(MIN_PRESENCE_TTL_SECS),
        };
        let repo = Arc::new(ContextRepository::new(store, policy));

        let provider = Arc::new(ProviderClient::new(ProviderConfig::from_settings(&settings.provider)));
        if !provider.is_configured() {
            warn!("provider credentials not set, tool calls will be rejected");
        }
        let mut registry = ToolRegistry::new();
        register_provider_tools(&mut registry, &provider);

        Self::new(
            repo,
            ToolGateway::new(registry),
            SessionConfig::from_settings(delivery),
            delivery.channel_capacity,
        )
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/context", post(handlers::submit_context))
        .route("/events", get(handlers::subscribe))
        .route("/events/{client_id}", get(handlers::subscribe_client))
        .route("/clients/{client_id}", get(handlers::client_status))
        .route("/tools", get(handlers::list_tools))
        .route("/tools/call", post(handlers::call_tool))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener and start serving. Returns a handle to shut it down.
pub async fn start(
    settings: &RelaySettings,
    store: Arc<dyn KvStore>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::from_settings(settings, Arc::clone(&store));
    let token = state.shutdown.token();

    let purge = spawn_purge_task(
        store,
        Duration::from_secs(settings.store.purge_interval_secs.max(1)),
        token.clone(),
    );

    let router = build_router(state.clone());
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(addr = %local_addr, "relay server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            warn!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        state,
        server,
        purge,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub addr: SocketAddr,
    state: AppState,
    server: JoinHandle<()>,
    purge: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// End every session, stop background tasks and drain pending evictions.
    pub async fn shutdown(self, timeout: Option<Duration>) {
        let Self {
            state,
            server,
            purge,
            ..
        } = self;
        state
            .shutdown
            .graceful_shutdown(vec![server, purge], timeout)
            .await;
        state.repo.wait_for_evictions().await;
        info!("relay server stopped");
    }
}

/// Periodically drop expired keys from the store.
fn spawn_purge_task(
    store: Arc<dyn KvStore>,
    every: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(count) => debug!(count, "purged expired keys"),
                    Err(e) => warn!(error = %e, "store purge failed"),
                },
            }
        }
    })
}
