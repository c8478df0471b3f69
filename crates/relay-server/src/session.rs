//! One live subscription: connection ack, heartbeats and context delivery
//! over a single event sink.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use relay_core::{ClientId, ContextItem, SessionEvent};
use relay_settings::DeliverySettings;
use relay_store::ContextRepository;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::relay::next_live;
use crate::scheduler::{DeliveryScheduler, InFlight};
use crate::sink::{EventSink, SinkError};

/// Timing knobs for a session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub max_lifetime: Duration,
    pub protocol_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(3600),
            protocol_version: "1.0".into(),
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &DeliverySettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            max_lifetime: Duration::from_secs(settings.max_session_secs),
            protocol_version: settings.protocol_version.clone(),
        }
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client dropped the stream.
    Disconnected,
    /// Maximum lifetime reached.
    Expired,
    /// The server is shutting down.
    Shutdown,
}

pub struct SubscriptionSession {
    client_id: ClientId,
    repo: Arc<ContextRepository>,
    sink: EventSink,
    config: SessionConfig,
    shutdown: CancellationToken,
    live: Option<broadcast::Receiver<ContextItem>>,
}

impl SubscriptionSession {
    pub fn new(
        client_id: ClientId,
        repo: Arc<ContextRepository>,
        sink: EventSink,
        config: SessionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client_id,
            repo,
            sink,
            config,
            shutdown,
            live: None,
        }
    }

    /// Also forward items published on the live relay.
    #[must_use]
    pub fn with_live_feed(mut self, rx: broadcast::Receiver<ContextItem>) -> Self {
        self.live = Some(rx);
        self
    }

    /// Drive the session until the client leaves, the lifetime runs out or
    /// the server shuts down.
    ///
    /// `connected` is always the first event. Polling starts right after it
    /// and only for named clients; anonymous sessions see live relay items.
    pub async fn run(self) -> SessionEnd {
        let Self {
            client_id,
            repo,
            sink,
            config,
            shutdown,
            mut live,
        } = self;

        let cancel = shutdown.child_token();
        if sink
            .emit(SessionEvent::connected(client_id.clone(), config.protocol_version.as_str()))
            .is_err()
        {
            return SessionEnd::Disconnected;
        }
        info!(client_id = %client_id, "session started");
        let presence = PresenceWriter::new(client_id.clone(), Arc::clone(&repo), cancel.clone());
        presence.record();

        let scheduler = (!client_id.is_anonymous()).then(|| {
            DeliveryScheduler::new(client_id.clone(), Arc::clone(&repo), sink.clone(), cancel.clone())
        });

        let start = Instant::now();
        let mut heartbeat = time::interval_at(start + config.heartbeat_interval, config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut poll = time::interval(config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let deadline = time::sleep_until(start + config.max_lifetime);
        tokio::pin!(deadline);

        let end = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break SessionEnd::Shutdown,
                () = sink.closed() => break SessionEnd::Disconnected,
                () = &mut deadline => break SessionEnd::Expired,
                _ = heartbeat.tick() => {
                    if let Err(SinkError::Closed) = sink.emit(SessionEvent::heartbeat()) {
                        break SessionEnd::Disconnected;
                    }
                    presence.record();
                }
                _ = poll.tick(), if scheduler.is_some() => {
                    if let Some(scheduler) = &scheduler {
                        let _ = scheduler.trigger();
                    }
                }
                item = recv_live(&mut live), if live.is_some() => {
                    match item {
                        Some(item) => {
                            debug!(client_id = %client_id, item_id = %item.id, "live item");
                            if let Err(SinkError::Closed) = sink.emit(SessionEvent::context(item)) {
                                break SessionEnd::Disconnected;
                            }
                        }
                        None => live = None,
                    }
                }
            }
        };

        cancel.cancel();
        info!(client_id = %client_id, reason = ?end, "session ended");
        end
    }
}

async fn recv_live(live: &mut Option<broadcast::Receiver<ContextItem>>) -> Option<ContextItem> {
    match live {
        Some(rx) => next_live(rx).await,
        None => std::future::pending().await,
    }
}

/// Writes `last seen` in the background so a slow store never holds up the
/// session loop. At most one write is pending; it is dropped when the
/// session ends.
struct PresenceWriter {
    client_id: ClientId,
    repo: Arc<ContextRepository>,
    cancel: CancellationToken,
    in_flight: Arc<AtomicBool>,
}

impl PresenceWriter {
    fn new(client_id: ClientId, repo: Arc<ContextRepository>, cancel: CancellationToken) -> Self {
        Self {
            client_id,
            repo,
            cancel,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    fn record(&self) {
        if self.client_id.is_anonymous() {
            return;
        }
        let Some(guard) = InFlight::acquire(&self.in_flight) else {
            debug!(client_id = %self.client_id, "presence write still pending, skipping");
            return;
        };
        let client_id = self.client_id.clone();
        let repo = Arc::clone(&self.repo);
        let cancel = self.cancel.clone();

        drop(tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                result = repo.touch(&client_id) => {
                    if let Err(e) = result {
                        warn!(client_id = %client_id, error = %e, "failed to record presence");
                    }
                }
            }
        }));
    }
}
