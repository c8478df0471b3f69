//! Per-session polling of the pending index.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use relay_core::{ClientId, SessionEvent};
use relay_store::{ContextRepository, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::sink::EventSink;

/// Outcome of one delivery pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Items written to the sink and marked delivered.
    pub emitted: usize,
    /// Indexed ids whose item had already expired or been evicted.
    pub skipped: usize,
    /// The pass stopped early (session cancelled or sink gone).
    pub interrupted: bool,
}

/// Runs delivery passes for one session, at most one at a time.
pub struct DeliveryScheduler {
    client_id: ClientId,
    repo: Arc<ContextRepository>,
    sink: EventSink,
    cancel: CancellationToken,
    in_flight: Arc<AtomicBool>,
}

impl DeliveryScheduler {
    pub fn new(
        client_id: ClientId,
        repo: Arc<ContextRepository>,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client_id,
            repo,
            sink,
            cancel,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start a pass in the background unless one is still running.
    /// Returns whether a pass was started.
    ///
    /// A pass still waiting on the store when the session ends is dropped
    /// along with its sink handle; ids it emitted but had not yet marked
    /// are delivered again on a later session.
    pub fn trigger(&self) -> bool {
        let Some(guard) = InFlight::acquire(&self.in_flight) else {
            debug!(client_id = %self.client_id, "previous poll tick still running, skipping");
            return false;
        };
        let client_id = self.client_id.clone();
        let repo = Arc::clone(&self.repo);
        let sink = self.sink.clone();
        let cancel = self.cancel.clone();

        drop(tokio::spawn(async move {
            let _guard = guard;
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(client_id = %client_id, "session ended, abandoning poll tick");
                    return;
                }
                result = deliver_pending(&client_id, &repo, &sink, &cancel) => result,
            };
            match result {
                Ok(report) if report.emitted > 0 || report.skipped > 0 => {
                    debug!(
                        client_id = %client_id,
                        emitted = report.emitted,
                        skipped = report.skipped,
                        interrupted = report.interrupted,
                        "poll tick delivered items"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(client_id = %client_id, error = %e, retryable = e.is_retryable(), "poll tick failed");
                }
            }
        }));
        true
    }
}

/// Holds a background task's in-flight flag; clears it on drop, including
/// on panic or abort.
pub(crate) struct InFlight(Arc<AtomicBool>);

impl InFlight {
    /// `None` while another holder is still running.
    pub(crate) fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Self(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One delivery pass: emit every undelivered item in pending order, then
/// record the emitted ids in a single `mark_delivered` call.
///
/// Ids are only marked once their event is in the sink. If the store fails
/// part-way, whatever was already emitted is still marked before the error
/// is returned.
pub async fn deliver_pending(
    client_id: &ClientId,
    repo: &ContextRepository,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Result<TickReport, StoreError> {
    let ids = repo.list_undelivered(client_id).await?;
    let mut report = TickReport::default();
    if ids.is_empty() {
        return Ok(report);
    }

    let mut delivered = Vec::with_capacity(ids.len());
    let mut failure = None;

    for id in ids {
        if cancel.is_cancelled() {
            report.interrupted = true;
            break;
        }
        let item = match repo.fetch(&id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                report.skipped += 1;
                continue;
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        };
        if cancel.is_cancelled() {
            report.interrupted = true;
            break;
        }
        match sink.emit(SessionEvent::context(item)) {
            Ok(()) => delivered.push(id),
            Err(e) => {
                // a full buffer is retried on the next tick
                debug!(client_id = %client_id, error = %e, "stopping delivery pass");
                report.interrupted = true;
                break;
            }
        }
    }

    report.emitted = delivered.len();
    if !delivered.is_empty() {
        repo.mark_delivered(client_id, &delivered).await?;
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Metadata;
    use relay_store::{MemoryKvStore, RetentionPolicy};
    use serde_json::json;

    use crate::sink::event_channel;
    use crate::testing::FlakyStore;

    fn repo() -> Arc<ContextRepository> {
        Arc::new(ContextRepository::new(
            Arc::new(MemoryKvStore::new()),
            RetentionPolicy::default(),
        ))
    }

    #[tokio::test]
    async fn empty_index_is_a_no_op() {
        let repo = repo();
        let (sink, _stream) = event_channel(8);
        let report = deliver_pending(&ClientId::new("c1"), &repo, &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report, TickReport::default());
    }

    #[tokio::test]
    async fn emits_in_order_and_marks_delivered() {
        let repo = repo();
        let client = ClientId::new("c1");
        let a = repo.submit(&client, json!("a"), Metadata::new()).await.unwrap();
        let b = repo.submit(&client, json!("b"), Metadata::new()).await.unwrap();
        let (sink, mut stream) = event_channel(8);

        let report = deliver_pending(&client, &repo, &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.emitted, 2);

        assert_eq!(stream.recv().await.unwrap().item_id(), Some(&a.id));
        assert_eq!(stream.recv().await.unwrap().item_id(), Some(&b.id));
        assert!(repo.list_undelivered(&client).await.unwrap().is_empty());

        let again = deliver_pending(&client, &repo, &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(again.emitted, 0);
    }

    #[tokio::test]
    async fn cancelled_pass_emits_nothing() {
        let repo = repo();
        let client = ClientId::new("c1");
        repo.submit(&client, json!("a"), Metadata::new()).await.unwrap();
        let (sink, mut stream) = event_channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = deliver_pending(&client, &repo, &sink, &cancel).await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.emitted, 0);
        assert_eq!(repo.list_undelivered(&client).await.unwrap().len(), 1);
        drop(sink);
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn full_sink_marks_only_what_was_queued() {
        let repo = repo();
        let client = ClientId::new("c1");
        repo.submit(&client, json!("a"), Metadata::new()).await.unwrap();
        let b = repo.submit(&client, json!("b"), Metadata::new()).await.unwrap();
        let (sink, _stream) = event_channel(1);

        let report = deliver_pending(&client, &repo, &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.emitted, 1);
        assert!(report.interrupted);
        assert_eq!(repo.list_undelivered(&client).await.unwrap(), vec![b.id]);
    }

    #[tokio::test]
    async fn missing_items_are_skipped() {
        let store = Arc::new(MemoryKvStore::new());
        let repo = ContextRepository::new(store.clone(), RetentionPolicy::default());
        let client = ClientId::new("c1");
        let gone = repo.submit(&client, json!("gone"), Metadata::new()).await.unwrap();
        let kept = repo.submit(&client, json!("kept"), Metadata::new()).await.unwrap();
        relay_store::KvStore::delete(store.as_ref(), &format!("context:{}", gone.id))
            .await
            .unwrap();
        let (sink, mut stream) = event_channel(8);

        let report = deliver_pending(&client, &repo, &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.emitted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(stream.recv().await.unwrap().item_id(), Some(&kept.id));
    }

    #[tokio::test]
    async fn store_errors_surface_to_the_caller() {
        let store = Arc::new(FlakyStore::new());
        let repo = ContextRepository::new(store.clone(), RetentionPolicy::default());
        let client = ClientId::new("c1");
        repo.submit(&client, json!("a"), Metadata::new()).await.unwrap();
        store.set_failing(true);
        let (sink, _stream) = event_channel(8);

        let err = deliver_pending(&client, &repo, &sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn overlapping_trigger_is_skipped() {
        let store = Arc::new(FlakyStore::new());
        let repo = Arc::new(ContextRepository::new(store.clone(), RetentionPolicy::default()));
        let client = ClientId::new("c1");
        repo.submit(&client, json!("a"), Metadata::new()).await.unwrap();
        store.set_stalled(true);
        let (sink, mut stream) = event_channel(8);
        let scheduler =
            DeliveryScheduler::new(client.clone(), repo.clone(), sink, CancellationToken::new());

        assert!(scheduler.trigger());
        tokio::task::yield_now().await;
        assert!(scheduler.is_running());
        assert!(!scheduler.trigger());

        store.set_stalled(false);
        let event = stream.recv().await.unwrap();
        assert_eq!(event.name(), "context");
        while scheduler.is_running() {
            tokio::task::yield_now().await;
        }
        assert!(scheduler.trigger());
    }

    #[tokio::test]
    async fn cancellation_during_store_call_discards_the_pass() {
        let store = Arc::new(FlakyStore::new());
        let repo = Arc::new(ContextRepository::new(store.clone(), RetentionPolicy::default()));
        let client = ClientId::new("c1");
        let item = repo.submit(&client, json!("a"), Metadata::new()).await.unwrap();
        store.set_stalled(true);
        let (sink, mut stream) = event_channel(8);
        let cancel = CancellationToken::new();

        let pass = tokio::spawn({
            let (client, repo, cancel) = (client.clone(), Arc::clone(&repo), cancel.clone());
            async move { deliver_pending(&client, &repo, &sink, &cancel).await }
        });
        tokio::task::yield_now().await;
        cancel.cancel();
        store.set_stalled(false);

        let report = pass.await.unwrap().unwrap();
        assert!(report.interrupted);
        assert_eq!(report.emitted, 0);
        assert!(stream.recv().await.is_none());
        assert_eq!(repo.list_undelivered(&client).await.unwrap(), vec![item.id]);
    }

    #[tokio::test]
    async fn stalled_tick_is_dropped_when_session_ends() {
        let store = Arc::new(FlakyStore::new());
        let repo = Arc::new(ContextRepository::new(store.clone(), RetentionPolicy::default()));
        let client = ClientId::new("c1");
        repo.submit(&client, json!("a"), Metadata::new()).await.unwrap();
        store.set_stalled(true);
        let (sink, mut stream) = event_channel(8);
        let cancel = CancellationToken::new();
        let scheduler = DeliveryScheduler::new(client.clone(), repo.clone(), sink, cancel.clone());

        assert!(scheduler.trigger());
        tokio::task::yield_now().await;
        cancel.cancel();
        drop(scheduler);

        // the abandoned tick releases its sink without waiting on the store
        assert!(stream.recv().await.is_none());
        store.set_stalled(false);
        assert_eq!(repo.list_undelivered(&client).await.unwrap().len(), 1);
    }
}
