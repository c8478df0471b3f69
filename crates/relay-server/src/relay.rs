use relay_core::ContextItem;
use tokio::sync::broadcast;

/// Best-effort fan-out for `anonymous` submissions.
///
/// Nothing is persisted: only sessions connected at publish time see an
/// item, and a receiver that falls behind loses the overflow.
pub struct LiveRelay {
    tx: broadcast::Sender<ContextItem>,
}

impl LiveRelay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many sessions the item reached.
    pub fn publish(&self, item: ContextItem) -> usize {
        self.tx.send(item).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContextItem> {
        self.tx.subscribe()
    }
}

/// Next item from a relay receiver, skipping over lag.
/// `None` once the relay is gone.
pub async fn next_live(rx: &mut broadcast::Receiver<ContextItem>) -> Option<ContextItem> {
    loop {
        match rx.recv().await {
            Ok(item) => return Some(item),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "live relay lagged, dropped items");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ClientId;
    use serde_json::json;

    fn item(content: &str) -> ContextItem {
        ContextItem::new(ClientId::anonymous(), json!(content), Default::default(), 60)
    }

    #[tokio::test]
    async fn publish_without_listeners_is_dropped() {
        let relay = LiveRelay::new(4);
        assert_eq!(relay.publish(item("x")), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_published_items() {
        let relay = LiveRelay::new(4);
        let mut a = relay.subscribe();
        let mut b = relay.subscribe();

        assert_eq!(relay.publish(item("x")), 2);
        assert_eq!(next_live(&mut a).await.unwrap().content, json!("x"));
        assert_eq!(next_live(&mut b).await.unwrap().content, json!("x"));
    }

    #[tokio::test]
    async fn lagging_receiver_skips_to_newest() {
        let relay = LiveRelay::new(2);
        let mut rx = relay.subscribe();
        for n in 0..5 {
            relay.publish(item(&n.to_string()));
        }
        assert_eq!(next_live(&mut rx).await.unwrap().content, json!("3"));
        assert_eq!(next_live(&mut rx).await.unwrap().content, json!("4"));
    }

    #[tokio::test]
    async fn closed_relay_ends_receiver() {
        let relay = LiveRelay::new(2);
        let mut rx = relay.subscribe();
        drop(relay);
        assert!(next_live(&mut rx).await.is_none());
    }
}
