//! Event transport between a session and its HTTP response body.
//!
//! A session writes discrete [`SessionEvent`]s into an [`EventSink`]; the
//! handler turns the paired [`EventStream`] into `text/event-stream` frames.
//! Dropping the stream (client went away) is observable through
//! [`EventSink::closed`].

use futures::Stream;
use relay_core::SessionEvent;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("event buffer is full")]
    Full,
    #[error("event stream closed")]
    Closed,
}

/// Append-only writer half.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
}

/// Reader half, owned by the HTTP response.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<SessionEvent>,
}

/// Create a bounded sink/stream pair.
pub fn event_channel(capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSink { tx }, EventStream { rx })
}

impl EventSink {
    /// Queue one event without waiting. A full buffer means the client is not
    /// reading; the event is dropped rather than stalling the session.
    pub fn emit(&self, event: SessionEvent) -> Result<(), SinkError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    /// Resolves once the reader half has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Wire frames, ending when every sink clone is gone.
    pub fn into_frames(self) -> impl Stream<Item = String> + Send + 'static {
        ReceiverStream::new(self.rx).map(|event| event.to_frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (sink, mut stream) = event_channel(8);
        sink.emit(SessionEvent::heartbeat()).unwrap();
        sink.emit(SessionEvent::connected(relay_core::ClientId::new("c1"), "1.0"))
            .unwrap();

        assert_eq!(stream.recv().await.unwrap().name(), "heartbeat");
        assert_eq!(stream.recv().await.unwrap().name(), "connected");
    }

    #[tokio::test]
    async fn full_buffer_is_reported() {
        let (sink, _stream) = event_channel(1);
        sink.emit(SessionEvent::heartbeat()).unwrap();
        assert_eq!(sink.emit(SessionEvent::heartbeat()), Err(SinkError::Full));
    }

    #[tokio::test]
    async fn dropping_stream_closes_sink() {
        let (sink, stream) = event_channel(4);
        assert!(!sink.is_closed());
        drop(stream);
        sink.closed().await;
        assert!(sink.is_closed());
        assert_eq!(sink.emit(SessionEvent::heartbeat()), Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn frames_end_when_sinks_drop() {
        let (sink, stream) = event_channel(4);
        sink.emit(SessionEvent::heartbeat()).unwrap();
        drop(sink);

        let frames: Vec<String> = stream.into_frames().collect().await;
        assert_eq!(frames.len(), 1);
        assert!(frames[0].starts_with("event: heartbeat\ndata: {"));
        assert!(frames[0].ends_with("\n\n"));
    }
}
