//! HTTP surface of the relay: event-stream subscriptions, context
//! submission, client presence and the tool gateway.

pub mod error;
pub mod handlers;
pub mod health;
pub mod registry;
pub mod relay;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod sink;
pub mod tools;

#[cfg(test)]
mod testing;

pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerHandle};
pub use session::{SessionConfig, SessionEnd, SubscriptionSession};
pub use sink::{event_channel, EventSink, EventStream, SinkError};
