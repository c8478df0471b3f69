pub mod context;
pub mod events;
pub mod ids;
pub mod tools;

pub use context::{ContextItem, Metadata};
pub use events::SessionEvent;
pub use ids::{ClientId, ContextItemId, ToolCallId};
