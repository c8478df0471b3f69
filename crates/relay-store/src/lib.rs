pub mod database;
pub mod error;
pub mod kv;
pub mod memory;
pub mod repository;
pub mod schema;
pub mod sqlite;

pub use database::Database;
pub use error::StoreError;
pub use kv::KvStore;
pub use memory::MemoryKvStore;
pub use repository::{ContextRepository, RetentionPolicy};
pub use sqlite::SqliteKvStore;
