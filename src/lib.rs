// Devote - a single to-do list with staged commits over JSONL+SQLite

pub mod adapter;
pub mod backend;
pub mod jsonl;
pub mod sqlite;
pub mod store;
pub mod task;

// Re-export main types for convenience
pub use adapter::Adapter;
pub use backend::{Backend, Change, MemoryBackend};
pub use sqlite::SqliteBackend;
pub use store::{Store, StoreError, SubscriptionId};
pub use task::{Task, now_ms};
