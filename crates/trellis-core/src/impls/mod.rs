//! Port implementations.

pub mod memory_store;

pub use self::memory_store::InMemoryStore;
