//! Job journal implementations.
//!
//! - [`RedisJobJournal`] - Pending sets in Redis, shared with the cache server
//! - [`MemoryJobJournal`] - Process-local journal for tests

pub mod memory_journal;
pub mod redis_journal;

pub use memory_journal::MemoryJobJournal;
pub use redis_journal::RedisJobJournal;
