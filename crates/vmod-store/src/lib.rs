//! Durable record of moderation jobs.
//!
//! This crate provides:
//! - The `JobStore` contract with its compare-and-set `transition`
//! - An in-memory backend with per-job locking
//! - A Redis backend using a Lua compare-and-swap

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryJobStore;
pub use redis_store::{RedisJobStore, RedisStoreConfig};
pub use store::{unchanged, JobStore, Mutator};
