//! Progress and result events for moderation jobs.
//!
//! This crate provides:
//! - A non-blocking, per-job event bus
//! - Bounded subscriber buffers that shed progress but never terminal events
//! - Subscriptions usable as async streams

pub mod bus;
mod queue;

pub use bus::{EventBus, Subscription, DEFAULT_CAPACITY, EVENTS_DROPPED_TOTAL};
pub use queue::PushOutcome;
