//! Caller-side bridges into the worker.
//!
//! - [`AsyncBridge`]: many calls in flight, answers matched by correlation id
//! - [`SyncBridge`]: one blocking call at a time through a shared region

pub mod async_bridge;
pub mod sync_bridge;

pub use async_bridge::{AsyncBridge, PendingCalls, PendingReply};
pub use sync_bridge::SyncBridge;
