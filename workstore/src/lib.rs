pub mod backend;
pub mod bridge;
pub mod config;
pub mod core;
pub mod protocol;
pub mod store;
pub mod worker;

// Re-export commonly used types
pub use backend::{Backend, BackendFactory, FileBackend, FileBackendFactory, MemoryBackend};
pub use bridge::{AsyncBridge, PendingReply, SyncBridge};
pub use config::StoreConfig;
pub use core::{Entries, ErrorKind, Method, Result, StoreError, StoreStats, WireError};
pub use store::Store;
pub use worker::{Supervisor, WorkerListener, WorkerState};
