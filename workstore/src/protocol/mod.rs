//! Wire protocol between the controller and its worker
pub mod codec;
pub mod envelope;

pub use envelope::{Request, Response, SyncRequest, WorkerMessage};
