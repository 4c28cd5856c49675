use crate::core::{ErrorKind, Method, Result, StoreError, WireError};
use crate::protocol::codec;
use crate::worker::region::SharedRegion;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Async request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, unique per bridge
    pub id: u64,
    /// Operation to execute
    pub method: Method,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Async response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Matching request id
    pub id: u64,
    /// Result value, or an encoded `WireError` when `did_throw` is set
    pub res: Value,
    #[serde(rename = "didThrow", default)]
    pub did_throw: bool,
}

impl Response {
    /// Create a successful response
    pub fn success(id: u64, res: Value) -> Self {
        Self {
            id,
            res,
            did_throw: false,
        }
    }

    /// Create an error response
    pub fn error(id: u64, error: &WireError) -> Self {
        Self {
            id,
            res: error_value(error),
            did_throw: true,
        }
    }

    /// Re-raise a carried error, or hand back the value
    pub fn into_result(self) -> Result<Value> {
        if !self.did_throw {
            return Ok(self.res);
        }

        let wire: WireError = serde_json::from_value(self.res)
            .map_err(|e| StoreError::Decode(format!("malformed error object: {}", e)))?;
        Err(wire.into())
    }
}

fn error_value(error: &WireError) -> Value {
    serde_json::to_value(error).unwrap_or_else(|_| Value::String(error.message.clone()))
}

/// Messages accepted by a worker thread
pub enum WorkerMessage {
    /// Encoded [`Request`]; answered through the event channel
    Call(Bytes),
    /// Blocking request; answered in place through its region
    Sync(SyncRequest),
    /// Exit immediately without draining, as if the worker crashed
    Abort,
}

/// Sync envelope: method, arguments and the region to answer into.
///
/// A request dropped before it was answered (dead worker, closed channel)
/// writes a `worker_fault` error into its region so the waiter wakes up.
pub struct SyncRequest {
    pub method: Method,
    pub args: Vec<Value>,
    region: Arc<SharedRegion>,
}

impl SyncRequest {
    pub fn new(method: Method, args: Vec<Value>, region: Arc<SharedRegion>) -> Self {
        Self {
            method,
            args,
            region,
        }
    }

    /// Encode `result` into the region and wake the caller.
    ///
    /// A result too large for the region is replaced by an
    /// `oversized_response` error; the region is never partially written.
    pub fn reply(&self, result: std::result::Result<Value, WireError>) {
        let (bytes, failed) = match result {
            Ok(value) => match codec::encode(&value) {
                Ok(bytes) => (bytes, false),
                Err(e) => match codec::encode(&e.to_wire()) {
                    Ok(bytes) => (bytes, true),
                    Err(e) => {
                        warn!("Failed to encode sync error reply: {}", e);
                        return;
                    }
                },
            },
            Err(wire) => match codec::encode(&wire) {
                Ok(bytes) => (bytes, true),
                Err(e) => {
                    warn!("Failed to encode sync error reply: {}", e);
                    return;
                }
            },
        };

        match self.region.write(&bytes, failed) {
            Ok(()) => {}
            Err(StoreError::OversizedResponse(message)) => {
                warn!("Sync {} reply rejected: {}", self.method, message);
                self.fail(WireError::new(ErrorKind::OversizedResponse, message));
            }
            Err(e) => warn!("Sync {} reply dropped: {}", self.method, e),
        }
    }

    fn fail(&self, error: WireError) {
        match codec::encode(&error) {
            Ok(bytes) => {
                if let Err(e) = self.region.write(&bytes, true) {
                    warn!("Failed to signal sync caller: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode sync error reply: {}", e),
        }
    }
}

impl Drop for SyncRequest {
    fn drop(&mut self) {
        if !self.region.is_signaled() {
            self.fail(WireError::new(
                ErrorKind::WorkerFault,
                format!("worker exited before answering {}", self.method),
            ));
        }
    }
}
