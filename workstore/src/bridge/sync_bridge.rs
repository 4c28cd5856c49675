use crate::core::{Method, Result, WireError};
use crate::protocol::{SyncRequest, WorkerMessage, codec};
use crate::worker::{SharedRegion, Supervisor};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Blocking calls into the worker.
///
/// Every call gets a fresh [`SharedRegion`]; the calling thread parks on it
/// until the worker writes the reply. Calls are serialized, so at most one
/// region per controller is live at a time.
pub struct SyncBridge {
    supervisor: Arc<Supervisor>,
    region_bytes: usize,
    serial: Mutex<()>,
}

impl SyncBridge {
    pub fn new(supervisor: Arc<Supervisor>, region_bytes: usize) -> Self {
        Self {
            supervisor,
            region_bytes,
            serial: Mutex::new(()),
        }
    }

    /// Size of the region allocated for each call
    pub fn region_bytes(&self) -> usize {
        self.region_bytes
    }

    /// Run `method` on the worker and block until it answers.
    ///
    /// Must not be called from inside an async task; it parks the thread.
    pub fn call(&self, method: Method, args: Vec<Value>) -> Result<Value> {
        let _serial = self.serial.lock();

        let region = Arc::new(SharedRegion::new(self.region_bytes)?);
        let request = SyncRequest::new(method, args, Arc::clone(&region));
        let generation = self
            .supervisor
            .post(move |_| WorkerMessage::Sync(request))?;

        debug!("Waiting on sync {} from worker {}", method, generation);

        let reply = region.wait();
        if reply.failed() {
            let wire: WireError = codec::decode(reply.payload())?;
            return Err(wire.into());
        }

        codec::decode(reply.payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::core::StoreError;
    use crate::worker::WorkerListener;
    use crate::worker::region::MIN_REGION_BYTES;
    use bytes::Bytes;
    use serde_json::json;

    struct Ignore;

    impl WorkerListener for Ignore {
        fn on_message(&self, _generation: u64, _frame: Bytes) {}
        fn on_fault(&self, _generation: u64, _reason: &str) {}
    }

    fn bridge(backend: MemoryBackend, region_bytes: usize) -> SyncBridge {
        let supervisor = Supervisor::spawn(Arc::new(backend), Arc::new(Ignore)).unwrap();
        SyncBridge::new(Arc::new(supervisor), region_bytes)
    }

    #[test]
    fn test_blocking_round_trip() {
        let bridge = bridge(MemoryBackend::new(), 64 * 1024);

        bridge
            .call(Method::Set, vec![json!("n"), json!(42)])
            .unwrap();
        assert_eq!(bridge.call(Method::Get, vec![json!("n")]).unwrap(), json!(42));
        assert_eq!(
            bridge.call(Method::Has, vec![json!("missing")]).unwrap(),
            json!(false)
        );
    }

    #[test]
    fn test_oversized_reply_is_rejected() {
        let backend = MemoryBackend::new();
        let bridge = bridge(backend.clone(), MIN_REGION_BYTES);

        bridge
            .call(Method::Set, vec![json!("blob"), json!("x".repeat(4096))])
            .unwrap();

        let result = bridge.call(Method::Get, vec![json!("blob")]);
        assert!(matches!(result, Err(StoreError::OversizedResponse(_))));

        // The worker and the stored value are unaffected
        assert_eq!(bridge.call(Method::Has, vec![json!("blob")]).unwrap(), json!(true));
        assert_eq!(
            backend.snapshot().get("blob"),
            Some(&json!("x".repeat(4096)))
        );
    }

    #[test]
    fn test_terminated_supervisor_fails_fast() {
        let bridge = bridge(MemoryBackend::new(), 64 * 1024);
        bridge.supervisor.terminate();

        assert!(matches!(
            bridge.call(Method::Load, vec![]),
            Err(StoreError::Terminated)
        ));
    }
}
