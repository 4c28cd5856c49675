use crate::backend::BackendFactory;
use crate::core::{Method, Result, StoreError};
use crate::protocol::{Request, Response, WorkerMessage, codec};
use crate::worker::{Supervisor, WorkerListener};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

struct PendingCall {
    generation: u64,
    reply: oneshot::Sender<Result<Value>>,
}

/// Correlation registry: request id -> waiting caller.
///
/// Each entry is removed exactly once, either by the matching response or by
/// a fault of the worker generation it was sent to.
pub struct PendingCalls {
    next_id: AtomicU64,
    calls: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(&self, id: u64, generation: u64) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        self.calls.lock().insert(
            id,
            PendingCall {
                generation,
                reply: tx,
            },
        );
        rx
    }

    fn remove(&self, id: u64) -> Option<PendingCall> {
        self.calls.lock().remove(&id)
    }

    /// Remove every call sent to `generation` or earlier
    fn drain_through(&self, generation: u64) -> Vec<(u64, PendingCall)> {
        let mut calls = self.calls.lock();
        let ids: Vec<u64> = calls
            .iter()
            .filter(|(_, call)| call.generation <= generation)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| calls.remove(&id).map(|call| (id, call)))
            .collect()
    }

    /// Number of calls still waiting for a response
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerListener for PendingCalls {
    fn on_message(&self, generation: u64, frame: Bytes) {
        let response: Response = match codec::decode(&frame) {
            Ok(response) => response,
            Err(e) => {
                // Id unreadable; fail every call this generation still owes
                error!(
                    "Undecodable response from worker generation {}: {}",
                    generation, e
                );
                for (id, call) in self.drain_through(generation) {
                    let _ = call.reply.send(Err(StoreError::Decode(format!(
                        "response stream corrupted before request {}: {}",
                        id, e
                    ))));
                }
                return;
            }
        };

        let id = response.id;
        let Some(call) = self.remove(id) else {
            debug!(
                "Ignoring response for unknown request id {} from worker {}",
                id, generation
            );
            return;
        };

        if let Err(Err(e)) = call.reply.send(response.into_result()) {
            warn!("Unobserved error for request {}: {}", id, e);
        }
    }

    fn on_fault(&self, generation: u64, reason: &str) {
        let orphaned = self.drain_through(generation);
        if orphaned.is_empty() {
            return;
        }

        warn!(
            "Rejecting {} in-flight calls to worker generation {} ({})",
            orphaned.len(),
            generation,
            reason
        );

        for (id, call) in orphaned {
            let _ = call.reply.send(Err(StoreError::WorkerFault(format!(
                "{} before answering request {}",
                reason, id
            ))));
        }
    }
}

/// Future resolving to the worker's answer for one async call.
///
/// The request is already on its way when this is created; dropping it only
/// discards the answer.
pub struct PendingReply {
    id: u64,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingReply {
    /// Correlation id of the request
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(StoreError::WorkerFault(format!(
                    "request {} was abandoned",
                    id
                )))
            })
        })
    }
}

/// Pipelined, id-correlated calls into the worker
pub struct AsyncBridge {
    supervisor: Arc<Supervisor>,
    pending: Arc<PendingCalls>,
}

impl AsyncBridge {
    /// Bridge over an existing supervisor whose listener is `pending`
    pub fn new(supervisor: Arc<Supervisor>, pending: Arc<PendingCalls>) -> Self {
        Self {
            supervisor,
            pending,
        }
    }

    /// Start a supervised worker over `factory` and bridge into it
    pub fn spawn(factory: Arc<dyn BackendFactory>) -> Result<Self> {
        let pending = Arc::new(PendingCalls::new());
        let supervisor = Supervisor::spawn(factory, pending.clone())?;
        Ok(Self::new(Arc::new(supervisor), pending))
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Calls sent but not answered yet
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Send a request now and return the future of its answer
    pub fn dispatch(&self, method: Method, args: Vec<Value>) -> Result<PendingReply> {
        let id = self.pending.next_id();
        let frame = codec::encode(&Request { id, method, args })?;

        let mut rx = None;
        let posted = self.supervisor.post(|generation| {
            rx = Some(self.pending.register(id, generation));
            WorkerMessage::Call(frame)
        });

        match (posted, rx) {
            (Ok(generation), Some(rx)) => {
                debug!(
                    "Dispatched {} (id={}) to worker {}",
                    method, id, generation
                );
                Ok(PendingReply { id, rx })
            }
            (Ok(_), None) => Err(StoreError::WorkerFault(format!(
                "request {} was not registered",
                id
            ))),
            (Err(e), _) => {
                self.pending.remove(id);
                Err(e)
            }
        }
    }

    /// Send a request and wait for its answer
    pub async fn call(&self, method: Method, args: Vec<Value>) -> Result<Value> {
        self.dispatch(method, args)?.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::core::{ErrorKind, WireError};
    use serde_json::json;

    #[tokio::test]
    async fn test_call_round_trip() {
        let bridge = AsyncBridge::spawn(Arc::new(MemoryBackend::new())).unwrap();

        bridge
            .call(Method::Set, vec![json!("lang"), json!("rust")])
            .await
            .unwrap();
        let value = bridge.call(Method::Get, vec![json!("lang")]).await.unwrap();
        assert_eq!(value, json!("rust"));
        assert_eq!(bridge.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_ids_increase_per_bridge() {
        let bridge = AsyncBridge::spawn(Arc::new(MemoryBackend::new())).unwrap();

        let first = bridge.dispatch(Method::Load, vec![]).unwrap();
        let second = bridge.dispatch(Method::Load, vec![]).unwrap();
        assert!(second.id() > first.id());

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap(), json!({}));
        assert_eq!(b.unwrap(), json!({}));
    }

    #[test]
    fn test_unknown_id_is_ignored() {
        let pending = PendingCalls::new();
        let mut rx = pending.register(1, 1);

        let stale = codec::encode(&Response::success(99, json!("late"))).unwrap();
        pending.on_message(1, stale);

        assert_eq!(pending.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_response_resolves_matching_call() {
        let pending = PendingCalls::new();
        let rx = pending.register(5, 1);

        let wire = WireError::new(ErrorKind::Backend, "quota exceeded");
        pending.on_message(1, codec::encode(&Response::error(5, &wire)).unwrap());

        assert!(pending.is_empty());
        match tokio_test::block_on(rx).unwrap() {
            Err(StoreError::Backend(msg)) => assert_eq!(msg, "quota exceeded"),
            other => panic!("Expected backend error, got {:?}", other),
        }
    }

    #[test]
    fn test_fault_rejects_only_dead_generation() {
        let pending = PendingCalls::new();
        let old = pending.register(1, 1);
        let current = pending.register(2, 2);

        pending.on_fault(1, "worker panicked");

        assert_eq!(pending.len(), 1);
        assert!(matches!(
            tokio_test::block_on(old).unwrap(),
            Err(StoreError::WorkerFault(_))
        ));
        drop(current);
    }

    #[test]
    fn test_corrupt_response_fails_waiting_calls() {
        let pending = PendingCalls::new();
        let first = pending.register(1, 1);
        let second = pending.register(2, 1);
        let next_generation = pending.register(3, 2);

        pending.on_message(1, Bytes::from_static(&[0xc1, 0x00]));

        assert_eq!(pending.len(), 1);
        assert!(matches!(
            tokio_test::block_on(first).unwrap(),
            Err(StoreError::Decode(_))
        ));
        assert!(matches!(
            tokio_test::block_on(second).unwrap(),
            Err(StoreError::Decode(_))
        ));
        drop(next_generation);
    }

    #[tokio::test]
    async fn test_corrupt_request_frame_fails_call_loudly() {
        let bridge = AsyncBridge::spawn(Arc::new(MemoryBackend::new())).unwrap();

        let mut rx = None;
        let generation = bridge
            .supervisor
            .post(|generation| {
                rx = Some(bridge.pending.register(1_000, generation));
                WorkerMessage::Call(Bytes::from_static(&[0xc1]))
            })
            .unwrap();
        assert_eq!(generation, 1);

        let result = rx.unwrap().await.unwrap();
        assert!(matches!(result, Err(StoreError::WorkerFault(_))));
        assert_eq!(bridge.in_flight(), 0);

        // The replacement worker serves normally
        let value = bridge.call(Method::Load, vec![]).await.unwrap();
        assert_eq!(value, json!({}));
        assert_eq!(bridge.supervisor().generation(), 2);
    }
}
