//! Background worker that owns the backend.
//!
//! A worker is one OS thread draining a channel of [`WorkerMessage`]s. Each
//! message runs to completion before the next one is taken, so the backend
//! never sees concurrent operations. Async replies and lifecycle changes go
//! back to the supervisor as [`WorkerEvent`]s; sync replies are written
//! straight into the caller's region.

pub mod dispatch;
pub mod region;
pub mod supervisor;

pub use dispatch::Dispatcher;
pub use region::SharedRegion;
pub use supervisor::{Supervisor, WorkerListener, WorkerState};

use crate::backend::BackendFactory;
use crate::protocol::{Request, Response, WorkerMessage, codec};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, error, warn};

/// Events emitted by worker threads
#[derive(Debug)]
pub enum WorkerEvent {
    /// Backend opened, requests are being served
    Ready { generation: u64 },
    /// Encoded [`Response`] for an async call
    Message { generation: u64, frame: Bytes },
    /// Thread is gone; `panicked` separates crashes from plain returns
    Exited { generation: u64, panicked: bool },
}

/// Start a worker thread for `generation`
pub(crate) fn spawn_worker(
    generation: u64,
    factory: Arc<dyn BackendFactory>,
    events: UnboundedSender<WorkerEvent>,
) -> std::io::Result<(UnboundedSender<WorkerMessage>, JoinHandle<()>)> {
    let (tx, rx) = unbounded_channel();

    let handle = thread::Builder::new()
        .name(format!("workstore-worker-{}", generation))
        .spawn(move || run(generation, factory, rx, events))?;

    Ok((tx, handle))
}

/// Reports the thread's exit, including exits by panic
struct ExitGuard {
    generation: u64,
    events: UnboundedSender<WorkerEvent>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.events.send(WorkerEvent::Exited {
            generation: self.generation,
            panicked: thread::panicking(),
        });
    }
}

fn run(
    generation: u64,
    factory: Arc<dyn BackendFactory>,
    rx: UnboundedReceiver<WorkerMessage>,
    events: UnboundedSender<WorkerEvent>,
) {
    let _guard = ExitGuard {
        generation,
        events: events.clone(),
    };

    let mut dispatcher = Dispatcher::open(factory.as_ref());
    debug!(
        "Worker {} started (backend ready: {})",
        generation,
        dispatcher.is_ready()
    );
    let _ = events.send(WorkerEvent::Ready { generation });

    // `rx` is consumed here so the channel closes before the exit event fires
    serve(generation, &mut dispatcher, rx, &events);
}

fn serve(
    generation: u64,
    dispatcher: &mut Dispatcher,
    mut rx: UnboundedReceiver<WorkerMessage>,
    events: &UnboundedSender<WorkerEvent>,
) {
    while let Some(message) = rx.blocking_recv() {
        match message {
            WorkerMessage::Call(frame) => {
                let request: Request = match codec::decode(&frame) {
                    Ok(request) => request,
                    Err(e) => {
                        error!(
                            "Worker {} received a corrupt request frame: {}",
                            generation, e
                        );
                        return;
                    }
                };

                debug!(
                    "Worker {} executing {} (id={})",
                    generation, request.method, request.id
                );

                let response = match dispatcher.execute(request.method, request.args) {
                    Ok(res) => Response::success(request.id, res),
                    Err(e) => Response::error(request.id, &e.to_wire()),
                };

                // No encodable reply: exit and let the supervisor fail the call
                let Some(frame) = reply_frame(generation, request.id, &response) else {
                    return;
                };

                if events
                    .send(WorkerEvent::Message { generation, frame })
                    .is_err()
                {
                    debug!("Worker {} lost its supervisor", generation);
                    return;
                }
            }
            WorkerMessage::Sync(mut request) => {
                debug!("Worker {} executing sync {}", generation, request.method);
                let args = std::mem::take(&mut request.args);
                let result = dispatcher
                    .execute(request.method, args)
                    .map_err(|e| e.to_wire());
                request.reply(result);
            }
            WorkerMessage::Abort => {
                warn!("Worker {} aborted", generation);
                return;
            }
        }
    }

    debug!("Worker {} channel closed", generation);
}

/// Encode `reply` for request `id`, falling back to an encoded error object.
///
/// `None` means neither could be encoded.
fn reply_frame<T: Serialize + ?Sized>(generation: u64, id: u64, reply: &T) -> Option<Bytes> {
    let e = match codec::encode(reply) {
        Ok(frame) => return Some(frame),
        Err(e) => e,
    };

    warn!("Worker {} failed to encode reply {}: {}", generation, id, e);
    match codec::encode(&Response::error(id, &e.to_wire())) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(
                "Worker {} cannot encode any reply for request {}: {}",
                generation, id, e
            );
            None
        }
    }
}
