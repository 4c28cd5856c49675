//! Worker supervision.
//!
//! The supervisor keeps exactly one worker alive per controller:
//!
//! ```text
//! Starting ──ready──> Running ──exit/panic──> Faulted ──respawn──> Starting
//!     └──────────────────┴──── terminate() ────> Terminated (final)
//! ```
//!
//! A monitor thread pumps worker events: replies are forwarded to the
//! [`WorkerListener`], exits of the current generation trigger a respawn with
//! the same backend factory unless the supervisor was terminated.

use super::{WorkerEvent, spawn_worker};
use crate::backend::BackendFactory;
use crate::core::{Result, StoreError};
use crate::protocol::WorkerMessage;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, error, info, warn};

/// Lifecycle of the supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Faulted,
    Terminated,
}

/// Receives what the worker sends back
pub trait WorkerListener: Send + Sync + 'static {
    /// An encoded async response arrived from worker `generation`
    fn on_message(&self, generation: u64, frame: Bytes);

    /// Worker `generation` is gone; anything still waiting on it will never
    /// be answered
    fn on_fault(&self, generation: u64, reason: &str);
}

struct Link {
    state: WorkerState,
    generation: u64,
    sender: Option<UnboundedSender<WorkerMessage>>,
}

struct SupervisorInner {
    factory: Arc<dyn BackendFactory>,
    events: UnboundedSender<WorkerEvent>,
    link: Mutex<Link>,
    respawns: AtomicU64,
}

/// Owns the worker thread and restarts it when it dies
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// Spawn the first worker and the monitor thread
    pub fn spawn(
        factory: Arc<dyn BackendFactory>,
        listener: Arc<dyn WorkerListener>,
    ) -> Result<Self> {
        let (events_tx, events_rx) = unbounded_channel();

        let inner = Arc::new(SupervisorInner {
            factory,
            events: events_tx,
            link: Mutex::new(Link {
                state: WorkerState::Starting,
                generation: 0,
                sender: None,
            }),
            respawns: AtomicU64::new(0),
        });

        {
            let mut link = inner.link.lock();
            inner.start_generation(&mut link)?;
        }

        let weak = Arc::downgrade(&inner);
        thread::Builder::new()
            .name("workstore-supervisor".to_string())
            .spawn(move || monitor_loop(weak, events_rx, listener))?;

        info!("Supervisor started for {}", inner.factory.describe());

        Ok(Self { inner })
    }

    /// Send a message to the live worker.
    ///
    /// `build` runs under the supervisor lock with the generation the message
    /// is delivered to, so callers can record that generation atomically.
    pub fn post<F>(&self, build: F) -> Result<u64>
    where
        F: FnOnce(u64) -> WorkerMessage,
    {
        let mut link = self.inner.link.lock();

        let state = link.state;
        match state {
            WorkerState::Terminated => return Err(StoreError::Terminated),
            WorkerState::Faulted if link.sender.is_none() => {
                // Previous respawn failed; try again on demand
                self.inner.start_generation(&mut link)?;
                self.inner.respawns.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        let generation = link.generation;
        let sender = link.sender.as_ref().ok_or_else(|| {
            StoreError::WorkerFault(format!("worker {} is not running", generation))
        })?;

        sender.send(build(generation)).map_err(|_| {
            StoreError::WorkerFault(format!("worker {} stopped accepting requests", generation))
        })?;

        Ok(generation)
    }

    /// Stop the worker for good; no respawn happens after this.
    ///
    /// Messages already queued are still processed before the worker exits.
    pub fn terminate(&self) {
        let mut link = self.inner.link.lock();
        if link.state == WorkerState::Terminated {
            return;
        }

        info!("Terminating worker generation {}", link.generation);
        link.state = WorkerState::Terminated;
        link.sender = None;
    }

    /// Make the current worker exit as if it had crashed.
    ///
    /// Queued messages are dropped; the supervisor respawns a fresh worker.
    pub fn kill_worker(&self) -> Result<u64> {
        self.post(|_| WorkerMessage::Abort)
    }

    pub fn state(&self) -> WorkerState {
        self.inner.link.lock().state
    }

    /// Generation of the current worker, starting at 1
    pub fn generation(&self) -> u64 {
        self.inner.link.lock().generation
    }

    /// Number of workers spawned to replace a dead one
    pub fn respawns(&self) -> u64 {
        self.inner.respawns.load(Ordering::Relaxed)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl SupervisorInner {
    fn start_generation(&self, link: &mut Link) -> Result<()> {
        let generation = link.generation + 1;
        let (sender, _handle) =
            spawn_worker(generation, Arc::clone(&self.factory), self.events.clone())?;

        link.generation = generation;
        link.sender = Some(sender);
        link.state = WorkerState::Starting;

        debug!("Spawned worker generation {}", generation);
        Ok(())
    }

    fn mark_running(&self, generation: u64) {
        let mut link = self.link.lock();
        if link.generation == generation && link.state == WorkerState::Starting {
            link.state = WorkerState::Running;
            debug!("Worker generation {} running", generation);
        }
    }

    fn handle_exit(&self, generation: u64, panicked: bool, listener: &dyn WorkerListener) {
        let reason = if panicked {
            "worker panicked"
        } else {
            "worker exited"
        };

        {
            let mut link = self.link.lock();

            if link.state == WorkerState::Terminated {
                debug!("Worker generation {} stopped", generation);
            } else if link.generation != generation {
                debug!("Ignoring exit of stale worker generation {}", generation);
            } else {
                if panicked {
                    error!("Worker generation {} crashed, respawning", generation);
                } else {
                    warn!(
                        "Worker generation {} exited unexpectedly, respawning",
                        generation
                    );
                }

                link.state = WorkerState::Faulted;
                link.sender = None;

                match self.start_generation(&mut link) {
                    Ok(()) => {
                        self.respawns.fetch_add(1, Ordering::Relaxed);
                        info!("Worker respawned as generation {}", link.generation);
                    }
                    Err(e) => error!("Failed to respawn worker: {}", e),
                }
            }
        }

        listener.on_fault(generation, reason);
    }
}

fn monitor_loop(
    supervisor: Weak<SupervisorInner>,
    mut events: UnboundedReceiver<WorkerEvent>,
    listener: Arc<dyn WorkerListener>,
) {
    while let Some(event) = events.blocking_recv() {
        match event {
            WorkerEvent::Message { generation, frame } => {
                listener.on_message(generation, frame)
            }
            WorkerEvent::Ready { generation } => {
                if let Some(inner) = supervisor.upgrade() {
                    inner.mark_running(generation);
                }
            }
            WorkerEvent::Exited {
                generation,
                panicked,
            } => match supervisor.upgrade() {
                Some(inner) => inner.handle_exit(generation, panicked, listener.as_ref()),
                None => listener.on_fault(generation, "supervisor dropped"),
            },
        }
    }

    debug!("Supervisor monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorder {
        faults: Mutex<Vec<u64>>,
    }

    impl WorkerListener for Recorder {
        fn on_message(&self, _generation: u64, _frame: Bytes) {}

        fn on_fault(&self, generation: u64, _reason: &str) {
            self.faults.lock().push(generation);
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_worker_reaches_running() {
        let recorder = Arc::new(Recorder::default());
        let supervisor = Supervisor::spawn(Arc::new(MemoryBackend::new()), recorder).unwrap();

        assert_eq!(supervisor.generation(), 1);
        assert!(wait_until(|| supervisor.state() == WorkerState::Running));
    }

    #[test]
    fn test_killed_worker_is_replaced() {
        let recorder = Arc::new(Recorder::default());
        let supervisor =
            Supervisor::spawn(Arc::new(MemoryBackend::new()), recorder.clone()).unwrap();

        assert_eq!(supervisor.kill_worker().unwrap(), 1);
        assert!(wait_until(|| supervisor.generation() == 2));
        assert!(wait_until(|| supervisor.state() == WorkerState::Running));
        assert_eq!(supervisor.respawns(), 1);
        assert!(wait_until(|| recorder.faults.lock().contains(&1)));
    }

    #[test]
    fn test_terminate_is_final() {
        let recorder = Arc::new(Recorder::default());
        let supervisor = Supervisor::spawn(Arc::new(MemoryBackend::new()), recorder).unwrap();

        supervisor.terminate();
        supervisor.terminate();
        assert_eq!(supervisor.state(), WorkerState::Terminated);
        assert!(matches!(
            supervisor.post(|_| WorkerMessage::Abort),
            Err(StoreError::Terminated)
        ));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(supervisor.generation(), 1);
        assert_eq!(supervisor.respawns(), 0);
    }
}
