//! Trailing-edge flush throttle.
//!
//! The first `schedule()` of a quiet period arms a deadline one interval
//! away; later calls inside the window are absorbed. When the deadline passes
//! the callback runs once on the timer thread and the window closes.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Default)]
struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

pub struct Throttle {
    interval: Duration,
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Throttle {
    /// Create an idle throttle; nothing fires until [`Throttle::start`]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            shared: Arc::new(Shared::default()),
            timer: Mutex::new(None),
        }
    }

    /// Spawn the timer thread running `callback` on every expired window
    pub fn start<F>(&self, name: &str, callback: F) -> std::io::Result<()>
    where
        F: Fn() + Send + 'static,
    {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("workstore-flush-{}", name))
            .spawn(move || timer_loop(&shared, callback))?;

        *timer = Some(handle);
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ask for a flush. Returns true if this call opened a new window.
    pub fn schedule(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.shutdown || state.deadline.is_some() {
            return false;
        }

        state.deadline = Some(Instant::now() + self.interval);
        self.shared.wake.notify_one();
        true
    }

    /// Drop the armed window, if any. Returns true if one was pending.
    pub fn cancel(&self) -> bool {
        self.shared.state.lock().deadline.take().is_some()
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }
}

impl Drop for Throttle {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.deadline = None;
        }
        self.shared.wake.notify_all();

        if let Some(handle) = self.timer.lock().take() {
            // The last store handle may be released by the callback itself
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn timer_loop<F: Fn()>(shared: &Shared, callback: F) {
    let mut state = shared.state.lock();

    loop {
        if state.shutdown {
            break;
        }

        match state.deadline {
            None => shared.wake.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => {
                state.deadline = None;
                MutexGuard::unlocked(&mut state, &callback);
            }
            Some(deadline) => {
                shared.wake.wait_until(&mut state, deadline);
            }
        }
    }

    debug!("Flush timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(interval: Duration) -> (Throttle, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let throttle = Throttle::new(interval);
        let counter = Arc::clone(&fired);
        throttle
            .start("test", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        (throttle, fired)
    }

    #[test]
    fn test_burst_coalesces_into_one_fire() {
        let (throttle, fired) = counting(Duration::from_millis(50));

        assert!(throttle.schedule());
        for _ in 0..10 {
            assert!(!throttle.schedule());
        }
        assert!(throttle.is_pending());

        thread::sleep(Duration::from_millis(250));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!throttle.is_pending());

        // A new burst opens a new window
        assert!(throttle.schedule());
        thread::sleep(Duration::from_millis(250));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_prevents_fire() {
        let (throttle, fired) = counting(Duration::from_millis(50));

        throttle.schedule();
        assert!(throttle.cancel());
        assert!(!throttle.cancel());

        thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_stops_timer_without_firing() {
        let (throttle, fired) = counting(Duration::from_secs(60));
        throttle.schedule();
        drop(throttle);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
