//! Async Scan Controller
//!
//! Runs one engine invocation at a time on tokio's blocking pool and shares
//! its progress through lock-free [`ScanState`]:
//!
//! ```text
//! caller                         background task
//!   start(engine) ──spawn──────▶ engine(&state)
//!   poll()  ◀── done/percentage ── state (atomics)
//!   request_stop() ──────────────▶ interrupted, checked once per event
//!   poll() [done] ── join ───────▶ engine output handed back once
//! ```
//!
//! The `done` flag is raised by a drop guard, so a panicking engine still
//! completes from the caller's point of view.

use crate::scan::error::{ScanError, ScanResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Progress and control flags shared across the task boundary
#[derive(Debug, Default)]
pub struct ScanState {
    done: AtomicBool,
    interrupted: AtomicBool,
    /// `f64` bits; non-negative floats order like their bit patterns
    percentage: AtomicU64,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to `{done: false, interrupted: false, percentage: 0}`
    pub fn reset(&self) {
        self.done.store(false, Ordering::SeqCst);
        self.interrupted.store(false, Ordering::SeqCst);
        self.percentage.store(0f64.to_bits(), Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    pub fn percentage(&self) -> f64 {
        f64::from_bits(self.percentage.load(Ordering::Acquire))
    }

    /// Raise the percentage; never moves backwards within a scan
    pub fn set_percentage(&self, percentage: f64) {
        let clamped = if percentage.is_nan() {
            0.0
        } else {
            percentage.clamp(0.0, 100.0)
        };
        self.percentage.fetch_max(clamped.to_bits(), Ordering::AcqRel);
    }

    /// Report `processed` out of `total` events
    pub fn set_progress(&self, processed: u64, total: u64) {
        if total > 0 {
            self.set_percentage(100.0 * processed as f64 / total as f64);
        }
    }
}

/// Raises `done` when the engine returns or unwinds
struct DoneGuard<'a>(&'a ScanState);

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.0.mark_done();
    }
}

/// Cloneable handle for stopping and observing a scan from elsewhere
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<ScanState>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.request_stop();
    }

    pub fn is_done(&self) -> bool {
        self.0.is_done()
    }

    pub fn percentage(&self) -> f64 {
        self.0.percentage()
    }
}

/// Result of one poll
#[derive(Debug)]
pub struct Polled<T> {
    pub done: bool,
    pub percentage: f64,
    /// Engine output, present only on the poll that joined the task
    pub joined: Option<ScanResult<T>>,
}

/// Owner of the single background task of a handler
#[derive(Debug)]
pub struct ScanController<T> {
    state: Arc<ScanState>,
    worker: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> Default for ScanController<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> ScanController<T> {
    /// Idle controller; reports `done` until the first start
    pub fn new() -> Self {
        let state = ScanState::new();
        state.mark_done();
        Self {
            state: Arc::new(state),
            worker: None,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.state))
    }

    /// True while a task has been started and not yet joined
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Reset the state and launch `engine` on the blocking pool.
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// [`ScanError::Busy`] if the previous task was not joined.
    pub fn start<F>(&mut self, engine: F) -> ScanResult<()>
    where
        F: FnOnce(&ScanState) -> T + Send + 'static,
    {
        if self.worker.is_some() {
            return Err(ScanError::Busy);
        }

        self.state.reset();
        let state = Arc::clone(&self.state);
        self.worker = Some(tokio::task::spawn_blocking(move || {
            let state: &ScanState = &state;
            let _guard = DoneGuard(state);
            engine(state)
        }));
        Ok(())
    }

    pub fn request_stop(&self) {
        self.state.request_stop();
    }

    /// Current state; joins the task once it reports done.
    ///
    /// Joining only waits for an already finished task to tear down. Later
    /// polls keep returning `done` without output.
    pub async fn poll(&mut self) -> Polled<T> {
        let done = self.state.is_done();
        let percentage = self.state.percentage();

        let joined = match self.worker.take() {
            Some(worker) if done => Some(worker.await.map_err(|e| {
                tracing::error!(error = %e, "Scan task terminated abnormally");
                ScanError::SessionLost(e.to_string())
            })),
            worker => {
                self.worker = worker;
                None
            }
        };

        Polled {
            done,
            percentage,
            joined,
        }
    }
}
