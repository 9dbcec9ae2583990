//! One-shot futures for asynchronous IO requests
//!
//! A reader hands the caller an `IoFuture` and keeps the matching
//! `IoPromise`. The future always resolves:
//! - `Ready(value)` once the promise is set
//! - `Canceled` if the request is canceled, or if the promise is dropped
//!   without being set (e.g. the queued job was skipped by the worker pool)
//!
//! Callers poll with `try_get()` or block with a bounded `wait_timeout()`.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use super::IoError;
use crate::core::workers::Workers;

#[derive(Debug, Default)]
struct RequestState {
    canceled: AtomicBool,
}

/// Result of polling a future.
#[derive(Debug)]
pub enum FutureStatus<T> {
    Ready(T),
    Pending,
    Canceled,
}

impl<T> FutureStatus<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, FutureStatus::Pending)
    }
}

/// Producer side of a request.
#[derive(Debug)]
pub struct IoPromise<T> {
    tx: Sender<T>,
    state: Arc<RequestState>,
}

/// Consumer side of a request.
#[derive(Debug)]
pub struct IoFuture<T> {
    rx: Receiver<T>,
    state: Arc<RequestState>,
}

/// Cancels a request without owning its future.
#[derive(Debug, Clone)]
pub struct CancelHandle(Weak<RequestState>);

/// Create a connected promise/future pair.
pub fn promise<T>() -> (IoPromise<T>, IoFuture<T>) {
    let (tx, rx) = bounded(1);
    let state = Arc::new(RequestState::default());
    (
        IoPromise { tx, state: Arc::clone(&state) },
        IoFuture { rx, state },
    )
}

impl<T> IoPromise<T> {
    /// Resolve the future. Ignored if the future is gone.
    pub fn set(self, value: T) {
        let _ = self.tx.try_send(value);
    }

    /// True once the consumer canceled; work can be skipped.
    pub fn is_canceled(&self) -> bool {
        self.state.canceled.load(Ordering::Acquire)
    }
}

impl<T> IoFuture<T> {
    /// Already-resolved future.
    pub fn ready(value: T) -> Self {
        let (promise, future) = promise();
        promise.set(value);
        future
    }

    /// Already-canceled future.
    pub fn canceled() -> Self {
        let (promise, future) = promise();
        drop(promise);
        future
    }

    /// Non-blocking poll. A ready value is delivered once; later polls
    /// report `Canceled`.
    pub fn try_get(&self) -> FutureStatus<T> {
        if self.is_canceled() {
            return FutureStatus::Canceled;
        }
        match self.rx.try_recv() {
            Ok(value) => FutureStatus::Ready(value),
            Err(TryRecvError::Empty) => FutureStatus::Pending,
            Err(TryRecvError::Disconnected) => FutureStatus::Canceled,
        }
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> FutureStatus<T> {
        if self.is_canceled() {
            return FutureStatus::Canceled;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(value) => FutureStatus::Ready(value),
            Err(RecvTimeoutError::Timeout) if self.is_canceled() => FutureStatus::Canceled,
            Err(RecvTimeoutError::Timeout) => FutureStatus::Pending,
            Err(RecvTimeoutError::Disconnected) => FutureStatus::Canceled,
        }
    }

    /// Block until resolved. `None` when canceled.
    pub fn wait(self) -> Option<T> {
        if self.is_canceled() {
            return None;
        }
        self.rx.recv().ok()
    }

    pub fn cancel(&self) {
        self.state.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.state.canceled.load(Ordering::Acquire)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::downgrade(&self.state))
    }
}

impl<T, E> IoFuture<Result<T, E>>
where
    E: From<IoError>,
{
    /// Block until resolved, mapping cancellation into an error.
    pub fn wait_result(self) -> Result<T, E> {
        self.wait().unwrap_or_else(|| Err(IoError::Canceled.into()))
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        if let Some(state) = self.0.upgrade() {
            state.canceled.store(true, Ordering::Release);
        }
    }
}

/// Runs reader jobs on the shared pool under a per-reader epoch.
///
/// `cancel_all()` bumps the epoch: queued jobs are skipped and their
/// futures resolve as canceled. Jobs already running finish normally.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    workers: Option<Arc<Workers>>,
    epoch: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(workers: Arc<Workers>) -> Self {
        Self { workers: Some(workers), epoch: Arc::new(AtomicU64::new(0)) }
    }

    /// Dispatcher that runs every job on its own short-lived thread.
    pub fn detached() -> Self {
        Self { workers: None, epoch: Arc::new(AtomicU64::new(0)) }
    }

    pub fn spawn<T, F>(&self, job: F) -> IoFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (promise, future) = promise();
        let run = move || {
            if promise.is_canceled() {
                return;
            }
            promise.set(job());
        };

        match &self.workers {
            Some(workers) => {
                let expected = self.epoch.load(Ordering::Acquire);
                workers.execute_with_epoch(Arc::clone(&self.epoch), expected, run);
            }
            None => {
                // Spawn failure drops `run`, which cancels the future
                let _ = thread::Builder::new().name("tlplay-io".into()).spawn(run);
            }
        }
        future
    }

    pub fn cancel_all(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_future_delivers_once() {
        let future = IoFuture::ready(42);
        assert!(matches!(future.try_get(), FutureStatus::Ready(42)));
        assert!(matches!(future.try_get(), FutureStatus::Canceled));
    }

    #[test]
    fn test_dropped_promise_cancels() {
        let (promise, future) = promise::<i32>();
        assert!(future.try_get().is_pending());
        drop(promise);
        assert!(matches!(future.try_get(), FutureStatus::Canceled));
        assert!(future.wait().is_none());
    }

    #[test]
    fn test_cancel_handle_resolves_pending_future() {
        let (promise, future) = promise::<i32>();
        let handle = future.cancel_handle();
        handle.cancel();
        assert!(promise.is_canceled());
        assert!(matches!(future.wait_timeout(Duration::from_millis(10)), FutureStatus::Canceled));
    }

    #[test]
    fn test_dispatcher_cancel_all_never_hangs() {
        let workers = Arc::new(Workers::new(1));
        let dispatcher = Dispatcher::new(Arc::clone(&workers));

        // Occupy the only worker so later jobs stay queued
        let (started_tx, started_rx) = bounded::<()>(1);
        let (gate_tx, gate_rx) = bounded::<()>(1);
        let busy = dispatcher.spawn(move || {
            let _ = started_tx.send(());
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
            1
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let queued: Vec<_> = (0..4).map(|i| dispatcher.spawn(move || i)).collect();

        dispatcher.cancel_all();
        let _ = gate_tx.send(());

        assert!(matches!(busy.wait_timeout(Duration::from_secs(5)), FutureStatus::Ready(1)));
        for future in queued {
            assert!(matches!(future.wait_timeout(Duration::from_secs(5)), FutureStatus::Canceled));
        }
    }
}
