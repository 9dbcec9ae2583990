//! Push-based observable values for the player facade.
//!
//! Architecture:
//! - One writer (the crate) publishes with `set()`; any number of readers
//!   call `get()` or `subscribe()`.
//! - Each subscriber owns a bounded channel. A subscriber that falls behind
//!   loses intermediate updates rather than stalling the writer; `get()`
//!   always returns the latest value.
//! - Dropped subscriptions are pruned on the next publish.
//!
//! Consumers (renderer, GUI) only get read access: publishing is crate-private.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use log::trace;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Per-subscriber queue depth before updates are dropped
const SUBSCRIBER_QUEUE: usize = 64;

struct Inner<T> {
    value: RwLock<T>,
    subscribers: Mutex<Vec<Sender<T>>>,
    name: &'static str,
}

/// Single-writer, many-reader observable value.
///
/// Cloning yields another handle to the same value.
pub struct Observable<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: RwLock::new(value),
                subscribers: Mutex::new(Vec::new()),
                name,
            }),
        }
    }

    /// Latest published value.
    pub fn get(&self) -> T {
        self.inner.value.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Subscribe to updates. The current value is delivered first.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = bounded(SUBSCRIBER_QUEUE);
        let _ = tx.try_send(self.get());
        self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner()).push(tx);
        Subscription { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Publish unconditionally.
    pub(crate) fn set_always(&self, value: T) {
        *self.inner.value.write().unwrap_or_else(|e| e.into_inner()) = value.clone();
        self.notify(value);
    }

    fn notify(&self, value: T) {
        let mut subscribers = self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| match tx.try_send(value.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Observable '{}': subscriber queue full, update dropped", self.inner.name);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Observable<T> {
    /// Publish only if the value differs. Returns true when published.
    pub(crate) fn set_if_changed(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.write().unwrap_or_else(|e| e.into_inner());
            if *current == value {
                return false;
            }
            *current = value.clone();
        }
        self.notify(value);
        true
    }
}

impl<T: Clone + Send + Sync + std::fmt::Debug + 'static> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("name", &self.inner.name)
            .field("value", &self.get())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Observable list (e.g. the audio buckets around the playhead).
pub type ObservableList<T> = Observable<Vec<T>>;

/// Receiving end of an observable.
pub struct Subscription<T> {
    rx: Receiver<T>,
}

impl<T> Subscription<T> {
    /// Next queued update, if any.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next update.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Drain the queue, returning only the newest update.
    pub fn latest(&self) -> Option<T> {
        self.rx.try_iter().last()
    }

    /// Drain the queue, returning every update in order.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }
}
