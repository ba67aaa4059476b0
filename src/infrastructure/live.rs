//! Observable value holders.
//!
//! `LiveValue` keeps the latest value of a slot and notifies every
//! registered listener on each write. All deliveries, for every value in the
//! process, go through one queue and run one at a time in the order they
//! were staged, so listeners never race each other.
//!
//! A write stages its delivery and then drains the queue before returning.
//! If another thread is already draining, the writer waits for that drain to
//! finish. A write made from inside a listener returns at once;
//! the drain that is running delivers it after the current listener.
//!
//! `LiveStream` adapts a listener into an async sequence for consumers that
//! live on another task.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tokio::sync::mpsc;

/// Listener callback. Returning `false` unregisters it.
type Listener<T> = Box<dyn FnMut(&T) -> bool + Send>;

type Delivery = Box<dyn FnOnce() + Send>;

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct DispatchQueue {
    pending: VecDeque<(u64, Delivery)>,
    staged: u64,
    delivered: u64,
    drainer: Option<ThreadId>,
}

/// The process-wide notification context.
struct Dispatcher {
    queue: Mutex<DispatchQueue>,
    progress: Condvar,
}

static DISPATCHER: Dispatcher = Dispatcher {
    queue: Mutex::new(DispatchQueue {
        pending: VecDeque::new(),
        staged: 0,
        delivered: 0,
        drainer: None,
    }),
    progress: Condvar::new(),
};

impl Dispatcher {
    fn stage(&self, delivery: Delivery) -> u64 {
        let mut queue = lock(&self.queue);
        queue.staged += 1;
        let seq = queue.staged;
        queue.pending.push_back((seq, delivery));
        seq
    }

    /// Return once delivery `seq` and everything its listeners staged have
    /// run, draining the queue on this thread if nobody else is.
    fn flush(&self, seq: u64) {
        let me = thread::current().id();
        let mut queue = lock(&self.queue);
        loop {
            let drainer = queue.drainer;
            match drainer {
                None if queue.delivered >= seq => return,
                None => break,
                Some(drainer) if drainer == me => return,
                Some(_) => {
                    queue = self
                        .progress
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        queue.drainer = Some(me);
        drop(queue);

        let _drain = DrainGuard(self);
        loop {
            let next = lock(&self.queue).pending.pop_front();
            let Some((seq, delivery)) = next else {
                break;
            };
            if panic::catch_unwind(AssertUnwindSafe(delivery)).is_err() {
                tracing::error!(seq, "Listener panicked during delivery");
            }
            lock(&self.queue).delivered = seq;
            self.progress.notify_all();
        }
    }
}

/// Hands the drainer role back, even if a delivery unwinds.
struct DrainGuard<'a>(&'a Dispatcher);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        lock(&self.0.queue).drainer = None;
        self.0.progress.notify_all();
    }
}

/// A staged write. Its listeners have run once [`Publication::flush`]
/// returns, unless the flush happens inside a listener.
#[derive(Debug)]
pub struct Publication {
    seq: u64,
}

impl Publication {
    /// Deliver this write and every write staged before it.
    pub fn flush(self) {
        DISPATCHER.flush(self.seq);
    }
}

struct Inner<T> {
    value: Mutex<T>,
    listeners: Mutex<Vec<Listener<T>>>,
}

impl<T> Inner<T> {
    fn notify(&self, value: &T) {
        let mut running = std::mem::take(&mut *lock(&self.listeners));
        running.retain_mut(|listener| listener(value));

        let mut listeners = lock(&self.listeners);
        running.append(&mut listeners);
        *listeners = running;
    }
}

/// A shared, observable slot.
pub struct LiveValue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for LiveValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for LiveValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveValue")
            .field("value", &*lock(&self.inner.value))
            .field("listeners", &lock(&self.inner.listeners).len())
            .finish()
    }
}

impl<T: Clone + Send + 'static> LiveValue<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: Mutex::new(initial),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> T {
        lock(&self.inner.value).clone()
    }

    /// Store a value and notify every listener, even if it equals the old one.
    ///
    /// Must not be called while holding a lock that a listener may take.
    pub fn set(&self, value: T) {
        self.stage(value).flush();
    }

    /// Store a value and queue its notification without delivering it.
    ///
    /// `get` sees the value at once. Lets a caller record several writes
    /// under its own lock and deliver them after releasing it.
    pub fn stage(&self, value: T) -> Publication {
        let mut slot = lock(&self.inner.value);
        slot.clone_from(&value);

        let inner = Arc::clone(&self.inner);
        let seq = DISPATCHER.stage(Box::new(move || inner.notify(&value)));
        Publication { seq }
    }

    /// Register a listener. It is called with the current value first.
    pub fn observe<F>(&self, mut listener: F)
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        let slot = lock(&self.inner.value);
        let current = slot.clone();

        let inner = Arc::clone(&self.inner);
        let seq = DISPATCHER.stage(Box::new(move || {
            if listener(&current) {
                lock(&inner.listeners).push(Box::new(listener));
            }
        }));
        drop(slot);

        DISPATCHER.flush(seq);
    }

    /// Subscribe as an async sequence: current value, then every write.
    #[must_use]
    pub fn subscribe(&self) -> LiveStream<T> {
        let (tx, stream) = LiveStream::channel();
        self.observe(move |value| tx.send(value.clone()).is_ok());
        stream
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }
}

/// Receiving end of a subscription.
///
/// Every published value is delivered, in publication order. Dropping the
/// stream unregisters it on the next write.
#[derive(Debug)]
pub struct LiveStream<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> LiveStream<T> {
    /// A stream plus the sender that feeds it.
    pub(crate) fn channel() -> (mpsc::UnboundedSender<T>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next value. `None` once the source is gone.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next value if one is already queued.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Every value currently queued.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
