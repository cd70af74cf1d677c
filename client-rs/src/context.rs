//! Single-threaded event loop context
//!
//! Bus responses never run inline with the call that produced them. A bus
//! implementation posts a [`Dispatch`] through a [`DispatchSender`] (from any
//! thread), and the thread that owns the [`MainContext`] delivers it to the
//! attached source on its next [`iteration`](MainContext::iteration).

use crate::transport::MessageToken;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::trace;

/// Identifies a dispatch source attached to a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

/// A response queued for delivery on the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub source: SourceId,
    pub token: MessageToken,
    pub payload: String,
}

/// Thread-safe handle for queueing dispatches onto a context
#[derive(Debug, Clone)]
pub struct DispatchSender {
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl DispatchSender {
    /// Queue a payload for `token` on `source`; false once the context is gone
    pub fn post(&self, source: SourceId, token: MessageToken, payload: impl Into<String>) -> bool {
        self.tx
            .send(Dispatch {
                source,
                token,
                payload: payload.into(),
            })
            .is_ok()
    }
}

type Source = Rc<RefCell<dyn FnMut(Dispatch)>>;

struct ContextInner {
    tx: mpsc::UnboundedSender<Dispatch>,
    rx: Mutex<mpsc::UnboundedReceiver<Dispatch>>,
    sources: RefCell<HashMap<SourceId, Source>>,
    next_source: Cell<u64>,
    dispatching: Cell<bool>,
}

/// Reference-counted event loop context
///
/// Clones share the same queue and sources. The context is `!Send`: it is
/// driven by the thread that created it.
#[derive(Clone)]
pub struct MainContext {
    inner: Rc<ContextInner>,
}

thread_local! {
    static THREAD_DEFAULT: MainContext = MainContext::new();
}

struct DispatchGuard<'a>(&'a Cell<bool>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl MainContext {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Rc::new(ContextInner {
                tx,
                rx: Mutex::new(rx),
                sources: RefCell::new(HashMap::new()),
                next_source: Cell::new(1),
                dispatching: Cell::new(false),
            }),
        }
    }

    /// The default context of the calling thread
    pub fn thread_default() -> Self {
        THREAD_DEFAULT.with(Clone::clone)
    }

    /// Number of live references to this context
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Whether two handles refer to the same context
    pub fn same_as(&self, other: &MainContext) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Get a sender that can queue dispatches from any thread
    pub fn sender(&self) -> DispatchSender {
        DispatchSender {
            tx: self.inner.tx.clone(),
        }
    }

    /// Attach a dispatch source; it receives every dispatch posted for its id
    pub fn add_source<F>(&self, source: F) -> SourceId
    where
        F: FnMut(Dispatch) + 'static,
    {
        let id = SourceId(self.inner.next_source.get());
        self.inner.next_source.set(id.0 + 1);
        let source: Source = Rc::new(RefCell::new(source));
        self.inner.sources.borrow_mut().insert(id, source);
        id
    }

    /// Detach a source; queued dispatches for it are dropped
    pub fn remove_source(&self, id: SourceId) -> bool {
        self.inner.sources.borrow_mut().remove(&id).is_some()
    }

    /// Number of attached sources
    pub fn source_count(&self) -> usize {
        self.inner.sources.borrow().len()
    }

    /// Deliver everything queued so far and return how many dispatches were drained
    ///
    /// Dispatches posted by callbacks during this iteration wait for the next
    /// one. Calling this from inside a callback does nothing.
    pub fn iteration(&self) -> usize {
        if self.inner.dispatching.get() {
            return 0;
        }

        let batch = {
            let Ok(mut rx) = self.inner.rx.try_lock() else {
                return 0;
            };
            let mut batch = Vec::new();
            while let Ok(dispatch) = rx.try_recv() {
                batch.push(dispatch);
            }
            batch
        };

        self.dispatch_all(batch)
    }

    /// Iterate until the queue is empty
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let n = self.iteration();
            if n == 0 {
                return total;
            }
            total += n;
        }
    }

    /// Wait for at least one dispatch and deliver everything queued
    pub async fn wait_dispatch(&self) -> usize {
        let batch = {
            let mut rx = self.inner.rx.lock().await;
            let Some(first) = rx.recv().await else {
                return 0;
            };
            let mut batch = vec![first];
            while let Ok(dispatch) = rx.try_recv() {
                batch.push(dispatch);
            }
            batch
        };

        self.dispatch_all(batch)
    }

    /// Run the loop for a fixed amount of time
    pub async fn run_for(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while tokio::time::timeout_at(deadline, self.wait_dispatch())
            .await
            .is_ok()
        {}
    }

    /// Run the loop until `done` returns true or `limit` elapses
    ///
    /// Returns whether `done` was satisfied.
    pub async fn run_until<F>(&self, limit: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + limit;
        self.iteration();
        while !done() {
            if tokio::time::timeout_at(deadline, self.wait_dispatch())
                .await
                .is_err()
            {
                return done();
            }
        }
        true
    }

    fn dispatch_all(&self, batch: Vec<Dispatch>) -> usize {
        let drained = batch.len();
        self.inner.dispatching.set(true);
        let _guard = DispatchGuard(&self.inner.dispatching);

        for dispatch in batch {
            let source = self.inner.sources.borrow().get(&dispatch.source).cloned();
            match source {
                Some(source) => {
                    let mut source = source.borrow_mut();
                    (&mut *source)(dispatch)
                }
                None => trace!(token = %dispatch.token, "Dropping dispatch for detached source"),
            }
        }

        drained
    }
}

impl Default for MainContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MainContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainContext")
            .field("ref_count", &self.ref_count())
            .field("sources", &self.source_count())
            .finish()
    }
}
