use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type Handler<P> = Arc<dyn Fn(P) -> HandlerFuture + Send + Sync>;

/// Single-slot handler storage keyed by signal kind.
///
/// Binding a key that already has a handler replaces it; there is no fan-out.
/// Dispatched handlers run one at a time, in dispatch order, on a drain task
/// owned by the table.
pub struct HandlerTable<K, P> {
    slots: RwLock<HashMap<K, Handler<P>>>,
    queue: Mutex<Option<mpsc::UnboundedSender<HandlerFuture>>>,
}

impl<K, P> HandlerTable<K, P>
where
    K: Eq + Hash + Clone + Debug,
    P: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            queue: Mutex::new(None),
        }
    }

    /// Returns `true` when an existing handler was replaced.
    pub fn bind<F, Fut>(&self, key: K, handler: F) -> bool
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler<P> = Arc::new(move |payload| Box::pin(handler(payload)));
        self.slots.write().insert(key, handler).is_some()
    }

    pub fn unbind(&self, key: &K) -> bool {
        self.slots.write().remove(key).is_some()
    }

    pub fn is_bound(&self, key: &K) -> bool {
        self.slots.read().contains_key(key)
    }

    /// Queues the handler bound to `key`, if any. Returns whether one was
    /// found. Must be called from within a tokio runtime.
    pub fn dispatch(&self, key: &K, payload: P) -> bool {
        let handler = self.slots.read().get(key).cloned();
        match handler {
            Some(handler) => {
                self.enqueue(handler(payload));
                true
            }
            None => {
                tracing::trace!(target = "pairing", ?key, "no handler bound");
                false
            }
        }
    }
}

impl<K, P> HandlerTable<K, P> {
    fn enqueue(&self, job: HandlerFuture) {
        let mut queue = self.queue.lock();
        let job = match queue.as_ref() {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<HandlerFuture>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                // A panicking handler ends its own task, not the queue.
                if let Err(err) = tokio::spawn(job).await {
                    tracing::warn!(target = "pairing", error = %err, "signal handler aborted");
                }
            }
        });
        if tx.send(job).is_ok() {
            *queue = Some(tx);
        }
    }
}

impl<K, P> Default for HandlerTable<K, P>
where
    K: Eq + Hash + Clone + Debug,
    P: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
