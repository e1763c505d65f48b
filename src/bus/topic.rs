//! One bounded stream of the bus: queue, subscribers and the dispatch loop.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error};

use crate::error::{DatabotError, Result};

/// A consumer of bus messages.
///
/// Any `Fn(T) -> impl Future<Output = Result<()>>` closure is a handler, so most
/// subscribers never implement this trait by hand.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    async fn handle(&self, msg: T) -> Result<()>;
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, msg: T) -> Result<()> {
        (self)(msg).await
    }
}

struct Subscriber<T> {
    name: String,
    handler: Arc<dyn MessageHandler<T>>,
}

/// Outcome of delivering one message to every subscriber.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: Vec<String>,
}

pub(crate) struct Topic<T> {
    name: &'static str,
    capacity: usize,
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    subscribers: RwLock<Vec<Subscriber<T>>>,
    dispatching: AtomicBool,
}

impl<T> Topic<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name,
            capacity,
            tx,
            rx: Mutex::new(rx),
            subscribers: RwLock::new(Vec::new()),
            dispatching: AtomicBool::new(false),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages currently queued.
    pub(crate) fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Wait for room in the queue; a stop while waiting fails with `BusClosed`.
    pub(crate) async fn publish(&self, msg: T, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if *shutdown.borrow() {
            return Err(DatabotError::BusClosed);
        }
        tokio::select! {
            sent = self.tx.send(msg) => sent.map_err(|_| DatabotError::BusClosed),
            _ = shutdown.wait_for(|stopped| *stopped) => Err(DatabotError::BusClosed),
        }
    }

    pub(crate) fn try_publish(&self, msg: T) -> Result<()> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => DatabotError::QueueFull(self.name),
            TrySendError::Closed(_) => DatabotError::BusClosed,
        })
    }

    /// Pull the next message directly; `None` once stopped and drained.
    pub(crate) async fn consume(&self, mut shutdown: watch::Receiver<bool>) -> Option<T> {
        let mut rx = self.rx.lock().await;
        if *shutdown.borrow() {
            return rx.try_recv().ok();
        }
        tokio::select! {
            biased;
            msg = rx.recv() => msg,
            _ = shutdown.wait_for(|stopped| *stopped) => rx.try_recv().ok(),
        }
    }

    pub(crate) fn subscribe(&self, name: &str, handler: Arc<dyn MessageHandler<T>>) {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.push(Subscriber {
            name: name.to_string(),
            handler,
        });
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .map(|s| s.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    /// Run every subscriber concurrently on `msg` and collect all outcomes.
    ///
    /// Each handler runs in its own task, so an error or a panic stays with
    /// that handler.
    pub(crate) async fn deliver(&self, msg: T) -> Delivery {
        let snapshot: Vec<(String, Arc<dyn MessageHandler<T>>)> = {
            let subs = self
                .subscribers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subs.iter()
                .map(|s| (s.name.clone(), Arc::clone(&s.handler)))
                .collect()
        };

        let (names, tasks): (Vec<String>, Vec<_>) = snapshot
            .into_iter()
            .map(|(name, handler)| {
                let msg = msg.clone();
                (name, tokio::spawn(async move { handler.handle(msg).await }))
            })
            .unzip();

        let mut delivery = Delivery::default();
        for (name, outcome) in names.into_iter().zip(join_all(tasks).await) {
            match outcome {
                Ok(Ok(())) => delivery.delivered += 1,
                Ok(Err(e)) => {
                    let err = DatabotError::Handler {
                        handler: name.clone(),
                        message: e.to_string(),
                    };
                    error!(stream = self.name, error = %err, "Bus handler failed");
                    delivery.failed.push(name);
                }
                Err(join_err) => {
                    error!(
                        stream = self.name,
                        handler = %name,
                        error = %join_err,
                        "Bus handler panicked"
                    );
                    delivery.failed.push(name);
                }
            }
        }
        delivery
    }

    /// Claim the topic for a dispatch loop. Returns `false` if one already runs.
    pub(crate) fn claim_dispatch(&self) -> bool {
        !self.dispatching.swap(true, Ordering::SeqCst)
    }

    /// Dequeue and deliver until stopped, then deliver whatever is still queued.
    pub(crate) async fn dispatch_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        debug!(stream = self.name, "Bus dispatcher started");
        loop {
            let next = {
                let mut rx = self.rx.lock().await;
                tokio::select! {
                    biased;
                    msg = rx.recv() => msg,
                    _ = shutdown.wait_for(|stopped| *stopped) => None,
                }
            };
            match next {
                Some(msg) => {
                    self.deliver(msg).await;
                }
                None => break,
            }
        }

        let remaining: Vec<T> = {
            let mut rx = self.rx.lock().await;
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        for msg in remaining {
            self.deliver(msg).await;
        }
        debug!(stream = self.name, "Bus dispatcher stopped");
    }
}
