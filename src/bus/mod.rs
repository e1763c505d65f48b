//! Message Bus Module
//!
//! The `MessageBus` decouples channel adapters from the agent loop. It carries
//! three bounded streams:
//!
//! ```text
//! ┌─────────────┐  inbound   ┌─────────────┐  consume   ┌─────────────┐
//! │   Channel   │──────────> │  MessageBus │──────────> │ Agent Loop  │
//! │  (gateway)  │            │             │            │             │
//! └─────────────┘            │             │ <──────────└─────────────┘
//!        ▲                   │             │  outbound / stream
//!        │   fan-out         │             │
//!        └───────────────────│ dispatchers │───> metrics, loggers, ...
//!                            └─────────────┘
//! ```
//!
//! Publishing to a full queue waits (`publish_*`) or fails with
//! [`DatabotError::QueueFull`](crate::error::DatabotError::QueueFull)
//! (`try_publish_*`). A stream with subscribers is drained by a dispatcher task
//! started with [`MessageBus::start`]; every subscriber runs concurrently for each
//! message and a failing subscriber never affects its siblings. A stream without
//! subscribers is pulled directly with `consume_*`.
//!
//! # Example
//!
//! ```
//! use databot::bus::{MessageBus, InboundMessage};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = MessageBus::new();
//!
//!     let msg = InboundMessage::new("api", "user123", "chat456", "Hello");
//!     bus.publish_inbound(msg).await.unwrap();
//!     assert_eq!(bus.inbound_size(), 1);
//!
//!     if let Some(received) = bus.consume_inbound().await {
//!         println!("Received: {}", received.content);
//!     }
//! }
//! ```

pub mod message;
mod topic;

pub use message::{InboundMessage, OutboundMessage, ReplyStatus, StreamEvent, StreamEventKind};
pub use topic::{Delivery, MessageHandler};

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::Result;
use topic::Topic;

/// Default capacity of each bus queue
pub const DEFAULT_CAPACITY: usize = 1000;

/// The central message bus for routing messages between channels and agents.
///
/// Cloning is cheap; clones share the same queues and subscribers.
#[derive(Clone)]
pub struct MessageBus {
    inbound: Arc<Topic<InboundMessage>>,
    outbound: Arc<Topic<OutboundMessage>>,
    stream: Arc<Topic<StreamEvent>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    dispatchers: Arc<std::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl MessageBus {
    /// Creates a new `MessageBus` with the default capacity (1000 per queue).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a new `MessageBus` whose three queues each hold `capacity` messages.
    ///
    /// A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inbound: Arc::new(Topic::new("inbound", capacity)),
            outbound: Arc::new(Topic::new("outbound", capacity)),
            stream: Arc::new(Topic::new("stream", capacity)),
            shutdown_tx: Arc::new(shutdown_tx),
            dispatchers: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Configured capacity of each queue.
    pub fn capacity(&self) -> usize {
        self.inbound.capacity()
    }

    /// `true` once [`stop`](Self::stop) has been called.
    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    /// Publishes an inbound message, waiting while the queue is full.
    ///
    /// # Errors
    /// Returns `DatabotError::BusClosed` once the bus is stopped.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        self.inbound.publish(msg, self.shutdown_rx()).await
    }

    /// Publishes an outbound message, waiting while the queue is full.
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> Result<()> {
        self.outbound.publish(msg, self.shutdown_rx()).await
    }

    /// Publishes a stream event, waiting while the queue is full.
    pub async fn publish_stream(&self, event: StreamEvent) -> Result<()> {
        self.stream.publish(event, self.shutdown_rx()).await
    }

    /// Publishes an inbound message without waiting.
    ///
    /// # Errors
    /// `DatabotError::QueueFull("inbound")` when at capacity,
    /// `DatabotError::BusClosed` once stopped.
    pub fn try_publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        self.ensure_open()?;
        self.inbound.try_publish(msg)
    }

    /// Publishes an outbound message without waiting.
    pub fn try_publish_outbound(&self, msg: OutboundMessage) -> Result<()> {
        self.ensure_open()?;
        self.outbound.try_publish(msg)
    }

    /// Publishes a stream event without waiting.
    pub fn try_publish_stream(&self, event: StreamEvent) -> Result<()> {
        self.ensure_open()?;
        self.stream.try_publish(event)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(crate::error::DatabotError::BusClosed)
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Direct consumption
    // ------------------------------------------------------------------

    /// Consumes the next inbound message.
    ///
    /// Returns `None` once the bus is stopped and the queue is drained.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.inbound.consume(self.shutdown_rx()).await
    }

    /// Consumes the next outbound message (for streams without subscribers).
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        self.outbound.consume(self.shutdown_rx()).await
    }

    /// Consumes the next stream event (for streams without subscribers).
    pub async fn consume_stream(&self) -> Option<StreamEvent> {
        self.stream.consume(self.shutdown_rx()).await
    }

    // ------------------------------------------------------------------
    // Subscription and dispatch
    // ------------------------------------------------------------------

    /// Register an additional handler for inbound messages.
    pub fn subscribe_inbound<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inbound.subscribe(name, Arc::new(handler));
    }

    /// Register an additional handler for outbound messages.
    ///
    /// # Example
    /// ```
    /// use databot::bus::{MessageBus, OutboundMessage};
    ///
    /// let bus = MessageBus::new();
    /// bus.subscribe_outbound("printer", |msg: OutboundMessage| async move {
    ///     println!("{}: {}", msg.chat_id, msg.content);
    ///     Ok(())
    /// });
    /// ```
    pub fn subscribe_outbound<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(OutboundMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.outbound.subscribe(name, Arc::new(handler));
    }

    /// Register an additional handler for stream events.
    pub fn subscribe_stream<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(StreamEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.stream.subscribe(name, Arc::new(handler));
    }

    /// Start a dispatcher for every stream that has subscribers.
    ///
    /// Calling `start` again picks up streams that gained their first subscriber
    /// since the last call. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut handles = self
            .dispatchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.inbound.subscriber_count() > 0 && self.inbound.claim_dispatch() {
            handles.push(tokio::spawn(
                Arc::clone(&self.inbound).dispatch_loop(self.shutdown_rx()),
            ));
        }
        if self.outbound.subscriber_count() > 0 && self.outbound.claim_dispatch() {
            handles.push(tokio::spawn(
                Arc::clone(&self.outbound).dispatch_loop(self.shutdown_rx()),
            ));
        }
        if self.stream.subscriber_count() > 0 && self.stream.claim_dispatch() {
            handles.push(tokio::spawn(
                Arc::clone(&self.stream).dispatch_loop(self.shutdown_rx()),
            ));
        }
        info!(dispatchers = handles.len(), "Message bus started");
    }

    /// Stop the bus.
    ///
    /// New publishes fail with `BusClosed` (including publishers currently waiting
    /// for capacity). Dispatchers deliver what is already queued, let in-flight
    /// handlers finish, and exit; this call returns once they have. Idempotent.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self
                .dispatchers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.drain(..).collect()
        };
        join_all(handles).await;
        info!("Message bus stopped");
    }

    // ------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------

    /// Point-in-time depth of the inbound queue.
    pub fn inbound_size(&self) -> usize {
        self.inbound.len()
    }

    /// Point-in-time depth of the outbound queue.
    pub fn outbound_size(&self) -> usize {
        self.outbound.len()
    }

    /// Point-in-time depth of the stream queue.
    pub fn stream_size(&self) -> usize {
        self.stream.len()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabotError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_inbound_publish_consume() {
        let bus = MessageBus::new();
        let msg = InboundMessage::new("api", "user1", "chat1", "Hello");
        bus.publish_inbound(msg).await.unwrap();

        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.chat_id, "chat1");
        assert_eq!(received.content, "Hello");
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let bus = MessageBus::new();
        for i in 0..5 {
            let msg = InboundMessage::new("api", "u", "c", &format!("m{}", i));
            bus.publish_inbound(msg).await.unwrap();
        }
        for i in 0..5 {
            let got = bus.consume_inbound().await.unwrap();
            assert_eq!(got.content, format!("m{}", i));
        }
    }

    #[tokio::test]
    async fn test_try_publish_full_queue_returns_queue_full() {
        let bus = MessageBus::with_capacity(2);
        bus.try_publish_outbound(OutboundMessage::new("api", "c", "1"))
            .unwrap();
        bus.try_publish_outbound(OutboundMessage::new("api", "c", "2"))
            .unwrap();

        let err = bus
            .try_publish_outbound(OutboundMessage::new("api", "c", "3"))
            .unwrap_err();
        assert!(matches!(err, DatabotError::QueueFull("outbound")));
        assert_eq!(bus.outbound_size(), 2);
    }

    #[tokio::test]
    async fn test_blocking_publish_waits_for_room() {
        let bus = MessageBus::with_capacity(1);
        bus.publish_inbound(InboundMessage::new("api", "u", "c", "first"))
            .await
            .unwrap();

        // Second publish cannot complete while the queue is full.
        let blocked = timeout(
            Duration::from_millis(50),
            bus.publish_inbound(InboundMessage::new("api", "u", "c", "second")),
        )
        .await;
        assert!(blocked.is_err());
        assert_eq!(bus.inbound_size(), 1);

        let producer = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.publish_inbound(InboundMessage::new("api", "u", "c", "third"))
                    .await
            })
        };
        assert_eq!(bus.consume_inbound().await.unwrap().content, "first");
        producer.await.unwrap().unwrap();
        assert_eq!(bus.consume_inbound().await.unwrap().content, "third");
    }

    #[tokio::test]
    async fn test_sizes_report_depth() {
        let bus = MessageBus::with_capacity(10);
        assert_eq!(bus.capacity(), 10);
        bus.publish_stream(StreamEvent::delta("api", "c", "a"))
            .await
            .unwrap();
        bus.publish_stream(StreamEvent::delta("api", "c", "b"))
            .await
            .unwrap();
        assert_eq!(bus.stream_size(), 2);
        assert_eq!(bus.inbound_size(), 0);
        assert_eq!(bus.outbound_size(), 0);
    }

    #[tokio::test]
    async fn test_all_handlers_invoked_despite_failure() {
        let bus = MessageBus::new();
        let ok_count = Arc::new(AtomicUsize::new(0));

        bus.subscribe_outbound("failing", |_msg: OutboundMessage| async move {
            Err(DatabotError::Tool("handler exploded".into()))
        });
        for name in ["a", "b"] {
            let counter = Arc::clone(&ok_count);
            bus.subscribe_outbound(name, move |_msg: OutboundMessage| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }
        bus.start();

        for i in 0..3 {
            bus.publish_outbound(OutboundMessage::new("api", "c", &i.to_string()))
                .await
                .unwrap();
        }
        bus.stop().await;

        assert_eq!(ok_count.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let bus = MessageBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        bus.subscribe_stream("panics", |_ev: StreamEvent| async move {
            if true {
                panic!("handler bug");
            }
            Ok(())
        });
        let counter = Arc::clone(&seen);
        bus.subscribe_stream("counts", move |_ev: StreamEvent| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        bus.start();

        bus.publish_stream(StreamEvent::delta("api", "c", "x"))
            .await
            .unwrap();
        bus.publish_stream(StreamEvent::done("api", "c", "x"))
            .await
            .unwrap();
        bus.stop().await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handlers_run_concurrently() {
        let bus = MessageBus::new();
        let fast_done = Arc::new(AtomicUsize::new(0));

        // The slow handler only finishes after the fast one has run, which is
        // impossible if handlers were invoked one after another.
        let observed = Arc::clone(&fast_done);
        bus.subscribe_outbound("slow", move |_msg: OutboundMessage| {
            let observed = Arc::clone(&observed);
            async move {
                for _ in 0..100 {
                    if observed.load(Ordering::SeqCst) > 0 {
                        return Ok(());
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Err(DatabotError::Tool("fast handler never ran".into()))
            }
        });
        let flag = Arc::clone(&fast_done);
        bus.subscribe_outbound("fast", move |_msg: OutboundMessage| {
            let flag = Arc::clone(&flag);
            async move {
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let delivery = bus
            .outbound
            .deliver(OutboundMessage::new("api", "c", "hi"))
            .await;
        assert_eq!(delivery.delivered, 2);
        assert!(delivery.failed.is_empty());
    }

    #[tokio::test]
    async fn test_delivery_reports_failed_handler() {
        let bus = MessageBus::new();
        bus.subscribe_inbound("bad", |_m: InboundMessage| async move {
            Err(DatabotError::Tool("nope".into()))
        });
        bus.subscribe_inbound("good", |_m: InboundMessage| async move { Ok(()) });

        let delivery = bus
            .inbound
            .deliver(InboundMessage::new("api", "u", "c", "x"))
            .await;
        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.failed, vec!["bad".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_events_delivered_in_order() {
        let bus = MessageBus::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        bus.subscribe_stream("collector", move |ev: StreamEvent| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(ev.kind.name().to_string());
                Ok(())
            }
        });
        bus.start();

        bus.publish_stream(StreamEvent::delta("api", "c", "a"))
            .await
            .unwrap();
        bus.publish_stream(StreamEvent::delta("api", "c", "b"))
            .await
            .unwrap();
        bus.publish_stream(StreamEvent::done("api", "c", "ab"))
            .await
            .unwrap();
        bus.stop().await;

        assert_eq!(*log.lock().unwrap(), vec!["delta", "delta", "done"]);
    }

    #[tokio::test]
    async fn test_stop_refuses_new_publishes() {
        let bus = MessageBus::new();
        bus.stop().await;
        assert!(bus.is_closed());

        let err = bus
            .publish_inbound(InboundMessage::new("api", "u", "c", "late"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabotError::BusClosed));

        let err = bus
            .try_publish_outbound(OutboundMessage::new("api", "c", "late"))
            .unwrap_err();
        assert!(matches!(err, DatabotError::BusClosed));
    }

    #[tokio::test]
    async fn test_stop_releases_blocked_publisher() {
        let bus = MessageBus::with_capacity(1);
        bus.publish_outbound(OutboundMessage::new("api", "c", "fill"))
            .await
            .unwrap();

        let waiting = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.publish_outbound(OutboundMessage::new("api", "c", "blocked"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.stop().await;

        let result = timeout(Duration::from_secs(1), waiting)
            .await
            .expect("publisher should be released")
            .unwrap();
        assert!(matches!(result, Err(DatabotError::BusClosed)));
    }

    #[tokio::test]
    async fn test_consume_returns_none_after_stop_and_drain() {
        let bus = MessageBus::new();
        bus.publish_inbound(InboundMessage::new("api", "u", "c", "queued"))
            .await
            .unwrap();
        bus.stop().await;

        assert_eq!(bus.consume_inbound().await.unwrap().content, "queued");
        assert!(bus.consume_inbound().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_handler() {
        let bus = MessageBus::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&finished);
        bus.subscribe_outbound("slow", move |_m: OutboundMessage| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        bus.start();
        bus.publish_outbound(OutboundMessage::new("api", "c", "x"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.stop().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bus_clone_shares_queues() {
        let bus1 = MessageBus::new();
        let bus2 = bus1.clone();
        bus1.publish_inbound(InboundMessage::new("api", "u", "c", "shared"))
            .await
            .unwrap();
        assert_eq!(bus2.consume_inbound().await.unwrap().content, "shared");
    }
}
