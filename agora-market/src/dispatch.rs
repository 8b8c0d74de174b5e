//! Asynchronous event dispatch, ordered per conversation.
//!
//! The dispatcher is the push-style surface between whatever observes
//! marketplace events (a transport poller, the facade in
//! [`market`](crate::market)) and the handlers that react to them. Each
//! conversation gets its own worker task fed by its own channel, so
//! events within one conversation are delivered to handlers in the order
//! they were published, while a slow or failing handler on one
//! conversation never delays another. Delivery is at-least-once from the
//! consumer's point of view; handlers are expected to treat lifecycle
//! transitions as idempotent.
//!
//! Handler failures are logged and counted, never propagated into the
//! dispatch loop.

use crate::order::OrderId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The event kinds a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A conversational message arrived.
    Message,
    /// An order's payment landed in escrow.
    OrderPaid,
    /// A delivery was posted for an order.
    Delivery,
}

/// An observed marketplace event, addressed to one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// A message in the conversation.
    Message {
        /// Conversation the message belongs to.
        conversation_id: String,
        /// Who sent it.
        from: String,
        /// The message text.
        text: String,
    },
    /// Payment landed for an order proposed in the conversation.
    OrderPaid {
        /// Conversation the order belongs to.
        conversation_id: String,
        /// The paid order.
        order_id: OrderId,
        /// Escrow transaction reference.
        escrow_tx_ref: String,
    },
    /// Work was delivered for an order in the conversation.
    Delivery {
        /// Conversation the order belongs to.
        conversation_id: String,
        /// The delivered order.
        order_id: OrderId,
        /// The work product.
        result: String,
        /// Optional note from the provider.
        message: Option<String>,
    },
}

impl ConversationEvent {
    /// The kind handlers subscribe to for this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Message { .. } => EventKind::Message,
            Self::OrderPaid { .. } => EventKind::OrderPaid,
            Self::Delivery { .. } => EventKind::Delivery,
        }
    }

    /// The conversation this event is addressed to.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        match self {
            Self::Message {
                conversation_id, ..
            }
            | Self::OrderPaid {
                conversation_id, ..
            }
            | Self::Delivery {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Failure reported by a handler; logged and counted, never fatal.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Reacts to dispatched events of a subscribed kind.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one event.
    ///
    /// # Errors
    ///
    /// A returned error is logged and counted by the dispatcher; it does
    /// not stop delivery of later events.
    async fn handle(&self, event: &ConversationEvent) -> Result<(), HandlerError>;
}

#[derive(Default)]
struct Registry {
    handlers: DashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
    failures: AtomicU64,
}

impl Registry {
    async fn deliver(&self, event: &ConversationEvent) {
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .get(&event.kind())
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        for handler in handlers {
            if let Err(err) = handler.handle(event).await {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    conversation = event.conversation_id(),
                    kind = ?event.kind(),
                    error = %err,
                    "event handler failed"
                );
            }
        }
    }
}

/// Per-conversation, in-order event delivery to registered handlers.
pub struct EventDispatcher {
    registry: Arc<Registry>,
    workers: DashMap<String, mpsc::UnboundedSender<ConversationEvent>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("conversations", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Creates a dispatcher with no handlers registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            workers: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Registers a handler for one event kind.
    ///
    /// Handlers registered for the same kind run in registration order
    /// for each event.
    pub fn register(&self, kind: EventKind, handler: impl EventHandler + 'static) {
        self.registry
            .handlers
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Publishes an event to its conversation's delivery queue.
    ///
    /// Returns immediately; delivery happens on the conversation's worker
    /// task. Events published after [`Self::stop`] are dropped.
    pub fn publish(&self, event: ConversationEvent) {
        if self.shutdown.is_cancelled() {
            tracing::debug!(
                conversation = event.conversation_id(),
                "dispatcher stopped, event dropped"
            );
            return;
        }
        let sender = self.worker(event.conversation_id());
        if sender.send(event).is_err() {
            tracing::debug!("conversation worker gone, event dropped");
        }
    }

    /// How many handler invocations have failed so far.
    #[must_use]
    pub fn failed_deliveries(&self) -> u64 {
        self.registry.failures.load(Ordering::Relaxed)
    }

    /// Stops all conversation workers.
    ///
    /// Queued events may go undelivered; at-least-once redelivery on the
    /// event source side covers restart.
    pub fn stop(&self) {
        self.shutdown.cancel();
        self.workers.clear();
    }

    fn worker(&self, conversation_id: &str) -> mpsc::UnboundedSender<ConversationEvent> {
        let entry = self
            .workers
            .entry(conversation_id.to_owned())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                let registry = Arc::clone(&self.registry);
                let token = self.shutdown.child_token();
                tokio::spawn(run_worker(registry, rx, token));
                tx
            });
        entry.value().clone()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(
    registry: Arc<Registry>,
    mut rx: mpsc::UnboundedReceiver<ConversationEvent>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            event = rx.recv() => match event {
                None => break,
                Some(event) => registry.deliver(&event).await,
            },
        }
    }
}
