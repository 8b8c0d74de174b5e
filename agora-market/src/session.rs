//! Conversation sessions with bounded history.
//!
//! A [`ConversationSession`] groups the ordered message log of one
//! conversation with the orders proposed inside it. History is bounded
//! (default: last 20 entries) so a long-running conversation cannot grow
//! memory without limit; older entries fall off the front. Sessions are
//! created on first use and live behind per-conversation locks, same
//! discipline as the order store.

use crate::order::OrderId;
use agora::timestamp::UnixTimestamp;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// How many message entries a session keeps, unless configured.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// One message in a conversation's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEntry {
    /// Who sent the message.
    pub from: String,
    /// The message text.
    pub text: String,
    /// When the entry was recorded.
    pub at: UnixTimestamp,
}

/// The message log and linked orders of one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSession {
    /// Conversation identity.
    pub conversation_id: String,
    /// Most recent messages, oldest first, bounded by the store's limit.
    pub history: VecDeque<MessageEntry>,
    /// Orders proposed in this conversation, in proposal order.
    pub orders: Vec<OrderId>,
}

impl ConversationSession {
    fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            history: VecDeque::new(),
            orders: Vec::new(),
        }
    }
}

/// Concurrent map of conversation sessions.
#[derive(Debug)]
pub struct SessionStore {
    history_limit: usize,
    sessions: DashMap<String, Arc<RwLock<ConversationSession>>>,
}

impl SessionStore {
    /// Creates a store keeping the given number of entries per session.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            history_limit,
            sessions: DashMap::new(),
        }
    }

    /// The configured per-session history bound.
    #[must_use]
    pub const fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Appends a message to a conversation, creating the session on first
    /// use and dropping the oldest entry once the bound is reached.
    pub async fn record_message(
        &self,
        conversation_id: &str,
        from: impl Into<String>,
        text: impl Into<String>,
    ) {
        let session = self.session(conversation_id);
        let mut session = session.write().await;
        session.history.push_back(MessageEntry {
            from: from.into(),
            text: text.into(),
            at: UnixTimestamp::now(),
        });
        while session.history.len() > self.history_limit {
            session.history.pop_front();
        }
    }

    /// Associates an order with a conversation.
    pub async fn link_order(&self, conversation_id: &str, order_id: OrderId) {
        let session = self.session(conversation_id);
        let mut session = session.write().await;
        if !session.orders.contains(&order_id) {
            session.orders.push(order_id);
        }
    }

    /// The recorded history of a conversation, oldest first.
    pub async fn history(&self, conversation_id: &str) -> Vec<MessageEntry> {
        match self.sessions.get(conversation_id) {
            None => Vec::new(),
            Some(entry) => {
                let session = Arc::clone(entry.value());
                drop(entry);
                let session = session.read().await;
                session.history.iter().cloned().collect()
            }
        }
    }

    /// The orders linked to a conversation, in proposal order.
    pub async fn orders(&self, conversation_id: &str) -> Vec<OrderId> {
        match self.sessions.get(conversation_id) {
            None => Vec::new(),
            Some(entry) => {
                let session = Arc::clone(entry.value());
                drop(entry);
                let session = session.read().await;
                session.orders.clone()
            }
        }
    }

    fn session(&self, conversation_id: &str) -> Arc<RwLock<ConversationSession>> {
        let entry = self
            .sessions
            .entry(conversation_id.to_owned())
            .or_insert_with(|| Arc::new(RwLock::new(ConversationSession::new(conversation_id))));
        Arc::clone(entry.value())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
