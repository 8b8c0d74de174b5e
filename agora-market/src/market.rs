//! The marketplace facade.
//!
//! [`Marketplace`] wires the order store, the conversation sessions, and
//! the event dispatcher into the surface providers and consumers actually
//! use: propose an order in a conversation, record its payment, post the
//! delivery, take the review. Every lifecycle operation goes through the
//! state machine's idempotent `apply`, and an event is announced on the
//! dispatcher only when the transition actually applied — a duplicate
//! payment notification changes nothing and announces nothing, so
//! delivery work is never re-triggered.

use crate::dispatch::{ConversationEvent, EventDispatcher};
use crate::order::{Order, OrderEvent, OrderId, OrderState, Transition};
use crate::session::{MessageEntry, SessionStore};
use crate::store::{OrderStore, UnknownOrderError};
use agora::amount::Price;
use dashmap::DashMap;

/// Order lifecycle, conversations, and event dispatch behind one facade.
#[derive(Debug, Default)]
pub struct Marketplace {
    orders: OrderStore,
    sessions: SessionStore,
    dispatcher: EventDispatcher,
    conversation_of: DashMap<OrderId, String>,
}

impl Marketplace {
    /// Creates an empty marketplace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The dispatcher to register event handlers on.
    #[must_use]
    pub const fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Records a conversational message and announces it.
    pub async fn record_message(
        &self,
        conversation_id: &str,
        from: impl Into<String>,
        text: impl Into<String>,
    ) {
        let from = from.into();
        let text = text.into();
        self.sessions
            .record_message(conversation_id, from.clone(), text.clone())
            .await;
        self.dispatcher.publish(ConversationEvent::Message {
            conversation_id: conversation_id.to_owned(),
            from,
            text,
        });
    }

    /// Proposes an order in a conversation.
    ///
    /// The order starts in `Proposed` and is linked to the conversation;
    /// nothing is announced until payment lands.
    pub async fn propose_order(
        &self,
        conversation_id: &str,
        description: impl Into<String>,
        price: Price,
        delivery_time_minutes: u32,
    ) -> OrderId {
        let id = OrderId::generate();
        let order = Order::proposed(id.clone(), description, price, delivery_time_minutes);
        tracing::info!(
            order = %id,
            conversation = conversation_id,
            price = %order.price,
            "order proposed"
        );
        self.orders.insert(order);
        self.sessions.link_order(conversation_id, id.clone()).await;
        self.conversation_of
            .insert(id.clone(), conversation_id.to_owned());
        id
    }

    /// Records an escrow payment for an order.
    ///
    /// Announces `orderPaid` only when the transition applied; a
    /// duplicate notification is an idempotent no-op and stays silent.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownOrderError`] if no order has this id.
    pub async fn record_payment(
        &self,
        order_id: &OrderId,
        escrow_tx_ref: impl Into<String>,
    ) -> Result<Transition, UnknownOrderError> {
        let escrow_tx_ref = escrow_tx_ref.into();
        let transition = self
            .orders
            .apply(
                order_id,
                OrderEvent::Paid {
                    escrow_tx_ref: escrow_tx_ref.clone(),
                },
            )
            .await?;
        if transition.applied() {
            self.announce(order_id, |conversation_id| ConversationEvent::OrderPaid {
                conversation_id,
                order_id: order_id.clone(),
                escrow_tx_ref,
            });
        }
        Ok(transition)
    }

    /// Posts the completed work for a paid order.
    ///
    /// Announces `delivery` only when the transition applied.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownOrderError`] if no order has this id.
    pub async fn post_delivery(
        &self,
        order_id: &OrderId,
        result: impl Into<String>,
        message: Option<String>,
    ) -> Result<Transition, UnknownOrderError> {
        let result = result.into();
        let transition = self
            .orders
            .apply(
                order_id,
                OrderEvent::Delivered {
                    result: result.clone(),
                    message: message.clone(),
                },
            )
            .await?;
        if transition.applied() {
            self.announce(order_id, |conversation_id| ConversationEvent::Delivery {
                conversation_id,
                order_id: order_id.clone(),
                result,
                message,
            });
        }
        Ok(transition)
    }

    /// Submits the consumer's review for a delivered order.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownOrderError`] if no order has this id.
    pub async fn submit_review(
        &self,
        order_id: &OrderId,
        rating: u8,
        comment: impl Into<String>,
    ) -> Result<Transition, UnknownOrderError> {
        self.orders
            .apply(
                order_id,
                OrderEvent::Reviewed {
                    rating,
                    comment: comment.into(),
                },
            )
            .await
    }

    /// Fails an order with a reason (decline or unrecoverable error).
    ///
    /// # Errors
    ///
    /// Returns [`UnknownOrderError`] if no order has this id.
    pub async fn fail_order(
        &self,
        order_id: &OrderId,
        reason: impl Into<String>,
    ) -> Result<Transition, UnknownOrderError> {
        self.orders
            .apply(
                order_id,
                OrderEvent::Failed {
                    reason: reason.into(),
                },
            )
            .await
    }

    /// A point-in-time copy of an order.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownOrderError`] if no order has this id.
    pub async fn order_snapshot(&self, order_id: &OrderId) -> Result<Order, UnknownOrderError> {
        self.orders.snapshot(order_id).await
    }

    /// An order's current lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownOrderError`] if no order has this id.
    pub async fn order_state(&self, order_id: &OrderId) -> Result<OrderState, UnknownOrderError> {
        self.orders.state(order_id).await
    }

    /// The recorded history of a conversation, oldest first.
    pub async fn conversation_history(&self, conversation_id: &str) -> Vec<MessageEntry> {
        self.sessions.history(conversation_id).await
    }

    /// The orders proposed in a conversation, in proposal order.
    pub async fn conversation_orders(&self, conversation_id: &str) -> Vec<OrderId> {
        self.sessions.orders(conversation_id).await
    }

    /// Stops event delivery.
    pub fn stop(&self) {
        self.dispatcher.stop();
    }

    fn announce(&self, order_id: &OrderId, event: impl FnOnce(String) -> ConversationEvent) {
        match self.conversation_of.get(order_id) {
            Some(entry) => self.dispatcher.publish(event(entry.value().clone())),
            None => {
                tracing::debug!(order = %order_id, "order has no conversation, nothing announced");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{EventHandler, EventKind, HandlerError};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Forward {
        tx: mpsc::UnboundedSender<ConversationEvent>,
    }

    #[async_trait]
    impl EventHandler for Forward {
        async fn handle(&self, event: &ConversationEvent) -> Result<(), HandlerError> {
            self.tx.send(event.clone())?;
            Ok(())
        }
    }

    fn price(s: &str) -> Price {
        s.parse().unwrap()
    }

    fn watch(market: &Marketplace, kind: EventKind) -> mpsc::UnboundedReceiver<ConversationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        market.dispatcher().register(kind, Forward { tx });
        rx
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<ConversationEvent>) -> ConversationEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event not announced")
            .expect("dispatcher gone")
    }

    async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<ConversationEvent>) {
        assert!(
            timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
            "unexpected event announced"
        );
    }

    #[tokio::test]
    async fn runs_an_order_from_proposal_to_review() {
        let market = Marketplace::new();
        let mut paid_rx = watch(&market, EventKind::OrderPaid);
        let mut delivery_rx = watch(&market, EventKind::Delivery);

        market
            .record_message("conv-1", "customer", "Translate 'Hello world' to French")
            .await;
        let order_id = market
            .propose_order("conv-1", "Translate 3 words to French", price("0.10"), 5)
            .await;
        assert_eq!(
            market.order_state(&order_id).await.unwrap(),
            OrderState::Proposed
        );

        let transition = market.record_payment(&order_id, "escrow-1").await.unwrap();
        assert!(transition.applied());
        let ConversationEvent::OrderPaid {
            conversation_id,
            escrow_tx_ref,
            ..
        } = recv(&mut paid_rx).await
        else {
            panic!("expected an orderPaid event");
        };
        assert_eq!(conversation_id, "conv-1");
        assert_eq!(escrow_tx_ref, "escrow-1");

        market
            .post_delivery(&order_id, "Bonjour le monde", Some("done".to_owned()))
            .await
            .unwrap();
        let ConversationEvent::Delivery { result, .. } = recv(&mut delivery_rx).await else {
            panic!("expected a delivery event");
        };
        assert_eq!(result, "Bonjour le monde");

        market.submit_review(&order_id, 5, "merci").await.unwrap();

        let order = market.order_snapshot(&order_id).await.unwrap();
        assert_eq!(order.state, OrderState::Reviewed);
        assert_eq!(order.escrow_tx_ref.as_deref(), Some("escrow-1"));
        assert_eq!(order.review_rating, Some(5));
        assert_eq!(market.conversation_orders("conv-1").await, vec![order_id]);
        assert_eq!(market.conversation_history("conv-1").await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_payment_stays_silent_and_unchanged() {
        let market = Marketplace::new();
        let mut paid_rx = watch(&market, EventKind::OrderPaid);

        let order_id = market
            .propose_order("conv-1", "work", price("0.10"), 5)
            .await;
        assert!(
            market
                .record_payment(&order_id, "escrow-1")
                .await
                .unwrap()
                .applied()
        );
        recv(&mut paid_rx).await;

        let duplicate = market.record_payment(&order_id, "escrow-2").await.unwrap();
        assert!(!duplicate.applied());
        assert_silent(&mut paid_rx).await;

        let order = market.order_snapshot(&order_id).await.unwrap();
        assert_eq!(order.escrow_tx_ref.as_deref(), Some("escrow-1"));
        assert_eq!(order.state, OrderState::Paid);
    }

    #[tokio::test]
    async fn declined_orders_fail_with_a_reason() {
        let market = Marketplace::new();
        let order_id = market
            .propose_order("conv-1", "work", price("0.20"), 5)
            .await;

        let transition = market
            .fail_order(&order_id, "Price exceeds budget")
            .await
            .unwrap();
        assert!(transition.applied());

        let order = market.order_snapshot(&order_id).await.unwrap();
        assert_eq!(order.state, OrderState::Failed);
        assert_eq!(order.failure_reason.as_deref(), Some("Price exceeds budget"));

        // Terminal: a late payment notification is a no-op.
        let late = market.record_payment(&order_id, "escrow-1").await.unwrap();
        assert!(!late.applied());
    }

    #[tokio::test]
    async fn unknown_orders_are_reported() {
        let market = Marketplace::new();
        let missing = OrderId::new("order-missing");
        assert!(market.record_payment(&missing, "escrow-1").await.is_err());
        assert!(market.order_snapshot(&missing).await.is_err());
    }

    #[tokio::test]
    async fn messages_are_announced_and_recorded() {
        let market = Marketplace::new();
        let mut message_rx = watch(&market, EventKind::Message);

        market.record_message("conv-1", "customer", "hello").await;

        let ConversationEvent::Message { from, text, .. } = recv(&mut message_rx).await else {
            panic!("expected a message event");
        };
        assert_eq!(from, "customer");
        assert_eq!(text, "hello");
        assert_eq!(market.conversation_history("conv-1").await.len(), 1);
    }
}
