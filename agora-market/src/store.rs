//! Per-order serialized storage.
//!
//! Each order lives behind its own `RwLock`, held in a sharded map, so
//! transition attempts on one `orderId` serialize (single writer at a
//! time, applied in arrival order) while different orders proceed
//! concurrently. There is no lock over the whole set. Reads clone a
//! snapshot under the read lock and never block writers for longer than
//! the copy.

use crate::order::{Order, OrderEvent, OrderId, OrderState, Transition};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A lifecycle operation named an order the store does not hold.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order `{0}`")]
pub struct UnknownOrderError(
    /// The id that was not found.
    pub OrderId,
);

/// Concurrent map of orders with per-order write serialization.
#[derive(Debug, Default)]
pub struct OrderStore {
    orders: DashMap<OrderId, Arc<RwLock<Order>>>,
}

impl OrderStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an order, replacing any previous order with the same id.
    pub fn insert(&self, order: Order) {
        self.orders
            .insert(order.id.clone(), Arc::new(RwLock::new(order)));
    }

    /// Whether the store holds the given order.
    #[must_use]
    pub fn contains(&self, id: &OrderId) -> bool {
        self.orders.contains_key(id)
    }

    /// Applies a lifecycle event to an order.
    ///
    /// Attempts on the same order serialize on its write lock; the event
    /// either advances the order or is reported as an idempotent no-op,
    /// exactly as [`Order::apply`] decides.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownOrderError`] if no order has this id.
    pub async fn apply(
        &self,
        id: &OrderId,
        event: OrderEvent,
    ) -> Result<Transition, UnknownOrderError> {
        let slot = self.slot(id)?;
        let mut order = slot.write().await;
        Ok(order.apply(event))
    }

    /// A point-in-time copy of an order.
    pub async fn snapshot(&self, id: &OrderId) -> Result<Order, UnknownOrderError> {
        let slot = self.slot(id)?;
        let order = slot.read().await;
        Ok(order.clone())
    }

    /// An order's current lifecycle state.
    pub async fn state(&self, id: &OrderId) -> Result<OrderState, UnknownOrderError> {
        let slot = self.slot(id)?;
        let order = slot.read().await;
        Ok(order.state)
    }

    fn slot(&self, id: &OrderId) -> Result<Arc<RwLock<Order>>, UnknownOrderError> {
        self.orders
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| UnknownOrderError(id.clone()))
    }
}
