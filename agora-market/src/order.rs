//! The order lifecycle state machine.
//!
//! An [`Order`] is one purchasable unit of work. Its state only ever moves
//! forward: `Proposed → Paid → Delivered → Reviewed`, with `Failed`
//! absorbing declines and unrecoverable errors from `Proposed` or `Paid`.
//! `Reviewed` and `Failed` are terminal.
//!
//! Events arrive over an at-least-once notification surface and possibly
//! out of order, so [`Order::apply`] is idempotent by construction: an
//! event that is not applicable in the current state is reported as
//! [`Transition::Ignored`] and changes nothing. A duplicate payment
//! notification, for instance, leaves the recorded escrow reference
//! untouched.

use agora::amount::Price;
use rand::RngExt;
use rand::rng;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::time::SystemTime;

/// Lowest rating a review can carry.
pub const MIN_RATING: u8 = 1;

/// Highest rating a review can carry.
pub const MAX_RATING: u8 = 5;

/// Opaque order identity, unique within a marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Wraps a caller-supplied identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh identifier: `order_<unix seconds>_<suffix>`.
    ///
    /// The wall-clock prefix keeps ids roughly sortable; the random
    /// suffix keeps ids generated in the same second apart.
    #[must_use]
    pub fn generate() -> Self {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        let suffix: u32 = rng().random();
        Self(format!("order_{secs}_{suffix:08x}"))
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Where an order stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderState {
    /// Proposed by the provider, awaiting payment.
    Proposed,
    /// Paid into escrow, work in progress.
    Paid,
    /// Work delivered, awaiting review.
    Delivered,
    /// Reviewed by the consumer. Terminal.
    Reviewed,
    /// Declined or irrecoverably broken. Terminal.
    Failed,
}

impl OrderState {
    /// Whether no transition leaves this state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Reviewed | Self::Failed)
    }
}

/// A lifecycle event applied to an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    /// Payment landed in escrow.
    Paid {
        /// Escrow transaction reference from the settlement.
        escrow_tx_ref: String,
    },
    /// The underlying work completed.
    Delivered {
        /// The work product.
        result: String,
        /// Optional note from the provider to the consumer.
        message: Option<String>,
    },
    /// The consumer rated the delivery.
    Reviewed {
        /// Rating; values outside 1–5 are clamped, not rejected.
        rating: u8,
        /// Free-form review comment.
        comment: String,
    },
    /// Explicit decline or unrecoverable error.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

/// Outcome of applying an event to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The event advanced the order.
    Applied {
        /// State before the event.
        from: OrderState,
        /// State after the event.
        to: OrderState,
    },
    /// The event was not applicable in the current state; nothing changed.
    Ignored {
        /// The state the order stayed in.
        state: OrderState,
    },
}

impl Transition {
    /// Whether the event actually advanced the order.
    #[must_use]
    pub const fn applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// The order's state after the attempt.
    #[must_use]
    pub const fn state(&self) -> OrderState {
        match self {
            Self::Applied { to, .. } => *to,
            Self::Ignored { state } => *state,
        }
    }
}

/// One purchasable unit of work, tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Order identity.
    pub id: OrderId,
    /// What the provider proposed to do.
    pub description: String,
    /// Agreed price in whole currency units.
    pub price: Price,
    /// Promised delivery time in minutes.
    pub delivery_time_minutes: u32,
    /// Current lifecycle state.
    pub state: OrderState,
    /// Escrow transaction reference, set by the payment event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escrow_tx_ref: Option<String>,
    /// The delivered work product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_result: Option<String>,
    /// Note from the provider accompanying the delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_message: Option<String>,
    /// Consumer's rating, 1–5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_rating: Option<u8>,
    /// Consumer's review comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_comment: Option<String>,
    /// Why the order failed, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Order {
    /// Creates a freshly proposed order.
    #[must_use]
    pub fn proposed(
        id: OrderId,
        description: impl Into<String>,
        price: Price,
        delivery_time_minutes: u32,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            price,
            delivery_time_minutes,
            state: OrderState::Proposed,
            escrow_tx_ref: None,
            delivery_result: None,
            delivery_message: None,
            review_rating: None,
            review_comment: None,
            failure_reason: None,
        }
    }

    /// Applies a lifecycle event.
    ///
    /// Idempotent: an event that is not applicable in the current state
    /// (a duplicate, or one that arrived ahead of its prerequisite) is
    /// reported as [`Transition::Ignored`] and leaves the order untouched.
    pub fn apply(&mut self, event: OrderEvent) -> Transition {
        let from = self.state;
        match event {
            OrderEvent::Paid { escrow_tx_ref } if from == OrderState::Proposed => {
                self.escrow_tx_ref = Some(escrow_tx_ref);
                self.advance(from, OrderState::Paid)
            }
            OrderEvent::Delivered { result, message } if from == OrderState::Paid => {
                self.delivery_result = Some(result);
                self.delivery_message = message;
                self.advance(from, OrderState::Delivered)
            }
            OrderEvent::Reviewed { rating, comment } if from == OrderState::Delivered => {
                self.review_rating = Some(rating.clamp(MIN_RATING, MAX_RATING));
                self.review_comment = Some(comment);
                self.advance(from, OrderState::Reviewed)
            }
            OrderEvent::Failed { reason }
                if matches!(from, OrderState::Proposed | OrderState::Paid) =>
            {
                self.failure_reason = Some(reason);
                self.advance(from, OrderState::Failed)
            }
            _ => {
                tracing::debug!(order = %self.id, state = ?from, "event not applicable, ignored");
                Transition::Ignored { state: from }
            }
        }
    }

    fn advance(&mut self, from: OrderState, to: OrderState) -> Transition {
        self.state = to;
        tracing::info!(order = %self.id, from = ?from, to = ?to, "order advanced");
        Transition::Applied { from, to }
    }
}
