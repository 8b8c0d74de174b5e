//! External capabilities consumed by the payment gate.
//!
//! The gate never talks to a ledger, a data source, or a price book
//! directly. It consumes four seams, all injectable as `Arc<dyn …>`:
//!
//! - [`Verifier`] — checks a credential against a requirement
//! - [`Settler`] — finalizes a verified payment, producing a transaction
//!   reference
//! - [`ResourceProvider`] — produces the underlying payload once payment
//!   is resolved
//! - [`Pricing`] — resolves a resource key to its price
//!
//! Implementations decide what verification and settlement mean; the gate
//! only relies on the outcome shapes and on the ordering contract (verify
//! before settle, settle at most once per credential).

use crate::amount::Price;
use crate::credential::PaymentCredential;
use crate::requirement::PaymentRequirement;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transport-level failure from a capability call.
///
/// Capability outcomes ([`VerifyOutcome`], [`SettleOutcome`]) carry the
/// domain verdict; this error is for the call itself going wrong.
pub type CapabilityError = Box<dyn std::error::Error + Send + Sync>;

/// Verdict from checking a credential against a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    /// Whether the credential is valid for the requirement.
    pub is_valid: bool,
    /// Why verification failed, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerifyOutcome {
    /// A passing verdict.
    #[must_use]
    pub const fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    /// A failing verdict with a reason.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Result of finalizing a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleOutcome {
    /// Whether the payment settled.
    pub success: bool,
    /// Ledger transaction reference, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,
    /// Why settlement failed, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SettleOutcome {
    /// A settled payment with its transaction reference.
    #[must_use]
    pub fn confirmed(transaction_ref: impl Into<String>) -> Self {
        Self {
            success: true,
            transaction_ref: Some(transaction_ref.into()),
            error: None,
        }
    }

    /// A failed settlement with a reason.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_ref: None,
            error: Some(error.into()),
        }
    }
}

/// Checks whether a credential satisfies a requirement.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Verifies the credential against the requirement.
    ///
    /// # Errors
    ///
    /// Returns a [`CapabilityError`] if the verification call itself
    /// failed; an invalid credential is a successful call returning
    /// [`VerifyOutcome::invalid`].
    async fn verify(
        &self,
        credential: &PaymentCredential,
        requirement: &PaymentRequirement,
    ) -> Result<VerifyOutcome, CapabilityError>;
}

/// Finalizes a verified payment against the ledger.
#[async_trait]
pub trait Settler: Send + Sync {
    /// Settles the credential against the requirement.
    ///
    /// The gate calls this at most once per credential, and only after a
    /// passing [`Verifier`] verdict.
    ///
    /// # Errors
    ///
    /// Returns a [`CapabilityError`] if the settlement call itself failed;
    /// a declined settlement is a successful call returning
    /// [`SettleOutcome::failed`].
    async fn settle(
        &self,
        credential: &PaymentCredential,
        requirement: &PaymentRequirement,
    ) -> Result<SettleOutcome, CapabilityError>;
}

/// Produces the payload behind a resource key, independent of payment.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Fetches the payload for a resolved, paid-for (or free) resource.
    ///
    /// # Errors
    ///
    /// Returns a [`CapabilityError`] if the lookup failed. When this
    /// happens after settlement the gate surfaces it with the settlement
    /// proof attached, so the payment is never silently dropped.
    async fn fetch(&self, resource_key: &str) -> Result<Value, CapabilityError>;
}

/// Resolves a resource key to its price.
pub trait Pricing: Send + Sync {
    /// The price for the given resource, or `None` if the key is unknown.
    fn quote(&self, resource_key: &str) -> Option<Price>;
}

impl<F> Pricing for F
where
    F: Fn(&str) -> Option<Price> + Send + Sync,
{
    fn quote(&self, resource_key: &str) -> Option<Price> {
        self(resource_key)
    }
}

/// Charges the same price for every resource key.
#[derive(Debug, Clone, Copy)]
pub struct FixedPricing {
    price: Price,
}

impl FixedPricing {
    /// Creates a pricing capability with one flat price.
    #[must_use]
    pub const fn new(price: Price) -> Self {
        Self { price }
    }
}

impl Pricing for FixedPricing {
    fn quote(&self, _resource_key: &str) -> Option<Price> {
        Some(self.price)
    }
}
