//! Payment requirements and the challenge body built from them.
//!
//! A [`PaymentRequirement`] is the canonical, immutable description of what
//! a resource demands: scheme, network, asset, recipient, amount in
//! micro-units, and a redeem-by budget. Requirements are built fresh per
//! challenge from a [`PricingPolicy`] and never mutated afterwards.
//!
//! Two requirements that agree on `(scheme, network, asset, payTo,
//! maxAmountRequired, metadata.resourceKey)` are interchangeable: that
//! tuple is the [`RequirementKey`] used both to match a submitted
//! credential against the server's own requirement and to look up prior
//! settlements in the payment cache. The `issuedAt` metadata entry is
//! deliberately outside the key, so rebuilding a requirement a moment
//! later still matches.

use crate::amount::{MicroAmount, Price, PriceError};
use crate::config::PricingPolicy;
use crate::timestamp::UnixTimestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key holding the resource this requirement was built for.
pub const METADATA_RESOURCE_KEY: &str = "resourceKey";

/// Metadata key holding the issuance timestamp (stringified Unix seconds).
pub const METADATA_ISSUED_AT: &str = "issuedAt";

/// Canonical description of what payment a resource demands.
///
/// # Wire Format
///
/// Serializes to camelCase JSON with the amount as a stringified integer:
///
/// ```json
/// {
///   "scheme": "exact",
///   "network": "solana-devnet",
///   "asset": "usdc-mint",
///   "payTo": "provider-wallet",
///   "maxAmountRequired": "100000",
///   "maxTimeoutSeconds": 300,
///   "metadata": { "resourceKey": "weather:Paris", "issuedAt": "1700000000" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    /// Payment scheme identifier (e.g., `"exact"`).
    pub scheme: String,
    /// Network identifier.
    pub network: String,
    /// Asset identifier.
    pub asset: String,
    /// Recipient address.
    pub pay_to: String,
    /// Amount due, in integer micro-units.
    pub max_amount_required: MicroAmount,
    /// Seconds the requirement stays redeemable after issuance.
    pub max_timeout_seconds: u64,
    /// Opaque key/value entries; always carries `resourceKey` and
    /// `issuedAt` when built by [`PaymentRequirement::build`].
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl PaymentRequirement {
    /// Builds a requirement for one resource under the given policy.
    ///
    /// Deterministic for identical inputs except for the `issuedAt`
    /// metadata entry, which reads the wall clock. The price is converted
    /// to micro-units with integer arithmetic only.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::NotPositive`] for a zero price; free
    /// resources are served without a requirement, never challenged.
    pub fn build(
        resource_key: &str,
        price: Price,
        policy: &PricingPolicy,
    ) -> Result<Self, PriceError> {
        if price.is_zero() {
            return Err(PriceError::NotPositive);
        }
        let mut metadata = policy.metadata.clone();
        metadata.insert(METADATA_RESOURCE_KEY.to_owned(), resource_key.to_owned());
        metadata.insert(METADATA_ISSUED_AT.to_owned(), UnixTimestamp::now().to_string());
        Ok(Self {
            scheme: policy.scheme.clone(),
            network: policy.network.clone(),
            asset: policy.asset.clone(),
            pay_to: policy.pay_to.clone(),
            max_amount_required: price.micros(),
            max_timeout_seconds: policy.max_timeout_seconds,
            metadata,
        })
    }

    /// The resource key this requirement was built for, if present.
    #[must_use]
    pub fn resource_key(&self) -> Option<&str> {
        self.metadata.get(METADATA_RESOURCE_KEY).map(String::as_str)
    }

    /// The issuance timestamp, if present and well-formed.
    #[must_use]
    pub fn issued_at(&self) -> Option<UnixTimestamp> {
        self.metadata
            .get(METADATA_ISSUED_AT)
            .and_then(|s| s.parse::<u64>().ok())
            .map(UnixTimestamp::from_secs)
    }

    /// The content-equivalence key for this requirement.
    #[must_use]
    pub fn equivalence_key(&self) -> RequirementKey {
        RequirementKey {
            scheme: self.scheme.clone(),
            network: self.network.clone(),
            asset: self.asset.clone(),
            pay_to: self.pay_to.clone(),
            max_amount_required: self.max_amount_required,
            resource_key: self.resource_key().map(str::to_owned),
        }
    }

    /// The amount due as a human-denominated price.
    #[must_use]
    pub fn price(&self) -> Price {
        Price::from_micros(self.max_amount_required)
    }
}

/// The tuple on which two requirements are considered interchangeable.
///
/// Everything a credential commits to; issuance time is excluded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequirementKey {
    /// Payment scheme identifier.
    pub scheme: String,
    /// Network identifier.
    pub network: String,
    /// Asset identifier.
    pub asset: String,
    /// Recipient address.
    pub pay_to: String,
    /// Amount due, in micro-units.
    pub max_amount_required: MicroAmount,
    /// Resource the requirement was built for.
    pub resource_key: Option<String>,
}

/// The structured "payment required" signal returned for an
/// unauthenticated request.
///
/// The same body shape is reused when a credentialed request fails, with a
/// different `error` tag, so a client always finds the current requirement
/// next to the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    /// Outcome tag: [`Self::PAYMENT_REQUIRED`], [`Self::INVALID_PAYMENT`],
    /// or [`Self::SETTLEMENT_FAILED`].
    pub error: String,
    /// Human-readable summary of what is being charged and why.
    pub message: String,
    /// The requirement the client must satisfy.
    pub requirement: PaymentRequirement,
    /// The amount due in whole currency units, as a display string.
    pub price: Price,
}

impl PaymentChallenge {
    /// Tag for the ordinary challenge on an unauthenticated request.
    pub const PAYMENT_REQUIRED: &'static str = "Payment Required";
    /// Tag for a credential that failed verification.
    pub const INVALID_PAYMENT: &'static str = "Invalid Payment";
    /// Tag for a credential that verified but could not be settled.
    pub const SETTLEMENT_FAILED: &'static str = "Settlement Failed";

    /// Builds the ordinary challenge for a fresh requirement.
    #[must_use]
    pub fn payment_required(requirement: PaymentRequirement, currency: &str) -> Self {
        let price = requirement.price();
        let message = match requirement.resource_key() {
            Some(key) => format!("Payment of {price} {currency} required for {key}"),
            None => format!("Payment of {price} {currency} required"),
        };
        Self::tagged(Self::PAYMENT_REQUIRED, message, requirement)
    }

    /// Builds the challenge returned alongside a rejected credential.
    #[must_use]
    pub fn invalid_payment(
        requirement: PaymentRequirement,
        currency: &str,
        reason: Option<&str>,
    ) -> Self {
        let price = requirement.price();
        let message = match reason {
            Some(reason) => format!("Payment rejected: {reason}"),
            None => format!("Payment of {price} {currency} was rejected; retry with a new credential"),
        };
        Self::tagged(Self::INVALID_PAYMENT, message, requirement)
    }

    /// Builds a challenge with an explicit tag and message.
    #[must_use]
    pub fn tagged(
        tag: impl Into<String>,
        message: impl Into<String>,
        requirement: PaymentRequirement,
    ) -> Self {
        let price = requirement.price();
        Self {
            error: tag.into(),
            message: message.into(),
            requirement,
            price,
        }
    }
}
