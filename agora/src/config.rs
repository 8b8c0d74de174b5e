//! Configuration for payment-gated resources.
//!
//! [`PricingPolicy`] declares everything about a charge except the price
//! itself (which is resolved per resource key through the
//! [`Pricing`](crate::capability::Pricing) capability): the payment scheme,
//! the network and asset to pay on, the recipient, and how long a produced
//! requirement stays redeemable. [`GateConfig`] wraps a policy together
//! with the settlement-cache freshness window.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Declares how a resource server charges for its resources.
///
/// # Example
///
/// ```rust
/// use agora::config::PricingPolicy;
///
/// let policy = PricingPolicy::new("solana-devnet", "usdc-mint", "provider-wallet")
///     .with_metadata_entry("service", "weather-data");
/// assert_eq!(policy.scheme, "exact");
/// assert_eq!(policy.max_timeout_seconds, 300);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingPolicy {
    /// Payment scheme identifier. Defaults to `"exact"`.
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Network identifier (e.g., `"solana-devnet"`).
    pub network: String,

    /// Asset identifier (e.g., a USDC mint address).
    pub asset: String,

    /// Recipient address.
    pub pay_to: String,

    /// Display label for the currency in human-readable summaries and
    /// settlement proofs. Defaults to `"USDC"`.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Maximum time in seconds a produced requirement stays redeemable;
    /// verify and settle calls are bounded by the same budget.
    /// Defaults to 300.
    #[serde(default = "default_max_timeout")]
    pub max_timeout_seconds: u64,

    /// Extra entries merged into every requirement's metadata
    /// (e.g., a `service` label).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl PricingPolicy {
    /// Creates a policy with the default scheme, currency, and timeout.
    #[must_use]
    pub fn new(
        network: impl Into<String>,
        asset: impl Into<String>,
        pay_to: impl Into<String>,
    ) -> Self {
        Self {
            scheme: default_scheme(),
            network: network.into(),
            asset: asset.into(),
            pay_to: pay_to.into(),
            currency: default_currency(),
            max_timeout_seconds: default_max_timeout(),
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the payment scheme.
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Sets the currency display label.
    #[must_use]
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Sets the requirement timeout budget in seconds.
    #[must_use]
    pub const fn with_max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    /// Adds a metadata entry carried by every requirement built under this
    /// policy.
    #[must_use]
    pub fn with_metadata_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The verify/settle timeout budget as a [`Duration`].
    #[must_use]
    pub const fn timeout_budget(&self) -> Duration {
        Duration::from_secs(self.max_timeout_seconds)
    }
}

/// Full configuration for a payment gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateConfig {
    /// The pricing policy applied to every resource behind the gate.
    pub policy: PricingPolicy,

    /// How long a successful settlement satisfies retries for the same
    /// resource key, in milliseconds. Defaults to 60000.
    #[serde(default = "default_freshness_window_ms")]
    pub freshness_window_ms: u64,
}

impl GateConfig {
    /// Wraps a policy with the default freshness window.
    #[must_use]
    pub const fn new(policy: PricingPolicy) -> Self {
        Self {
            policy,
            freshness_window_ms: default_freshness_window_ms(),
        }
    }

    /// Sets the settlement freshness window.
    #[must_use]
    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The freshness window as a [`Duration`].
    #[must_use]
    pub const fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }
}

fn default_scheme() -> String {
    "exact".to_owned()
}

fn default_currency() -> String {
    "USDC".to_owned()
}

const fn default_max_timeout() -> u64 {
    300
}

const fn default_freshness_window_ms() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: PricingPolicy = serde_json::from_str(
            r#"{
                "network": "solana-devnet",
                "asset": "usdc-mint",
                "payTo": "provider-wallet"
            }"#,
        )
        .unwrap();
        assert_eq!(policy.scheme, "exact");
        assert_eq!(policy.currency, "USDC");
        assert_eq!(policy.max_timeout_seconds, 300);
        assert!(policy.metadata.is_empty());
    }

    #[test]
    fn gate_config_defaults_to_sixty_seconds() {
        let policy = PricingPolicy::new("solana-devnet", "usdc-mint", "provider-wallet");
        let config = GateConfig::new(policy);
        assert_eq!(config.freshness_window(), Duration::from_secs(60));
    }
}
