//! Freshness-windowed memo of the last settlement cycle per resource.
//!
//! The cache exists so a client that legitimately retries a paid request
//! within a short interval is not charged twice: the gate returns the
//! recorded response document instead of re-settling. Failed cycles are
//! recorded too, so the last outcome for a key stays observable, but only
//! successful records ever replay. Entries expire by being ignored — a
//! stale record is treated as absent, never proactively swept, and
//! freshness is judged on the monotonic clock so a record can never
//! become fresh again once its window has passed.
//!
//! Each resource key owns an exclusive slot. The gate holds a slot's lock
//! across an entire verify/settle attempt, which is what makes overlapping
//! settlement attempts on one key resolve to a single winner while other
//! keys proceed untouched.

use crate::amount::MicroAmount;
use crate::timestamp::UnixTimestamp;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// How long a successful settlement satisfies retries, unless configured.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(60);

/// Proof annotation attached to a paid response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementProof {
    /// Ledger transaction reference produced by the settler.
    pub transaction_ref: String,
    /// Amount settled, in micro-units.
    pub amount: MicroAmount,
    /// Currency display label.
    pub currency: String,
}

/// Result of one verify+settle cycle, as remembered by the cache.
///
/// `document` is the complete serialized response that was returned to the
/// payer, kept verbatim so a replay within the freshness window is
/// byte-identical to the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    /// Resource key the settlement paid for.
    pub resource_key: String,
    /// Amount settled, in micro-units.
    pub amount: MicroAmount,
    /// Currency display label.
    pub currency: String,
    /// Ledger transaction reference.
    pub transaction_ref: String,
    /// Wall-clock time of settlement; informational only, freshness runs
    /// on the monotonic clock.
    pub settled_at: UnixTimestamp,
    /// Whether the cycle settled.
    pub success: bool,
    /// Why the cycle failed, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// The serialized response document, returned verbatim on replay.
    pub document: Box<RawValue>,
}

impl SettlementRecord {
    /// Builds the record for a successful settlement.
    #[must_use]
    pub fn settled(
        resource_key: impl Into<String>,
        proof: &SettlementProof,
        document: Box<RawValue>,
    ) -> Self {
        Self {
            resource_key: resource_key.into(),
            amount: proof.amount,
            currency: proof.currency.clone(),
            transaction_ref: proof.transaction_ref.clone(),
            settled_at: UnixTimestamp::now(),
            success: true,
            failure_reason: None,
            document,
        }
    }

    /// Builds the record for a settlement cycle that failed.
    ///
    /// Failed records never satisfy a replay; they carry a `null` document
    /// and exist so the most recent outcome for the key stays observable
    /// through [`SettlementCache::get`].
    #[must_use]
    pub fn failed(
        resource_key: impl Into<String>,
        amount: MicroAmount,
        currency: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            resource_key: resource_key.into(),
            amount,
            currency: currency.into(),
            transaction_ref: String::new(),
            settled_at: UnixTimestamp::now(),
            success: false,
            failure_reason: Some(reason.into()),
            document: RawValue::from_string("null".to_owned())
                .expect("null is a complete JSON document"),
        }
    }

    /// The settlement proof carried by this record.
    #[must_use]
    pub fn proof(&self) -> SettlementProof {
        SettlementProof {
            transaction_ref: self.transaction_ref.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
        }
    }
}

/// A record together with the monotonic instant it was stored.
#[derive(Debug, Clone)]
pub(crate) struct StoredSettlement {
    pub(crate) stored_at: Instant,
    pub(crate) record: SettlementRecord,
}

pub(crate) type Slot = Arc<Mutex<Option<StoredSettlement>>>;

/// Per-resource-key settlement memo with a fixed freshness window.
#[derive(Debug)]
pub struct SettlementCache {
    window: Duration,
    slots: DashMap<String, Slot>,
}

impl SettlementCache {
    /// Creates a cache with the given freshness window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: DashMap::new(),
        }
    }

    /// The configured freshness window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Whether a record stored at `stored_at` is still fresh at `now`.
    ///
    /// Strict: a record exactly one window old is already stale.
    #[must_use]
    pub fn is_fresh(&self, stored_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(stored_at) < self.window
    }

    /// The fresh record for a resource key, if any.
    ///
    /// A stale record is reported as absent; it stays in the slot until
    /// the next settlement overwrites it.
    pub async fn get(&self, resource_key: &str) -> Option<SettlementRecord> {
        let slot = self.slot(resource_key);
        let guard = slot.lock().await;
        let stored = guard.as_ref()?;
        self.is_fresh(stored.stored_at, Instant::now())
            .then(|| stored.record.clone())
    }

    /// Stores a record for its resource key, overwriting any prior record.
    pub async fn put(&self, record: SettlementRecord) {
        let slot = self.slot(record.resource_key.as_str());
        let mut guard = slot.lock().await;
        *guard = Some(StoredSettlement {
            stored_at: Instant::now(),
            record,
        });
    }

    /// The exclusive slot for a resource key, creating it on first use.
    pub(crate) fn slot(&self, resource_key: &str) -> Slot {
        let entry = self.slots.entry(resource_key.to_owned()).or_default();
        Arc::clone(entry.value())
    }
}

impl Default for SettlementCache {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, tx: &str) -> SettlementRecord {
        let proof = SettlementProof {
            transaction_ref: tx.to_owned(),
            amount: MicroAmount::from_raw(100_000),
            currency: "USDC".to_owned(),
        };
        let document = RawValue::from_string(r#"{"temperature":18}"#.to_owned()).unwrap();
        SettlementRecord::settled(key, &proof, document)
    }

    #[tokio::test]
    async fn returns_fresh_records() {
        let cache = SettlementCache::default();
        cache.put(record("weather:Paris", "tx-1")).await;

        let found = cache.get("weather:Paris").await.unwrap();
        assert_eq!(found.transaction_ref, "tx-1");
        assert_eq!(found.document.get(), r#"{"temperature":18}"#);
        assert!(cache.get("weather:Oslo").await.is_none());
    }

    #[test]
    fn freshness_boundary_is_strict() {
        let cache = SettlementCache::new(Duration::from_secs(60));
        let stored_at = Instant::now();

        let just_inside = stored_at + Duration::from_secs(60) - Duration::from_millis(1);
        assert!(cache.is_fresh(stored_at, just_inside));

        let exactly = stored_at + Duration::from_secs(60);
        assert!(!cache.is_fresh(stored_at, exactly));

        let just_outside = stored_at + Duration::from_secs(60) + Duration::from_millis(1);
        assert!(!cache.is_fresh(stored_at, just_outside));
    }

    #[tokio::test]
    async fn stale_records_read_as_absent() {
        let cache = SettlementCache::new(Duration::from_millis(5));
        cache.put(record("weather:Paris", "tx-1")).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("weather:Paris").await.is_none());
    }

    #[tokio::test]
    async fn failed_cycles_are_recorded_without_a_document() {
        let cache = SettlementCache::default();
        cache
            .put(SettlementRecord::failed(
                "weather:Paris",
                MicroAmount::from_raw(100_000),
                "USDC",
                "insufficient funds",
            ))
            .await;

        let found = cache.get("weather:Paris").await.unwrap();
        assert!(!found.success);
        assert_eq!(found.failure_reason.as_deref(), Some("insufficient funds"));
        assert_eq!(found.document.get(), "null");
        assert!(found.transaction_ref.is_empty());
    }

    #[tokio::test]
    async fn new_settlement_overwrites_prior_record() {
        let cache = SettlementCache::default();
        cache.put(record("weather:Paris", "tx-1")).await;
        cache.put(record("weather:Paris", "tx-2")).await;

        let found = cache.get("weather:Paris").await.unwrap();
        assert_eq!(found.transaction_ref, "tx-2");
    }
}
