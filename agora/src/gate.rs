//! The payment challenge pipeline.
//!
//! [`PaymentGate`] turns a resource request into one of two outcomes: a
//! structured challenge naming the payment that would unlock the resource,
//! or the resource itself. A request with no credential is either served
//! directly (free resource, or a fresh prior settlement covers it) or
//! challenged. A request carrying a credential runs the full pipeline:
//!
//! 1. rebuild the requirement and match the credential against it by
//!    content
//! 2. short-circuit to the recorded response if a fresh settlement exists
//! 3. verify the credential; an invalid credential never reaches
//!    settlement
//! 4. settle, at most once per credential, then record the response so
//!    retries inside the freshness window replay it byte-identical; a
//!    failed cycle is recorded with its reason but never replayed
//!
//! Verify, settle, and the resource lookup are all bounded by the
//! policy's timeout budget. Overlapping attempts on one resource key
//! serialize on the key's cache slot, so at most one of them settles;
//! requests for other keys are unaffected.

use crate::amount::Price;
use crate::capability::{Pricing, ResourceProvider, Settler, Verifier};
use crate::cache::{SettlementCache, SettlementProof, SettlementRecord, StoredSettlement};
use crate::config::GateConfig;
use crate::credential::PaymentCredential;
use crate::error::{
    CredentialMismatchError, InvalidPaymentError, PaymentError, ResourceUnavailableError,
    SettlementFailedError,
};
use crate::requirement::{PaymentChallenge, PaymentRequirement};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use serde_json::value::{RawValue, to_raw_value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;

/// Outcome of admitting a resource request.
#[derive(Debug, Clone)]
pub enum Admission {
    /// Payment is required first; the challenge says what and how much.
    Challenge(PaymentChallenge),
    /// The resource, together with its settlement proof when one applies.
    Granted(GrantedResource),
}

/// A served resource document.
#[derive(Debug, Clone)]
pub struct GrantedResource {
    /// The complete response document. For a settled request this is the
    /// provider payload annotated with the payment proof.
    pub document: Box<RawValue>,
    /// Settlement proof; `None` for free resources.
    pub proof: Option<SettlementProof>,
    /// Whether this response was replayed from the settlement cache.
    pub replayed: bool,
}

/// Drives the payment challenge protocol for a set of resources.
///
/// Construction wires the externally provided capabilities together with
/// a [`GateConfig`]; the gate owns the settlement cache and the record of
/// credentials it has already taken to settlement.
pub struct PaymentGate {
    config: GateConfig,
    pricing: Arc<dyn Pricing>,
    verifier: Arc<dyn Verifier>,
    settler: Arc<dyn Settler>,
    provider: Arc<dyn ResourceProvider>,
    cache: SettlementCache,
    /// Credentials taken to settlement, keyed by canonical encoding.
    /// Entries are pruned once the freshness window that made their
    /// response replayable has lapsed.
    spent: DashMap<String, Instant>,
}

impl fmt::Debug for PaymentGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentGate")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PaymentGate {
    /// Creates a gate over the given capabilities.
    #[must_use]
    pub fn new(
        config: GateConfig,
        pricing: Arc<dyn Pricing>,
        verifier: Arc<dyn Verifier>,
        settler: Arc<dyn Settler>,
        provider: Arc<dyn ResourceProvider>,
    ) -> Self {
        let cache = SettlementCache::new(config.freshness_window());
        Self {
            config,
            pricing,
            verifier,
            settler,
            provider,
            cache,
            spent: DashMap::new(),
        }
    }

    /// The gate's configuration.
    #[must_use]
    pub const fn config(&self) -> &GateConfig {
        &self.config
    }

    /// The settlement cache backing the gate.
    #[must_use]
    pub const fn cache(&self) -> &SettlementCache {
        &self.cache
    }

    /// Admits a resource request, with or without a credential.
    ///
    /// # Errors
    ///
    /// Returns a [`PaymentError`] for every credentialed fault path; a
    /// missing credential is never an error (it yields
    /// [`Admission::Challenge`]).
    pub async fn admit(
        &self,
        resource_key: &str,
        credential: Option<&PaymentCredential>,
    ) -> Result<Admission, PaymentError> {
        let Some(price) = self.pricing.quote(resource_key) else {
            return Err(ResourceUnavailableError::new(format!(
                "no price known for resource `{resource_key}`"
            ))
            .into());
        };

        if price.is_zero() {
            let document = self.fetch_document(resource_key, None).await?;
            return Ok(Admission::Granted(GrantedResource {
                document,
                proof: None,
                replayed: false,
            }));
        }

        match credential {
            None => {
                if let Some(granted) = self.replay(resource_key).await {
                    return Ok(Admission::Granted(granted));
                }
                let requirement = self.build_requirement(resource_key, price)?;
                tracing::info!(resource = resource_key, price = %price, "payment required");
                Ok(Admission::Challenge(PaymentChallenge::payment_required(
                    requirement,
                    &self.config.policy.currency,
                )))
            }
            Some(credential) => {
                let requirement = self.build_requirement(resource_key, price)?;
                self.redeem(resource_key, credential, requirement).await
            }
        }
    }

    fn build_requirement(
        &self,
        resource_key: &str,
        price: Price,
    ) -> Result<PaymentRequirement, PaymentError> {
        PaymentRequirement::build(resource_key, price, &self.config.policy).map_err(|err| {
            ResourceUnavailableError::new(format!(
                "resource `{resource_key}` cannot be priced: {err}"
            ))
            .into()
        })
    }

    /// Runs the credentialed pipeline under the resource key's slot lock.
    async fn redeem(
        &self,
        resource_key: &str,
        credential: &PaymentCredential,
        requirement: PaymentRequirement,
    ) -> Result<Admission, PaymentError> {
        if !credential.matches(&requirement) {
            tracing::warn!(resource = resource_key, "credential bound to a different requirement");
            return Err(CredentialMismatchError::new(requirement, credential.bound_key()).into());
        }

        // Held across verify and settle: overlapping attempts on this key
        // resolve to a single winner, the rest replay the stored record.
        let slot = self.cache.slot(resource_key);
        let mut stored = slot.lock().await;

        if let Some(existing) = stored.as_ref() {
            if existing.record.success && self.cache.is_fresh(existing.stored_at, Instant::now()) {
                tracing::info!(
                    resource = resource_key,
                    transaction = %existing.record.transaction_ref,
                    "replaying settled response"
                );
                return Ok(Admission::Granted(GrantedResource {
                    proof: Some(existing.record.proof()),
                    document: existing.record.document.clone(),
                    replayed: true,
                }));
            }
        }

        let budget = self.config.policy.timeout_budget();

        let verdict = match timeout(budget, self.verifier.verify(credential, &requirement)).await {
            Err(_elapsed) => {
                return Err(SettlementFailedError::timeout(budget)
                    .with_requirement(requirement)
                    .into());
            }
            Ok(Err(err)) => {
                return Err(SettlementFailedError::new(format!("verification call failed: {err}"))
                    .with_requirement(requirement)
                    .into());
            }
            Ok(Ok(verdict)) => verdict,
        };
        if !verdict.is_valid {
            tracing::warn!(
                resource = resource_key,
                reason = verdict.reason.as_deref().unwrap_or("unspecified"),
                "credential rejected by verifier"
            );
            let mut err = InvalidPaymentError::new(requirement);
            if let Some(reason) = verdict.reason {
                err = err.with_reason(reason);
            }
            return Err(err.into());
        }

        // One settlement attempt per credential while its response can
        // still replay. The canonical encoding doubles as the idempotency
        // key.
        let idempotency_key = match credential.encode() {
            Ok(key) => key,
            Err(err) => {
                return Err(SettlementFailedError::new(format!(
                    "credential canonicalization failed: {err}"
                ))
                .with_requirement(requirement)
                .into());
            }
        };
        if !self.mark_spent(idempotency_key) {
            return Err(InvalidPaymentError::new(requirement)
                .with_reason("credential was already taken to settlement")
                .into());
        }

        let outcome = match timeout(budget, self.settler.settle(credential, &requirement)).await {
            Err(_elapsed) => {
                *stored = Some(self.failed_record(resource_key, &requirement, "settlement timed out"));
                return Err(SettlementFailedError::timeout(budget)
                    .with_requirement(requirement)
                    .into());
            }
            Ok(Err(err)) => {
                let reason = format!("settlement call failed: {err}");
                *stored = Some(self.failed_record(resource_key, &requirement, &reason));
                return Err(SettlementFailedError::new(reason)
                    .with_requirement(requirement)
                    .into());
            }
            Ok(Ok(outcome)) => outcome,
        };
        if !outcome.success {
            let reason = outcome
                .error
                .unwrap_or_else(|| "settlement declined".to_owned());
            *stored = Some(self.failed_record(resource_key, &requirement, &reason));
            return Err(SettlementFailedError::new(reason)
                .with_requirement(requirement)
                .into());
        }
        let Some(transaction_ref) = outcome.transaction_ref else {
            let reason = "settler reported success without a transaction reference";
            *stored = Some(self.failed_record(resource_key, &requirement, reason));
            return Err(SettlementFailedError::new(reason)
                .with_requirement(requirement)
                .into());
        };

        let proof = SettlementProof {
            transaction_ref,
            amount: requirement.max_amount_required,
            currency: self.config.policy.currency.clone(),
        };
        tracing::info!(
            resource = resource_key,
            transaction = %proof.transaction_ref,
            amount = %proof.amount,
            "payment settled"
        );

        let document = self.fetch_document(resource_key, Some(&proof)).await?;

        *stored = Some(StoredSettlement {
            stored_at: Instant::now(),
            record: SettlementRecord::settled(resource_key, &proof, document.clone()),
        });

        Ok(Admission::Granted(GrantedResource {
            document,
            proof: Some(proof),
            replayed: false,
        }))
    }

    /// Records a credential as taken to settlement.
    ///
    /// Returns `false` if the credential was already recorded. Entries
    /// older than the freshness window are swept on the way in: once the
    /// recorded response can no longer replay, a re-presented credential
    /// re-enters the full verify pipeline instead, so the map stays
    /// bounded by the settlement rate over one window.
    fn mark_spent(&self, idempotency_key: String) -> bool {
        let now = Instant::now();
        let window = self.cache.window();
        self.spent
            .retain(|_, settled_at| now.saturating_duration_since(*settled_at) < window);
        self.spent.insert(idempotency_key, now).is_none()
    }

    /// Builds the cache entry for a settlement cycle that failed.
    fn failed_record(
        &self,
        resource_key: &str,
        requirement: &PaymentRequirement,
        reason: &str,
    ) -> StoredSettlement {
        StoredSettlement {
            stored_at: Instant::now(),
            record: SettlementRecord::failed(
                resource_key,
                requirement.max_amount_required,
                &self.config.policy.currency,
                reason,
            ),
        }
    }

    /// Serves the recorded response for a key whose settlement is fresh.
    async fn replay(&self, resource_key: &str) -> Option<GrantedResource> {
        let record = self.cache.get(resource_key).await?;
        if !record.success {
            return None;
        }
        tracing::info!(
            resource = resource_key,
            transaction = %record.transaction_ref,
            "serving already-paid resource"
        );
        Some(GrantedResource {
            proof: Some(record.proof()),
            document: record.document,
            replayed: true,
        })
    }

    /// Fetches the payload and composes the response document, with the
    /// payment annotation when a proof is present.
    ///
    /// A failure here after settlement keeps the proof attached to the
    /// error, so the payment is never silently dropped.
    async fn fetch_document(
        &self,
        resource_key: &str,
        proof: Option<&SettlementProof>,
    ) -> Result<Box<RawValue>, PaymentError> {
        let budget = self.config.policy.timeout_budget();
        let unavailable = |reason: String| {
            let mut err = ResourceUnavailableError::new(reason);
            if let Some(proof) = proof {
                err = err.with_proof(proof.clone());
            }
            if proof.is_some() {
                tracing::error!(resource = resource_key, "lookup failed after payment");
            }
            PaymentError::from(err)
        };

        let payload = match timeout(budget, self.provider.fetch(resource_key)).await {
            Err(_elapsed) => {
                return Err(unavailable(format!(
                    "lookup timed out after {}s",
                    budget.as_secs()
                )));
            }
            Ok(Err(err)) => return Err(unavailable(err.to_string())),
            Ok(Ok(payload)) => payload,
        };

        let document = match proof {
            Some(proof) => annotate_document(payload, proof),
            None => to_raw_value(&payload),
        };
        document.map_err(|err| unavailable(format!("response could not be encoded: {err}")))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentAnnotation<'a> {
    verified: bool,
    #[serde(flatten)]
    proof: &'a SettlementProof,
}

/// Injects the payment proof into the payload under a `payment` key.
///
/// Non-object payloads are wrapped as `{"result": …, "payment": …}`.
fn annotate_document(
    payload: Value,
    proof: &SettlementProof,
) -> Result<Box<RawValue>, serde_json::Error> {
    let annotation = serde_json::to_value(PaymentAnnotation {
        verified: true,
        proof,
    })?;
    let document = match payload {
        Value::Object(mut map) => {
            map.insert("payment".to_owned(), annotation);
            Value::Object(map)
        }
        other => serde_json::json!({ "result": other, "payment": annotation }),
    };
    to_raw_value(&document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Price;
    use crate::capability::{
        CapabilityError, FixedPricing, SettleOutcome, VerifyOutcome,
    };
    use crate::config::PricingPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ApproveAll;

    #[async_trait]
    impl Verifier for ApproveAll {
        async fn verify(
            &self,
            _credential: &PaymentCredential,
            _requirement: &PaymentRequirement,
        ) -> Result<VerifyOutcome, CapabilityError> {
            Ok(VerifyOutcome::valid())
        }
    }

    struct RejectAll;

    #[async_trait]
    impl Verifier for RejectAll {
        async fn verify(
            &self,
            _credential: &PaymentCredential,
            _requirement: &PaymentRequirement,
        ) -> Result<VerifyOutcome, CapabilityError> {
            Ok(VerifyOutcome::invalid("signature check failed"))
        }
    }

    struct SlowVerifier;

    #[async_trait]
    impl Verifier for SlowVerifier {
        async fn verify(
            &self,
            _credential: &PaymentCredential,
            _requirement: &PaymentRequirement,
        ) -> Result<VerifyOutcome, CapabilityError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(VerifyOutcome::valid())
        }
    }

    #[derive(Default)]
    struct CountingSettler {
        settles: AtomicUsize,
    }

    impl CountingSettler {
        fn count(&self) -> usize {
            self.settles.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Settler for CountingSettler {
        async fn settle(
            &self,
            _credential: &PaymentCredential,
            _requirement: &PaymentRequirement,
        ) -> Result<SettleOutcome, CapabilityError> {
            let n = self.settles.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SettleOutcome::confirmed(format!("tx-{n}")))
        }
    }

    struct DecliningSettler;

    #[async_trait]
    impl Settler for DecliningSettler {
        async fn settle(
            &self,
            _credential: &PaymentCredential,
            _requirement: &PaymentRequirement,
        ) -> Result<SettleOutcome, CapabilityError> {
            Ok(SettleOutcome::failed("insufficient funds"))
        }
    }

    struct WeatherProvider;

    #[async_trait]
    impl ResourceProvider for WeatherProvider {
        async fn fetch(&self, resource_key: &str) -> Result<Value, CapabilityError> {
            Ok(serde_json::json!({ "resource": resource_key, "temperature": 18 }))
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl ResourceProvider for BrokenProvider {
        async fn fetch(&self, _resource_key: &str) -> Result<Value, CapabilityError> {
            Err("upstream lookup failed".into())
        }
    }

    fn policy() -> PricingPolicy {
        PricingPolicy::new("solana-devnet", "usdc-mint", "provider-wallet")
    }

    fn price(s: &str) -> Price {
        s.parse().unwrap()
    }

    // Generic over the settler so call sites can keep a typed handle on
    // their counting doubles; the unsized coercion happens in here.
    fn gate_with<S: Settler + 'static>(
        price_tag: &str,
        verifier: Arc<dyn Verifier>,
        settler: Arc<S>,
        provider: Arc<dyn ResourceProvider>,
    ) -> PaymentGate {
        gate_with_config(GateConfig::new(policy()), price_tag, verifier, settler, provider)
    }

    fn gate_with_config<S: Settler + 'static>(
        config: GateConfig,
        price_tag: &str,
        verifier: Arc<dyn Verifier>,
        settler: Arc<S>,
        provider: Arc<dyn ResourceProvider>,
    ) -> PaymentGate {
        PaymentGate::new(
            config,
            Arc::new(FixedPricing::new(price(price_tag))),
            verifier,
            settler,
            provider,
        )
    }

    fn signed_credential(gate: &PaymentGate, resource_key: &str) -> PaymentCredential {
        let quoted = gate.pricing.quote(resource_key).unwrap();
        let requirement =
            PaymentRequirement::build(resource_key, quoted, &gate.config.policy).unwrap();
        PaymentCredential::for_requirement(&requirement, "customer-wallet", "sig-1")
    }

    #[tokio::test]
    async fn unauthenticated_request_is_challenged() {
        let settler = Arc::new(CountingSettler::default());
        let gate = gate_with("0.10", Arc::new(ApproveAll), Arc::clone(&settler), Arc::new(WeatherProvider));

        let admission = gate.admit("weather:Paris", None).await.unwrap();
        let Admission::Challenge(challenge) = admission else {
            panic!("expected a challenge");
        };
        assert_eq!(challenge.error, PaymentChallenge::PAYMENT_REQUIRED);
        assert_eq!(challenge.requirement.max_amount_required.as_u64(), 100_000);
        assert_eq!(challenge.requirement.resource_key(), Some("weather:Paris"));
        assert_eq!(settler.count(), 0);
        assert!(gate.cache().get("weather:Paris").await.is_none());
    }

    #[tokio::test]
    async fn free_resources_skip_the_challenge() {
        let settler = Arc::new(CountingSettler::default());
        let gate = gate_with("0", Arc::new(ApproveAll), Arc::clone(&settler), Arc::new(WeatherProvider));

        let admission = gate.admit("weather:Paris", None).await.unwrap();
        let Admission::Granted(granted) = admission else {
            panic!("expected the resource");
        };
        assert!(granted.proof.is_none());
        assert!(!granted.replayed);
        assert_eq!(settler.count(), 0);
    }

    #[tokio::test]
    async fn unknown_resources_are_unavailable() {
        let pricing = |_: &str| None::<Price>;
        let gate = PaymentGate::new(
            GateConfig::new(policy()),
            Arc::new(pricing),
            Arc::new(ApproveAll),
            Arc::new(CountingSettler::default()),
            Arc::new(WeatherProvider),
        );

        let err = gate.admit("weather:Paris", None).await.unwrap_err();
        let PaymentError::ResourceUnavailable(err) = err else {
            panic!("expected resource unavailable, got {err}");
        };
        assert!(err.proof.is_none());
    }

    #[tokio::test]
    async fn paid_request_settles_once_and_is_recorded() {
        let settler = Arc::new(CountingSettler::default());
        let gate = gate_with("0.10", Arc::new(ApproveAll), Arc::clone(&settler), Arc::new(WeatherProvider));
        let credential = signed_credential(&gate, "weather:Paris");

        let admission = gate.admit("weather:Paris", Some(&credential)).await.unwrap();
        let Admission::Granted(granted) = admission else {
            panic!("expected the resource");
        };
        let proof = granted.proof.unwrap();
        assert_eq!(proof.transaction_ref, "tx-1");
        assert_eq!(proof.amount.as_u64(), 100_000);
        assert!(!granted.replayed);
        assert!(granted.document.get().contains("\"payment\""));
        assert_eq!(settler.count(), 1);

        let record = gate.cache().get("weather:Paris").await.unwrap();
        assert!(record.success);
        assert_eq!(record.transaction_ref, "tx-1");
    }

    #[tokio::test]
    async fn retries_replay_byte_identical_without_resettling() {
        let settler = Arc::new(CountingSettler::default());
        let gate = gate_with("0.10", Arc::new(ApproveAll), Arc::clone(&settler), Arc::new(WeatherProvider));
        let credential = signed_credential(&gate, "weather:Paris");

        let first = gate.admit("weather:Paris", Some(&credential)).await.unwrap();
        let Admission::Granted(first) = first else {
            panic!("expected the resource");
        };

        for _ in 0..3 {
            let retry = gate.admit("weather:Paris", Some(&credential)).await.unwrap();
            let Admission::Granted(retry) = retry else {
                panic!("expected a replay");
            };
            assert!(retry.replayed);
            assert_eq!(retry.document.get(), first.document.get());
        }

        // Same freshness window also covers a credential-less retry.
        let bare = gate.admit("weather:Paris", None).await.unwrap();
        let Admission::Granted(bare) = bare else {
            panic!("expected a replay");
        };
        assert!(bare.replayed);
        assert_eq!(bare.document.get(), first.document.get());

        assert_eq!(settler.count(), 1);
    }

    #[tokio::test]
    async fn spent_credentials_are_pruned_with_the_window() {
        let settler = Arc::new(CountingSettler::default());
        let config = GateConfig::new(policy()).with_freshness_window(Duration::from_millis(5));
        let gate = gate_with_config(
            config,
            "0.10",
            Arc::new(ApproveAll),
            Arc::clone(&settler),
            Arc::new(WeatherProvider),
        );
        let credential = signed_credential(&gate, "weather:Paris");

        gate.admit("weather:Paris", Some(&credential)).await.unwrap();
        assert_eq!(settler.count(), 1);

        // Past the window the response no longer replays and the spent
        // entry is swept, so the same credential runs the pipeline again.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let admission = gate.admit("weather:Paris", Some(&credential)).await.unwrap();
        let Admission::Granted(granted) = admission else {
            panic!("expected the resource");
        };
        assert!(!granted.replayed);
        assert_eq!(granted.proof.unwrap().transaction_ref, "tx-2");
        assert_eq!(settler.count(), 2);
    }

    #[tokio::test]
    async fn overlapping_attempts_on_one_key_settle_once() {
        let settler = Arc::new(CountingSettler::default());
        let gate = Arc::new(gate_with(
            "0.10",
            Arc::new(ApproveAll),
            Arc::clone(&settler),
            Arc::new(WeatherProvider),
        ));
        let credential = signed_credential(&gate, "weather:Paris");

        let a = gate.admit("weather:Paris", Some(&credential));
        let b = gate.admit("weather:Paris", Some(&credential));
        let (a, b) = tokio::join!(a, b);

        let granted = |admission: Result<Admission, PaymentError>| match admission.unwrap() {
            Admission::Granted(granted) => granted,
            Admission::Challenge(_) => panic!("expected the resource"),
        };
        let (a, b) = (granted(a), granted(b));
        assert_eq!(a.document.get(), b.document.get());
        assert!(a.replayed != b.replayed);
        assert_eq!(settler.count(), 1);
    }

    #[tokio::test]
    async fn mismatched_credential_is_rejected_before_verification() {
        let settler = Arc::new(CountingSettler::default());
        let gate = gate_with("0.10", Arc::new(ApproveAll), Arc::clone(&settler), Arc::new(WeatherProvider));

        let mut credential = signed_credential(&gate, "weather:Paris");
        credential.amount = crate::amount::MicroAmount::from_raw(1);

        let err = gate.admit("weather:Paris", Some(&credential)).await.unwrap_err();
        assert!(matches!(&err, PaymentError::CredentialMismatch(_)));
        assert!(err.requirement().is_some());
        assert_eq!(settler.count(), 0);
    }

    #[tokio::test]
    async fn invalid_credential_never_settles() {
        let settler = Arc::new(CountingSettler::default());
        let gate = gate_with("0.10", Arc::new(RejectAll), Arc::clone(&settler), Arc::new(WeatherProvider));
        let credential = signed_credential(&gate, "weather:Paris");

        let err = gate.admit("weather:Paris", Some(&credential)).await.unwrap_err();
        let PaymentError::InvalidPayment(err) = err else {
            panic!("expected invalid payment, got {err}");
        };
        assert_eq!(err.reason.as_deref(), Some("signature check failed"));
        assert_eq!(settler.count(), 0);
        assert!(gate.cache().get("weather:Paris").await.is_none());
    }

    #[tokio::test]
    async fn declined_settlement_is_surfaced() {
        let gate = gate_with("0.10", Arc::new(ApproveAll), Arc::new(DecliningSettler), Arc::new(WeatherProvider));
        let credential = signed_credential(&gate, "weather:Paris");

        let err = gate.admit("weather:Paris", Some(&credential)).await.unwrap_err();
        let PaymentError::SettlementFailed(err) = err else {
            panic!("expected settlement failure, got {err}");
        };
        assert!(!err.timed_out);
        assert_eq!(err.reason, "insufficient funds");

        // The failed cycle is remembered, but it never replays.
        let record = gate.cache().get("weather:Paris").await.unwrap();
        assert!(!record.success);
        assert_eq!(record.failure_reason.as_deref(), Some("insufficient funds"));
        let admission = gate.admit("weather:Paris", None).await.unwrap();
        assert!(matches!(admission, Admission::Challenge(_)));
    }

    #[tokio::test]
    async fn exhausted_budget_reads_as_timeout() {
        let settler = Arc::new(CountingSettler::default());
        let config = GateConfig::new(policy().with_max_timeout_seconds(0));
        let gate = gate_with_config(
            config,
            "0.10",
            Arc::new(SlowVerifier),
            Arc::clone(&settler),
            Arc::new(WeatherProvider),
        );
        let credential = signed_credential(&gate, "weather:Paris");

        let err = gate.admit("weather:Paris", Some(&credential)).await.unwrap_err();
        let PaymentError::SettlementFailed(err) = err else {
            panic!("expected settlement failure, got {err}");
        };
        assert!(err.timed_out);
        assert_eq!(settler.count(), 0);
    }

    #[tokio::test]
    async fn lookup_failure_after_settlement_keeps_the_proof() {
        let settler = Arc::new(CountingSettler::default());
        let gate = gate_with("0.10", Arc::new(ApproveAll), Arc::clone(&settler), Arc::new(BrokenProvider));
        let credential = signed_credential(&gate, "weather:Paris");

        let err = gate.admit("weather:Paris", Some(&credential)).await.unwrap_err();
        let PaymentError::ResourceUnavailable(unavailable) = err else {
            panic!("expected resource unavailable, got {err}");
        };
        let proof = unavailable.proof.unwrap();
        assert_eq!(proof.transaction_ref, "tx-1");
        assert_eq!(settler.count(), 1);

        // The credential was consumed by that settlement attempt; retrying
        // it cannot double-charge.
        let err = gate.admit("weather:Paris", Some(&credential)).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidPayment(_)));
        assert_eq!(settler.count(), 1);
    }
}
