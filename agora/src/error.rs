//! Error taxonomy for the payment gate.
//!
//! A "payment required" challenge is not represented here: it is a normal
//! protocol outcome (see [`Admission`](crate::gate::Admission)). These
//! types cover the fault paths of a credentialed request. Each carries
//! enough structure for the caller to retry against a fresh requirement or
//! to abandon; none of them should ever escalate into a panic.

use crate::cache::SettlementProof;
use crate::requirement::{PaymentRequirement, RequirementKey};
use std::fmt;
use std::time::Duration;

/// Umbrella error for a credentialed request through the gate.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The credential is bound to a different requirement.
    #[error("{0}")]
    CredentialMismatch(#[from] CredentialMismatchError),

    /// The credential failed verification.
    #[error("{0}")]
    InvalidPayment(#[from] InvalidPaymentError),

    /// Verification passed but the payment could not be settled.
    #[error("{0}")]
    SettlementFailed(#[from] SettlementFailedError),

    /// The paid-for lookup failed; any settlement proof is preserved.
    #[error("{0}")]
    ResourceUnavailable(#[from] ResourceUnavailableError),
}

impl PaymentError {
    /// The fresh requirement to retry against, where one applies.
    #[must_use]
    pub fn requirement(&self) -> Option<&PaymentRequirement> {
        match self {
            Self::CredentialMismatch(err) => Some(&err.requirement),
            Self::InvalidPayment(err) => Some(&err.requirement),
            Self::SettlementFailed(err) => err.requirement.as_deref(),
            Self::ResourceUnavailable(_) => None,
        }
    }
}

/// The submitted credential does not match the server's current
/// requirement for the resource.
#[derive(Debug, Clone)]
pub struct CredentialMismatchError {
    /// The requirement the server expects payment against.
    pub requirement: Box<PaymentRequirement>,
    /// The key the credential was actually bound to.
    pub presented: RequirementKey,
}

impl CredentialMismatchError {
    /// Creates a mismatch error.
    #[must_use]
    pub fn new(requirement: PaymentRequirement, presented: RequirementKey) -> Self {
        Self {
            requirement: Box::new(requirement),
            presented,
        }
    }
}

impl fmt::Display for CredentialMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "credential is bound to a different requirement than the current one"
        )
    }
}

impl std::error::Error for CredentialMismatchError {}

/// The verifier rejected the credential.
#[derive(Debug, Clone)]
pub struct InvalidPaymentError {
    /// The fresh requirement to retry with a new credential.
    pub requirement: Box<PaymentRequirement>,
    /// Machine-readable reason from the verifier, if it gave one.
    pub reason: Option<String>,
}

impl InvalidPaymentError {
    /// Creates an invalid-payment error for the given requirement.
    #[must_use]
    pub fn new(requirement: PaymentRequirement) -> Self {
        Self {
            requirement: Box::new(requirement),
            reason: None,
        }
    }

    /// Attaches the verifier's reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl fmt::Display for InvalidPaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = &self.reason {
            write!(f, "payment credential failed verification: {reason}")
        } else {
            write!(f, "payment credential failed verification")
        }
    }
}

impl std::error::Error for InvalidPaymentError {}

/// Settlement did not complete, including the timeout case.
#[derive(Debug, Clone)]
pub struct SettlementFailedError {
    /// Machine-readable reason.
    pub reason: String,
    /// Whether the failure was the timeout budget running out.
    pub timed_out: bool,
    /// The requirement in force, when known.
    pub requirement: Option<Box<PaymentRequirement>>,
}

impl SettlementFailedError {
    /// Creates a settlement failure with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            timed_out: false,
            requirement: None,
        }
    }

    /// Creates the timeout flavor, naming the exhausted budget.
    #[must_use]
    pub fn timeout(budget: Duration) -> Self {
        Self {
            reason: format!("no response within {}s", budget.as_secs()),
            timed_out: true,
            requirement: None,
        }
    }

    /// Attaches the requirement that was in force.
    #[must_use]
    pub fn with_requirement(mut self, requirement: PaymentRequirement) -> Self {
        self.requirement = Some(Box::new(requirement));
        self
    }
}

impl fmt::Display for SettlementFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timed_out {
            write!(f, "settlement timed out: {}", self.reason)
        } else {
            write!(f, "settlement failed: {}", self.reason)
        }
    }
}

impl std::error::Error for SettlementFailedError {}

/// The underlying lookup failed after the payment pipeline ran.
///
/// When `proof` is set, a payment was actually taken for this failure and
/// the caller owes the payer a compensation path.
#[derive(Debug, Clone)]
pub struct ResourceUnavailableError {
    /// What went wrong with the lookup.
    pub reason: String,
    /// Proof of the settlement that preceded the failure, if one did.
    pub proof: Option<SettlementProof>,
}

impl ResourceUnavailableError {
    /// Creates a resource failure with no payment attached.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            proof: None,
        }
    }

    /// Attaches the proof of the settlement the failure follows.
    #[must_use]
    pub fn with_proof(mut self, proof: SettlementProof) -> Self {
        self.proof = Some(proof);
        self
    }
}

impl fmt::Display for ResourceUnavailableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.proof.is_some() {
            write!(f, "resource unavailable after payment: {}", self.reason)
        } else {
            write!(f, "resource unavailable: {}", self.reason)
        }
    }
}

impl std::error::Error for ResourceUnavailableError {}
