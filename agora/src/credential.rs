//! Payment credentials submitted by consumers.
//!
//! A [`PaymentCredential`] is the signed token a client attaches when it
//! retries a challenged request. It binds to exactly one requirement by
//! content: the credential repeats the requirement's equivalence fields, so
//! the server can check the binding without correlating request ids. The
//! signing itself is an external concern; the token carries whatever
//! signature the signer produced, opaquely.
//!
//! The canonical encoding (base64 over the credential's JSON, fields in
//! declaration order) is deterministic, which makes the encoded form
//! usable as an idempotency key for settlement.

use crate::amount::MicroAmount;
use crate::requirement::{PaymentRequirement, RequirementKey};
use crate::timestamp::UnixTimestamp;
use base64::prelude::*;
use serde::{Deserialize, Serialize};

/// Signed proof of intent to pay, bound to one requirement by content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCredential {
    /// Payment scheme the credential was produced for.
    pub scheme: String,
    /// Network the payment will settle on.
    pub network: String,
    /// Asset being paid.
    pub asset: String,
    /// Recipient address the payment is destined for.
    pub pay_to: String,
    /// Amount committed, in micro-units.
    pub amount: MicroAmount,
    /// Resource key the bound requirement was built for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_key: Option<String>,
    /// Address of the paying party.
    pub payer: String,
    /// Opaque signature over the payment authorization.
    pub signature: String,
    /// When the credential was produced (stringified Unix seconds).
    pub issued_at: UnixTimestamp,
}

impl PaymentCredential {
    /// Produces a credential bound to the given requirement.
    ///
    /// Copies the requirement's equivalence fields verbatim; the signature
    /// is taken as-is from the external signer.
    #[must_use]
    pub fn for_requirement(
        requirement: &PaymentRequirement,
        payer: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            scheme: requirement.scheme.clone(),
            network: requirement.network.clone(),
            asset: requirement.asset.clone(),
            pay_to: requirement.pay_to.clone(),
            amount: requirement.max_amount_required,
            resource_key: requirement.resource_key().map(str::to_owned),
            payer: payer.into(),
            signature: signature.into(),
            issued_at: UnixTimestamp::now(),
        }
    }

    /// The requirement key this credential is bound to.
    #[must_use]
    pub fn bound_key(&self) -> RequirementKey {
        RequirementKey {
            scheme: self.scheme.clone(),
            network: self.network.clone(),
            asset: self.asset.clone(),
            pay_to: self.pay_to.clone(),
            max_amount_required: self.amount,
            resource_key: self.resource_key.clone(),
        }
    }

    /// Whether this credential is bound to the given requirement, by
    /// content equality on the equivalence key.
    #[must_use]
    pub fn matches(&self, requirement: &PaymentRequirement) -> bool {
        self.bound_key() == requirement.equivalence_key()
    }

    /// Canonical encoding: base64 over the credential's JSON.
    ///
    /// Deterministic for a given credential, so the result doubles as an
    /// idempotency key for settlement attempts.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialCodecError::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String, CredentialCodecError> {
        let json = serde_json::to_vec(self)?;
        Ok(BASE64_STANDARD.encode(&json))
    }

    /// Decodes a credential from its canonical encoding.
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialCodecError`] on base64 or JSON failure.
    pub fn decode(encoded: &str) -> Result<Self, CredentialCodecError> {
        let bytes = BASE64_STANDARD.decode(encoded.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Failures turning a credential into or out of its canonical encoding.
#[derive(Debug, thiserror::Error)]
pub enum CredentialCodecError {
    /// The input is not valid base64.
    #[error("credential is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes are not a well-formed credential.
    #[error("credential JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),
}
