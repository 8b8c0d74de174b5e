//! Reqwest middleware that pays challenges automatically.
//!
//! [`PayingClient`] intercepts `402 Payment Required` responses, parses
//! the challenge from the body, asks a [`CredentialSigner`] for a signed
//! credential, and retries the request once with the `X-Payment-Header`
//! attached. Any other status passes through untouched, as does the
//! second response even if it is another 402.

use std::fmt;
use std::sync::Arc;

use agora::amount::MicroAmount;
use agora::capability::CapabilityError;
use agora::credential::PaymentCredential;
use agora::requirement::PaymentChallenge;
use http::{Extensions, HeaderName, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware as rqm;

use crate::constants::X_PAYMENT_HEADER;
use crate::error::ClientError;
use crate::headers;

/// Produces signed payment credentials for challenges.
///
/// Implementations hold whatever key material the payment scheme needs;
/// the middleware only cares that the credential is bound to the
/// challenged requirement. [`PaymentCredential::for_requirement`] does
/// the binding for signers that sign in place.
#[async_trait::async_trait]
pub trait CredentialSigner: Send + Sync {
    /// Signs a credential for the challenged requirement.
    async fn sign(&self, challenge: &PaymentChallenge)
    -> Result<PaymentCredential, CapabilityError>;
}

/// Reqwest middleware that answers 402 challenges with signed credentials.
#[derive(Clone)]
pub struct PayingClient {
    signer: Arc<dyn CredentialSigner>,
    max_amount: Option<MicroAmount>,
}

impl fmt::Debug for PayingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayingClient")
            .field("max_amount", &self.max_amount)
            .finish_non_exhaustive()
    }
}

impl PayingClient {
    /// Creates the middleware around a signer.
    #[must_use]
    pub fn new(signer: impl CredentialSigner + 'static) -> Self {
        Self {
            signer: Arc::new(signer),
            max_amount: None,
        }
    }

    /// Refuses challenges above the given amount.
    ///
    /// A challenge over the cap is not paid; the middleware fails with
    /// [`ClientError::OverBudget`] instead of signing.
    #[must_use]
    pub const fn with_max_amount(mut self, cap: MicroAmount) -> Self {
        self.max_amount = Some(cap);
        self
    }

    /// Builds a ready-to-use reqwest client with payment handling.
    #[must_use]
    pub fn build_reqwest(signer: impl CredentialSigner + 'static) -> rqm::ClientWithMiddleware {
        rqm::ClientBuilder::new(reqwest::Client::new())
            .with(Self::new(signer))
            .build()
    }
}

#[async_trait::async_trait]
impl rqm::Middleware for PayingClient {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        // Clone up front; a streaming body cannot be cloned after send.
        let retry_req = req.try_clone();

        let response = next.clone().run(req, extensions).await?;
        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(response);
        }

        let url = response.url().clone();
        tracing::info!(%url, "received payment challenge");

        let challenge: PaymentChallenge = response
            .json()
            .await
            .map_err(|err| middleware_error(ClientError::Challenge(err.to_string())))?;

        if let Some(cap) = self.max_amount {
            let required = challenge.requirement.max_amount_required;
            if required > cap {
                tracing::warn!(%url, %required, %cap, "challenge exceeds spending cap");
                return Err(middleware_error(ClientError::OverBudget { required, cap }));
            }
        }

        let credential = self
            .signer
            .sign(&challenge)
            .await
            .map_err(|err| middleware_error(ClientError::Signer(err.to_string())))?;

        let mut retry =
            retry_req.ok_or_else(|| middleware_error(ClientError::RequestNotCloneable))?;
        let value = headers::credential_header_value(&credential)
            .map_err(|err| middleware_error(ClientError::Transport(err)))?;
        retry
            .headers_mut()
            .insert(HeaderName::from_static(X_PAYMENT_HEADER), value);

        tracing::debug!(%url, "retrying with signed credential");
        next.run(retry, extensions).await
    }
}

fn middleware_error(err: ClientError) -> rqm::Error {
    rqm::Error::Middleware(err.into())
}
