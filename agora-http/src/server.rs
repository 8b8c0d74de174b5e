//! Tower service that serves payment-gated resources.
//!
//! [`GateService`] is a leaf service: route it at the paths your gated
//! resources live under and it drives the whole exchange. A request
//! without an `X-Payment-Header` receives a `402 Payment Required`
//! response with the challenge as its JSON body; a request carrying a
//! credential is admitted through the [`PaymentGate`] and answered with
//! the annotated resource document. Pipeline failures map onto the
//! status codes a paying client can act on: 402 when a new credential
//! would help, 502 when the resource itself is the problem.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use agora::error::PaymentError;
use agora::gate::{Admission, GrantedResource, PaymentGate};
use agora::requirement::PaymentChallenge;
use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::Response;
use futures_util::future::BoxFuture;
use http::header::HeaderValue;
use http::StatusCode;
use serde_json::json;
use tower::Service;

use crate::error::HttpError;
use crate::headers;

/// Maps an incoming request to the resource key it addresses.
///
/// Returning `None` means the request does not name a gated resource;
/// the service answers it with `404 Not Found`.
pub type ResourceKeyFn = Arc<dyn Fn(&Request) -> Option<String> + Send + Sync>;

/// The default key mapping: non-empty path segments joined with `:`.
///
/// `GET /weather/Paris` addresses the resource `weather:Paris`.
#[must_use]
pub fn path_resource_key(req: &Request) -> Option<String> {
    let mut segments = req.uri().path().split('/').filter(|s| !s.is_empty());
    let mut key = segments.next()?.to_owned();
    for segment in segments {
        key.push(':');
        key.push_str(segment);
    }
    Some(key)
}

/// Serves a [`PaymentGate`]'s resources over HTTP.
#[derive(Clone)]
pub struct GateService {
    gate: Arc<PaymentGate>,
    key_fn: ResourceKeyFn,
}

impl fmt::Debug for GateService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateService")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl GateService {
    /// Creates a service over the given gate with [`path_resource_key`]
    /// as the key mapping.
    #[must_use]
    pub fn new(gate: Arc<PaymentGate>) -> Self {
        Self {
            gate,
            key_fn: Arc::new(path_resource_key),
        }
    }

    /// Replaces the request-to-resource-key mapping.
    #[must_use]
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request) -> Option<String> + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }
}

impl Service<Request> for GateService {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gate = Arc::clone(&self.gate);
        // The body plays no part in the exchange; take what the pipeline
        // needs and let the request drop.
        let resource_key = (self.key_fn)(&req);
        let header = headers::payment_header(req.headers()).cloned();

        Box::pin(async move { Ok(respond(&gate, resource_key, header).await) })
    }
}

async fn respond(
    gate: &PaymentGate,
    resource_key: Option<String>,
    header: Option<HeaderValue>,
) -> Response {
    let Some(resource_key) = resource_key else {
        return json_response(StatusCode::NOT_FOUND, &json!({ "error": "Not Found" }));
    };

    let credential = match header.as_ref() {
        None => None,
        Some(value) => match headers::decode_credential(value) {
            Ok(credential) => Some(credential),
            Err(err) => {
                tracing::warn!(resource = %resource_key, error = %err, "unreadable payment header");
                return undecodable_response(gate, &resource_key, &err).await;
            }
        },
    };

    match gate.admit(&resource_key, credential.as_ref()).await {
        Ok(Admission::Granted(granted)) => granted_response(&granted),
        Ok(Admission::Challenge(challenge)) => challenge_response(&challenge),
        Err(err) => error_response(gate, err),
    }
}

/// Answers a request whose payment header did not decode.
///
/// The gate is still consulted without a credential, so free resources
/// and fresh settlements are served rather than rejected; otherwise the
/// regular challenge is re-tagged to say the credential was unreadable.
async fn undecodable_response(
    gate: &PaymentGate,
    resource_key: &str,
    err: &HttpError,
) -> Response {
    match gate.admit(resource_key, None).await {
        Ok(Admission::Granted(granted)) => granted_response(&granted),
        Ok(Admission::Challenge(challenge)) => {
            let challenge = PaymentChallenge::tagged(
                PaymentChallenge::INVALID_PAYMENT,
                format!("Payment credential could not be decoded: {err}"),
                challenge.requirement,
            );
            challenge_response(&challenge)
        }
        Err(gate_err) => error_response(gate, gate_err),
    }
}

fn error_response(gate: &PaymentGate, err: PaymentError) -> Response {
    let currency = gate.config().policy.currency.as_str();
    match err {
        PaymentError::CredentialMismatch(err) => {
            let challenge = PaymentChallenge::tagged(
                PaymentChallenge::INVALID_PAYMENT,
                "Payment credential is bound to a different requirement",
                *err.requirement,
            );
            challenge_response(&challenge)
        }
        PaymentError::InvalidPayment(err) => {
            let challenge =
                PaymentChallenge::invalid_payment(*err.requirement, currency, err.reason.as_deref());
            challenge_response(&challenge)
        }
        PaymentError::SettlementFailed(err) => match err.requirement {
            Some(requirement) => {
                let challenge = PaymentChallenge::tagged(
                    PaymentChallenge::SETTLEMENT_FAILED,
                    format!("Settlement failed: {}", err.reason),
                    *requirement,
                );
                challenge_response(&challenge)
            }
            None => json_response(
                StatusCode::PAYMENT_REQUIRED,
                &json!({ "error": PaymentChallenge::SETTLEMENT_FAILED, "message": err.reason }),
            ),
        },
        PaymentError::ResourceUnavailable(err) => {
            let mut body = json!({ "error": "Resource Unavailable", "message": err.reason });
            if let Some(proof) = err.proof {
                body["payment"] = serde_json::to_value(&proof).unwrap_or_default();
            }
            json_response(StatusCode::BAD_GATEWAY, &body)
        }
    }
}

fn granted_response(granted: &GrantedResource) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(granted.document.get().to_owned()))
        .expect("valid resource response")
}

fn challenge_response(challenge: &PaymentChallenge) -> Response {
    let body = serde_json::to_string(challenge).unwrap_or_default();
    Response::builder()
        .status(StatusCode::PAYMENT_REQUIRED)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("valid challenge response")
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid json response")
}
