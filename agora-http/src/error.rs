//! Error types for the HTTP transport layer.

use agora::amount::MicroAmount;
use agora::credential::CredentialCodecError;

/// Errors that can occur while moving credentials through HTTP headers.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The credential could not be encoded or decoded.
    #[error("credential codec error: {0}")]
    Credential(#[from] CredentialCodecError),

    /// The header value contains bytes outside visible ASCII.
    #[error("header value is not visible ASCII: {0}")]
    HeaderEncoding(#[from] http::header::ToStrError),

    /// The encoded credential is not a valid header value.
    #[error("invalid header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),
}

/// Errors raised by the paying client middleware.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The 402 response body did not parse as a challenge.
    #[error("402 challenge could not be parsed: {0}")]
    Challenge(String),

    /// The configured signer refused or failed to produce a credential.
    #[error("credential signing failed: {0}")]
    Signer(String),

    /// The challenge asks for more than the configured spending cap.
    #[error("challenge requires {required} micro-units, above the configured cap of {cap}")]
    OverBudget {
        /// Amount the challenge asks for.
        required: MicroAmount,
        /// The client's configured cap.
        cap: MicroAmount,
    },

    /// The original request body cannot be cloned for the payment retry.
    #[error("request cannot be cloned for the payment retry")]
    RequestNotCloneable,

    /// Header encoding of the signed credential failed.
    #[error(transparent)]
    Transport(#[from] HttpError),
}
