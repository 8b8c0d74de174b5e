//! Credential transport through the `X-Payment-Header` header.
//!
//! The header value is the credential's canonical encoding, base64 over
//! its JSON form, produced and consumed by
//! [`agora::credential::PaymentCredential`].

use agora::credential::PaymentCredential;
use http::header::{HeaderMap, HeaderValue};

use crate::constants::X_PAYMENT_HEADER;
use crate::error::HttpError;

/// Returns the raw credential header, if the request carries one.
#[must_use]
pub fn payment_header(headers: &HeaderMap) -> Option<&HeaderValue> {
    headers.get(X_PAYMENT_HEADER)
}

/// Decodes a credential from a header value.
///
/// # Errors
///
/// Returns [`HttpError`] when the value is not visible ASCII or does not
/// decode as a credential.
pub fn decode_credential(value: &HeaderValue) -> Result<PaymentCredential, HttpError> {
    let text = value.to_str()?;
    Ok(PaymentCredential::decode(text)?)
}

/// Encodes a credential into an `X-Payment-Header` value.
///
/// # Errors
///
/// Returns [`HttpError::Credential`] if serialization fails.
pub fn credential_header_value(credential: &PaymentCredential) -> Result<HeaderValue, HttpError> {
    let encoded = credential.encode()?;
    Ok(HeaderValue::from_str(&encoded)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora::amount::MicroAmount;

    fn credential() -> PaymentCredential {
        PaymentCredential {
            scheme: "exact".to_owned(),
            network: "solana-devnet".to_owned(),
            asset: "usdc-mint".to_owned(),
            pay_to: "provider-wallet".to_owned(),
            amount: MicroAmount::from_raw(100_000),
            resource_key: Some("weather:Paris".to_owned()),
            payer: "customer-wallet".to_owned(),
            signature: "sig-1".to_owned(),
            issued_at: agora::timestamp::UnixTimestamp::from_secs(1_700_000_000),
        }
    }

    #[test]
    fn credential_survives_the_header() {
        let mut headers = HeaderMap::new();
        let value = credential_header_value(&credential()).unwrap();
        headers.insert(X_PAYMENT_HEADER, value);

        let raw = payment_header(&headers).unwrap();
        let decoded = decode_credential(raw).unwrap();
        assert_eq!(decoded, credential());
    }

    #[test]
    fn garbage_header_is_rejected() {
        let value = HeaderValue::from_static("not base64 at all!!!");
        let err = decode_credential(&value).unwrap_err();
        assert!(matches!(err, HttpError::Credential(_)));
    }

    #[test]
    fn missing_header_reads_as_none() {
        let headers = HeaderMap::new();
        assert!(payment_header(&headers).is_none());
    }
}
