//! HTTP constants for the payment challenge protocol.

/// Credential header name (client to server).
///
/// The canonical spelling on the wire is `X-Payment-Header`; the constant
/// is lowercase so it can be used with [`http::HeaderName::from_static`],
/// and header lookups are case-insensitive anyway.
pub const X_PAYMENT_HEADER: &str = "x-payment-header";
