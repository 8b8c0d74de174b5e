#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport binding for the agora payment challenge protocol.
//!
//! Maps the transport-neutral challenge flow from the [`agora`] crate onto
//! HTTP: a challenge travels as a `402 Payment Required` response with the
//! [`PaymentChallenge`](agora::requirement::PaymentChallenge) as its JSON
//! body, and the credential travels back in the dedicated
//! `X-Payment-Header` request header, base64-encoded, never in the body.
//!
//! Both ends of the exchange are provided:
//!
//! - [`server::GateService`] — a tower `Service` that fronts a
//!   [`PaymentGate`](agora::gate::PaymentGate), usable directly as an axum
//!   route service
//! - [`client::PayingClient`] — reqwest middleware that pays 402
//!   challenges with a signed credential and retries once
//!
//! # Modules
//!
//! - [`constants`] — header names and status codes
//! - [`headers`] — credential encoding into and out of header values
//! - [`error`] — transport and paying-client error types
//! - [`server`] — the payment-gated tower service
//! - [`client`] — the auto-paying reqwest middleware

pub mod client;
pub mod constants;
pub mod error;
pub mod headers;
pub mod server;
