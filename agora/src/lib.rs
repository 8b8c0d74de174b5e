#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for a payment-gated resource access protocol.
//!
//! This crate implements the challenge side of a 402-style payment flow.
//! A server fronts priced resources with a [`gate::PaymentGate`]: a request
//! without payment receives a structured challenge naming the requirement
//! and price, a request carrying a signed credential is verified and
//! settled through externally provided capabilities, and the resource is
//! returned annotated with the settlement proof. Successful settlements
//! are recorded so retries inside a freshness window replay the recorded
//! response instead of charging again.
//!
//! Transport bindings live in separate crates; everything here is
//! transport-neutral.
//!
//! # Overview
//!
//! The gate composes four capabilities: pricing (what a resource key
//! costs), verification (is this credential good for that requirement),
//! settlement (move the money, at most once per credential), and the
//! resource lookup itself. The crate owns the protocol between them:
//! requirement construction, credential matching, the settlement cache,
//! and the error taxonomy.
//!
//! # Modules
//!
//! - [`amount`] - Micro-unit amounts and validated decimal prices
//! - [`cache`] - Settlement records and the freshness-window cache
//! - [`capability`] - Verify, settle, pricing, and lookup interfaces
//! - [`config`] - Pricing policy and gate configuration
//! - [`credential`] - Signed payment credentials and their canonical encoding
//! - [`error`] - Failure taxonomy for the challenge pipeline
//! - [`gate`] - The payment challenge pipeline
//! - [`requirement`] - Payment requirements and challenges
//! - [`timestamp`] - Unix timestamps carried in wire metadata

pub mod amount;
pub mod cache;
pub mod capability;
pub mod config;
pub mod credential;
pub mod error;
pub mod gate;
pub mod requirement;
pub mod timestamp;
