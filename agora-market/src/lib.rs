#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Marketplace order lifecycle on top of the agora payment protocol.
//!
//! Where the [`agora`] crate charges for a single resource request, this
//! crate tracks a purchased unit of work across its whole life:
//! a provider proposes an [`order::Order`] in a conversation, the
//! consumer pays it into escrow, the provider delivers, the consumer
//! reviews. Transitions are idempotent and only ever move forward, so
//! the at-least-once event feeds that drive them can redeliver freely.
//!
//! The pieces compose through the [`market::Marketplace`] facade; each is
//! usable on its own:
//!
//! # Modules
//!
//! - [`order`] - The order lifecycle state machine
//! - [`store`] - Per-order serialized storage
//! - [`session`] - Conversation sessions with bounded history
//! - [`dispatch`] - Ordered, per-conversation event delivery
//! - [`reasoning`] - Strict boundary over the external reasoning capability
//! - [`quote`] - Word-count pricing for inbound requests
//! - [`market`] - The facade wiring stores, dispatch, and lifecycle

pub mod dispatch;
pub mod market;
pub mod order;
pub mod quote;
pub mod reasoning;
pub mod session;
pub mod store;
