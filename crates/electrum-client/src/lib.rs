//! # electrum-client
//!
//! Typed ElectrumX method wrappers over the `electrum-core` session:
//!
//! - [`ElectrumClient`]: `server.*` and `blockchain.*` calls, decoded into
//!   the domain types of [`types`]
//! - Subscription adapters for block headers and address status changes
//! - [`TxCache`]: LRU + TTL cache for verbose transactions
//! - Transaction enrichment joining inputs with their prevouts over one
//!   batched request
//!
//! The session-level API (`call`, `call_batch`, `subscribe`, `close`,
//! configuration, errors) is re-exported from `electrum-core`.

#![deny(unsafe_code)]

mod client;
mod enrich;
mod subscriptions;

pub mod cache;
pub mod types;

pub use cache::{TxCache, TxCacheConfig};
pub use client::ElectrumClient;
pub use electrum_core::{
    ClientError, ConnectionState, ProtocolVersion, Session, SessionConfig, TlsOptions,
};
pub use types::address_from_vout;
