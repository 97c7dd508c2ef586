//! # electrum-core
//!
//! The session core of an ElectrumX protocol client: a long-lived,
//! reconnecting, multiplexed JSON-RPC-over-newline-delimited-TLS client that
//! concurrently serves synchronous calls, server-push subscriptions, and
//! batched requests against a single upstream server.
//!
//! Four collaborating components:
//!
//! - [`transport::Transport`]: owns one TCP/TLS connection, frames
//!   newline-delimited messages both ways, emits connection-state events,
//!   and redials in the background with capped exponential backoff.
//! - The registry: maps in-flight request IDs and active subscriptions to
//!   their waiters and issues monotonically increasing IDs.
//! - The dispatcher: parses each inbound frame as a single or batch
//!   JSON-RPC message and routes by ID (responses) or method name
//!   (notifications).
//! - [`session::Session`]: exposes `call`, `call_batch`, `subscribe`, and
//!   `close`; runs the keep-alive ticker and resumes subscriptions after a
//!   reconnect.
//!
//! Payloads (`params`, `result`) are opaque [`serde_json::Value`]s; typed
//! method wrappers live in the companion `electrum-client` crate.

#![deny(unsafe_code)]

mod dispatcher;
mod registry;

pub mod config;
pub mod constants;
pub mod errors;
pub mod session;
pub mod transport;
pub mod wire;

pub use config::{ProtocolVersion, SessionConfig, TlsOptions};
pub use errors::ClientError;
pub use registry::NotificationHandler;
pub use session::Session;
pub use transport::ConnectionState;
pub use wire::{Request, Response, RpcError};
