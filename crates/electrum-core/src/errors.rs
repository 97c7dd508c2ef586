//! Session error types.

use thiserror::Error;

/// Errors surfaced by the session core and its typed wrappers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A send, receive, or connect operation failed. May be transient;
    /// the transport keeps reconnecting in the background.
    #[error("transport error: {context}")]
    Transport {
        /// What the transport was doing when it failed.
        context: String,
    },

    /// A send was attempted while the connection is not open.
    #[error("connection is down")]
    ConnectionDown,

    /// An outbound frame could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// An inbound frame could not be parsed.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The response carried a non-empty `error` member.
    #[error("server error: {message}")]
    Server {
        /// Error code reported by the server.
        code: i64,
        /// Error message, propagated verbatim.
        message: String,
    },

    /// `blockchain.transaction.broadcast` reported a rejected transaction.
    #[error("transaction rejected by the server")]
    RejectedTransaction,

    /// The method was removed from the wire protocol at this version.
    #[error("method deprecated on protocol {protocol}")]
    DeprecatedMethod {
        /// The advertised protocol version.
        protocol: String,
    },

    /// The method does not exist at this protocol version.
    #[error("method unavailable on protocol {protocol}")]
    UnavailableMethod {
        /// The advertised protocol version.
        protocol: String,
    },

    /// The session shut down while the operation was in flight.
    #[error("session closed")]
    Closed,

    /// The peer violated the wire protocol (batch response missing an
    /// expected ID, malformed notification shape, oversized frame).
    #[error("protocol violation: {context}")]
    Protocol {
        /// What was violated.
        context: String,
    },

    /// A pending slot already exists for this request ID.
    #[error("duplicate request id {id}")]
    DuplicateId {
        /// The colliding ID.
        id: u64,
    },

    /// An operation exceeded its deadline.
    #[error("timed out after {timeout_ms}ms: {context}")]
    Timeout {
        /// How long we waited.
        timeout_ms: u64,
        /// What we were waiting for.
        context: String,
    },
}

impl ClientError {
    /// Wrap an I/O error with transport context.
    pub(crate) fn transport(context: impl std::fmt::Display) -> Self {
        Self::Transport {
            context: context.to_string(),
        }
    }
}
