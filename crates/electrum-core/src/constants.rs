//! Protocol-level constants shared across the session core.

use std::time::Duration;

/// Library version advertised to the server when no override is given.
pub const LIB_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default agent identifier. The wire agent string is `"<agent>-<version>"`.
pub const DEFAULT_AGENT: &str = "fairbank-electrum";

/// Message delimiter mandated by the Electrum protocol.
///
/// <http://docs.electrum.org/en/latest/protocol.html#format>
pub const DELIMITER: u8 = b'\n';

/// Interval between keep-alive `server.version` requests.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Interval between liveness probes while resuming subscriptions.
pub const RESUME_PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Default per-operation timeout (dial, batch collection).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Base delay for reconnection backoff.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Cap for reconnection backoff.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Capacity of a subscription's notification inbox.
pub const INBOX_CAPACITY: usize = 64;
