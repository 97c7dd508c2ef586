//! Session configuration.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_AGENT, DEFAULT_TIMEOUT, LIB_VERSION};

/// Protocol versions understood by ElectrumX servers.
///
/// <https://electrumx.readthedocs.io/en/latest/protocol-changes.html>
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Protocol 1.0.
    #[serde(rename = "1.0")]
    V1_0,
    /// Protocol 1.1.
    #[serde(rename = "1.1")]
    V1_1,
    /// Protocol 1.2.
    #[serde(rename = "1.2")]
    V1_2,
    /// Protocol 1.4.
    #[serde(rename = "1.4")]
    V1_4,
    /// Protocol 1.4.2, the latest supported version.
    #[default]
    #[serde(rename = "1.4.2")]
    V1_4_2,
}

impl ProtocolVersion {
    /// Wire representation of the version tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V1_1 => "1.1",
            Self::V1_2 => "1.2",
            Self::V1_4 => "1.4",
            Self::V1_4_2 => "1.4.2",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.0" => Ok(Self::V1_0),
            "1.1" => Ok(Self::V1_1),
            "1.2" => Ok(Self::V1_2),
            "1.4" => Ok(Self::V1_4),
            "1.4.2" => Ok(Self::V1_4_2),
            other => Err(format!("unknown protocol version '{other}'")),
        }
    }
}

/// TLS settings for the upstream connection.
#[derive(Clone)]
pub struct TlsOptions {
    /// The rustls client configuration to use for the handshake.
    pub config: Arc<rustls::ClientConfig>,
    /// Server name for SNI and certificate verification. Defaults to the
    /// host part of the session address.
    pub server_name: Option<String>,
}

impl TlsOptions {
    /// TLS options trusting the Mozilla webpki root store.
    pub fn with_webpki_roots() -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self {
            config: Arc::new(config),
            server_name: None,
        }
    }
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Configuration for a [`Session`](crate::session::Session).
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Upstream `host:port` (required).
    pub address: String,
    /// When present, wrap the connection in TLS; when absent, plain TCP.
    pub tls: Option<TlsOptions>,
    /// Advertised protocol version.
    pub protocol: ProtocolVersion,
    /// Client version string advertised to the server.
    pub version: String,
    /// Agent identifier; concatenated with the version on the wire.
    pub agent: String,
    /// Dispatch a keep-alive request every 60 seconds.
    pub keep_alive: bool,
    /// Per-operation timeout hint (dial, batch collection).
    pub timeout: Duration,
    /// Soft limit on inbound frame size; unbounded when `None`.
    pub max_frame_len: Option<usize>,
}

impl SessionConfig {
    /// Configuration for the given address with every other option at its
    /// default.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tls: None,
            protocol: ProtocolVersion::default(),
            version: LIB_VERSION.to_string(),
            agent: DEFAULT_AGENT.to_string(),
            keep_alive: false,
            timeout: DEFAULT_TIMEOUT,
            max_frame_len: None,
        }
    }

    /// The agent string transmitted to the server: `"<agent>-<version>"`.
    pub fn agent_string(&self) -> String {
        format!("{}-{}", self.agent, self.version)
    }
}
