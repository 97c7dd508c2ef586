//! Typed ElectrumX method wrappers.
//!
//! Every wrapper is thin: build a request, hand it to the session core,
//! decode the `result` payload. Methods that were added or removed across
//! protocol versions are gated on the advertised version.
//!
//! <https://electrumx.readthedocs.io/en/latest/protocol-methods.html>

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use electrum_core::{ClientError, ProtocolVersion, Response, Session, SessionConfig};

use crate::cache::TxCache;
use crate::types::{
    Balance, BlockHeaders, Peer, ServerInfo, Tx, VerboseTx, VersionInfo,
};

/// A protocol client bound to one upstream server.
///
/// Wraps the session core with typed methods, protocol-version gating, and
/// the verbose-transaction cache.
pub struct ElectrumClient {
    session: Arc<Session>,
    protocol: ProtocolVersion,
    /// Wire agent string, `"<agent>-<version>"`.
    agent: String,
    pub(crate) cache: Mutex<TxCache>,
}

impl ElectrumClient {
    /// Dial the configured server and start processing.
    pub async fn connect(config: SessionConfig) -> Result<Self, ClientError> {
        let protocol = config.protocol;
        let agent = config.agent_string();
        let session = Session::connect(config).await?;
        Ok(Self {
            session,
            protocol,
            agent,
            cache: Mutex::new(TxCache::default()),
        })
    }

    /// The underlying session, for raw calls and subscriptions.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The advertised protocol version.
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Shut down the session.
    pub async fn close(&self) {
        self.session.close().await;
    }

    pub(crate) async fn call_decoded<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ClientError> {
        let response = self.session.call(method, params).await?;
        decode_result(response)
    }

    // ─── server.* ────────────────────────────────────────────────────────

    /// `server.ping`. Keeps the session alive; the server may disconnect
    /// clients idle for roughly ten minutes.
    ///
    /// Not part of the wire protocol before 1.2.
    pub async fn server_ping(&self) -> Result<(), ClientError> {
        match self.protocol {
            ProtocolVersion::V1_2 | ProtocolVersion::V1_4 | ProtocolVersion::V1_4_2 => {
                let _ = self.session.call("server.ping", vec![]).await?;
                Ok(())
            }
            other => Err(ClientError::UnavailableMethod {
                protocol: other.as_str().to_string(),
            }),
        }
    }

    /// `server.version`. Identifies the client and negotiates the protocol.
    pub async fn server_version(&self) -> Result<VersionInfo, ClientError> {
        let response = self
            .session
            .call(
                "server.version",
                vec![json!(self.agent), json!(self.protocol.as_str())],
            )
            .await?;
        match self.protocol {
            ProtocolVersion::V1_0 => {
                let software: String = decode_result(response)?;
                Ok(VersionInfo {
                    software,
                    protocol: String::new(),
                })
            }
            _ => {
                let pair: Vec<String> = decode_result(response)?;
                let mut parts = pair.into_iter();
                let software = parts.next().unwrap_or_default();
                let protocol = parts.next().unwrap_or_default();
                Ok(VersionInfo { software, protocol })
            }
        }
    }

    /// `server.banner`.
    pub async fn server_banner(&self) -> Result<String, ClientError> {
        self.call_decoded("server.banner", vec![]).await
    }

    /// `server.donation_address`.
    pub async fn server_donation_address(&self) -> Result<String, ClientError> {
        self.call_decoded("server.donation_address", vec![]).await
    }

    /// `server.features`. Not offered on protocol 1.0.
    pub async fn server_features(&self) -> Result<ServerInfo, ClientError> {
        if self.protocol == ProtocolVersion::V1_0 {
            return Err(ClientError::UnavailableMethod {
                protocol: self.protocol.as_str().to_string(),
            });
        }
        self.call_decoded("server.features", vec![]).await
    }

    /// `server.peers.subscribe`. Despite the name this is a one-shot query.
    pub async fn server_peers(&self) -> Result<Vec<Peer>, ClientError> {
        let entries: Vec<Value> = self.call_decoded("server.peers.subscribe", vec![]).await?;
        let mut peers = Vec::with_capacity(entries.len());
        for entry in entries {
            // Each entry is [address, name, [feature, ...]]; skip anything
            // that does not match.
            let Some(parts) = entry.as_array() else {
                debug!("skipping malformed peer entry");
                continue;
            };
            let (Some(address), Some(name)) =
                (parts.first().and_then(Value::as_str), parts.get(1).and_then(Value::as_str))
            else {
                debug!("skipping malformed peer entry");
                continue;
            };
            let features = parts
                .get(2)
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            peers.push(Peer {
                address: address.to_string(),
                name: name.to_string(),
                features,
            });
        }
        Ok(peers)
    }

    // ─── blockchain.scripthash.* ─────────────────────────────────────────

    /// `blockchain.scripthash.get_balance`.
    pub async fn script_hash_balance(&self, script_hash: &str) -> Result<Balance, ClientError> {
        self.call_decoded("blockchain.scripthash.get_balance", vec![json!(script_hash)])
            .await
    }

    /// `blockchain.scripthash.get_history`.
    pub async fn script_hash_history(&self, script_hash: &str) -> Result<Vec<Tx>, ClientError> {
        self.call_decoded("blockchain.scripthash.get_history", vec![json!(script_hash)])
            .await
    }

    /// `blockchain.scripthash.get_mempool`.
    pub async fn script_hash_mempool(&self, script_hash: &str) -> Result<Vec<Tx>, ClientError> {
        self.call_decoded("blockchain.scripthash.get_mempool", vec![json!(script_hash)])
            .await
    }

    /// `blockchain.scripthash.listunspent`.
    pub async fn script_hash_list_unspent(
        &self,
        script_hash: &str,
    ) -> Result<Vec<Tx>, ClientError> {
        self.call_decoded("blockchain.scripthash.listunspent", vec![json!(script_hash)])
            .await
    }

    // ─── blockchain.address.* (legacy) ───────────────────────────────────

    /// `blockchain.address.get_balance`. Removed from the wire protocol
    /// after 1.0; use [`script_hash_balance`](Self::script_hash_balance).
    pub async fn address_balance(&self, address: &str) -> Result<Balance, ClientError> {
        self.legacy_gate()?;
        self.call_decoded("blockchain.address.get_balance", vec![json!(address)])
            .await
    }

    /// `blockchain.address.get_history`. Protocol 1.0 only.
    pub async fn address_history(&self, address: &str) -> Result<Vec<Tx>, ClientError> {
        self.legacy_gate()?;
        self.call_decoded("blockchain.address.get_history", vec![json!(address)])
            .await
    }

    /// `blockchain.address.get_mempool`. Protocol 1.0 only.
    pub async fn address_mempool(&self, address: &str) -> Result<Vec<Tx>, ClientError> {
        self.legacy_gate()?;
        self.call_decoded("blockchain.address.get_mempool", vec![json!(address)])
            .await
    }

    /// `blockchain.address.listunspent`. Protocol 1.0 only.
    pub async fn address_list_unspent(&self, address: &str) -> Result<Vec<Tx>, ClientError> {
        self.legacy_gate()?;
        self.call_decoded("blockchain.address.listunspent", vec![json!(address)])
            .await
    }

    fn legacy_gate(&self) -> Result<(), ClientError> {
        if self.protocol == ProtocolVersion::V1_0 {
            Ok(())
        } else {
            Err(ClientError::DeprecatedMethod {
                protocol: self.protocol.as_str().to_string(),
            })
        }
    }

    // ─── blockchain.block.* ──────────────────────────────────────────────

    /// `blockchain.block.header`: the raw header at `height`, as hex.
    pub async fn block_header(&self, height: u64) -> Result<String, ClientError> {
        self.call_decoded("blockchain.block.header", vec![json!(height)])
            .await
    }

    /// `blockchain.block.headers`: a run of `count` raw headers starting at
    /// `start_height`.
    pub async fn block_headers(
        &self,
        start_height: u64,
        count: u64,
    ) -> Result<BlockHeaders, ClientError> {
        self.call_decoded(
            "blockchain.block.headers",
            vec![json!(start_height), json!(count)],
        )
        .await
    }

    // ─── blockchain.transaction.* / estimatefee ──────────────────────────

    /// `blockchain.transaction.broadcast`. A missing result or a result
    /// string mentioning rejection maps to
    /// [`ClientError::RejectedTransaction`] so callers can discriminate.
    pub async fn transaction_broadcast(&self, raw_hex: &str) -> Result<String, ClientError> {
        let response = self
            .session
            .call("blockchain.transaction.broadcast", vec![json!(raw_hex)])
            .await?;
        match response.result {
            Some(Value::String(txid)) if !txid.contains("rejected") => Ok(txid),
            _ => Err(ClientError::RejectedTransaction),
        }
    }

    /// `blockchain.transaction.get`: raw transaction hex.
    pub async fn transaction_get(&self, tx_hash: &str) -> Result<String, ClientError> {
        self.call_decoded("blockchain.transaction.get", vec![json!(tx_hash)])
            .await
    }

    /// Verbose `blockchain.transaction.get`, served from the cache when
    /// possible. Confirmed transactions are stored back into the cache.
    pub async fn transaction_get_verbose(&self, tx_hash: &str) -> Result<VerboseTx, ClientError> {
        if let Some(value) = self.cache.lock().get(tx_hash) {
            debug!(tx_hash, "verbose transaction served from cache");
            return serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()));
        }

        let response = self
            .session
            .call(
                "blockchain.transaction.get",
                vec![json!(tx_hash), json!(true)],
            )
            .await?;
        let result = response.result.ok_or_else(|| ClientError::Protocol {
            context: "transaction response carries no result".to_string(),
        })?;
        let tx: VerboseTx =
            serde_json::from_value(result.clone()).map_err(|e| ClientError::Decode(e.to_string()))?;
        self.cache.lock().insert(tx_hash, tx.confirmations, result);
        Ok(tx)
    }

    /// `blockchain.transaction.get_merkle`.
    pub async fn transaction_merkle(
        &self,
        tx_hash: &str,
        height: u64,
    ) -> Result<crate::types::TxMerkle, ClientError> {
        self.call_decoded(
            "blockchain.transaction.get_merkle",
            vec![json!(tx_hash), json!(height)],
        )
        .await
    }

    /// `blockchain.estimatefee`: the fee rate in coin units per kilobyte for
    /// confirmation within `blocks` blocks; -1 when the server has no
    /// estimate.
    pub async fn estimate_fee(&self, blocks: u32) -> Result<f64, ClientError> {
        self.call_decoded("blockchain.estimatefee", vec![json!(blocks)])
            .await
    }
}

pub(crate) fn decode_result<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let result = response.result.ok_or_else(|| ClientError::Protocol {
        context: "response carries no result".to_string(),
    })?;
    serde_json::from_value(result).map_err(|e| ClientError::Decode(e.to_string()))
}
