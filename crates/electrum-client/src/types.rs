//! Bitcoin domain types, wire-compatible with ElectrumX JSON shapes.
//!
//! Field names match the server's JSON exactly; the session core never
//! touches these, only the typed wrappers decode into them.

use serde::{Deserialize, Serialize};

/// Version information returned by `server.version`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Server software identifier, e.g. `"ElectrumX 1.16.0"`.
    pub software: String,
    /// Negotiated protocol version; empty on protocol 1.0.
    pub protocol: String,
}

/// Endpoints a server can be reached at.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Host {
    /// TLS port, if offered.
    pub ssl_port: Option<u16>,
    /// Plain TCP port, if offered.
    pub tcp_port: Option<u16>,
}

/// State and capabilities reported by `server.features`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// Reachable endpoints, keyed by hostname.
    pub hosts: std::collections::HashMap<String, Host>,
    /// Genesis block hash; detects peers serving a different network.
    pub genesis_hash: String,
    /// Script hash function the server expects (normally `"sha256"`).
    pub hash_function: String,
    /// Server software identifier.
    pub server_version: String,
    /// Highest protocol version the server speaks.
    pub protocol_max: String,
    /// Lowest protocol version the server speaks.
    pub protocol_min: String,
}

/// A known peer server, from `server.peers.subscribe`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Network address.
    pub address: String,
    /// Host name.
    pub name: String,
    /// Feature tags, e.g. `"s50002"`.
    pub features: Vec<String>,
}

/// A confirmed or mempool transaction entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tx {
    /// Transaction hash.
    #[serde(rename = "tx_hash")]
    pub hash: String,
    /// Position within the block.
    #[serde(rename = "tx_pos")]
    pub pos: u64,
    /// Block height; 0 for unconfirmed.
    pub height: u64,
    /// Output value in satoshis (listunspent only).
    pub value: u64,
}

/// The script of a transaction output.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptPubKey {
    /// Output addresses (protocol < 1.4 servers).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,
    /// Output address (protocol >= 1.4 servers).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Script assembly.
    pub asm: String,
    /// Script hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
    /// Required signatures.
    #[serde(rename = "reqSigs", skip_serializing_if = "Option::is_none")]
    pub req_sigs: Option<u32>,
    /// Script type, e.g. `"pubkeyhash"`.
    #[serde(rename = "type")]
    pub kind: String,
}

/// The output side of a transaction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vout {
    /// Output index.
    pub n: u32,
    /// Locking script.
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
    /// Value in coin units.
    pub value: f64,
}

/// The signature script of a transaction input.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSig {
    /// Script assembly.
    pub asm: String,
    /// Script hex.
    pub hex: String,
}

/// The input side of a transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vin {
    /// Coinbase script; non-empty only on coinbase inputs.
    pub coinbase: String,
    /// Unlocking script.
    #[serde(rename = "scriptSig")]
    pub script_sig: ScriptSig,
    /// Input sequence number.
    pub sequence: u32,
    /// Hash of the transaction holding the spent output.
    pub txid: String,
    /// Index of the spent output.
    pub vout: u32,
}

impl Vin {
    /// Whether this input creates coin rather than spending an output.
    pub fn is_coinbase(&self) -> bool {
        !self.coinbase.is_empty() || self.txid.is_empty()
    }
}

/// A decoded transaction, from verbose `blockchain.transaction.get`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerboseTx {
    /// Hash of the containing block.
    pub blockhash: String,
    /// Timestamp of the containing block.
    pub blocktime: u64,
    /// Confirmation count; 0 while in the mempool.
    pub confirmations: i32,
    /// Witness hash.
    pub hash: String,
    /// Raw transaction hex.
    pub hex: String,
    /// Lock time.
    pub locktime: u32,
    /// Serialized size in bytes.
    pub size: u32,
    /// Transaction timestamp.
    pub time: u64,
    /// Transaction ID.
    pub txid: String,
    /// Transaction version.
    pub version: u32,
    /// Inputs.
    pub vin: Vec<Vin>,
    /// Outputs.
    pub vout: Vec<Vout>,
    /// Merkle branch (protocol 1.5+ servers include it inline).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merkle: Option<TxMerkle>,
}

/// An input joined with the output it spends.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VinWithPrevout {
    /// The input.
    #[serde(flatten)]
    pub vin: Vin,
    /// The spent output; `None` for coinbase inputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prevout: Option<Vout>,
}

/// A verbose transaction enriched with prevouts and totals.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RichTx {
    /// The underlying transaction.
    pub tx: VerboseTx,
    /// Inputs joined with the outputs they spend.
    pub vin: Vec<VinWithPrevout>,
    /// Sum of prevout values, in coin units.
    pub inputs_total: f64,
    /// Sum of output values, in coin units.
    pub outputs_total: f64,
    /// `inputs_total - outputs_total`; 0 for coinbase transactions.
    pub fee: f64,
}

/// Merkle branch of a transaction, from `blockchain.transaction.get_merkle`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxMerkle {
    /// Height of the containing block.
    pub block_height: u64,
    /// Position of the transaction within the block.
    pub pos: u64,
    /// Merkle branch hashes.
    pub merkle: Vec<String>,
}

/// Funds available to a script hash or address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Balance {
    /// Confirmed balance in satoshis.
    pub confirmed: u64,
    /// Unconfirmed balance in satoshis.
    pub unconfirmed: u64,
}

/// Summarized details of a block header notification.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockHeader {
    /// Merkle branch, when a checkpoint was requested.
    pub branch: Vec<String>,
    /// Raw header hex.
    pub header: String,
    /// Merkle root, when a checkpoint was requested.
    pub root: String,
}

/// A run of raw headers, from `blockchain.block.headers`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockHeaders {
    /// Number of headers returned.
    pub count: u32,
    /// Concatenated raw header hex.
    #[serde(rename = "hex")]
    pub headers: String,
    /// Maximum number of headers the server will return at once.
    pub max: u32,
    /// Merkle branch, when a checkpoint was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<Vec<String>>,
    /// Merkle root, when a checkpoint was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

/// Resolve the address of an output across the pre/post-1.4 field split.
pub fn address_from_vout(vout: &Vout) -> Option<&str> {
    if let Some(address) = vout.script_pub_key.address.as_deref() {
        if !address.is_empty() {
            return Some(address);
        }
    }
    vout.script_pub_key
        .addresses
        .as_deref()
        .and_then(|addresses| addresses.first())
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tx_decodes_wire_field_names() {
        let tx: Tx = serde_json::from_value(json!({
            "tx_hash": "abcd",
            "tx_pos": 3,
            "height": 100,
            "value": 5000
        }))
        .unwrap();
        assert_eq!(tx.hash, "abcd");
        assert_eq!(tx.pos, 3);
        assert_eq!(tx.value, 5000);
    }

    #[test]
    fn tx_missing_fields_default() {
        let tx: Tx = serde_json::from_value(json!({
            "tx_hash": "abcd",
            "height": 100
        }))
        .unwrap();
        assert_eq!(tx.pos, 0);
        assert_eq!(tx.value, 0);
    }

    #[test]
    fn verbose_tx_decodes_nested_shapes() {
        let tx: VerboseTx = serde_json::from_value(json!({
            "txid": "t1",
            "confirmations": 6,
            "vin": [{"txid": "t0", "vout": 1, "scriptSig": {"asm": "a", "hex": "b"}, "sequence": 4294967295u32}],
            "vout": [{"n": 0, "value": 0.5, "scriptPubKey": {"type": "pubkeyhash", "asm": "", "address": "1Abc"}}]
        }))
        .unwrap();
        assert_eq!(tx.vin.len(), 1);
        assert_eq!(tx.vin[0].script_sig.asm, "a");
        assert_eq!(tx.vout[0].script_pub_key.kind, "pubkeyhash");
        assert!(!tx.vin[0].is_coinbase());
    }

    #[test]
    fn coinbase_vin_detected() {
        let vin: Vin = serde_json::from_value(json!({
            "coinbase": "04ffff001d",
            "sequence": 4294967295u32
        }))
        .unwrap();
        assert!(vin.is_coinbase());
    }

    #[test]
    fn address_from_vout_prefers_singular_field() {
        let vout = Vout {
            script_pub_key: ScriptPubKey {
                address: Some("1New".into()),
                addresses: Some(vec!["1Old".into()]),
                ..ScriptPubKey::default()
            },
            ..Vout::default()
        };
        assert_eq!(address_from_vout(&vout), Some("1New"));
    }

    #[test]
    fn address_from_vout_falls_back_to_list() {
        let vout = Vout {
            script_pub_key: ScriptPubKey {
                addresses: Some(vec!["1Old".into(), "1Other".into()]),
                ..ScriptPubKey::default()
            },
            ..Vout::default()
        };
        assert_eq!(address_from_vout(&vout), Some("1Old"));
    }

    #[test]
    fn address_from_vout_none_when_absent() {
        let vout = Vout::default();
        assert_eq!(address_from_vout(&vout), None);
    }

    #[test]
    fn block_headers_renames_hex() {
        let headers: BlockHeaders = serde_json::from_value(json!({
            "count": 2,
            "hex": "00aa00bb",
            "max": 2016
        }))
        .unwrap();
        assert_eq!(headers.headers, "00aa00bb");
        assert_eq!(headers.max, 2016);
    }

    #[test]
    fn balance_decodes() {
        let balance: Balance = serde_json::from_value(json!({
            "confirmed": 100_000,
            "unconfirmed": 250
        }))
        .unwrap();
        assert_eq!(balance.confirmed, 100_000);
        assert_eq!(balance.unconfirmed, 250);
    }

    #[test]
    fn peer_roundtrip() {
        let peer = Peer {
            address: "1.2.3.4".into(),
            name: "node.example.org".into(),
            features: vec!["s50002".into()],
        };
        let json = serde_json::to_string(&peer).unwrap();
        let back: Peer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, peer);
    }
}
