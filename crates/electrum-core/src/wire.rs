//! JSON-RPC 2.0 wire types and newline framing.
//!
//! `params` and `result` stay opaque (`serde_json::Value`); the core never
//! interprets payloads, upper layers decode them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::DELIMITER;
use crate::errors::ClientError;

/// A JSON-RPC request.
///
/// `params` is always serialized as an array, even when empty.
///
/// <http://docs.electrum.org/en/latest/protocol.html#request>
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    /// Always `"2.0"`.
    #[serde(rename = "jsonrpc")]
    pub rpc: String,
    /// Per-session, monotonically increasing, never reused.
    pub id: u64,
    /// RPC method name.
    pub method: String,
    /// Positional parameters.
    pub params: Vec<Value>,
}

impl Request {
    /// Build a request. An empty parameter list stays an empty array.
    pub fn new(id: u64, method: &str, params: Vec<Value>) -> Self {
        Self {
            rpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    /// Serialize with the trailing message delimiter appended.
    pub fn encode(&self) -> Result<Vec<u8>, ClientError> {
        let mut bytes =
            serde_json::to_vec(self).map_err(|e| ClientError::Encode(e.to_string()))?;
        bytes.push(DELIMITER);
        Ok(bytes)
    }
}

/// Serialize a batch as a JSON array followed by one delimiter.
pub fn encode_batch(requests: &[Request]) -> Result<Vec<u8>, ClientError> {
    let mut bytes =
        serde_json::to_vec(requests).map_err(|e| ClientError::Encode(e.to_string()))?;
    bytes.push(DELIMITER);
    Ok(bytes)
}

/// Error member of a response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Map<String, Value>>,
}

/// A decoded inbound frame element.
///
/// A well-formed frame is either a **response** (`id` plus `result` or
/// `error`) or a **notification** (`method` plus `params`). The dispatcher
/// discriminates on the presence of `method`.
///
/// <http://docs.electrum.org/en/latest/protocol.html#response>
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Response {
    /// Protocol tag; absent on some server versions.
    #[serde(rename = "jsonrpc", default, skip_serializing_if = "String::is_empty")]
    pub rpc: String,
    /// Correlation ID, absent on notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Method name, present only on notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Notification payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Call result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error member; non-empty on failed calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Whether this frame element is a server-push notification.
    pub fn is_notification(&self) -> bool {
        self.method.is_some()
    }
}

/// Decode one inbound frame into its response elements.
///
/// The top-level value may be a single object or a JSON array (a batch);
/// both are accepted regardless of what was sent.
pub fn decode_frame(frame: &[u8]) -> Result<Vec<Response>, ClientError> {
    let value: Value =
        serde_json::from_slice(frame).map_err(|e| ClientError::Decode(e.to_string()))?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item).map_err(|e| ClientError::Decode(e.to_string()))
            })
            .collect(),
        other => Ok(vec![
            serde_json::from_value(other).map_err(|e| ClientError::Decode(e.to_string()))?,
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_encodes_empty_params_as_array() {
        let req = Request::new(0, "server.banner", vec![]);
        let bytes = req.encode().unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert_eq!(
            text,
            "{\"jsonrpc\":\"2.0\",\"id\":0,\"method\":\"server.banner\",\"params\":[]}\n"
        );
    }

    #[test]
    fn request_ends_with_exactly_one_delimiter() {
        let req = Request::new(3, "server.ping", vec![]);
        let bytes = req.encode().unwrap();
        assert_eq!(bytes.last(), Some(&DELIMITER));
        assert_ne!(bytes[bytes.len() - 2], DELIMITER);
    }

    #[test]
    fn request_roundtrip_preserves_fields() {
        let req = Request::new(42, "blockchain.transaction.get", vec![json!("abcd"), json!(true)]);
        let bytes = req.encode().unwrap();
        let back: Request = serde_json::from_slice(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(back.id, 42);
        assert_eq!(back.method, "blockchain.transaction.get");
        assert_eq!(back.params, vec![json!("abcd"), json!(true)]);
        assert_eq!(back.rpc, "2.0");
    }

    #[test]
    fn batch_of_one_is_still_an_array() {
        let reqs = vec![Request::new(0, "a", vec![])];
        let bytes = encode_batch(&reqs).unwrap();
        assert_eq!(bytes[0], b'[');
        assert_eq!(bytes.last(), Some(&DELIMITER));
    }

    #[test]
    fn decode_single_response() {
        let frame = br#"{"jsonrpc":"2.0","id":0,"result":"ElectrumX 1.16.0"}"#;
        let responses = decode_frame(frame).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, Some(0));
        assert_eq!(responses[0].result, Some(json!("ElectrumX 1.16.0")));
        assert!(!responses[0].is_notification());
    }

    #[test]
    fn decode_batch_response() {
        let frame = br#"[{"jsonrpc":"2.0","id":2,"result":1},{"jsonrpc":"2.0","id":0,"result":2}]"#;
        let responses = decode_frame(frame).unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id, Some(2));
        assert_eq!(responses[1].id, Some(0));
    }

    #[test]
    fn decode_notification() {
        let frame =
            br#"{"jsonrpc":"2.0","method":"blockchain.headers.subscribe","params":[{"header":"aa"}]}"#;
        let responses = decode_frame(frame).unwrap();
        assert!(responses[0].is_notification());
        assert_eq!(responses[0].id, None);
        assert_eq!(
            responses[0].method.as_deref(),
            Some("blockchain.headers.subscribe")
        );
    }

    #[test]
    fn decode_error_member() {
        let frame = br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"unknown method"}}"#;
        let responses = decode_frame(frame).unwrap();
        let err = responses[0].error.as_ref().unwrap();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "unknown method");
        assert!(err.data.is_none());
    }

    #[test]
    fn decode_garbage_fails() {
        assert!(matches!(
            decode_frame(b"not json"),
            Err(ClientError::Decode(_))
        ));
    }

    #[test]
    fn decode_batch_with_malformed_element_fails() {
        let frame = br#"[{"jsonrpc":"2.0","id":0,"result":1},"not an object"]"#;
        assert!(decode_frame(frame).is_err());
    }
}
