//! Typed subscription adapters.
//!
//! Both ElectrumX subscription methods reply twice over: once with a normal
//! response carrying the initial snapshot in `result`, then with
//! notifications carrying an array in `params`. The adapters decode both
//! shapes onto one outgoing stream, so callers never see the difference.
//! Because the session re-registers subscriptions after a reconnect, the
//! streams below survive dropped connections.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use electrum_core::{ClientError, NotificationHandler, Response};

use crate::client::ElectrumClient;
use crate::types::BlockHeader;

impl ElectrumClient {
    /// Subscribe to `blockchain.headers.subscribe`.
    ///
    /// Yields one [`BlockHeader`] per header the server reports: the initial
    /// snapshot, then every new chain tip. Cancelling `ctx` ends the stream.
    pub async fn notify_block_headers(
        &self,
        ctx: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<BlockHeader>, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: NotificationHandler = std::sync::Arc::new(move |response: Response| {
            for header in decoded_payloads::<BlockHeader>(&response) {
                let _ = tx.send(header);
            }
        });
        self.session()
            .subscribe_with("blockchain.headers.subscribe", vec![], ctx, handler)
            .await?;
        Ok(rx)
    }

    /// Subscribe to `blockchain.address.subscribe` for one address.
    ///
    /// Yields the address status string from the initial snapshot and from
    /// every later change notification.
    pub async fn notify_address_transactions(
        &self,
        ctx: CancellationToken,
        address: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: NotificationHandler = std::sync::Arc::new(move |response: Response| {
            for status in decoded_payloads::<String>(&response) {
                let _ = tx.send(status);
            }
        });
        self.session()
            .subscribe_with(
                "blockchain.address.subscribe",
                vec![Value::String(address.to_string())],
                ctx,
                handler,
            )
            .await?;
        Ok(rx)
    }
}

/// Decode every payload a subscription message carries.
///
/// The initial response holds one value in `result`; push notifications hold
/// an array of values in `params`. Elements that fail to decode are skipped.
fn decoded_payloads<T: DeserializeOwned>(response: &Response) -> Vec<T> {
    let mut decoded = Vec::new();
    if let Some(result) = &response.result {
        if let Ok(value) = serde_json::from_value(result.clone()) {
            decoded.push(value);
        }
    }
    if let Some(Value::Array(items)) = &response.params {
        for item in items {
            if let Ok(value) = serde_json::from_value(item.clone()) {
                decoded.push(value);
            }
        }
    }
    decoded
}
