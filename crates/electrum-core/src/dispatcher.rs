//! Inbound frame dispatcher.
//!
//! A single long-running reader loop: takes frames off the transport's
//! messages stream, parses each as a single or batch JSON-RPC message, and
//! routes every decoded element through the registry. Transport errors are
//! logged here as well, mirroring the transport's errors stream into the
//! observability sink.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::ClientError;
use crate::registry::Registry;
use crate::wire;

/// Run the dispatcher until the messages stream closes or `cancel` fires.
///
/// Frames that fail to decode are reported and discarded; the loop never
/// mutates the registry except through `route`.
pub(crate) async fn run_dispatcher(
    mut messages: mpsc::UnboundedReceiver<Vec<u8>>,
    mut errors: mpsc::UnboundedReceiver<ClientError>,
    registry: Arc<Registry>,
    cancel: CancellationToken,
) {
    let mut errors_open = true;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            frame = messages.recv() => {
                let Some(frame) = frame else { break };
                match wire::decode_frame(&frame) {
                    Ok(responses) => {
                        for response in responses {
                            registry.route(response).await;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "discarding undecodable frame");
                    }
                }
            }
            error = errors.recv(), if errors_open => {
                match error {
                    Some(e) => warn!(error = %e, "transport error"),
                    None => errors_open = false,
                }
            }
        }
    }
    debug!("dispatcher terminated");
}
