//! Owns the network connection: dial, newline framing, background reconnect.
//!
//! The transport holds exactly one outbound connection (TLS when configured,
//! plain TCP otherwise). Inbound bytes are split on the message delimiter and
//! emitted one frame per message; outbound frames are written through a
//! serialized write path. On a read or write failure the background task
//! redials with capped exponential backoff and signals the transition on the
//! state stream. The transport never replays messages, it only signals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TlsOptions;
use crate::constants::{DELIMITER, RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY};
use crate::errors::ClientError;

/// Connection lifecycle transitions emitted on the state stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Emitted exactly once, at the initial dial.
    Connected,
    /// The connection dropped; redialing in the background.
    Disconnected,
    /// A redial succeeded.
    Reconnected,
}

/// Dial parameters for the transport.
#[derive(Clone)]
pub struct TransportOptions {
    /// Upstream `host:port`.
    pub address: String,
    /// TLS settings; plain TCP when absent.
    pub tls: Option<TlsOptions>,
    /// Dial timeout.
    pub timeout: Duration,
    /// Soft limit on inbound frame size. Oversized frames are discarded and
    /// reported on the errors stream; unbounded when `None`.
    pub max_frame_len: Option<usize>,
}

/// Streams produced by the transport's background task.
pub struct TransportEvents {
    /// One element per newline-delimited frame, delimiter stripped.
    pub messages: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Transient read/write errors observed in the background.
    pub errors: mpsc::UnboundedReceiver<ClientError>,
    /// Connection state transitions.
    pub state: mpsc::UnboundedReceiver<ConnectionState>,
}

/// Either a plain TCP stream or a TLS stream over one.
trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

type BoxedStream = Box<dyn RawStream>;
type Writer = WriteHalf<BoxedStream>;
type Reader = ReadHalf<BoxedStream>;

/// One outbound connection with newline framing both ways.
pub struct Transport {
    options: TransportOptions,
    /// Serialized write path. `None` while disconnected.
    writer: Mutex<Option<Writer>>,
    connected: AtomicBool,
    cancel: CancellationToken,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Dial the upstream and start the background reader.
    ///
    /// Emits [`ConnectionState::Connected`] on the state stream once the
    /// initial connection is established.
    pub async fn connect(
        options: TransportOptions,
    ) -> Result<(Arc<Self>, TransportEvents), ClientError> {
        let stream = dial(&options).await?;
        let (reader, writer) = tokio::io::split(stream);

        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let _ = state_tx.send(ConnectionState::Connected);

        let transport = Arc::new(Self {
            options,
            writer: Mutex::new(Some(writer)),
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            reader_task: Mutex::new(None),
        });

        let task = tokio::spawn(run_reader(
            Arc::clone(&transport),
            reader,
            messages_tx,
            errors_tx,
            state_tx,
        ));
        *transport.reader_task.lock().await = Some(task);

        Ok((
            transport,
            TransportEvents {
                messages: messages_rx,
                errors: errors_rx,
                state: state_rx,
            },
        ))
    }

    /// Whether the connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Write one pre-framed message (delimiter already appended).
    ///
    /// Fails with [`ClientError::ConnectionDown`] if the connection is not
    /// currently open. A write failure marks the connection down; the
    /// background task observes the broken socket and redials.
    pub async fn send(&self, frame: &[u8]) -> Result<(), ClientError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::ConnectionDown)?;
        let result = match writer.write_all(frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            *guard = None;
            self.connected.store(false, Ordering::Relaxed);
            return Err(ClientError::transport(e));
        }
        Ok(())
    }

    /// Terminate background work and close the socket.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.connected.store(false, Ordering::Relaxed);
        if let Some(task) = self.reader_task.lock().await.take() {
            let _ = task.await;
        }
    }
}

/// Dial the upstream, wrapping in TLS when configured.
async fn dial(options: &TransportOptions) -> Result<BoxedStream, ClientError> {
    let tcp = tokio::time::timeout(options.timeout, TcpStream::connect(&options.address))
        .await
        .map_err(|_| ClientError::Timeout {
            timeout_ms: options.timeout.as_millis() as u64,
            context: format!("dialing {}", options.address),
        })?
        .map_err(ClientError::transport)?;

    match &options.tls {
        None => Ok(Box::new(tcp)),
        Some(tls) => {
            let host = tls.server_name.clone().unwrap_or_else(|| {
                options
                    .address
                    .rsplit_once(':')
                    .map_or(options.address.as_str(), |(host, _)| host)
                    .to_string()
            });
            let server_name = ServerName::try_from(host)
                .map_err(|e| ClientError::transport(format!("invalid server name: {e}")))?;
            let connector = TlsConnector::from(Arc::clone(&tls.config));
            let stream = tokio::time::timeout(options.timeout, connector.connect(server_name, tcp))
                .await
                .map_err(|_| ClientError::Timeout {
                    timeout_ms: options.timeout.as_millis() as u64,
                    context: "TLS handshake".to_string(),
                })?
                .map_err(ClientError::transport)?;
            Ok(Box::new(stream))
        }
    }
}

fn oversized(len: usize) -> ClientError {
    ClientError::Protocol {
        context: format!("inbound frame of {len}+ bytes exceeds the frame limit, discarding"),
    }
}

/// Backoff delay for the given redial attempt, capped.
fn backoff_delay(attempt: u32) -> Duration {
    let exponential = RECONNECT_BASE_DELAY.saturating_mul(1 << attempt.min(6));
    exponential.min(RECONNECT_MAX_DELAY)
}

/// Background reader: split inbound bytes on the delimiter, emit frames,
/// redial on failure.
async fn run_reader(
    transport: Arc<Transport>,
    mut reader: Reader,
    messages: mpsc::UnboundedSender<Vec<u8>>,
    errors: mpsc::UnboundedSender<ClientError>,
    state: mpsc::UnboundedSender<ConnectionState>,
) {
    let mut frame = Vec::with_capacity(4096);
    // When the soft frame limit trips, discard bytes until the next delimiter.
    let mut skipping = false;
    let mut chunk = [0u8; 8192];

    loop {
        let read = tokio::select! {
            () = transport.cancel.cancelled() => break,
            read = reader.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => {
                // EOF from the peer.
                match reconnect(&transport, &errors, &state).await {
                    Some(new_reader) => {
                        reader = new_reader;
                        frame.clear();
                        skipping = false;
                    }
                    None => break,
                }
            }
            Ok(n) => {
                let limit = transport.options.max_frame_len;
                let mut data = &chunk[..n];
                while let Some(pos) = data.iter().position(|&b| b == DELIMITER) {
                    if skipping {
                        skipping = false;
                    } else {
                        frame.extend_from_slice(&data[..pos]);
                        if limit.is_some_and(|limit| frame.len() > limit) {
                            let _ = errors.send(oversized(frame.len()));
                            frame.clear();
                        } else if !frame.is_empty()
                            && messages.send(std::mem::take(&mut frame)).is_err()
                        {
                            return;
                        }
                    }
                    data = &data[pos + 1..];
                }
                if !skipping {
                    frame.extend_from_slice(data);
                    if limit.is_some_and(|limit| frame.len() > limit) {
                        let _ = errors.send(oversized(frame.len()));
                        frame.clear();
                        skipping = true;
                    }
                }
            }
            Err(e) => {
                let _ = errors.send(ClientError::transport(&e));
                match reconnect(&transport, &errors, &state).await {
                    Some(new_reader) => {
                        reader = new_reader;
                        frame.clear();
                        skipping = false;
                    }
                    None => break,
                }
            }
        }
    }
    debug!("transport reader terminated");
}

/// Mark the connection down and redial until it succeeds or the transport
/// closes. Returns the new read half, or `None` when shutting down.
async fn reconnect(
    transport: &Arc<Transport>,
    errors: &mpsc::UnboundedSender<ClientError>,
    state: &mpsc::UnboundedSender<ConnectionState>,
) -> Option<Reader> {
    *transport.writer.lock().await = None;
    transport.connected.store(false, Ordering::Relaxed);
    let _ = state.send(ConnectionState::Disconnected);
    debug!(address = %transport.options.address, "connection lost, redialing");

    let mut attempt: u32 = 0;
    loop {
        tokio::select! {
            () = transport.cancel.cancelled() => return None,
            () = tokio::time::sleep(backoff_delay(attempt)) => {}
        }

        match dial(&transport.options).await {
            Ok(stream) => {
                let (reader, writer) = tokio::io::split(stream);
                *transport.writer.lock().await = Some(writer);
                transport.connected.store(true, Ordering::Relaxed);
                let _ = state.send(ConnectionState::Reconnected);
                debug!(address = %transport.options.address, "reconnected");
                return Some(reader);
            }
            Err(e) => {
                warn!(attempt, error = %e, "redial failed");
                let _ = errors.send(e);
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    fn options(address: String) -> TransportOptions {
        TransportOptions {
            address,
            tls: None,
            timeout: Duration::from_secs(5),
            max_frame_len: None,
        }
    }

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        (listener, address)
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(5), Duration::from_secs(32));
        assert_eq!(backoff_delay(6), Duration::from_secs(60));
        assert_eq!(backoff_delay(30), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn connect_emits_connected_once() {
        let (listener, address) = bind().await;
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let (transport, mut events) = Transport::connect(options(address)).await.unwrap();
        let _peer = accept.await.unwrap();

        assert_eq!(events.state.recv().await, Some(ConnectionState::Connected));
        assert!(transport.is_connected());
        transport.close().await;
    }

    #[tokio::test]
    async fn frames_are_split_on_delimiter() {
        let (listener, address) = bind().await;
        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"first\nsecond\n").await.unwrap();
            // Partial frame completed by a later write.
            stream.write_all(b"thi").await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            stream.write_all(b"rd\n").await.unwrap();
            stream
        });

        let (transport, mut events) = Transport::connect(options(address)).await.unwrap();
        assert_eq!(events.messages.recv().await.unwrap(), b"first");
        assert_eq!(events.messages.recv().await.unwrap(), b"second");
        assert_eq!(events.messages.recv().await.unwrap(), b"third");

        drop(peer.await.unwrap());
        transport.close().await;
    }

    #[tokio::test]
    async fn empty_frame_is_ignored() {
        let (listener, address) = bind().await;
        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"\n\nreal\n").await.unwrap();
            stream
        });

        let (transport, mut events) = Transport::connect(options(address)).await.unwrap();
        assert_eq!(events.messages.recv().await.unwrap(), b"real");

        drop(peer.await.unwrap());
        transport.close().await;
    }

    #[tokio::test]
    async fn oversized_frame_is_discarded_and_reported() {
        let (listener, address) = bind().await;
        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let big = vec![b'x'; 64];
            stream.write_all(&big).await.unwrap();
            stream.write_all(b"\nsmall\n").await.unwrap();
            stream
        });

        let mut opts = options(address);
        opts.max_frame_len = Some(16);
        let (transport, mut events) = Transport::connect(opts).await.unwrap();

        assert_eq!(events.messages.recv().await.unwrap(), b"small");
        let err = events.errors.recv().await.unwrap();
        assert!(matches!(err, ClientError::Protocol { .. }));

        drop(peer.await.unwrap());
        transport.close().await;
    }

    #[tokio::test]
    async fn send_writes_through_and_fails_when_down() {
        let (listener, address) = bind().await;
        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = tokio::io::BufReader::new(stream);
            let mut line = String::new();
            tokio::io::AsyncBufReadExt::read_line(&mut reader, &mut line)
                .await
                .unwrap();
            line
        });

        let (transport, _events) = Transport::connect(options(address)).await.unwrap();
        transport.send(b"hello\n").await.unwrap();
        assert_eq!(peer.await.unwrap(), "hello\n");

        transport.close().await;
        assert!(matches!(
            transport.send(b"late\n").await,
            Err(ClientError::ConnectionDown)
        ));
    }

    #[tokio::test]
    async fn drop_and_reaccept_emits_disconnected_then_reconnected() {
        let (listener, address) = bind().await;
        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
            // Accept the redial and prove the new connection works.
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"back\n").await.unwrap();
            stream
        });

        let (transport, mut events) = Transport::connect(options(address)).await.unwrap();
        assert_eq!(events.state.recv().await, Some(ConnectionState::Connected));
        assert_eq!(
            events.state.recv().await,
            Some(ConnectionState::Disconnected)
        );
        assert_eq!(
            events.state.recv().await,
            Some(ConnectionState::Reconnected)
        );
        assert_eq!(events.messages.recv().await.unwrap(), b"back");

        drop(peer.await.unwrap());
        transport.close().await;
    }

    #[tokio::test]
    async fn close_ends_all_streams() {
        let (listener, address) = bind().await;
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let (transport, mut events) = Transport::connect(options(address)).await.unwrap();
        let _peer = accept.await.unwrap();
        transport.close().await;

        // Drain the initial Connected event, then the stream must end.
        assert_eq!(events.state.recv().await, Some(ConnectionState::Connected));
        assert_eq!(events.state.recv().await, None);
        assert_eq!(events.messages.recv().await, None);
    }

    #[tokio::test]
    async fn dial_failure_surfaces_transport_error() {
        // A port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = Transport::connect(options(address)).await;
        assert!(matches!(result, Err(ClientError::Transport { .. })));
    }
}
