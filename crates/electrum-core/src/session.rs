//! The session: synchronous calls, batches, subscriptions, keep-alive, and
//! resume-on-reconnect over a single upstream connection.
//!
//! Long-lived tasks per session: the dispatcher reader, the transport-state
//! monitor, the optional keep-alive ticker, one handler loop per active
//! subscription, and at most one resume task. All of them stop when the
//! session's background scope is cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::constants::{INBOX_CAPACITY, KEEP_ALIVE_INTERVAL, RESUME_PROBE_INTERVAL};
use crate::dispatcher::run_dispatcher;
use crate::errors::ClientError;
use crate::registry::{NotificationHandler, Registry, Slot, SubscriptionEntry};
use crate::transport::{ConnectionState, Transport, TransportOptions};
use crate::wire::{self, Request, Response};

/// A long-lived, reconnecting, multiplexed JSON-RPC session bound to one
/// upstream address.
pub struct Session {
    config: SessionConfig,
    transport: Arc<Transport>,
    registry: Arc<Registry>,
    /// Background scope: dispatcher, monitor, keep-alive, handler loops.
    bg: CancellationToken,
    /// Scope of the in-flight resume attempt, if any.
    resume: parking_lot::Mutex<Option<CancellationToken>>,
    closed: AtomicBool,
}

/// Unregisters its IDs when dropped, so a cancelled caller never leaks a
/// pending slot. Unregistration is idempotent; normal delivery already
/// removed call slots.
struct PendingGuard {
    registry: Arc<Registry>,
    ids: Vec<u64>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        for id in &self.ids {
            self.registry.unregister(*id);
        }
    }
}

impl Session {
    /// Dial the upstream and start the background tasks.
    ///
    /// The session is usable immediately; no handshake is required before
    /// the first call.
    pub async fn connect(config: SessionConfig) -> Result<Arc<Self>, ClientError> {
        let (transport, events) = Transport::connect(TransportOptions {
            address: config.address.clone(),
            tls: config.tls.clone(),
            timeout: config.timeout,
            max_frame_len: config.max_frame_len,
        })
        .await?;

        let registry = Arc::new(Registry::new());
        let keep_alive = config.keep_alive;
        let session = Arc::new(Self {
            config,
            transport,
            registry: Arc::clone(&registry),
            bg: CancellationToken::new(),
            resume: parking_lot::Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(run_dispatcher(
            events.messages,
            events.errors,
            registry,
            session.bg.child_token(),
        ));
        tokio::spawn(run_monitor(Arc::clone(&session), events.state));
        if keep_alive {
            tokio::spawn(run_keep_alive(Arc::clone(&session)));
        }

        Ok(session)
    }

    /// The configuration this session was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Dispatch a synchronous request and wait for its response.
    ///
    /// There is no built-in per-call timeout; bound the wait from the caller
    /// if needed. A response carrying a non-empty `error` member is returned
    /// as [`ClientError::Server`].
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Response, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let id = self.registry.next_id();
        let (tx, rx) = oneshot::channel();
        self.registry.register(id, Slot::Call(tx))?;
        let _guard = PendingGuard {
            registry: Arc::clone(&self.registry),
            ids: vec![id],
        };

        let request = Request::new(id, method, params);
        self.transport.send(&request.encode()?).await?;

        let response = rx.await.map_err(|_| ClientError::Closed)?;
        match response.error {
            Some(error) => Err(ClientError::Server {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response),
        }
    }

    /// Dispatch several requests as one JSON-RPC batch frame.
    ///
    /// The returned vector preserves request order regardless of arrival
    /// order. Per-element errors are reported in place; the batch itself
    /// fails only on transport, encode, or protocol errors. A response ID
    /// that never arrives within the session timeout yields
    /// [`ClientError::Protocol`].
    pub async fn call_batch(
        &self,
        calls: &[(&str, Vec<Value>)],
    ) -> Result<Vec<Response>, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let (tx, mut rx) = mpsc::channel(calls.len());
        let mut guard = PendingGuard {
            registry: Arc::clone(&self.registry),
            ids: Vec::with_capacity(calls.len()),
        };
        let mut requests = Vec::with_capacity(calls.len());
        for (method, params) in calls {
            let id = self.registry.next_id();
            self.registry.register(id, Slot::Batch(tx.clone()))?;
            guard.ids.push(id);
            requests.push(Request::new(id, method, params.clone()));
        }
        drop(tx);

        self.transport.send(&wire::encode_batch(&requests)?).await?;

        let mut received: HashMap<u64, Response> = HashMap::with_capacity(requests.len());
        let deadline = tokio::time::Instant::now() + self.config.timeout;
        while received.len() < requests.len() {
            let response = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .map_err(|_| ClientError::Protocol {
                    context: format!(
                        "batch response missing {} of {} ids",
                        requests.len() - received.len(),
                        requests.len()
                    ),
                })?
                .ok_or(ClientError::Closed)?;
            if let Some(id) = response.id {
                received.insert(id, response);
            }
        }

        let mut ordered = Vec::with_capacity(requests.len());
        for request in &requests {
            match received.remove(&request.id) {
                Some(response) => ordered.push(response),
                None => {
                    return Err(ClientError::Protocol {
                        context: format!("batch response missing id {}", request.id),
                    })
                }
            }
        }
        Ok(ordered)
    }

    /// Register a server-push subscription and stream its messages.
    ///
    /// The stream yields the initial snapshot response followed by every
    /// notification whose method matches. Cancelling `ctx` stops delivery;
    /// the wire protocol offers no unsubscribe, so server-side state is only
    /// torn down on session close. The subscription survives reconnects:
    /// its ID changes, the stream does not.
    pub async fn subscribe(
        &self,
        method: &str,
        params: Vec<Value>,
        ctx: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<Response>, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: NotificationHandler = Arc::new(move |response| {
            let _ = tx.send(response);
        });
        self.subscribe_with(method, params, ctx, handler).await?;
        Ok(rx)
    }

    /// Register a subscription delivering through `handler`.
    ///
    /// Returns the ID of the initial registration request. Typed adapters
    /// use this directly to decode payloads before handing them to callers.
    pub async fn subscribe_with(
        &self,
        method: &str,
        params: Vec<Value>,
        ctx: CancellationToken,
        handler: NotificationHandler,
    ) -> Result<u64, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let entry = Arc::new(SubscriptionEntry {
            method: method.to_string(),
            params: params.clone(),
            inbox: inbox_tx,
            ctx: ctx.clone(),
            handler: Arc::clone(&handler),
        });
        spawn_handler_loop(inbox_rx, handler, ctx, self.bg.child_token());

        let id = self.registry.next_id();
        self.registry.register(id, Slot::Subscription(entry))?;
        let request = Request::new(id, method, params);
        let result: Result<(), ClientError> = async {
            self.transport.send(&request.encode()?).await
        }
        .await;
        if let Err(e) = result {
            // Dropping the entry closes the inbox, which ends the handler
            // loop and the just-created stream.
            self.registry.unregister(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Shut the session down.
    ///
    /// Stops keep-alive, terminates the background loops, closes the
    /// transport, and releases every pending waiter with
    /// [`ClientError::Closed`]. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bg.cancel();
        self.transport.close().await;
        self.registry.drain();
        debug!("session closed");
    }

    /// Probe the connection with a `server.version` round trip.
    async fn probe(&self) -> Result<(), ClientError> {
        self.call(
            "server.version",
            vec![
                Value::String(self.config.agent_string()),
                Value::String(self.config.protocol.as_str().to_string()),
            ],
        )
        .await
        .map(|_| ())
    }

    /// Start the at-most-one resume task, cancelling any prior attempt.
    fn spawn_resume(self: &Arc<Self>) {
        let token = {
            let mut guard = self.resume.lock();
            if let Some(previous) = guard.take() {
                previous.cancel();
            }
            let token = self.bg.child_token();
            *guard = Some(token.clone());
            token
        };
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.run_resume(token).await;
        });
    }

    /// Wait for the reconnected peer to answer, then re-register every
    /// subscription under a fresh ID.
    async fn run_resume(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(RESUME_PROBE_INTERVAL) => {
                    if self.probe().await.is_ok() {
                        break;
                    }
                }
            }
        }

        for (old_id, entry) in self.registry.subscriptions() {
            if cancel.is_cancelled() {
                return;
            }
            self.registry.unregister(old_id);

            let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
            let fresh = Arc::new(SubscriptionEntry {
                method: entry.method.clone(),
                params: entry.params.clone(),
                inbox: inbox_tx,
                ctx: entry.ctx.clone(),
                handler: Arc::clone(&entry.handler),
            });
            spawn_handler_loop(
                inbox_rx,
                Arc::clone(&entry.handler),
                entry.ctx.clone(),
                self.bg.child_token(),
            );

            let id = self.registry.next_id();
            let request = Request::new(id, &entry.method, entry.params.clone());
            let result: Result<(), ClientError> = async {
                self.registry.register(id, Slot::Subscription(fresh))?;
                self.transport.send(&request.encode()?).await
            }
            .await;
            match result {
                Ok(()) => debug!(method = %entry.method, old_id, id, "subscription resumed"),
                Err(e) => {
                    self.registry.unregister(id);
                    warn!(method = %entry.method, error = %e, "failed to resume subscription");
                }
            }
        }
    }
}

/// Drain a subscription inbox, invoking the user handler for each message,
/// until the inbox closes or a lifetime token fires.
fn spawn_handler_loop(
    mut inbox: mpsc::Receiver<Response>,
    handler: NotificationHandler,
    ctx: CancellationToken,
    bg: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => handler(message),
                    None => break,
                },
                () = ctx.cancelled() => break,
                () = bg.cancelled() => break,
            }
        }
    });
}

/// Watch transport state transitions; kick off a resume after each
/// reconnect that finds active subscriptions.
async fn run_monitor(session: Arc<Session>, mut state: mpsc::UnboundedReceiver<ConnectionState>) {
    let cancel = session.bg.clone();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = state.recv() => match event {
                Some(ConnectionState::Reconnected) => {
                    debug!("transport reconnected");
                    if session.registry.has_subscriptions() {
                        session.spawn_resume();
                    }
                }
                Some(event) => debug!(?event, "connection state"),
                None => break,
            }
        }
    }
}

/// Fire a `server.version` request every 60 seconds without registering a
/// waiter. Errors are logged and otherwise swallowed so a dead peer cannot
/// poison the session before the transport observes the break.
async fn run_keep_alive(session: Arc<Session>) {
    let cancel = session.bg.clone();
    let mut ticker = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    // The first tick completes immediately; the first keep-alive should not.
    ticker.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let id = session.registry.next_id();
                let request = Request::new(
                    id,
                    "server.version",
                    vec![
                        Value::String(session.config.version.clone()),
                        Value::String(session.config.protocol.as_str().to_string()),
                    ],
                );
                match request.encode() {
                    Ok(bytes) => {
                        if let Err(e) = session.transport.send(&bytes).await {
                            debug!(error = %e, "keep-alive send failed");
                        }
                    }
                    Err(e) => debug!(error = %e, "keep-alive encode failed"),
                }
            }
        }
    }
}
