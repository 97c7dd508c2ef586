//! Request/response correlation registry.
//!
//! Maps in-flight request IDs and active subscriptions to their waiters and
//! issues monotonically increasing request IDs. A single mutex protects the
//! slot map and the counter; deliveries happen on sender clones taken under
//! the lock and released before sending, so a slow consumer can never
//! deadlock the registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::errors::ClientError;
use crate::wire::Response;

/// Callback invoked by a subscription's handler loop for each notification.
pub type NotificationHandler = Arc<dyn Fn(Response) + Send + Sync>;

/// A long-lived subscription registration.
///
/// The entry is immutable; resuming after a reconnect registers a fresh entry
/// (new inbox, new ID) that shares the method, params, lifetime, and handler
/// of the old one, so the user-visible stream survives.
pub(crate) struct SubscriptionEntry {
    /// Method name the server reuses to push notifications.
    pub method: String,
    /// Parameters of the initial registration request.
    pub params: Vec<Value>,
    /// Delivery target of the subscription's handler loop.
    pub inbox: mpsc::Sender<Response>,
    /// External lifetime; cancelling stops the handler loop.
    pub ctx: CancellationToken,
    /// User notification handler.
    pub handler: NotificationHandler,
}

/// A single-use rendezvous for delivering responses to waiters.
pub(crate) enum Slot {
    /// One synchronous call waiting for one response.
    Call(oneshot::Sender<Response>),
    /// One batch slot shared by every ID of the batch.
    Batch(mpsc::Sender<Response>),
    /// A subscription; present for the subscription's entire lifetime.
    Subscription(Arc<SubscriptionEntry>),
}

/// Where a routed response must be delivered. Computed under the lock,
/// consumed after it is released.
enum Delivery {
    None,
    Waiter(oneshot::Sender<Response>),
    Channel(mpsc::Sender<Response>),
    Fanout(Vec<mpsc::Sender<Response>>),
}

struct Inner {
    slots: HashMap<u64, Slot>,
    counter: u64,
}

/// Thread-safe slot map plus the session's request ID counter.
pub(crate) struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                counter: 0,
            }),
        }
    }

    /// Atomically allocate the next request ID. IDs start at 0 and are never
    /// reused within a session.
    pub fn next_id(&self) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.counter;
        inner.counter += 1;
        id
    }

    /// Store a pending slot under `id`.
    pub fn register(&self, id: u64, slot: Slot) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        if inner.slots.contains_key(&id) {
            return Err(ClientError::DuplicateId { id });
        }
        inner.slots.insert(id, slot);
        Ok(())
    }

    /// Remove and release the slot for `id` if present. Idempotent.
    ///
    /// Dropping the slot closes its channel, which releases any waiter.
    pub fn unregister(&self, id: u64) {
        let slot = self.inner.lock().slots.remove(&id);
        drop(slot);
    }

    /// Route one decoded response to its waiter.
    ///
    /// Notifications (frames carrying a `method`) are delivered to **every**
    /// subscription registered for that method, in wire order. Everything
    /// else is matched by ID; call slots are consumed on delivery, batch and
    /// subscription slots persist. Unmatched responses are dropped.
    pub async fn route(&self, response: Response) {
        let delivery = {
            let mut inner = self.inner.lock();
            if let Some(method) = response.method.as_deref() {
                let targets: Vec<mpsc::Sender<Response>> = inner
                    .slots
                    .values()
                    .filter_map(|slot| match slot {
                        Slot::Subscription(entry) if entry.method == method => {
                            Some(entry.inbox.clone())
                        }
                        _ => None,
                    })
                    .collect();
                if targets.is_empty() {
                    trace!(method, "notification matches no subscription, dropping");
                    Delivery::None
                } else {
                    Delivery::Fanout(targets)
                }
            } else if let Some(id) = response.id {
                // Call slots are consumed on delivery; batch and
                // subscription slots go back into the map.
                match inner.slots.remove(&id) {
                    Some(Slot::Call(tx)) => Delivery::Waiter(tx),
                    Some(Slot::Batch(tx)) => {
                        let delivery = Delivery::Channel(tx.clone());
                        inner.slots.insert(id, Slot::Batch(tx));
                        delivery
                    }
                    Some(Slot::Subscription(entry)) => {
                        let delivery = Delivery::Channel(entry.inbox.clone());
                        inner.slots.insert(id, Slot::Subscription(entry));
                        delivery
                    }
                    None => {
                        trace!(id, "response matches no pending slot, dropping");
                        Delivery::None
                    }
                }
            } else {
                trace!("frame carries neither method nor id, dropping");
                Delivery::None
            }
        };

        match delivery {
            Delivery::None => {}
            Delivery::Waiter(tx) => {
                let _ = tx.send(response);
            }
            Delivery::Channel(tx) => {
                let _ = tx.send(response).await;
            }
            Delivery::Fanout(targets) => {
                for tx in targets {
                    let _ = tx.send(response.clone()).await;
                }
            }
        }
    }

    /// Snapshot of the current subscriptions, for bulk operations.
    pub fn subscriptions(&self) -> Vec<(u64, Arc<SubscriptionEntry>)> {
        self.inner
            .lock()
            .slots
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Subscription(entry) => Some((*id, Arc::clone(entry))),
                _ => None,
            })
            .collect()
    }

    /// Whether any subscription is registered.
    pub fn has_subscriptions(&self) -> bool {
        self.inner
            .lock()
            .slots
            .values()
            .any(|slot| matches!(slot, Slot::Subscription(_)))
    }

    /// Remove every pending slot, releasing all waiters.
    pub fn drain(&self) {
        let slots = std::mem::take(&mut self.inner.lock().slots);
        drop(slots);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }
}
