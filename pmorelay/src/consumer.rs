//! Consumer handles and the consumer registry
//!
//! Each listener owns a bounded conduit. The hub keeps the sending half
//! ([`ConsumerHandle`]) in the [`ConsumerRegistry`]; the transport session
//! drains the receiving half ([`ConsumerStream`]). Dropping the stream
//! unregisters the handle, so a peer that disconnects leaves the registry
//! without any explicit call.
//!
//! Delivery never blocks the broadcaster for longer than the send timeout: a
//! consumer whose conduit stays full is evicted.

use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, info, warn};

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a consumer in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl ConsumerId {
    fn next() -> Self {
        Self(NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Why a chunk could not be handed to a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The receiving side is gone
    Closed,
    /// The conduit stayed full for the whole send timeout
    TimedOut,
}

/// Sending half of a listener conduit, as stored by the hub.
#[derive(Debug, Clone)]
pub struct ConsumerHandle {
    id: ConsumerId,
    tx: mpsc::Sender<Bytes>,
}

impl ConsumerHandle {
    /// Create a conduit holding at most `capacity` pending chunks.
    ///
    /// The receiver is meant to be wrapped by the caller; most transports use
    /// [`BroadcastHub::subscribe`](crate::BroadcastHub::subscribe) instead,
    /// which also registers the handle.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ConsumerId::next(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// True once the receiving side has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Push one chunk, waiting at most `timeout` for a free slot.
    pub async fn deliver(&self, chunk: Bytes, timeout: Duration) -> Result<(), DeliveryError> {
        match self.tx.send_timeout(chunk, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(DeliveryError::Closed),
            Err(SendTimeoutError::Timeout(_)) => Err(DeliveryError::TimedOut),
        }
    }
}

/// Outcome of delivering one chunk to every registered consumer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: Vec<ConsumerId>,
}

/// Set of live consumers keyed by identity.
#[derive(Debug, Default)]
pub struct ConsumerRegistry {
    consumers: RwLock<HashMap<ConsumerId, ConsumerHandle>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle; returns `false` if it was already registered
    pub fn register(&self, handle: ConsumerHandle) -> bool {
        let mut consumers = self
            .consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if consumers.contains_key(&handle.id) {
            return false;
        }
        let id = handle.id;
        consumers.insert(id, handle);
        info!("{} registered. Total consumers: {}", id, consumers.len());
        true
    }

    /// Remove a handle; returns `false` if it was not registered
    pub fn unregister(&self, id: ConsumerId) -> bool {
        let mut consumers = self
            .consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = consumers.remove(&id).is_some();
        if removed {
            info!("{} unregistered. Remaining: {}", id, consumers.len());
        }
        removed
    }

    pub fn contains(&self, id: ConsumerId) -> bool {
        self.consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current handles, taken under shared access
    fn snapshot(&self) -> Vec<ConsumerHandle> {
        self.consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Deliver `chunk` to every consumer registered at call time.
    ///
    /// Sends run concurrently, each bounded by `timeout`. Consumers that are
    /// closed or stay full are unregistered before returning.
    pub async fn broadcast(&self, chunk: &Bytes, timeout: Duration) -> BroadcastReport {
        let handles = self.snapshot();
        if handles.is_empty() {
            return BroadcastReport::default();
        }

        let results = futures::future::join_all(handles.iter().map(|handle| {
            let chunk = chunk.clone();
            async move { (handle.id, handle.deliver(chunk, timeout).await) }
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Closed) => {
                    debug!("{} closed its conduit", id);
                    report.evicted.push(id);
                }
                Err(DeliveryError::TimedOut) => {
                    warn!(
                        "{} did not drain its conduit within {} ms, evicting",
                        id,
                        timeout.as_millis()
                    );
                    report.evicted.push(id);
                }
            }
        }

        for id in &report.evicted {
            self.unregister(*id);
        }
        report
    }
}

/// Receiving half of a listener conduit.
///
/// Yields chunks in broadcast order. Unregisters itself on drop.
pub struct ConsumerStream {
    id: ConsumerId,
    rx: mpsc::Receiver<Bytes>,
    registry: Weak<ConsumerRegistry>,
}

impl ConsumerStream {
    pub(crate) fn new(
        id: ConsumerId,
        rx: mpsc::Receiver<Bytes>,
        registry: &Arc<ConsumerRegistry>,
    ) -> Self {
        Self {
            id,
            rx,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Wait for the next chunk; `None` once the consumer has been evicted
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Next chunk if one is already queued
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

impl Stream for ConsumerStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ConsumerStream {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}

impl fmt::Debug for ConsumerStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerStream")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
