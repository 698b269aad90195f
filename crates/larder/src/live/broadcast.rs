//! Fan-out of change messages to live-reload subscribers.
//!
//! Each subscriber gets a bounded outbound queue drained by its own writer
//! task, so [`Broadcaster::send_to_all`] never waits on a socket. A message
//! that does not fit a subscriber's queue is dropped for that subscriber.
//!
//! Subscribers leave only through their receive loop: when the inbound half
//! of the connection ends or errors, the loop posts the subscriber id to a
//! removal queue and a reaper task takes it out of the set. A failed write
//! alone does not remove anyone.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Messages a subscriber may have queued before new ones are dropped.
pub const SUBSCRIBER_QUEUE: usize = 32;

/// Longest a single write to a subscriber may take.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

pub type SubscriberId = u64;

struct Shared {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    removals: mpsc::UnboundedSender<SubscriberId>,
}

/// The set of connected subscribers. Cheap to clone.
#[derive(Clone)]
pub struct Broadcaster {
    shared: Arc<Shared>,
}

impl Broadcaster {
    /// Create a broadcaster and spawn its reaper task.
    ///
    /// Must be called from within a tokio runtime. The reaper exits once the
    /// last clone of the broadcaster and every receive loop are gone.
    pub fn new() -> Self {
        let (removals, removal_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            removals,
        });

        tokio::spawn(reap(Arc::downgrade(&shared), removal_rx));

        Self { shared }
    }

    /// Register a subscriber.
    ///
    /// `sink` receives outbound text messages. `stream` is the inbound half;
    /// its items are ignored, and its end or first error removes the
    /// subscriber.
    pub fn add_connection<W, R, T, E>(&self, sink: W, stream: R) -> SubscriberId
    where
        W: Sink<String> + Send + Unpin + 'static,
        W::Error: Display,
        R: Stream<Item = Result<T, E>> + Send + Unpin + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);

        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        tokio::spawn(write_loop(id, sink, rx));
        tokio::spawn(receive_loop(id, stream, self.shared.removals.clone()));

        debug!(subscriber = id, "Live-reload subscriber connected");
        id
    }

    /// Queue `message` for every subscriber without waiting on any of them.
    pub fn send_to_all(&self, message: &str) {
        let subscribers = self
            .shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for (id, tx) in subscribers.iter() {
            match tx.try_send(message.to_string()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = id, "Subscriber queue full, dropping {}", message);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = id, "Subscriber writer gone, dropping {}", message);
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_loop<W>(id: SubscriberId, mut sink: W, mut rx: mpsc::Receiver<String>)
where
    W: Sink<String> + Unpin,
    W::Error: Display,
{
    while let Some(message) = rx.recv().await {
        match tokio::time::timeout(WRITE_TIMEOUT, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(subscriber = id, "Write failed: {}", e);
                return;
            }
            Err(_) => {
                warn!(subscriber = id, "Write timed out after {:?}", WRITE_TIMEOUT);
                return;
            }
        }
    }
    let _ = sink.close().await;
}

async fn receive_loop<R, T, E>(
    id: SubscriberId,
    mut stream: R,
    removals: mpsc::UnboundedSender<SubscriberId>,
) where
    R: Stream<Item = Result<T, E>> + Unpin,
    E: Display,
{
    while let Some(item) = stream.next().await {
        if let Err(e) = item {
            debug!(subscriber = id, "Receive failed: {}", e);
            break;
        }
    }
    let _ = removals.send(id);
}

async fn reap(shared: Weak<Shared>, mut removals: mpsc::UnboundedReceiver<SubscriberId>) {
    while let Some(id) = removals.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let removed = shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_some() {
            debug!(subscriber = id, "Live-reload subscriber disconnected");
        }
    }
}
