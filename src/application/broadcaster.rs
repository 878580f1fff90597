//! Fan-out of shared cache events to connected push clients.

use chrono::Utc;
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use metrics::counter;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::cache_event::CacheEvent;
use crate::infrastructure::cache::SharedCache;

/// Interval between keep-alive frames.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Delay before re-subscribing after the event source ends or fails.
pub const RELAY_BACKOFF: Duration = Duration::from_secs(5);

/// A frame queued for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// First frame of every connection; server time in milliseconds.
    Connected { timestamp: i64 },
    /// A serialized [`CacheEvent`], shared by every client.
    Event(Arc<str>),
    KeepAlive,
}

/// Registry of open push channels.
///
/// Each client owns a bounded channel. A client whose channel is full or
/// closed is dropped on the next write without affecting the others.
pub struct Broadcaster {
    clients: DashMap<u64, mpsc::Sender<Frame>>,
    next_id: AtomicU64,
    buffer: usize,
    closed: AtomicBool,
}

impl Broadcaster {
    pub fn new(buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Registers a client; its stream starts with a [`Frame::Connected`].
    ///
    /// After [`Broadcaster::close_all`] the stream ends right after that frame.
    pub fn connect(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);

        let _ = tx.try_send(Frame::Connected {
            timestamp: Utc::now().timestamp_millis(),
        });
        if self.closed.load(Ordering::SeqCst) {
            debug!(client_id = id, "Push client rejected, broadcaster closed");
        } else {
            self.clients.insert(id, tx);
            info!(client_id = id, clients = self.clients.len(), "Push client connected");
        }

        Subscription {
            id,
            rx,
            broadcaster: Arc::downgrade(self),
        }
    }

    pub fn disconnect(&self, id: u64) {
        if self.clients.remove(&id).is_some() {
            debug!(client_id = id, "Push client disconnected");
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Drops every client channel so open streams end once drained.
    ///
    /// Called on shutdown; later connections close immediately.
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let closed = self.clients.len();
        self.clients.clear();
        info!(clients = closed, "Push clients closed");
    }

    /// Serializes `event` once and queues it for every client.
    ///
    /// Returns how many clients received it.
    pub fn publish(&self, event: &CacheEvent) -> usize {
        let payload: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(error = %e, "Failed to serialize cache event");
                return 0;
            }
        };

        debug!(event_type = event.event_type(), "Broadcasting cache event");
        self.send_all(Frame::Event(payload))
    }

    /// Sends a keep-alive to every client, pruning dead ones.
    pub fn keep_alive(&self) -> usize {
        self.send_all(Frame::KeepAlive)
    }

    fn send_all(&self, frame: Frame) -> usize {
        let mut dead = Vec::new();
        let mut delivered = 0;

        for client in self.clients.iter() {
            match client.value().try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(client_id = *client.key(), error = %e, "Dropping push client");
                    dead.push(*client.key());
                }
            }
        }

        for id in dead {
            self.clients.remove(&id);
            counter!("broadcast_clients_dropped_total").increment(1);
        }

        delivered
    }

    /// Spawns the periodic keep-alive loop.
    pub fn spawn_keep_alive(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let broadcaster = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(broadcaster) = broadcaster.upgrade() else {
                    break;
                };
                broadcaster.keep_alive();
            }
        })
    }

    /// Spawns the task relaying the shared cache's events to clients.
    ///
    /// When the subscription fails or its stream ends, the relay waits
    /// `backoff` and subscribes again.
    pub fn spawn_relay(
        self: &Arc<Self>,
        cache: Arc<dyn SharedCache>,
        backoff: Duration,
    ) -> JoinHandle<()> {
        let broadcaster = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match cache.subscribe().await {
                    Ok(mut events) => {
                        while let Some(event) = events.next().await {
                            let Some(broadcaster) = broadcaster.upgrade() else {
                                return;
                            };
                            broadcaster.publish(&event);
                        }
                        warn!("Cache event stream ended, resubscribing");
                    }
                    Err(e) => warn!(error = %e, "Cache event subscription failed"),
                }

                if broadcaster.strong_count() == 0 {
                    return;
                }
                tokio::time::sleep(backoff).await;
            }
        })
    }
}

/// One client's stream of frames. Dropping it disconnects the client.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Frame>,
    broadcaster: Weak<Broadcaster>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Stream for Subscription {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.disconnect(self.id);
        }
    }
}
