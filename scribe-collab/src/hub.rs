//! Fan-out of encoded server messages to the connections on a pad.
//!
//! ```text
//!                         ┌──────────── room "notes" ────────────┐
//!   broadcast("notes") ──►│ conn A ─► mpsc ─► writer task ─► ws  │
//!                         │ conn B ─► mpsc ─► writer task ─► ws  │
//!                         └──────────────────────────────────────┘
//! ```
//!
//! Every connection owns one bounded queue drained by a single writer,
//! so a client sees messages in the order they were queued. A client whose
//! queue is full has fallen behind for good: it is evicted from the hub,
//! which drops its sender, ends its writer task and closes the socket.
//! The handler collects evictions with [`Hub::take_evicted`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Snapshot of hub counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_clients: usize,
    pub active_pads: usize,
}

/// Lock-free counters updated on the send path.
#[derive(Default)]
struct AtomicHubStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

pub struct Hub {
    clients: RwLock<HashMap<Uuid, mpsc::Sender<Arc<str>>>>,
    rooms: RwLock<HashMap<String, HashSet<Uuid>>>,
    /// Messages buffered per client before drops start.
    capacity: usize,
    max_per_pad: usize,
    stats: AtomicHubStats,
    /// Connections evicted since the last `take_evicted`.
    evicted: Mutex<Vec<Uuid>>,
}

impl Hub {
    pub fn new(capacity: usize, max_per_pad: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            max_per_pad,
            stats: AtomicHubStats::default(),
            evicted: Mutex::new(Vec::new()),
        }
    }

    /// Register a connection and return its outbound queue.
    pub async fn connect(&self, conn: Uuid) -> mpsc::Receiver<Arc<str>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.clients.write().await.insert(conn, tx);
        rx
    }

    /// Drop the connection's queue and remove it from every pad. Returns
    /// the pads it was in.
    pub async fn disconnect(&self, conn: &Uuid) -> Vec<String> {
        self.clients.write().await.remove(conn);
        let mut rooms = self.rooms.write().await;
        let mut left = Vec::new();
        rooms.retain(|pad_id, members| {
            if members.remove(conn) {
                left.push(pad_id.clone());
            }
            !members.is_empty()
        });
        left
    }

    /// Subscribe `conn` to `pad_id`. False when the pad is full.
    pub async fn join(&self, pad_id: &str, conn: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(pad_id.to_string()).or_default();
        if members.contains(&conn) {
            return true;
        }
        if members.len() >= self.max_per_pad {
            if members.is_empty() {
                rooms.remove(pad_id);
            }
            return false;
        }
        members.insert(conn);
        true
    }

    pub async fn leave(&self, pad_id: &str, conn: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(pad_id) else {
            return false;
        };
        let removed = members.remove(conn);
        if members.is_empty() {
            rooms.remove(pad_id);
        }
        removed
    }

    /// Queue `msg` for one connection.
    pub async fn send_to(&self, conn: &Uuid, msg: Arc<str>) -> bool {
        let sent = {
            let clients = self.clients.read().await;
            match clients.get(conn) {
                Some(tx) => self.try_send(tx, msg),
                None => return false,
            }
        };
        match sent {
            Delivery::Sent => true,
            Delivery::Full => {
                self.evict(conn).await;
                false
            }
            Delivery::Closed => false,
        }
    }

    /// Queue `msg` for every connection on `pad_id`, sender included.
    pub async fn broadcast(&self, pad_id: &str, msg: Arc<str>) -> usize {
        self.fan_out(pad_id, None, msg).await
    }

    /// Queue `msg` for every connection on `pad_id` except `except`.
    pub async fn broadcast_except(&self, pad_id: &str, except: &Uuid, msg: Arc<str>) -> usize {
        self.fan_out(pad_id, Some(except), msg).await
    }

    async fn fan_out(&self, pad_id: &str, except: Option<&Uuid>, msg: Arc<str>) -> usize {
        let mut sent = 0;
        let mut full = Vec::new();
        {
            let rooms = self.rooms.read().await;
            let Some(members) = rooms.get(pad_id) else {
                return 0;
            };
            let clients = self.clients.read().await;
            for conn in members.iter().filter(|conn| Some(*conn) != except) {
                let Some(tx) = clients.get(conn) else {
                    continue;
                };
                match self.try_send(tx, msg.clone()) {
                    Delivery::Sent => sent += 1,
                    Delivery::Full => full.push(*conn),
                    Delivery::Closed => {}
                }
            }
        }
        for conn in &full {
            self.evict(conn).await;
        }
        sent
    }

    fn try_send(&self, tx: &mpsc::Sender<Arc<str>>, msg: Arc<str>) -> Delivery {
        match tx.try_send(msg) {
            Ok(()) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                Delivery::Sent
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Cut off a connection that can no longer keep up.
    async fn evict(&self, conn: &Uuid) {
        let pads = self.disconnect(conn).await;
        log::warn!("Outbound queue full for {conn}, evicting it from {pads:?}");
        self.evicted.lock().push(*conn);
    }

    /// Connections evicted for a full queue since the last call.
    pub fn take_evicted(&self) -> Vec<Uuid> {
        std::mem::take(&mut *self.evicted.lock())
    }

    pub async fn members(&self, pad_id: &str) -> Vec<Uuid> {
        self.rooms
            .read()
            .await
            .get(pad_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_clients: self.clients.read().await.len(),
            active_pads: self.rooms.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

enum Delivery {
    Sent,
    Full,
    Closed,
}
