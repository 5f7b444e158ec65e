/*
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! The blocking registry: per-key FIFO waiter queues for `BLPOP` and
//! `XREAD BLOCK`, and the producer-side handoff that wakes them.
//!
//! A waiter's "condition primitive" (spec.md §3) is a `tokio::sync::oneshot`
//! channel: `Sender::send` is a single, infallible, exactly-once signal, and
//! the parked task awaits the paired `Receiver` — the async equivalent of
//! waiting on a condvar while holding no other lock (see `SPEC_FULL.md` §5).
//! Because a oneshot sender can only be consumed once, the "delivered" flag
//! spec.md asks for falls directly out of the type rather than needing a
//! separate bool.

use crate::pubsub::ClientId;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// A parked waiter, holding the one-shot sink its wake-up frame is delivered
/// through. Identified by a monotonic id so a timed-out handler can remove
/// exactly itself from the FIFO queue without disturbing others. Carries the
/// owning connection's id so a disconnect can be cleaned up without knowing
/// which key(s) that connection was blocked on.
struct Waiter {
    id: u64,
    client: ClientId,
    tx: oneshot::Sender<Vec<u8>>,
}

#[derive(Default)]
struct Shared {
    list_waiters: HashMap<Bytes, VecDeque<Waiter>>,
    stream_waiters: HashMap<Bytes, VecDeque<Waiter>>,
}

pub struct Registry {
    shared: Mutex<Shared>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(Shared::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a new list waiter for `key`, returning its id and receiver.
    pub fn register_list_waiter(
        &self,
        key: Bytes,
        client: ClientId,
    ) -> (u64, oneshot::Receiver<Vec<u8>>) {
        let (tx, rx) = oneshot::channel();
        let id = self.alloc_id();
        self.shared
            .lock()
            .list_waiters
            .entry(key)
            .or_default()
            .push_back(Waiter { id, client, tx });
        (id, rx)
    }

    /// Register a new stream waiter for `key`, returning its id and receiver.
    pub fn register_stream_waiter(
        &self,
        key: Bytes,
        client: ClientId,
    ) -> (u64, oneshot::Receiver<Vec<u8>>) {
        let (tx, rx) = oneshot::channel();
        let id = self.alloc_id();
        self.shared
            .lock()
            .stream_waiters
            .entry(key)
            .or_default()
            .push_back(Waiter { id, client, tx });
        (id, rx)
    }

    /// Remove a timed-out (or disconnected) list waiter by id, if still present.
    pub fn remove_list_waiter(&self, key: &[u8], id: u64) {
        let mut s = self.shared.lock();
        if let Some(queue) = s.list_waiters.get_mut(key) {
            queue.retain(|w| w.id != id);
            if queue.is_empty() {
                s.list_waiters.remove(key);
            }
        }
    }

    /// Remove a timed-out (or disconnected) stream waiter by id, if still present.
    pub fn remove_stream_waiter(&self, key: &[u8], id: u64) {
        let mut s = self.shared.lock();
        if let Some(queue) = s.stream_waiters.get_mut(key) {
            queue.retain(|w| w.id != id);
            if queue.is_empty() {
                s.stream_waiters.remove(key);
            }
        }
    }

    /// Pop the head list waiter for `key`, if any. The caller performs the
    /// handoff pop from the store and the frame encoding, then calls
    /// `deliver` with the built frame.
    pub fn pop_list_waiter(&self, key: &[u8]) -> Option<oneshot::Sender<Vec<u8>>> {
        let mut s = self.shared.lock();
        let queue = s.list_waiters.get_mut(key)?;
        let waiter = queue.pop_front();
        if queue.is_empty() {
            s.list_waiters.remove(key);
        }
        waiter.map(|w| w.tx)
    }

    /// Pop the head stream waiter for `key`, if any.
    pub fn pop_stream_waiter(&self, key: &[u8]) -> Option<oneshot::Sender<Vec<u8>>> {
        let mut s = self.shared.lock();
        let queue = s.stream_waiters.get_mut(key)?;
        let waiter = queue.pop_front();
        if queue.is_empty() {
            s.stream_waiters.remove(key);
        }
        waiter.map(|w| w.tx)
    }

    /// Disconnect cleanup: drop every waiter belonging to `client`, across
    /// every key in both registries. A connection has at most one waiter
    /// outstanding at a time (the command loop processes one request at a
    /// time), so this is a short scan in practice.
    pub fn remove_client(&self, client: ClientId) {
        let mut s = self.shared.lock();
        for queue in s.list_waiters.values_mut() {
            queue.retain(|w| w.client != client);
        }
        s.list_waiters.retain(|_, q| !q.is_empty());
        for queue in s.stream_waiters.values_mut() {
            queue.retain(|w| w.client != client);
        }
        s.stream_waiters.retain(|_, q| !q.is_empty());
    }
}

/// Send `frame` to a popped waiter's sink, ignoring failure — per spec.md
/// §4.3, "if the write to the waiter fails, signal anyway so it unblocks" is
/// automatically satisfied here: `oneshot::Sender::send` always completes,
/// and a dropped receiver simply means the waiter already gave up.
pub fn deliver(tx: oneshot::Sender<Vec<u8>>, frame: Vec<u8>) {
    let _ = tx.send(frame);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiter_receives_delivered_frame() {
        let reg = Registry::new();
        let (id, rx) = reg.register_list_waiter(Bytes::from_static(b"L"), 1);
        let tx = reg.pop_list_waiter(b"L").unwrap();
        assert_eq!(id, 1);
        deliver(tx, b"hello".to_vec());
        assert_eq!(rx.await.unwrap(), b"hello".to_vec());
    }

    #[test]
    fn fifo_order_is_preserved() {
        let reg = Registry::new();
        let (id1, _rx1) = reg.register_list_waiter(Bytes::from_static(b"L"), 1);
        let (id2, _rx2) = reg.register_list_waiter(Bytes::from_static(b"L"), 2);
        let first = reg.pop_list_waiter(b"L");
        assert!(first.is_some());
        // popping consumed id1's slot; id2 remains next
        reg.remove_list_waiter(b"L", id2);
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
    }

    #[test]
    fn removing_last_waiter_drops_the_key_entry() {
        let reg = Registry::new();
        let (id, _rx) = reg.register_list_waiter(Bytes::from_static(b"L"), 1);
        reg.remove_list_waiter(b"L", id);
        assert!(reg.pop_list_waiter(b"L").is_none());
    }

    #[test]
    fn remove_client_clears_all_its_waiters() {
        let reg = Registry::new();
        reg.register_list_waiter(Bytes::from_static(b"L"), 7);
        reg.register_stream_waiter(Bytes::from_static(b"S"), 7);
        reg.remove_client(7);
        assert!(reg.pop_list_waiter(b"L").is_none());
        assert!(reg.pop_stream_waiter(b"S").is_none());
    }
}
