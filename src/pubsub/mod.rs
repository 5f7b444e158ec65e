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

//! Publish/subscribe state: two symmetric maps (invariant I6 — one is the
//! transpose of the other), guarded by a mutex distinct from the store's and
//! the blocking registry's (see `SPEC_FULL.md` §5 / spec.md §9 on why pub/sub
//! must not share the blocking lock).

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

pub type ClientId = u64;
pub type Sink = mpsc::UnboundedSender<Vec<u8>>;

#[derive(Default)]
struct Shared {
    channel_subscribers: HashMap<Bytes, HashSet<ClientId>>,
    client_channels: HashMap<ClientId, HashSet<Bytes>>,
    sinks: HashMap<ClientId, Sink>,
}

#[derive(Default)]
pub struct PubSub {
    shared: Mutex<Shared>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sink(&self, client: ClientId, sink: Sink) {
        self.shared.lock().sinks.insert(client, sink);
    }

    /// Subscribe `client` to `channel`. Returns the client's subscription
    /// count after adding.
    pub fn subscribe(&self, client: ClientId, channel: Bytes) -> usize {
        let mut s = self.shared.lock();
        s.channel_subscribers
            .entry(channel.clone())
            .or_default()
            .insert(client);
        let channels = s.client_channels.entry(client).or_default();
        channels.insert(channel);
        channels.len()
    }

    /// Unsubscribe `client` from `channel`. Returns the client's
    /// subscription count after removing.
    pub fn unsubscribe(&self, client: ClientId, channel: &[u8]) -> usize {
        let mut s = self.shared.lock();
        if let Some(subs) = s.channel_subscribers.get_mut(channel) {
            subs.remove(&client);
            if subs.is_empty() {
                s.channel_subscribers.remove(channel);
            }
        }
        let channels = s.client_channels.entry(client).or_default();
        channels.remove(channel);
        channels.len()
    }

    pub fn is_subscribed(&self, client: ClientId) -> bool {
        let s = self.shared.lock();
        s.client_channels
            .get(&client)
            .map(|c| !c.is_empty())
            .unwrap_or(false)
    }

    /// Deliver `message` to every current subscriber of `channel`. A
    /// per-subscriber send failure is swallowed; only successful sends count.
    pub fn publish(&self, channel: &[u8], message: &[u8]) -> usize {
        let s = self.shared.lock();
        let Some(subs) = s.channel_subscribers.get(channel) else {
            return 0;
        };
        let mut frame = Vec::new();
        crate::protocol::response::bulk_string_array(
            &mut frame,
            [&b"message"[..], channel, message],
        );
        let mut delivered = 0;
        for client in subs {
            if let Some(sink) = s.sinks.get(client) {
                if sink.send(frame.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Remove every trace of a disconnected client: its sink, its channel
    /// memberships, and those channels' reverse entries.
    pub fn remove_client(&self, client: ClientId) {
        let mut s = self.shared.lock();
        s.sinks.remove(&client);
        if let Some(channels) = s.client_channels.remove(&client) {
            for channel in channels {
                if let Some(subs) = s.channel_subscribers.get_mut(&channel) {
                    subs.remove(&client);
                    if subs.is_empty() {
                        s.channel_subscribers.remove(&channel);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_unsubscribe_tracks_count() {
        let ps = PubSub::new();
        assert_eq!(ps.subscribe(1, Bytes::from_static(b"ch")), 1);
        assert!(ps.is_subscribed(1));
        assert_eq!(ps.unsubscribe(1, b"ch"), 0);
        assert!(!ps.is_subscribed(1));
    }

    #[test]
    fn transpose_invariant_holds_after_remove_client() {
        let ps = PubSub::new();
        ps.subscribe(1, Bytes::from_static(b"a"));
        ps.subscribe(1, Bytes::from_static(b"b"));
        ps.remove_client(1);
        let s = ps.shared.lock();
        assert!(s.channel_subscribers.is_empty());
        assert!(s.client_channels.is_empty());
    }

    #[test]
    fn publish_counts_only_successful_deliveries() {
        let ps = PubSub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        ps.register_sink(1, tx);
        ps.subscribe(1, Bytes::from_static(b"ch"));
        ps.subscribe(2, Bytes::from_static(b"ch")); // no sink registered: swallowed
        let delivered = ps.publish(b"ch", b"hi");
        assert_eq!(delivered, 1);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame, b"*3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$2\r\nhi\r\n");
    }
}
