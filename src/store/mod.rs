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

//! The keyed data store: strings, lists, streams, expiry and type tagging.
//!
//! A single `parking_lot::Mutex` guards the whole map (see `SPEC_FULL.md` §5
//! for why a coarse lock is the specified design, not a shortcut). Every
//! public method on `Store` acquires it once for the duration of one logical
//! step and releases it before returning.

pub mod stream;

use crate::util::now_ms;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use stream::{StreamData, StreamId};

pub const ERR_WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
pub const ERR_NOT_INT: &str = "value is not an integer or out of range";

#[derive(Debug, Clone)]
pub enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Stream(StreamData),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Stream(_) => "stream",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expiry: Option<u128>,
}

#[derive(Default)]
struct Shared {
    entries: HashMap<Bytes, Entry>,
}

impl Shared {
    /// Lazily evict `key` if it carries an expiry that has passed, then
    /// return whether it is (now) present.
    fn evict_if_expired(&mut self, key: &[u8]) -> bool {
        let expired = match self.entries.get(key) {
            Some(entry) => matches!(entry.expiry, Some(at) if now_ms() >= at),
            None => return false,
        };
        if expired {
            self.entries.remove(key);
            false
        } else {
            true
        }
    }
}

pub struct Store {
    shared: Mutex<Shared>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(Shared::default()),
        }
    }

    /// Used by the RDB loader to install a string entry directly, bypassing
    /// the write-command API (no expiry-relative-to-now computation: the
    /// loader already computed an absolute expiry).
    pub fn rdb_insert_string(&self, key: Bytes, value: Bytes, expiry: Option<u128>) {
        let mut s = self.shared.lock();
        s.entries.insert(key, Entry {
            value: Value::String(value),
            expiry,
        });
    }

    // ---- strings ----

    pub fn set(&self, key: Bytes, value: Bytes, expiry: Option<u128>) {
        let mut s = self.shared.lock();
        s.entries.insert(key, Entry {
            value: Value::String(value),
            expiry,
        });
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, &'static str> {
        let mut s = self.shared.lock();
        if !s.evict_if_expired(key) {
            return Ok(None);
        }
        match &s.entries.get(key).unwrap().value {
            Value::String(v) => Ok(Some(v.clone())),
            _ => Err(ERR_WRONGTYPE),
        }
    }

    pub fn del(&self, keys: &[Bytes]) -> usize {
        let mut s = self.shared.lock();
        let mut count = 0;
        for key in keys {
            if s.evict_if_expired(key) && s.entries.remove(key.as_ref()).is_some() {
                count += 1;
            }
        }
        count
    }

    pub fn key_type(&self, key: &[u8]) -> Option<&'static str> {
        let mut s = self.shared.lock();
        if !s.evict_if_expired(key) {
            return None;
        }
        Some(s.entries.get(key).unwrap().value.kind())
    }

    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        let mut s = self.shared.lock();
        let live: Vec<Bytes> = s.entries.keys().cloned().collect();
        for k in &live {
            s.evict_if_expired(k);
        }
        if pattern == b"*" {
            s.entries.keys().cloned().collect()
        } else {
            s.entries
                .keys()
                .filter(|k| k.as_ref() == pattern)
                .cloned()
                .collect()
        }
    }

    /// `INCR`/`INCRBY`: missing key treated as 0; result stored as decimal string.
    pub fn incr_by(&self, key: &[u8], delta: i64) -> Result<i64, &'static str> {
        let mut s = self.shared.lock();
        let present = s.evict_if_expired(key);
        let current: i64 = if present {
            match &s.entries.get(key).unwrap().value {
                Value::String(v) => std::str::from_utf8(v)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(ERR_NOT_INT)?,
                _ => return Err(ERR_WRONGTYPE),
            }
        } else {
            0
        };
        let next = current.checked_add(delta).ok_or(ERR_NOT_INT)?;
        s.entries.insert(
            Bytes::copy_from_slice(key),
            Entry {
                value: Value::String(Bytes::from(next.to_string())),
                expiry: None,
            },
        );
        Ok(next)
    }

    // ---- lists ----

    /// Push `values` onto the head (`front = true`) or tail of the list at
    /// `key`, creating it if absent. Returns the length after insertion.
    pub fn push(&self, key: &[u8], values: Vec<Bytes>, front: bool) -> Result<usize, &'static str> {
        let mut s = self.shared.lock();
        let present = s.evict_if_expired(key);
        if !present {
            s.entries.insert(
                Bytes::copy_from_slice(key),
                Entry {
                    value: Value::List(VecDeque::new()),
                    expiry: None,
                },
            );
        }
        let entry = s.entries.get_mut(key).unwrap();
        let list = match &mut entry.value {
            Value::List(l) => l,
            _ => return Err(ERR_WRONGTYPE),
        };
        for v in values {
            if front {
                list.push_front(v);
            } else {
                list.push_back(v);
            }
        }
        Ok(list.len())
    }

    /// Pop one element from the head of the list at `key`, for blocking
    /// handoff. Deletes the key if the list becomes empty (invariant I3).
    pub fn pop_front_for_handoff(&self, key: &[u8]) -> Option<Bytes> {
        let mut s = self.shared.lock();
        let entry = s.entries.get_mut(key)?;
        let list = match &mut entry.value {
            Value::List(l) => l,
            _ => return None,
        };
        let popped = list.pop_front();
        if list.is_empty() {
            s.entries.remove(key);
        }
        popped
    }

    /// `LPOP key [count]`. `None` return distinguishes "key absent" from an
    /// empty result, matching the null bulk / null array distinction the
    /// caller needs (no-count vs counted form is decided by the caller).
    pub fn lpop(&self, key: &[u8], count: usize) -> Result<Option<Vec<Bytes>>, &'static str> {
        let mut s = self.shared.lock();
        if !s.evict_if_expired(key) {
            return Ok(None);
        }
        let entry = s.entries.get_mut(key).unwrap();
        let list = match &mut entry.value {
            Value::List(l) => l,
            _ => return Err(ERR_WRONGTYPE),
        };
        let n = count.min(list.len());
        let popped: Vec<Bytes> = list.drain(..n).collect();
        if list.is_empty() {
            s.entries.remove(key);
        }
        Ok(Some(popped))
    }

    pub fn llen(&self, key: &[u8]) -> Result<usize, &'static str> {
        let mut s = self.shared.lock();
        if !s.evict_if_expired(key) {
            return Ok(0);
        }
        match &s.entries.get(key).unwrap().value {
            Value::List(l) => Ok(l.len()),
            _ => Err(ERR_WRONGTYPE),
        }
    }

    /// `LRANGE key start end`, both inclusive, negative indices from the tail.
    pub fn lrange(&self, key: &[u8], start: i64, end: i64) -> Result<Vec<Bytes>, &'static str> {
        let mut s = self.shared.lock();
        if !s.evict_if_expired(key) {
            return Ok(Vec::new());
        }
        let list = match &s.entries.get(key).unwrap().value {
            Value::List(l) => l,
            _ => return Err(ERR_WRONGTYPE),
        };
        let len = list.len() as i64;
        if len == 0 {
            return Ok(Vec::new());
        }
        let norm = |i: i64| -> i64 { if i < 0 { (len + i).max(0) } else { i } };
        let start = norm(start);
        let end = norm(end).min(len - 1);
        if start > end || start >= len {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((end - start + 1) as usize)
            .cloned()
            .collect())
    }

    // ---- streams ----

    /// Resolve and append one entry to the stream at `key`, creating it if
    /// absent. Returns the assigned id rendered as a string.
    pub fn xadd(
        &self,
        key: &[u8],
        raw_id: &str,
        fields: Vec<(Bytes, Bytes)>,
    ) -> Result<(StreamId, Vec<(Bytes, Bytes)>), &'static str> {
        let mut s = self.shared.lock();
        let present = s.evict_if_expired(key);
        if !present {
            s.entries.insert(
                Bytes::copy_from_slice(key),
                Entry {
                    value: Value::Stream(StreamData::default()),
                    expiry: None,
                },
            );
        }
        let entry = s.entries.get_mut(key).unwrap();
        let data = match &mut entry.value {
            Value::Stream(d) => d,
            _ => return Err(ERR_WRONGTYPE),
        };
        let id = data.resolve_id(raw_id, now_ms() as u64)?;
        data.append(id, fields.clone());
        Ok((id, fields))
    }

    pub fn xrange(
        &self,
        key: &[u8],
        start: StreamId,
        end: StreamId,
    ) -> Result<Vec<(StreamId, Vec<(Bytes, Bytes)>)>, &'static str> {
        let mut s = self.shared.lock();
        if !s.evict_if_expired(key) {
            return Ok(Vec::new());
        }
        let data = match &s.entries.get(key).unwrap().value {
            Value::Stream(d) => d,
            _ => return Err(ERR_WRONGTYPE),
        };
        Ok(data
            .range(start, end)
            .into_iter()
            .map(|e| (e.id, e.fields.clone()))
            .collect())
    }

    /// Current tail id of the stream at `key`, or `StreamId::ZERO` if absent
    /// or empty — used to resolve `XREAD`'s `$` id at call time.
    pub fn stream_tail(&self, key: &[u8]) -> StreamId {
        let mut s = self.shared.lock();
        if !s.evict_if_expired(key) {
            return StreamId::ZERO;
        }
        match &s.entries.get(key).unwrap().value {
            Value::Stream(d) => d.last_id(),
            _ => StreamId::ZERO,
        }
    }

    pub fn xread_after(
        &self,
        key: &[u8],
        after: StreamId,
    ) -> Result<Vec<(StreamId, Vec<(Bytes, Bytes)>)>, &'static str> {
        let mut s = self.shared.lock();
        if !s.evict_if_expired(key) {
            return Ok(Vec::new());
        }
        let data = match &s.entries.get(key).unwrap().value {
            Value::Stream(d) => d,
            _ => return Err(ERR_WRONGTYPE),
        };
        Ok(data
            .after(after)
            .into_iter()
            .map(|e| (e.id, e.fields.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let store = Store::new();
        store.set(Bytes::from_static(b"foo"), Bytes::from_static(b"bar"), None);
        assert_eq!(store.get(b"foo").unwrap(), Some(Bytes::from_static(b"bar")));
    }

    #[test]
    fn get_on_expired_key_returns_none_and_evicts() {
        let store = Store::new();
        store.set(Bytes::from_static(b"k"), Bytes::from_static(b"v"), Some(0));
        assert_eq!(store.get(b"k").unwrap(), None);
        assert_eq!(store.key_type(b"k"), None);
    }

    #[test]
    fn set_without_options_drops_prior_expiry() {
        let store = Store::new();
        store.set(Bytes::from_static(b"k"), Bytes::from_static(b"v"), Some(0));
        store.set(Bytes::from_static(b"k"), Bytes::from_static(b"v2"), None);
        assert_eq!(store.get(b"k").unwrap(), Some(Bytes::from_static(b"v2")));
    }

    #[test]
    fn wrongtype_on_list_op_against_string() {
        let store = Store::new();
        store.set(Bytes::from_static(b"k"), Bytes::from_static(b"v"), None);
        assert_eq!(store.llen(b"k"), Err(ERR_WRONGTYPE));
    }

    #[test]
    fn incr_on_missing_key_starts_at_zero() {
        let store = Store::new();
        assert_eq!(store.incr_by(b"ctr", 1), Ok(1));
        assert_eq!(store.incr_by(b"ctr", 5), Ok(6));
    }

    #[test]
    fn incr_on_non_numeric_string_errors() {
        let store = Store::new();
        store.set(Bytes::from_static(b"k"), Bytes::from_static(b"abc"), None);
        assert_eq!(store.incr_by(b"k", 1), Err(ERR_NOT_INT));
    }

    #[test]
    fn incr_overflow_errors() {
        let store = Store::new();
        store.set(
            Bytes::from_static(b"k"),
            Bytes::from(i64::MAX.to_string()),
            None,
        );
        assert_eq!(store.incr_by(b"k", 1), Err(ERR_NOT_INT));
    }

    #[test]
    fn list_becomes_absent_when_emptied_by_pop() {
        let store = Store::new();
        store.push(b"L", vec![Bytes::from_static(b"a")], false).unwrap();
        assert_eq!(store.lpop(b"L", 1).unwrap(), Some(vec![Bytes::from_static(b"a")]));
        assert_eq!(store.key_type(b"L"), None);
    }

    #[test]
    fn lrange_inclusive_and_negative_indices() {
        let store = Store::new();
        store
            .push(
                b"L",
                vec![
                    Bytes::from_static(b"a"),
                    Bytes::from_static(b"b"),
                    Bytes::from_static(b"c"),
                ],
                false,
            )
            .unwrap();
        assert_eq!(
            store.lrange(b"L", 0, -1).unwrap(),
            vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c")
            ]
        );
        assert_eq!(store.lrange(b"L", 1, 1).unwrap(), vec![Bytes::from_static(b"b")]);
        assert_eq!(store.lrange(b"L", 5, 10).unwrap(), Vec::<Bytes>::new());
    }

    #[test]
    fn keys_wildcard_and_exact_match() {
        let store = Store::new();
        store.set(Bytes::from_static(b"a"), Bytes::from_static(b"1"), None);
        store.set(Bytes::from_static(b"b"), Bytes::from_static(b"2"), None);
        let mut all = store.keys(b"*");
        all.sort();
        assert_eq!(all, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert_eq!(store.keys(b"a"), vec![Bytes::from_static(b"a")]);
        assert_eq!(store.keys(b"nope"), Vec::<Bytes>::new());
    }

    #[test]
    fn del_counts_only_actually_deleted_keys() {
        let store = Store::new();
        store.set(Bytes::from_static(b"a"), Bytes::from_static(b"1"), None);
        let count = store.del(&[Bytes::from_static(b"a"), Bytes::from_static(b"missing")]);
        assert_eq!(count, 1);
    }

    #[test]
    fn xadd_rejects_non_increasing_ids() {
        let store = Store::new();
        assert_eq!(store.xadd(b"s", "1-1", vec![]).unwrap().0, StreamId { ms: 1, seq: 1 });
        assert_eq!(
            store.xadd(b"s", "1-1", vec![]),
            Err(stream::ERR_XADD_TOO_SMALL)
        );
    }

    #[test]
    fn xrange_is_in_stream_order() {
        let store = Store::new();
        store.xadd(b"s", "1-1", vec![]).unwrap();
        store.xadd(b"s", "2-1", vec![]).unwrap();
        let got = store
            .xrange(b"s", StreamId::ZERO, StreamId { ms: u64::MAX, seq: u64::MAX })
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0, StreamId { ms: 1, seq: 1 });
        assert_eq!(got[1].0, StreamId { ms: 2, seq: 1 });
    }
}
