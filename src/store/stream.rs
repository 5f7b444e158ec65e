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

//! Append-only stream bodies: ids, entries, and the `XADD` id-resolution rule.

use bytes::Bytes;

/// A stream entry id: the pair `(ms, seq)`, ordered lexicographically on
/// that pair — exactly the ordering `"<ms>-<seq>"` string comparison would
/// not give you for free, so we keep the pair rather than the string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

    pub fn render(&self) -> String {
        format!("{}-{}", self.ms, self.seq)
    }

    /// Parse `"<ms>-<seq>"` or a bare `"<ms>"` (seq defaults to 0, used by
    /// `XRANGE`'s low-bound shorthand).
    pub fn parse(s: &str) -> Option<StreamId> {
        match s.split_once('-') {
            Some((ms, seq)) => Some(StreamId {
                ms: ms.parse().ok()?,
                seq: seq.parse().ok()?,
            }),
            None => Some(StreamId {
                ms: s.parse().ok()?,
                seq: 0,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Bytes, Bytes)>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamData {
    pub entries: Vec<StreamEntry>,
    last_id: StreamId,
}

pub enum XaddId<'a> {
    /// `*`
    Auto,
    /// `<ms>-*`
    AutoSeq(u64),
    /// `<ms>-<seq>`
    Explicit(StreamId),
    /// anything that fails to parse as one of the above
    Invalid(&'a str),
}

pub fn classify_xadd_id(raw: &str) -> XaddId<'_> {
    if raw == "*" {
        return XaddId::Auto;
    }
    if let Some((ms_part, "*")) = raw.split_once('-') {
        return match ms_part.parse() {
            Ok(ms) => XaddId::AutoSeq(ms),
            Err(_) => XaddId::Invalid(raw),
        };
    }
    match StreamId::parse(raw) {
        Some(id) if raw.contains('-') => XaddId::Explicit(id),
        _ => XaddId::Invalid(raw),
    }
}

pub const ERR_XADD_TOO_SMALL: &str =
    "The ID specified in XADD is equal or smaller than the target stream top item";
pub const ERR_XADD_ZERO: &str = "The ID specified in XADD must be greater than 0-0";

impl StreamData {
    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    /// Resolve a client-supplied id string into the concrete id to assign,
    /// per the `XADD` resolution rule, without mutating the stream.
    pub fn resolve_id(&self, raw: &str, now_ms: u64) -> Result<StreamId, &'static str> {
        let last = self.last_id;
        match classify_xadd_id(raw) {
            XaddId::Auto => {
                if now_ms > last.ms {
                    Ok(StreamId { ms: now_ms, seq: 0 })
                } else {
                    Ok(StreamId {
                        ms: last.ms,
                        seq: last.seq + 1,
                    })
                }
            }
            XaddId::AutoSeq(ms) => {
                if ms > last.ms {
                    Ok(StreamId { ms, seq: 0 })
                } else if ms == last.ms {
                    Ok(StreamId {
                        ms,
                        seq: last.seq + 1,
                    })
                } else {
                    Err(ERR_XADD_TOO_SMALL)
                }
            }
            XaddId::Explicit(id) => {
                if id == StreamId::ZERO {
                    Err(ERR_XADD_ZERO)
                } else if id <= last && last != StreamId::ZERO {
                    Err(ERR_XADD_TOO_SMALL)
                } else {
                    Ok(id)
                }
            }
            XaddId::Invalid(_) => Err("syntax error"),
        }
    }

    pub fn append(&mut self, id: StreamId, fields: Vec<(Bytes, Bytes)>) {
        self.entries.push(StreamEntry { id, fields });
        self.last_id = id;
    }

    /// Entries with `start <= id <= end`, in stream order.
    pub fn range(&self, start: StreamId, end: StreamId) -> Vec<&StreamEntry> {
        self.entries
            .iter()
            .filter(|e| e.id >= start && e.id <= end)
            .collect()
    }

    /// Entries strictly greater than `after`, in stream order.
    pub fn after(&self, after: StreamId) -> Vec<&StreamEntry> {
        self.entries.iter().filter(|e| e.id > after).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_id_advances_seq_within_same_ms() {
        let mut s = StreamData::default();
        let id1 = s.resolve_id("*", 100).unwrap();
        assert_eq!(id1, StreamId { ms: 100, seq: 0 });
        s.append(id1, vec![]);
        let id2 = s.resolve_id("*", 100).unwrap();
        assert_eq!(id2, StreamId { ms: 100, seq: 1 });
    }

    #[test]
    fn explicit_id_rejects_non_increasing() {
        let mut s = StreamData::default();
        let id = s.resolve_id("1-1", 0).unwrap();
        s.append(id, vec![]);
        assert_eq!(s.resolve_id("1-1", 0), Err(ERR_XADD_TOO_SMALL));
        assert_eq!(s.resolve_id("1-0", 0), Err(ERR_XADD_TOO_SMALL));
        assert_eq!(s.resolve_id("1-2", 0).unwrap(), StreamId { ms: 1, seq: 2 });
    }

    #[test]
    fn zero_zero_is_rejected_even_when_empty() {
        let s = StreamData::default();
        assert_eq!(s.resolve_id("0-0", 0), Err(ERR_XADD_ZERO));
    }

    #[test]
    fn ms_star_advances_or_errors() {
        let mut s = StreamData::default();
        let id = s.resolve_id("5-*", 0).unwrap();
        assert_eq!(id, StreamId { ms: 5, seq: 0 });
        s.append(id, vec![]);
        assert_eq!(s.resolve_id("5-*", 0).unwrap(), StreamId { ms: 5, seq: 1 });
        assert_eq!(s.resolve_id("4-*", 0), Err(ERR_XADD_TOO_SMALL));
        assert_eq!(s.resolve_id("6-*", 0).unwrap(), StreamId { ms: 6, seq: 0 });
    }

    #[test]
    fn range_is_inclusive_on_both_ends() {
        let mut s = StreamData::default();
        for i in 1..=3u64 {
            let id = StreamId { ms: i, seq: 0 };
            s.append(id, vec![]);
        }
        let got = s.range(StreamId { ms: 1, seq: 0 }, StreamId { ms: 2, seq: 0 });
        assert_eq!(got.len(), 2);
    }
}
