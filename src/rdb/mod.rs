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

//! Read-only, best-effort loader for the RDB-style snapshot format.
//!
//! On any parse failure the load aborts silently, keeping whatever entries
//! were decoded so far — the server never refuses to start over a bad or
//! missing snapshot.

use crate::store::Store;
use crate::util::error::Error;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

const OP_AUX: u8 = 0xFA;
const OP_SELECTDB: u8 = 0xFE;
const OP_RESIZEDB: u8 = 0xFB;
const OP_EXPIRETIME_MS: u8 = 0xFC;
const OP_EXPIRETIME: u8 = 0xFD;
const OP_EOF: u8 = 0xFF;
const TYPE_STRING: u8 = 0x00;

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn byte(&mut self) -> Option<u8> {
        self.take(1).map(|s| s[0])
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn back_one(&mut self) {
        self.pos -= 1;
    }

    /// RDB length/string encoding (spec.md §4.5). Returns the decoded bytes
    /// for both plain-length strings and the `11`-prefix integer encodings
    /// (rendered as their decimal form, matching how the rest of the server
    /// treats string values).
    fn read_string(&mut self) -> Option<Bytes> {
        let b = self.byte()?;
        match b >> 6 {
            0b00 => {
                let len = (b & 0x3F) as usize;
                self.take(len).map(Bytes::copy_from_slice)
            }
            0b01 => {
                let next = self.byte()?;
                let len = (((b & 0x3F) as usize) << 8) | next as usize;
                self.take(len).map(Bytes::copy_from_slice)
            }
            0b10 => {
                let bytes = self.take(4)?;
                let len = u32::from_be_bytes(bytes.try_into().ok()?) as usize;
                self.take(len).map(Bytes::copy_from_slice)
            }
            0b11 => match b & 0x3F {
                0x00 => {
                    let v = self.byte()? as i64;
                    Some(Bytes::from(v.to_string()))
                }
                0x01 => {
                    let bytes = self.take(2)?;
                    let v = i16::from_le_bytes(bytes.try_into().ok()?) as i64;
                    Some(Bytes::from(v.to_string()))
                }
                0x02 => {
                    let bytes = self.take(4)?;
                    let v = i32::from_le_bytes(bytes.try_into().ok()?) as i64;
                    Some(Bytes::from(v.to_string()))
                }
                _ => None,
            },
            _ => unreachable!("two-bit selector"),
        }
    }

    /// Decode a bare length value (used for the DB index and resize hints),
    /// which reuses the string encoding's length prefix but has no following
    /// byte body — unlike `read_string`, nothing is consumed past the
    /// length bytes themselves.
    fn read_length(&mut self) -> Option<usize> {
        let b = self.byte()?;
        match b >> 6 {
            0b00 => Some((b & 0x3F) as usize),
            0b01 => {
                let next = self.byte()?;
                Some((((b & 0x3F) as usize) << 8) | next as usize)
            }
            0b10 => {
                let bytes = self.take(4)?;
                Some(u32::from_be_bytes(bytes.try_into().ok()?) as usize)
            }
            _ => None,
        }
    }
}

/// Load `path` into `store`, logging and swallowing any failure. Missing
/// file is treated the same as "nothing to load."
pub async fn load(store: &Arc<Store>, path: &Path) {
    let data = match tokio::fs::read(path).await {
        Ok(d) => d,
        Err(e) => {
            log::debug!("no RDB snapshot loaded from {}: {e}", path.display());
            return;
        }
    };
    match load_bytes(store, &data) {
        Ok(n) => log::info!("loaded {n} keys from {}", path.display()),
        Err(e) => log::warn!(
            "RDB snapshot at {} is malformed, keeping partial load: {e}",
            path.display()
        ),
    }
}

fn bad(msg: &str) -> Error {
    Error::Rdb(msg.to_owned())
}

fn load_bytes(store: &Arc<Store>, data: &[u8]) -> Result<usize, Error> {
    let mut cursor = Cursor::new(data);
    if cursor.take(5) != Some(b"REDIS") {
        return Err(bad("missing REDIS magic"));
    }
    cursor.take(4).ok_or_else(|| bad("truncated version field"))?;

    let mut loaded = 0usize;
    loop {
        let opcode = match cursor.byte() {
            Some(b) => b,
            None => break,
        };
        match opcode {
            OP_EOF => break,
            OP_AUX => {
                cursor.read_string().ok_or_else(|| bad("truncated aux key"))?;
                cursor.read_string().ok_or_else(|| bad("truncated aux value"))?;
            }
            OP_SELECTDB => {
                cursor.read_length().ok_or_else(|| bad("truncated db index"))?;
                if cursor.peek() == Some(OP_RESIZEDB) {
                    cursor.byte();
                    cursor
                        .read_length()
                        .ok_or_else(|| bad("truncated resize hint"))?;
                    cursor
                        .read_length()
                        .ok_or_else(|| bad("truncated resize hint"))?;
                }
                loop {
                    let mut expiry: Option<u128> = None;
                    let mut next = cursor.byte().ok_or_else(|| bad("truncated entry"))?;
                    if next == OP_EXPIRETIME_MS {
                        let bytes = cursor.take(8).ok_or_else(|| bad("truncated ms expiry"))?;
                        let ms = u64::from_le_bytes(
                            bytes.try_into().map_err(|_| bad("malformed ms expiry"))?,
                        );
                        expiry = Some(ms as u128);
                        next = cursor.byte().ok_or_else(|| bad("truncated entry"))?;
                    } else if next == OP_EXPIRETIME {
                        let bytes = cursor.take(4).ok_or_else(|| bad("truncated sec expiry"))?;
                        let secs = u32::from_le_bytes(
                            bytes.try_into().map_err(|_| bad("malformed sec expiry"))?,
                        );
                        expiry = Some(secs as u128 * 1000);
                        next = cursor.byte().ok_or_else(|| bad("truncated entry"))?;
                    }
                    if next == OP_EOF {
                        cursor.back_one();
                        break;
                    }
                    let value_type = next;
                    let key = cursor.read_string().ok_or_else(|| bad("truncated key"))?;
                    if value_type == TYPE_STRING {
                        let value = cursor.read_string().ok_or_else(|| bad("truncated value"))?;
                        store.rdb_insert_string(key, value, expiry);
                        loaded += 1;
                    } else {
                        // Unknown value kind: we have no way to know its
                        // encoded length without a type-specific parser, so
                        // best-effort loading stops here rather than risk
                        // desynchronizing the cursor.
                        return Ok(loaded);
                    }
                }
            }
            _ => return Ok(loaded),
        }
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn len_prefixed(s: &[u8]) -> Vec<u8> {
        let mut v = vec![s.len() as u8];
        v.extend_from_slice(s);
        v
    }

    #[test]
    fn loads_a_single_string_key() {
        let mut data = Vec::new();
        data.extend_from_slice(b"REDIS0011");
        data.push(OP_SELECTDB);
        data.push(0); // db index, 6-bit length 0
        data.push(TYPE_STRING);
        data.extend_from_slice(&len_prefixed(b"foo"));
        data.extend_from_slice(&len_prefixed(b"bar"));
        data.push(OP_EOF);

        let store = Arc::new(Store::new());
        let loaded = load_bytes(&store, &data).unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(store.get(b"foo").unwrap(), Some(Bytes::from_static(b"bar")));
    }

    #[test]
    fn bad_magic_aborts_with_nothing_loaded() {
        let store = Arc::new(Store::new());
        assert!(load_bytes(&store, b"NOTRDB").is_err());
        assert_eq!(store.key_type(b"foo"), None);
    }

    #[test]
    fn expiry_ms_opcode_is_applied() {
        let mut data = Vec::new();
        data.extend_from_slice(b"REDIS0011");
        data.push(OP_SELECTDB);
        data.push(0);
        data.push(OP_EXPIRETIME_MS);
        data.extend_from_slice(&0u64.to_le_bytes());
        data.push(TYPE_STRING);
        data.extend_from_slice(&len_prefixed(b"k"));
        data.extend_from_slice(&len_prefixed(b"v"));
        data.push(OP_EOF);

        let store = Arc::new(Store::new());
        load_bytes(&store, &data).unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
    }

    #[test]
    fn aux_fields_are_skipped() {
        let mut data = Vec::new();
        data.extend_from_slice(b"REDIS0011");
        data.push(OP_AUX);
        data.extend_from_slice(&len_prefixed(b"redis-ver"));
        data.extend_from_slice(&len_prefixed(b"7.0"));
        data.push(OP_EOF);

        let store = Arc::new(Store::new());
        assert_eq!(load_bytes(&store, &data).unwrap(), 0);
    }
}
