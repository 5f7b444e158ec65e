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

//! Response frame encoding. Every helper appends to a caller-owned buffer
//! rather than allocating its own `Vec`, so a single request's response can
//! be built up (e.g. an array of bulk strings) without intermediate copies.

/// Precompiled constants for the handful of fixed responses sent on the hot
/// path, avoiding repeated formatting for the common cases.
pub mod precompiled {
    pub const OK: &[u8] = b"+OK\r\n";
    pub const PONG: &[u8] = b"+PONG\r\n";
    pub const NULL_BULK: &[u8] = b"$-1\r\n";
    pub const NULL_ARRAY: &[u8] = b"*-1\r\n";
    pub const EMPTY_ARRAY: &[u8] = b"*0\r\n";
}

pub fn simple_string(buf: &mut Vec<u8>, text: &str) {
    buf.push(b'+');
    buf.extend_from_slice(text.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

pub fn error(buf: &mut Vec<u8>, text: &str) {
    buf.push(b'-');
    buf.extend_from_slice(text.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

pub fn integer(buf: &mut Vec<u8>, n: i64) {
    buf.push(b':');
    buf.extend_from_slice(n.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
}

pub fn bulk_string(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.push(b'$');
    buf.extend_from_slice(bytes.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(bytes);
    buf.extend_from_slice(b"\r\n");
}

pub fn null_bulk_string(buf: &mut Vec<u8>) {
    buf.extend_from_slice(precompiled::NULL_BULK);
}

pub fn null_array(buf: &mut Vec<u8>) {
    buf.extend_from_slice(precompiled::NULL_ARRAY);
}

pub fn empty_array(buf: &mut Vec<u8>) {
    buf.extend_from_slice(precompiled::EMPTY_ARRAY);
}

/// Write an array header for `len` upcoming pre-encoded items. The caller
/// writes the items themselves immediately afterward.
pub fn array_header(buf: &mut Vec<u8>, len: usize) {
    buf.push(b'*');
    buf.extend_from_slice(len.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// Encode an array of bulk strings in one call, for the common case where
/// every element is a plain byte string (e.g. `[key, element]`).
pub fn bulk_string_array<'a, I>(buf: &mut Vec<u8>, items: I)
where
    I: IntoIterator<Item = &'a [u8]>,
    I::IntoIter: ExactSizeIterator,
{
    let items = items.into_iter();
    array_header(buf, items.len());
    for item in items {
        bulk_string(buf, item);
    }
}
