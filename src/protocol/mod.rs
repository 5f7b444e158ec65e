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

//! The wire codec: a request decoder and a response encoder.
//!
//! Requests are arrays of bulk strings (`*N\r\n` followed by `N` `$len\r\n...\r\n`
//! elements). The decoder is pull-based: it looks at a byte buffer and either
//! returns one fully-decoded frame plus the number of bytes it consumed, says
//! there isn't a complete frame yet (the caller should read more and retry),
//! or reports the buffer is unsalvageable (the caller must close the
//! connection — the frame boundary is gone).

pub mod response;

use crate::util::compiler::unlikely;
use bytes::Bytes;

/// Why decoding a request frame did not produce a `Query`.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Not enough bytes are buffered yet to decide one way or the other.
    /// Not a client error: the caller should read more and retry.
    NotEnough,
    /// The buffer does not begin with a well-formed frame and can never
    /// become one by adding more bytes. Fatal to the connection.
    BadFrame,
}

pub type ParseResult = Result<(Query, usize), ParseError>;

/// One decoded request: the ordered list of bulk-string arguments, including
/// the command name itself as element zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    args: Vec<Bytes>,
}

impl Query {
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Scan `buf` for a single leading `\r\n`-terminated line, returning the line
/// (without the terminator) and the index just past the terminator.
fn read_line(buf: &[u8]) -> Result<(&[u8], usize), ParseError> {
    // two-byte window scan: a bare `\n` never terminates a line here, only `\r\n` does
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Ok((&buf[..i], i + 2));
        }
        i += 1;
    }
    Err(ParseError::NotEnough)
}

fn parse_usize(line: &[u8]) -> Result<usize, ParseError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or(ParseError::BadFrame)
}

/// Attempt to decode exactly one request frame from the front of `buf`.
///
/// On success returns the `Query` and how many bytes of `buf` it consumed —
/// the caller is responsible for draining that prefix. On `NotEnough`, `buf`
/// is left untouched and the caller should wait for more bytes. On
/// `BadFrame`, the connection must be closed.
pub fn decode(buf: &[u8]) -> ParseResult {
    if buf.is_empty() {
        return Err(ParseError::NotEnough);
    }
    if unlikely(buf[0] != b'*') {
        return Err(ParseError::BadFrame);
    }
    let (header, mut pos) = read_line(&buf[1..]).map_err(|_| ParseError::NotEnough)?;
    pos += 1;
    let count = parse_usize(header)?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let rest = &buf[pos..];
        if rest.is_empty() {
            return Err(ParseError::NotEnough);
        }
        if unlikely(rest[0] != b'$') {
            return Err(ParseError::BadFrame);
        }
        let (len_line, consumed) = read_line(&rest[1..]).map_err(|_| ParseError::NotEnough)?;
        let len = parse_usize(len_line)?;
        let body_start = pos + 1 + consumed;
        let body_end = body_start + len;
        let terminator_end = body_end + 2;
        if buf.len() < terminator_end {
            return Err(ParseError::NotEnough);
        }
        if unlikely(&buf[body_end..terminator_end] != b"\r\n") {
            return Err(ParseError::BadFrame);
        }
        args.push(Bytes::copy_from_slice(&buf[body_start..body_end]));
        pos = terminator_end;
    }
    Ok((Query { args }, pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_set_command() {
        let raw = b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
        let (query, consumed) = decode(raw).unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(query.args().len(), 3);
        assert_eq!(&query.args()[0][..], b"SET");
        assert_eq!(&query.args()[1][..], b"foo");
        assert_eq!(&query.args()[2][..], b"bar");
    }

    #[test]
    fn short_read_is_not_enough_not_an_error() {
        let raw = b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nba";
        assert_eq!(decode(raw), Err(ParseError::NotEnough));
        let raw = b"*3\r\n$3\r\nSET";
        assert_eq!(decode(raw), Err(ParseError::NotEnough));
        assert_eq!(decode(b""), Err(ParseError::NotEnough));
    }

    #[test]
    fn non_array_header_is_malformed() {
        assert_eq!(decode(b"+hello\r\n"), Err(ParseError::BadFrame));
    }

    #[test]
    fn bad_bulk_header_is_malformed() {
        let raw = b"*1\r\n:3\r\nfoo\r\n";
        assert_eq!(decode(raw), Err(ParseError::BadFrame));
    }

    #[test]
    fn consumes_only_one_frame_leaving_pipeline_remainder() {
        let raw = b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n";
        let (_, consumed) = decode(raw).unwrap();
        assert_eq!(consumed, 14);
        let (_, consumed2) = decode(&raw[consumed..]).unwrap();
        assert_eq!(consumed2, 14);
    }
}
