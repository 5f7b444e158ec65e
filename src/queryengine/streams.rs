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

//! `XADD`, `XRANGE`, `XREAD` (with optional `BLOCK`).

use super::{ensure_arity, ActionError, ActionResult, Context};
use crate::blocking::deliver;
use crate::protocol::response;
use crate::store::stream::StreamId;
use bytes::Bytes;
use std::time::Duration;

fn encode_entry(out: &mut Vec<u8>, id: StreamId, fields: &[(Bytes, Bytes)]) {
    response::array_header(out, 2);
    response::bulk_string(out, id.render().as_bytes());
    response::array_header(out, fields.len() * 2);
    for (field, value) in fields {
        response::bulk_string(out, field);
        response::bulk_string(out, value);
    }
}

fn encode_entries(out: &mut Vec<u8>, entries: &[(StreamId, Vec<(Bytes, Bytes)>)]) {
    response::array_header(out, entries.len());
    for (id, fields) in entries {
        encode_entry(out, *id, fields);
    }
}

/// The `XREAD` response shape for a single stream's result: `[key, entries]`.
fn encode_xread_stream_result(
    out: &mut Vec<u8>,
    key: &[u8],
    entries: &[(StreamId, Vec<(Bytes, Bytes)>)],
) {
    response::array_header(out, 2);
    response::bulk_string(out, key);
    encode_entries(out, entries);
}

fn parse_field_pairs(args: &[Bytes]) -> Result<Vec<(Bytes, Bytes)>, ActionError> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(ActionError::syntax());
    }
    Ok(args.chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect())
}

pub fn xadd(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_arity(args, 5, "xadd")?;
    let key = args[1].clone();
    let raw_id = String::from_utf8_lossy(&args[2]).into_owned();
    let fields = parse_field_pairs(&args[3..])?;

    let (id, fields) = ctx
        .store
        .xadd(&key, &raw_id, fields)
        .map_err(ActionError::new)?;

    if let Some(tx) = ctx.blocking.pop_stream_waiter(&key) {
        let mut frame = Vec::new();
        response::array_header(&mut frame, 1);
        encode_xread_stream_result(&mut frame, &key, &[(id, fields)]);
        deliver(tx, frame);
    }

    response::bulk_string(out, id.render().as_bytes());
    Ok(())
}

pub fn xrange(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_arity(args, 4, "xrange")?;
    let key = &args[1];
    let start_raw = String::from_utf8_lossy(&args[2]);
    let end_raw = String::from_utf8_lossy(&args[3]);
    let start = if start_raw == "-" {
        StreamId::ZERO
    } else {
        StreamId::parse(&start_raw).ok_or_else(ActionError::syntax)?
    };
    let end = if end_raw == "+" {
        StreamId {
            ms: u64::MAX,
            seq: u64::MAX,
        }
    } else {
        StreamId::parse(&end_raw).ok_or_else(ActionError::syntax)?
    };
    let entries = ctx.store.xrange(key, start, end).map_err(ActionError::new)?;
    encode_entries(out, &entries);
    Ok(())
}

pub async fn xread(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_arity(args, 4, "xread")?;
    let mut i = 1;
    let mut block_ms: Option<u64> = None;
    if args[i].eq_ignore_ascii_case(b"BLOCK") {
        let ms: u64 = std::str::from_utf8(args.get(i + 1).ok_or_else(ActionError::syntax)?)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ActionError::new("timeout is not an integer"))?;
        block_ms = Some(ms);
        i += 2;
    }
    if !args.get(i).is_some_and(|a| a.eq_ignore_ascii_case(b"STREAMS")) {
        return Err(ActionError::syntax());
    }
    i += 1;
    let rest = &args[i..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(ActionError::syntax());
    }
    let n = rest.len() / 2;
    let keys = &rest[..n];
    let ids = &rest[n..];

    if block_ms.is_some() && n != 1 {
        return Err(ActionError::new(
            "XREAD BLOCK is only supported with a single stream",
        ));
    }

    let mut after_ids = Vec::with_capacity(n);
    for (key, id_raw) in keys.iter().zip(ids.iter()) {
        let id_str = String::from_utf8_lossy(id_raw);
        let after = if id_str == "$" {
            ctx.store.stream_tail(key)
        } else {
            StreamId::parse(&id_str).ok_or_else(ActionError::syntax)?
        };
        after_ids.push(after);
    }

    type StreamResult = Vec<(Bytes, Vec<(StreamId, Vec<(Bytes, Bytes)>)>)>;
    let gather = |keys: &[Bytes], after_ids: &[StreamId]| -> Result<StreamResult, ActionError> {
        let mut results = Vec::new();
        for (key, after) in keys.iter().zip(after_ids.iter()) {
            let entries = ctx
                .store
                .xread_after(key, *after)
                .map_err(ActionError::new)?;
            if !entries.is_empty() {
                results.push((key.clone(), entries));
            }
        }
        Ok(results)
    };

    let results = gather(keys, &after_ids)?;
    if !results.is_empty() {
        response::array_header(out, results.len());
        for (key, entries) in &results {
            encode_xread_stream_result(out, key, entries);
        }
        return Ok(());
    }

    let Some(ms) = block_ms else {
        response::empty_array(out);
        return Ok(());
    };

    let key = keys[0].clone();
    let after = after_ids[0];
    let (waiter_id, rx) = ctx.blocking.register_stream_waiter(key.clone(), ctx.client_id);

    // Re-check after registering: an XADD racing the gap between the first
    // gather and this registration must not be missed (see blpop for the
    // same shape of fix).
    let recheck = ctx
        .store
        .xread_after(&key, after)
        .map_err(ActionError::new)?;
    if !recheck.is_empty() {
        ctx.blocking.remove_stream_waiter(&key, waiter_id);
        response::array_header(out, 1);
        encode_xread_stream_result(out, &key, &recheck);
        return Ok(());
    }

    let frame = if ms == 0 {
        rx.await.ok()
    } else {
        tokio::select! {
            res = rx => res.ok(),
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                ctx.blocking.remove_stream_waiter(&key, waiter_id);
                None
            }
        }
    };
    match frame {
        Some(bytes) if !bytes.is_empty() => out.extend_from_slice(&bytes),
        _ => response::null_array(out),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::Registry;
    use crate::config::Config;
    use crate::pubsub::PubSub;
    use crate::store::Store;
    use std::sync::Arc;

    fn ctx() -> Context {
        Context {
            store: Arc::new(Store::new()),
            pubsub: Arc::new(PubSub::new()),
            blocking: Arc::new(Registry::new()),
            config: Arc::new(Config::default()),
            client_id: 1,
        }
    }

    #[test]
    fn xadd_rejects_equal_or_smaller_id() {
        let ctx = ctx();
        let mut out = Vec::new();
        xadd(
            &ctx,
            &[
                Bytes::from_static(b"XADD"),
                Bytes::from_static(b"s"),
                Bytes::from_static(b"1-1"),
                Bytes::from_static(b"f"),
                Bytes::from_static(b"v"),
            ],
            &mut out,
        )
        .unwrap();
        assert_eq!(out, b"$3\r\n1-1\r\n");
        out.clear();
        let err = xadd(
            &ctx,
            &[
                Bytes::from_static(b"XADD"),
                Bytes::from_static(b"s"),
                Bytes::from_static(b"1-1"),
                Bytes::from_static(b"f"),
                Bytes::from_static(b"v"),
            ],
            &mut out,
        )
        .unwrap_err();
        assert_eq!(
            err.0,
            "The ID specified in XADD is equal or smaller than the target stream top item"
        );
    }

    #[test]
    fn xrange_full_span() {
        let ctx = ctx();
        let mut out = Vec::new();
        xadd(
            &ctx,
            &[
                Bytes::from_static(b"XADD"),
                Bytes::from_static(b"s"),
                Bytes::from_static(b"1-1"),
                Bytes::from_static(b"f"),
                Bytes::from_static(b"v"),
            ],
            &mut out,
        )
        .unwrap();
        out.clear();
        xrange(
            &ctx,
            &[
                Bytes::from_static(b"XRANGE"),
                Bytes::from_static(b"s"),
                Bytes::from_static(b"-"),
                Bytes::from_static(b"+"),
            ],
            &mut out,
        )
        .unwrap();
        assert_eq!(out, b"*1\r\n*2\r\n$3\r\n1-1\r\n*2\r\n$1\r\nf\r\n$1\r\nv\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn xread_block_wakes_on_xadd() {
        let ctx = ctx();
        let ctx2 = ctx.clone();
        let handle = tokio::spawn(async move {
            let mut out = Vec::new();
            xread(
                &ctx2,
                &[
                    Bytes::from_static(b"XREAD"),
                    Bytes::from_static(b"BLOCK"),
                    Bytes::from_static(b"0"),
                    Bytes::from_static(b"STREAMS"),
                    Bytes::from_static(b"s"),
                    Bytes::from_static(b"$"),
                ],
                &mut out,
            )
            .await
            .unwrap();
            out
        });
        tokio::task::yield_now().await;
        let mut out = Vec::new();
        xadd(
            &ctx,
            &[
                Bytes::from_static(b"XADD"),
                Bytes::from_static(b"s"),
                Bytes::from_static(b"*"),
                Bytes::from_static(b"f"),
                Bytes::from_static(b"v"),
            ],
            &mut out,
        )
        .unwrap();
        let blocked_out = handle.await.unwrap();
        assert!(!blocked_out.is_empty());
        assert_eq!(blocked_out[0], b'*');
    }

    #[tokio::test]
    async fn xread_against_string_key_is_wrongtype() {
        let ctx = ctx();
        let mut out = Vec::new();
        crate::queryengine::strings::set(
            &ctx,
            &[
                Bytes::from_static(b"SET"),
                Bytes::from_static(b"s"),
                Bytes::from_static(b"v"),
            ],
            &mut out,
        )
        .unwrap();
        out.clear();
        let err = xread(
            &ctx,
            &[
                Bytes::from_static(b"XREAD"),
                Bytes::from_static(b"STREAMS"),
                Bytes::from_static(b"s"),
                Bytes::from_static(b"0"),
            ],
            &mut out,
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, crate::store::ERR_WRONGTYPE);
    }
}
