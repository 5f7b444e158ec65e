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

//! `LPUSH`, `RPUSH`, `LPOP`, `LLEN`, `LRANGE`, `BLPOP`.

use super::{ensure_arity, ensure_exact_arity, ActionError, ActionResult, Context};
use crate::blocking::deliver;
use crate::protocol::response;
use bytes::Bytes;
use std::time::Duration;

/// Shared by `LPUSH` and `RPUSH`: push, then — per spec.md §4.3 — compute
/// the post-insertion length *before* any waiter handoff, hand off to at
/// most one waiter if one is queued, and finally respond with the
/// pre-handoff length.
pub fn push(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>, front: bool) -> ActionResult {
    let cmd = if front { "lpush" } else { "rpush" };
    ensure_arity(args, 3, cmd)?;
    let key = &args[1];
    let values: Vec<Bytes> = args[2..].to_vec();
    let len = ctx
        .store
        .push(key, values, front)
        .map_err(ActionError::new)?;

    if let Some(tx) = ctx.blocking.pop_list_waiter(key) {
        if let Some(element) = ctx.store.pop_front_for_handoff(key) {
            let mut frame = Vec::new();
            response::bulk_string_array(&mut frame, [key.as_ref(), element.as_ref()]);
            deliver(tx, frame);
        } else {
            // Another task already drained the list; wake the waiter anyway
            // so it does not stall forever (spec.md §4.3: signal regardless).
            deliver(tx, Vec::new());
        }
    }

    response::integer(out, len as i64);
    Ok(())
}

pub fn lpop(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_arity(args, 2, "lpop")?;
    if args.len() > 3 {
        return Err(ActionError::wrong_arity("lpop"));
    }
    let has_count = args.len() == 3;
    let count = if has_count {
        std::str::from_utf8(&args[2])
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| ActionError::new("value is not an integer or out of range"))?
    } else {
        1
    };
    let popped = ctx.store.lpop(&args[1], count).map_err(ActionError::new)?;
    match (has_count, popped) {
        (false, None) => response::null_bulk_string(out),
        (false, Some(v)) if v.is_empty() => response::null_bulk_string(out),
        (false, Some(v)) => response::bulk_string(out, &v[0]),
        (true, None) => response::null_array(out),
        (true, Some(v)) => response::bulk_string_array(out, v.iter().map(|b| b.as_ref())),
    }
    Ok(())
}

pub fn llen(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_exact_arity(args, 2, "llen")?;
    let len = ctx.store.llen(&args[1]).map_err(ActionError::new)?;
    response::integer(out, len as i64);
    Ok(())
}

pub fn lrange(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_exact_arity(args, 4, "lrange")?;
    let parse_idx = |b: &[u8]| -> Result<i64, ActionError> {
        std::str::from_utf8(b)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ActionError::new("value is not an integer or out of range"))
    };
    let start = parse_idx(&args[2])?;
    let end = parse_idx(&args[3])?;
    let items = ctx
        .store
        .lrange(&args[1], start, end)
        .map_err(ActionError::new)?;
    response::bulk_string_array(out, items.iter().map(|b| b.as_ref()));
    Ok(())
}

pub async fn blpop(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_exact_arity(args, 3, "blpop")?;
    let key = args[1].clone();
    let timeout: f64 = std::str::from_utf8(&args[2])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ActionError::new("timeout is not a float"))?;
    if timeout < 0.0 {
        return Err(ActionError::new("timeout is negative"));
    }

    // A key that exists and isn't a list must fail with WRONGTYPE rather than
    // silently blocking forever; `llen` already draws that distinction
    // (`Ok(0)` for absent-or-empty, `Err` for a wrong-kind key).
    ctx.store.llen(&key).map_err(ActionError::new)?;

    // Register before re-checking for data, not after: checking first and
    // registering second leaves a gap where a concurrent RPUSH can see no
    // waiter, leave its element in the list, and return. This BLPOP would
    // then register and block on data that was already there.
    let (id, rx) = ctx.blocking.register_list_waiter(key.clone(), ctx.client_id);

    if let Some(element) = ctx.store.pop_front_for_handoff(&key) {
        ctx.blocking.remove_list_waiter(&key, id);
        response::bulk_string_array(out, [key.as_ref(), element.as_ref()]);
        return Ok(());
    }

    let frame = if timeout == 0.0 {
        rx.await.ok()
    } else {
        tokio::select! {
            res = rx => res.ok(),
            _ = tokio::time::sleep(Duration::from_secs_f64(timeout)) => {
                ctx.blocking.remove_list_waiter(&key, id);
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
    fn rpush_then_lrange_then_lpop_matches_scenario() {
        let ctx = ctx();
        let mut out = Vec::new();
        push(
            &ctx,
            &[
                Bytes::from_static(b"RPUSH"),
                Bytes::from_static(b"L"),
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
            ],
            &mut out,
            false,
        )
        .unwrap();
        assert_eq!(out, b":2\r\n");
        out.clear();
        lrange(
            &ctx,
            &[
                Bytes::from_static(b"LRANGE"),
                Bytes::from_static(b"L"),
                Bytes::from_static(b"0"),
                Bytes::from_static(b"-1"),
            ],
            &mut out,
        )
        .unwrap();
        assert_eq!(out, b"*2\r\n$1\r\na\r\n$1\r\nb\r\n");
        out.clear();
        lpop(&ctx, &[Bytes::from_static(b"LPOP"), Bytes::from_static(b"L")], &mut out).unwrap();
        assert_eq!(out, b"$1\r\na\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn blpop_wakes_on_rpush_with_oldest_element() {
        let ctx = ctx();
        let ctx2 = ctx.clone();
        let handle = tokio::spawn(async move {
            let mut out = Vec::new();
            blpop(
                &ctx2,
                &[
                    Bytes::from_static(b"BLPOP"),
                    Bytes::from_static(b"L"),
                    Bytes::from_static(b"0"),
                ],
                &mut out,
            )
            .await
            .unwrap();
            out
        });
        tokio::task::yield_now().await;
        let mut out = Vec::new();
        push(
            &ctx,
            &[
                Bytes::from_static(b"RPUSH"),
                Bytes::from_static(b"L"),
                Bytes::from_static(b"x"),
            ],
            &mut out,
            false,
        )
        .unwrap();
        assert_eq!(out, b":1\r\n");
        let blocked_out = handle.await.unwrap();
        assert_eq!(blocked_out, b"*2\r\n$1\r\nL\r\n$1\r\nx\r\n");
        assert_eq!(ctx.store.key_type(b"L"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn blpop_against_string_key_is_wrongtype() {
        let ctx = ctx();
        let mut out = Vec::new();
        crate::queryengine::strings::set(
            &ctx,
            &[
                Bytes::from_static(b"SET"),
                Bytes::from_static(b"S"),
                Bytes::from_static(b"v"),
            ],
            &mut out,
        )
        .unwrap();
        out.clear();
        let err = blpop(
            &ctx,
            &[
                Bytes::from_static(b"BLPOP"),
                Bytes::from_static(b"S"),
                Bytes::from_static(b"0"),
            ],
            &mut out,
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, crate::store::ERR_WRONGTYPE);
    }

    #[tokio::test(start_paused = true)]
    async fn blpop_times_out_with_null_array() {
        let ctx = ctx();
        let mut out = Vec::new();
        let fut = blpop(
            &ctx,
            &[
                Bytes::from_static(b"BLPOP"),
                Bytes::from_static(b"L"),
                Bytes::from_static(b"1"),
            ],
            &mut out,
        );
        tokio::pin!(fut);
        tokio::time::advance(Duration::from_secs(2)).await;
        fut.await.unwrap();
        assert_eq!(out, b"*-1\r\n");
    }
}
