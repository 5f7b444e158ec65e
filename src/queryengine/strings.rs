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

//! `SET`, `GET`, `DEL`, `INCR`, `INCRBY`, `TYPE`, `KEYS`.

use super::{ensure_arity, ensure_exact_arity, ActionError, ActionResult, Context};
use crate::protocol::response;
use crate::util::now_ms;
use bytes::Bytes;

pub fn set(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_arity(args, 3, "set")?;
    let key = args[1].clone();
    let value = args[2].clone();
    let mut expiry = None;
    let mut i = 3;
    while i < args.len() {
        let opt = String::from_utf8_lossy(&args[i]).to_uppercase();
        match opt.as_str() {
            "EX" | "PX" => {
                let n = args.get(i + 1).ok_or_else(ActionError::syntax)?;
                let n: i64 = std::str::from_utf8(n)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(ActionError::syntax)?;
                let ms = if opt == "EX" { n * 1000 } else { n };
                expiry = Some(now_ms() + ms as u128);
                i += 2;
            }
            _ => return Err(ActionError::syntax()),
        }
    }
    ctx.store.set(key, value, expiry);
    response::simple_string(out, "OK");
    Ok(())
}

pub fn get(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_exact_arity(args, 2, "get")?;
    match ctx.store.get(&args[1]).map_err(ActionError::new)? {
        Some(v) => response::bulk_string(out, &v),
        None => response::null_bulk_string(out),
    }
    Ok(())
}

pub fn del(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_arity(args, 2, "del")?;
    let count = ctx.store.del(&args[1..]);
    response::integer(out, count as i64);
    Ok(())
}

pub fn incr(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_exact_arity(args, 2, "incr")?;
    let next = ctx.store.incr_by(&args[1], 1).map_err(ActionError::new)?;
    response::integer(out, next);
    Ok(())
}

pub fn incrby(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_exact_arity(args, 3, "incrby")?;
    let delta: i64 = std::str::from_utf8(&args[2])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ActionError::new("value is not an integer or out of range"))?;
    let next = ctx
        .store
        .incr_by(&args[1], delta)
        .map_err(ActionError::new)?;
    response::integer(out, next);
    Ok(())
}

pub fn key_type(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_exact_arity(args, 2, "type")?;
    let kind = ctx.store.key_type(&args[1]).unwrap_or("none");
    response::simple_string(out, kind);
    Ok(())
}

pub fn keys(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_exact_arity(args, 2, "keys")?;
    let keys = ctx.store.keys(&args[1]);
    response::bulk_string_array(out, keys.iter().map(|k| k.as_ref()));
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
    fn set_get_roundtrip() {
        let ctx = ctx();
        let mut out = Vec::new();
        set(
            &ctx,
            &[Bytes::from_static(b"SET"), Bytes::from_static(b"k"), Bytes::from_static(b"v")],
            &mut out,
        )
        .unwrap();
        assert_eq!(out, b"+OK\r\n");
        out.clear();
        get(&ctx, &[Bytes::from_static(b"GET"), Bytes::from_static(b"k")], &mut out).unwrap();
        assert_eq!(out, b"$1\r\nv\r\n");
    }

    #[test]
    fn get_missing_key_is_null_bulk() {
        let ctx = ctx();
        let mut out = Vec::new();
        get(&ctx, &[Bytes::from_static(b"GET"), Bytes::from_static(b"nope")], &mut out).unwrap();
        assert_eq!(out, b"$-1\r\n");
    }

    #[test]
    fn wrong_arity_reports_lowercased_command() {
        let ctx = ctx();
        let mut out = Vec::new();
        let err = get(&ctx, &[Bytes::from_static(b"GET")], &mut out).unwrap_err();
        assert_eq!(err.0, "wrong number of arguments for 'get' command");
    }
}
