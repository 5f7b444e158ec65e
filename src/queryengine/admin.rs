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

//! `CONFIG GET`, `PING`, `ECHO`.

use super::{ensure_exact_arity, ActionError, ActionResult, Context};
use crate::protocol::response;
use bytes::Bytes;

pub fn config_get(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_exact_arity(args, 3, "config")?;
    if !args[1].eq_ignore_ascii_case(b"GET") {
        return Err(ActionError::syntax());
    }
    let param = String::from_utf8_lossy(&args[2]).into_owned();
    let value = ctx.config.get_param(&param);
    response::array_header(out, 2);
    response::bulk_string(out, param.as_bytes());
    response::bulk_string(out, value.as_bytes());
    Ok(())
}

pub fn ping(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    if args.len() > 2 {
        return Err(ActionError::wrong_arity("ping"));
    }
    if ctx.pubsub.is_subscribed(ctx.client_id) {
        response::array_header(out, 2);
        response::bulk_string(out, b"pong");
        response::bulk_string(out, b"");
        return Ok(());
    }
    match args.get(1) {
        Some(msg) => response::bulk_string(out, msg),
        None => response::simple_string(out, "PONG"),
    }
    Ok(())
}

pub fn echo(args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    if args.len() != 2 {
        return Err(ActionError::wrong_arity("echo"));
    }
    response::bulk_string(out, &args[1]);
    Ok(())
}
