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

//! `SUBSCRIBE`, `UNSUBSCRIBE`, `PUBLISH`.

use super::{ensure_exact_arity, ActionResult, Context};
use crate::protocol::response;
use bytes::Bytes;

pub fn subscribe(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_exact_arity(args, 2, "subscribe")?;
    let channel = args[1].clone();
    let count = ctx.pubsub.subscribe(ctx.client_id, channel.clone());
    response::array_header(out, 3);
    response::bulk_string(out, b"subscribe");
    response::bulk_string(out, &channel);
    response::integer(out, count as i64);
    Ok(())
}

pub fn unsubscribe(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_exact_arity(args, 2, "unsubscribe")?;
    let channel = args[1].clone();
    let count = ctx.pubsub.unsubscribe(ctx.client_id, &channel);
    response::array_header(out, 3);
    response::bulk_string(out, b"unsubscribe");
    response::bulk_string(out, &channel);
    response::integer(out, count as i64);
    Ok(())
}

pub fn publish(ctx: &Context, args: &[Bytes], out: &mut Vec<u8>) -> ActionResult {
    ensure_exact_arity(args, 3, "publish")?;
    let delivered = ctx.pubsub.publish(&args[1], &args[2]);
    response::integer(out, delivered as i64);
    Ok(())
}
