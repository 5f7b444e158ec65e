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

//! Command dispatch: argument-shape validation, store invocation, response
//! writing. One [`execute`] call handles one already-decoded [`Query`].

pub mod admin;
pub mod lists;
pub mod pubsub;
pub mod strings;
pub mod streams;

use crate::blocking::Registry;
use crate::config::Config;
use crate::protocol::{response, Query};
use crate::pubsub::{ClientId, PubSub};
use crate::store::Store;
use crate::util::compiler::likely;
use std::sync::Arc;

/// The command names recognized at the top level, uppercased.
pub mod tags {
    pub const SET: &str = "SET";
    pub const GET: &str = "GET";
    pub const DEL: &str = "DEL";
    pub const INCR: &str = "INCR";
    pub const INCRBY: &str = "INCRBY";
    pub const TYPE: &str = "TYPE";
    pub const KEYS: &str = "KEYS";
    pub const LPUSH: &str = "LPUSH";
    pub const RPUSH: &str = "RPUSH";
    pub const LPOP: &str = "LPOP";
    pub const LLEN: &str = "LLEN";
    pub const LRANGE: &str = "LRANGE";
    pub const BLPOP: &str = "BLPOP";
    pub const XADD: &str = "XADD";
    pub const XRANGE: &str = "XRANGE";
    pub const XREAD: &str = "XREAD";
    pub const SUBSCRIBE: &str = "SUBSCRIBE";
    pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
    pub const PSUBSCRIBE: &str = "PSUBSCRIBE";
    pub const PUNSUBSCRIBE: &str = "PUNSUBSCRIBE";
    pub const PUBLISH: &str = "PUBLISH";
    pub const CONFIG: &str = "CONFIG";
    pub const PING: &str = "PING";
    pub const ECHO: &str = "ECHO";
    pub const QUIT: &str = "QUIT";
}

/// Commands a subscribed connection may still issue (spec.md §4.2).
const SUBSCRIBE_MODE_WHITELIST: &[&str] = &[
    tags::SUBSCRIBE,
    tags::UNSUBSCRIBE,
    tags::PSUBSCRIBE,
    tags::PUNSUBSCRIBE,
    tags::PING,
    tags::QUIT,
];

/// A per-request failure, written back as a RESP error frame
/// (`-<text>\r\n`). Never fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError(pub String);

impl ActionError {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn wrong_arity(cmd: &str) -> Self {
        Self::new(format!("wrong number of arguments for '{cmd}' command"))
    }

    pub fn syntax() -> Self {
        Self::new("syntax error")
    }
}

impl From<&str> for ActionError {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

pub type ActionResult = Result<(), ActionError>;

/// Shared handles a connection's dispatcher needs: the data store, the
/// pub/sub index, the blocking registry and the server configuration. Cheap
/// to clone (every field is an `Arc`), so one lives per connection task.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<Store>,
    pub pubsub: Arc<PubSub>,
    pub blocking: Arc<Registry>,
    pub config: Arc<Config>,
    pub client_id: ClientId,
}

/// What the dispatcher wants the connection loop to do after one command.
pub enum Outcome {
    Continue,
    Close,
}

/// Execute one decoded request, writing its response frame into `out`.
pub async fn execute(ctx: &Context, query: &Query, out: &mut Vec<u8>) -> Outcome {
    let args = query.args();
    let Some(cmd_bytes) = args.first() else {
        return Outcome::Continue;
    };
    let cmd = String::from_utf8_lossy(cmd_bytes).to_uppercase();

    if ctx.pubsub.is_subscribed(ctx.client_id) && !SUBSCRIBE_MODE_WHITELIST.contains(&cmd.as_str())
    {
        response::error(
            out,
            &format!("Can't execute '{cmd}' when client is subscribed"),
        );
        return Outcome::Continue;
    }

    let result = match cmd.as_str() {
        tags::SET => strings::set(ctx, args, out),
        tags::GET => strings::get(ctx, args, out),
        tags::DEL => strings::del(ctx, args, out),
        tags::INCR => strings::incr(ctx, args, out),
        tags::INCRBY => strings::incrby(ctx, args, out),
        tags::TYPE => strings::key_type(ctx, args, out),
        tags::KEYS => strings::keys(ctx, args, out),
        tags::LPUSH => lists::push(ctx, args, out, true),
        tags::RPUSH => lists::push(ctx, args, out, false),
        tags::LPOP => lists::lpop(ctx, args, out),
        tags::LLEN => lists::llen(ctx, args, out),
        tags::LRANGE => lists::lrange(ctx, args, out),
        tags::BLPOP => lists::blpop(ctx, args, out).await,
        tags::XADD => streams::xadd(ctx, args, out),
        tags::XRANGE => streams::xrange(ctx, args, out),
        tags::XREAD => streams::xread(ctx, args, out).await,
        tags::SUBSCRIBE => pubsub::subscribe(ctx, args, out),
        tags::UNSUBSCRIBE => pubsub::unsubscribe(ctx, args, out),
        tags::PSUBSCRIBE | tags::PUNSUBSCRIBE => Err(ActionError::new("syntax error")),
        tags::PUBLISH => pubsub::publish(ctx, args, out),
        tags::CONFIG => admin::config_get(ctx, args, out),
        tags::PING => admin::ping(ctx, args, out),
        tags::ECHO => admin::echo(args, out),
        tags::QUIT => {
            response::simple_string(out, "OK");
            return Outcome::Close;
        }
        other => Err(ActionError::new(format!("unknown command '{other}'"))),
    };

    if let Err(e) = result {
        response::error(out, &e.0);
    }
    Outcome::Continue
}

/// Shared arity check: error text matches spec.md's `wrong number of
/// arguments for '<cmd>' command` exactly, `<cmd>` lowercased to match the
/// reference server's casing in error text.
pub(crate) fn ensure_arity(args: &[bytes::Bytes], min: usize, cmd: &str) -> ActionResult {
    if likely(args.len() >= min) {
        Ok(())
    } else {
        Err(ActionError::wrong_arity(&cmd.to_lowercase()))
    }
}

pub(crate) fn ensure_exact_arity(args: &[bytes::Bytes], n: usize, cmd: &str) -> ActionResult {
    if likely(args.len() == n) {
        Ok(())
    } else {
        Err(ActionError::wrong_arity(&cmd.to_lowercase()))
    }
}
