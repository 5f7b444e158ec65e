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

//! Connection lifecycle: accept loop, per-connection handler, graceful
//! shutdown.

pub mod connection;
pub mod listener;

use std::cell::Cell;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

pub const MAXIMUM_CONNECTION_LIMIT: usize = 50000;

/// Responsible for gracefully shutting down a connection instead of it
/// dying mid-request when the server is asked to stop.
pub struct Terminator {
    terminate: bool,
    signal: broadcast::Receiver<()>,
}

impl Terminator {
    pub fn new(signal: broadcast::Receiver<()>) -> Self {
        Terminator {
            terminate: false,
            signal,
        }
    }

    pub const fn is_termination_signal(&self) -> bool {
        self.terminate
    }

    pub async fn receive_signal(&mut self) {
        if self.terminate {
            return;
        }
        let _ = self.signal.recv().await;
        self.terminate = true;
    }
}

/// A backoff implementation for the accept loop: on a transient accept
/// error, wait an exponentially growing interval before retrying, and give
/// up once the backoff has grown past a ceiling.
pub(crate) struct NetBackoff {
    c: Cell<u8>,
}

impl NetBackoff {
    const MAX_BACKOFF: u8 = 64;

    pub const fn new() -> Self {
        Self { c: Cell::new(1) }
    }

    pub async fn spin(&self) {
        time::sleep(Duration::from_secs(self.c.get() as u64)).await;
        self.c.set(self.c.get().saturating_mul(2));
    }

    pub fn should_disconnect(&self) -> bool {
        self.c.get() > Self::MAX_BACKOFF
    }
}
