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

//! Per-connection request loop: decode a frame, dispatch it, write the
//! response, repeat. Also the receiving end of pub/sub pushes addressed to
//! this connection, and the termination signal for graceful shutdown.

use super::Terminator;
use crate::blocking::Registry;
use crate::config::Config;
use crate::protocol::{self, ParseError};
use crate::pubsub::{ClientId, PubSub};
use crate::queryengine::{self, Context, Outcome};
use crate::store::Store;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, mpsc::Sender};

pub struct ConnectionHandler {
    stream: TcpStream,
    buf: Vec<u8>,
    client_id: ClientId,
    ctx: Context,
    push_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    terminator: Terminator,
    _term_sig_tx: Sender<()>,
}

impl ConnectionHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: TcpStream,
        client_id: ClientId,
        store: Arc<Store>,
        pubsub: Arc<PubSub>,
        blocking: Arc<Registry>,
        config: Arc<Config>,
        terminator: Terminator,
        term_sig_tx: Sender<()>,
    ) -> Self {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        pubsub.register_sink(client_id, push_tx);
        let ctx = Context {
            store,
            pubsub,
            blocking,
            config,
            client_id,
        };
        Self {
            stream,
            buf: Vec::with_capacity(4096),
            client_id,
            ctx,
            push_rx,
            terminator,
            _term_sig_tx: term_sig_tx,
        }
    }

    pub async fn run(mut self) {
        if let Err(e) = self.serve().await {
            log::debug!("connection {} closed: {e}", self.client_id);
        } else {
            log::debug!("connection {} closed", self.client_id);
        }
        self.ctx.pubsub.remove_client(self.client_id);
        self.ctx.blocking.remove_client(self.client_id);
    }

    async fn serve(&mut self) -> std::io::Result<()> {
        loop {
            loop {
                match protocol::decode(&self.buf) {
                    Ok((query, consumed)) => {
                        self.buf.drain(..consumed);
                        let mut out = Vec::new();
                        let outcome = queryengine::execute(&self.ctx, &query, &mut out).await;
                        if !out.is_empty() {
                            self.stream.write_all(&out).await?;
                        }
                        if matches!(outcome, Outcome::Close) {
                            return Ok(());
                        }
                    }
                    Err(ParseError::NotEnough) => break,
                    Err(ParseError::BadFrame) => {
                        // Framing is unrecoverable: close silently, no error
                        // frame (the frame boundary itself is gone).
                        return Ok(());
                    }
                }
            }

            tokio::select! {
                _ = self.terminator.receive_signal() => return Ok(()),
                pushed = self.push_rx.recv() => {
                    match pushed {
                        Some(frame) => self.stream.write_all(&frame).await?,
                        None => return Ok(()),
                    }
                }
                read = self.stream.read_buf(&mut self.buf) => {
                    if read? == 0 {
                        return Ok(());
                    }
                }
            }
        }
    }
}
