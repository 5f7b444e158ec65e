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

//! The base TCP listener: binding, the accept loop, and graceful shutdown.

use super::{connection::ConnectionHandler, NetBackoff, Terminator, MAXIMUM_CONNECTION_LIMIT};
use crate::blocking::Registry;
use crate::config::Config;
use crate::pubsub::PubSub;
use crate::store::Store;
use crate::util::error::{Error, SkyResult};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};

/// The base TCP listener, holding everything the accept loop and every
/// spawned connection handler share.
pub struct BaseListener {
    listener: TcpListener,
    climit: Arc<Semaphore>,
    signal: broadcast::Sender<()>,
    terminate_tx: mpsc::Sender<()>,
    terminate_rx: mpsc::Receiver<()>,
    store: Arc<Store>,
    pubsub: Arc<PubSub>,
    blocking: Arc<Registry>,
    config: Arc<Config>,
    next_client_id: AtomicU64,
}

impl BaseListener {
    pub async fn init(
        host: IpAddr,
        port: u16,
        semaphore: Arc<Semaphore>,
        signal: broadcast::Sender<()>,
        store: Arc<Store>,
        pubsub: Arc<PubSub>,
        blocking: Arc<Registry>,
        config: Arc<Config>,
    ) -> SkyResult<Self> {
        let (terminate_tx, terminate_rx) = mpsc::channel(1);
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| Error::io_extra(e, format!("binding to port {port}")))?;
        Ok(Self {
            listener,
            climit: semaphore,
            signal,
            terminate_tx,
            terminate_rx,
            store,
            pubsub,
            blocking,
            config,
            next_client_id: AtomicU64::new(1),
        })
    }

    async fn accept(&self) -> std::io::Result<tokio::net::TcpStream> {
        let backoff = NetBackoff::new();
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => return Ok(stream),
                Err(e) => {
                    if backoff.should_disconnect() {
                        return Err(e);
                    }
                }
            }
            backoff.spin().await;
        }
    }

    /// Run the accept loop until the termination signal fires.
    pub async fn run(&self) -> SkyResult<()> {
        loop {
            let permit = match self.climit.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return Ok(()),
            };
            let stream = match self.accept().await {
                Ok(s) => s,
                Err(e) => {
                    log::error!("accept loop exiting after repeated failures: {e}");
                    return Err(Error::from(e));
                }
            };
            let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
            log::debug!("accepted connection {client_id}");
            let handler = ConnectionHandler::new(
                stream,
                client_id,
                self.store.clone(),
                self.pubsub.clone(),
                self.blocking.clone(),
                self.config.clone(),
                Terminator::new(self.signal.subscribe()),
                self.terminate_tx.clone(),
            );
            tokio::spawn(async move {
                let _permit = permit;
                handler.run().await;
            });
        }
    }

    /// Drop the shutdown broadcaster and the kept terminate sender, then
    /// wait for every spawned connection's own sender to drop in turn —
    /// i.e. wait for all connections to finish.
    pub async fn release_self(self) {
        let Self {
            mut terminate_rx,
            terminate_tx,
            signal,
            ..
        } = self;
        drop(signal);
        drop(terminate_tx);
        let _ = terminate_rx.recv().await;
    }

    pub fn connection_limit() -> usize {
        MAXIMUM_CONNECTION_LIMIT
    }
}
