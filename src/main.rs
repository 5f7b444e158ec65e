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

//! # ferrokv
//!
//! The server binary: parse configuration, initialize logging, load the RDB
//! snapshot, bind the listening socket, and run until asked to stop.

use ferrokv::blocking::Registry;
use ferrokv::config::Config;
use ferrokv::dbnet::listener::BaseListener;
use ferrokv::pubsub::PubSub;
use ferrokv::rdb;
use ferrokv::store::Store;
use std::process;
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};

#[cfg(all(not(target_env = "msvc"), not(miri)))]
use jemallocator::Jemalloc;

#[cfg(all(not(target_env = "msvc"), not(miri)))]
/// The default memory allocator for platforms other than msvc.
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn init_logger() {
    let filter = std::env::var("FERROKV_LOG").unwrap_or_else(|_| "info".to_owned());
    env_logger::Builder::new().parse_filters(&filter).init();
}

#[tokio::main]
async fn main() {
    let config = Arc::new(Config::load());
    init_logger();
    log::info!("starting ferrokv on {}:{}", config.host, config.port);

    let store = Arc::new(Store::new());
    rdb::load(&store, &config.rdb_path()).await;

    let pubsub = Arc::new(PubSub::new());
    let blocking = Arc::new(Registry::new());
    let semaphore = Arc::new(Semaphore::new(BaseListener::connection_limit()));
    let (signal, _) = broadcast::channel(1);

    let server = match BaseListener::init(
        config.host,
        config.port,
        semaphore,
        signal.clone(),
        store,
        pubsub,
        blocking,
        config,
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to start: {e}");
            process::exit(1);
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                log::error!("accept loop terminated with error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("received shutdown signal");
        }
    }

    log::info!("signalling all connections to shut down");
    drop(signal);
    server.release_self().await;
    log::info!("clean shutdown complete");
}
