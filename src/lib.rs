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

//! An in-memory key/value server: strings with expiry, lists, append-only
//! streams, publish/subscribe, and blocking list/stream reads, spoken over a
//! RESP-like wire protocol.

pub mod blocking;
pub mod config;
pub mod dbnet;
pub mod protocol;
pub mod pubsub;
pub mod queryengine;
pub mod rdb;
pub mod store;
pub mod util;
