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

//! # Server configuration
//!
//! A small, immutable configuration record: bind host, port, the directory
//! holding the RDB snapshot and its filename. Layered the way the upstream
//! configuration system is: environment variables are consulted first, CLI
//! flags next, and compiled-in defaults last.

use clap::Parser;
use std::{
    env,
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
};

const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
const DEFAULT_PORT: u16 = 6379;
const DEFAULT_DIR: &str = ".";
const DEFAULT_DBFILENAME: &str = "dump.rdb";

const ENV_HOST: &str = "FERROKV_HOST";
const ENV_PORT: &str = "FERROKV_PORT";
const ENV_DIR: &str = "FERROKV_DIR";
const ENV_DBFILENAME: &str = "FERROKV_DBFILENAME";

#[derive(Parser, Debug)]
#[command(name = "ferrokv", about = "An in-memory key/value server")]
struct Cli {
    /// Address to bind the listening socket to
    #[arg(long)]
    host: Option<IpAddr>,
    /// Port to bind the listening socket to
    #[arg(long)]
    port: Option<u16>,
    /// Directory to look for the RDB snapshot in
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Snapshot file name within `dir`
    #[arg(long)]
    dbfilename: Option<String>,
}

/// The recognized `CONFIG GET` parameter names
pub const CONFIG_PARAM_DIR: &str = "dir";
pub const CONFIG_PARAM_DBFILENAME: &str = "dbfilename";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub dir: PathBuf,
    pub dbfilename: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST,
            port: DEFAULT_PORT,
            dir: PathBuf::from(DEFAULT_DIR),
            dbfilename: DEFAULT_DBFILENAME.to_owned(),
        }
    }
}

impl Config {
    /// Build the configuration from `argv`, environment variables and
    /// defaults, in that order of *decreasing* precedence (env wins over
    /// CLI, CLI wins over built-in defaults).
    pub fn load() -> Self {
        let cli = Cli::parse();
        let mut cfg = Self::default();
        if let Some(host) = cli.host {
            cfg.host = host;
        }
        if let Some(port) = cli.port {
            cfg.port = port;
        }
        if let Some(dir) = cli.dir {
            cfg.dir = dir;
        }
        if let Some(dbfilename) = cli.dbfilename {
            cfg.dbfilename = dbfilename;
        }
        if let Ok(host) = env::var(ENV_HOST) {
            if let Ok(host) = host.parse() {
                cfg.host = host;
            }
        }
        if let Ok(port) = env::var(ENV_PORT) {
            if let Ok(port) = port.parse() {
                cfg.port = port;
            }
        }
        if let Ok(dir) = env::var(ENV_DIR) {
            cfg.dir = PathBuf::from(dir);
        }
        if let Ok(dbfilename) = env::var(ENV_DBFILENAME) {
            cfg.dbfilename = dbfilename;
        }
        cfg
    }

    /// The full path to the RDB snapshot this configuration points at
    pub fn rdb_path(&self) -> PathBuf {
        self.dir.join(&self.dbfilename)
    }

    /// `CONFIG GET <param>` resolution. Unknown parameters resolve to an
    /// empty string rather than an empty array (see spec.md §9 open
    /// questions — this preserves the reference server's behavior).
    pub fn get_param(&self, param: &str) -> String {
        match param {
            CONFIG_PARAM_DIR => self.dir.display().to_string(),
            CONFIG_PARAM_DBFILENAME => self.dbfilename.clone(),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.host, DEFAULT_HOST);
        assert_eq!(cfg.port, 6379);
        assert_eq!(cfg.dbfilename, "dump.rdb");
    }

    #[test]
    fn unknown_config_param_is_empty_string() {
        let cfg = Config::default();
        assert_eq!(cfg.get_param("nonsense"), "");
        assert_eq!(cfg.get_param(CONFIG_PARAM_DIR), ".");
    }
}
