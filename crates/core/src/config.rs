//! Session configuration.
//!
//! Loaded from a TOML file edited by hand, so endpoint fields are kept as
//! raw text and resolved leniently: a port that fails to parse falls back
//! to [`DEFAULT_PORT`], an address that fails to parse falls back to
//! loopback. Resolution never fails.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Port used when the configured one does not parse.
pub const DEFAULT_PORT: u16 = 1234;

/// Peer session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the host listener binds to.
    #[serde(default = "default_bind_addr")]
    pub host_bind: String,
    /// Port the host listener binds to.
    #[serde(default = "default_port")]
    pub host_port: String,
    /// Address the client connects to.
    #[serde(default = "default_connect_addr")]
    pub connect_addr: String,
    /// Port the client connects to.
    #[serde(default = "default_port")]
    pub connect_port: String,
    /// Display name sent to the peer.
    #[serde(default = "default_player_name")]
    pub player_name: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_connect_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

fn default_player_name() -> String {
    "player".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host_bind: default_bind_addr(),
            host_port: default_port(),
            connect_addr: default_connect_addr(),
            connect_port: default_port(),
            player_name: default_player_name(),
        }
    }
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Endpoint the host listener binds to.
    pub fn host_endpoint(&self) -> SocketAddr {
        resolve(&self.host_bind, &self.host_port)
    }

    /// Endpoint the client connects to.
    pub fn connect_endpoint(&self) -> SocketAddr {
        resolve(&self.connect_addr, &self.connect_port)
    }
}

fn resolve(addr: &str, port: &str) -> SocketAddr {
    let ip: IpAddr = addr
        .trim()
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
    let port: u16 = port.trim().parse().unwrap_or(DEFAULT_PORT);
    SocketAddr::new(ip, port)
}
