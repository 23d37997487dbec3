//! Daemon configuration file
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0"
//! ws_port = 8765
//! mini_http_port = 3001
//! northbound_port = 4041
//!
//! [gateway]
//! service = "knot"
//! default_key = "knot-key"
//! command_timeout_secs = 10
//! broker_host = "orion"
//! broker_port = 1026
//!
//! [[gateway.service_groups]]
//! apikey = "knot-key"
//! subservice = "/*"
//!
//! [store]
//! snapshot = "/var/lib/iotad/entities.json"
//!
//! [logging]
//! format = "json"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use iota_gateway::GatewayConfig;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    /// WebSocket session listener
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    /// Mini HTTP liveness server
    #[serde(default = "default_mini_http_port")]
    pub mini_http_port: u16,
    /// Broker command notifications
    #[serde(default = "default_northbound_port")]
    pub northbound_port: u16,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_ws_port() -> u16 {
    8765
}

fn default_mini_http_port() -> u16 {
    3001
}

fn default_northbound_port() -> u16 {
    4041
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            ws_port: default_ws_port(),
            mini_http_port: default_mini_http_port(),
            northbound_port: default_northbound_port(),
        }
    }
}

impl ServerConfig {
    pub fn ws_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.ws_port)
    }

    pub fn mini_http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.mini_http_port)
    }

    pub fn northbound_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.northbound_port)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    /// JSON snapshot of the entity store; in-memory only when unset
    #[serde(default)]
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
