//! Gateway configuration and destination policy.
//!
//! Loaded once at startup and immutable afterwards. The listen port comes
//! from the first positional CLI argument; everything else from environment
//! variables with defaults.

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Port the gateway listens on unless overridden.
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Deadline for dialing a relay backend.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on bytes buffered toward a WebSocket client, and on the
/// pre-connect buffer while the backend dial is in flight.
pub const DEFAULT_MAX_WS_BUFFERED_BYTES: usize = 64 * 1024;

/// Backend ports the relay will dial by default: the ecosystem's
/// infrastructure ports (TURN 3974, STUN 3975, coordinator 3976, content
/// 3978) plus the common game ports.
pub const DEFAULT_ALLOWED_PORTS: &[u16] = &[3974, 3975, 3976, 3978, 3979, 3980, 3981, 3982];

/// Immutable gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_port: u16,
    pub coordinator_addr: String,
    pub cache_ttl: Duration,
    pub connect_timeout: Duration,
    pub max_ws_buffered_bytes: usize,
    /// Backend ports the relay may dial.
    pub allowed_ports: HashSet<u16>,
    /// Backend hosts the relay may dial; empty means any host.
    pub allowed_hosts: HashSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            coordinator_addr: coordinator::DEFAULT_COORDINATOR_ADDR.to_owned(),
            cache_ttl: coordinator::DEFAULT_TTL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_ws_buffered_bytes: DEFAULT_MAX_WS_BUFFERED_BYTES,
            allowed_ports: DEFAULT_ALLOWED_PORTS.iter().copied().collect(),
            allowed_hosts: HashSet::new(),
        }
    }
}

impl Config {
    /// Read configuration from the CLI arguments and environment.
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(arg) = env::args().nth(1) {
            config.listen_port = arg
                .parse()
                .with_context(|| format!("listen port argument '{arg}' is not a port"))?;
        }
        if let Ok(addr) = env::var("COORDINATOR_ADDR") {
            config.coordinator_addr = addr;
        }
        if let Ok(secs) = env::var("CACHE_TTL_SECS") {
            config.cache_ttl = Duration::from_secs(
                secs.parse().context("CACHE_TTL_SECS must be a number")?,
            );
        }
        if let Ok(secs) = env::var("CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(
                secs.parse().context("CONNECT_TIMEOUT_SECS must be a number")?,
            );
        }
        if let Ok(bytes) = env::var("MAX_WS_BUFFERED_BYTES") {
            config.max_ws_buffered_bytes = bytes
                .parse()
                .context("MAX_WS_BUFFERED_BYTES must be a number")?;
        }
        if let Ok(ports) = env::var("ALLOWED_PORTS") {
            config.allowed_ports = parse_ports(&ports).context("ALLOWED_PORTS is malformed")?;
        }
        if let Ok(hosts) = env::var("ALLOWED_HOSTS") {
            config.allowed_hosts = parse_hosts(&hosts);
        }

        Ok(config)
    }

    /// Admission check for a relay destination. Runs before any outbound
    /// socket is opened; the reason doubles as the close-frame text.
    pub fn check_target(&self, host: &str, port: u16) -> std::result::Result<(), &'static str> {
        if !self.allowed_ports.contains(&port) {
            return Err("Port not allowed");
        }
        if host.is_empty() {
            return Err("Host not allowed");
        }
        if !self.allowed_hosts.is_empty() && !self.allowed_hosts.contains(host) {
            return Err("Host not allowed");
        }
        Ok(())
    }
}

fn parse_ports(value: &str) -> Option<HashSet<u16>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect()
}

fn parse_hosts(value: &str) -> HashSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}
