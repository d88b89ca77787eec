//! Signaling configuration shared by the relay and the peers.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_SIGNALING_HOST: &str = "127.0.0.1";
pub const DEFAULT_SIGNALING_PORT: u16 = 9999;
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

pub const ENV_SIGNALING_HOST: &str = "LINQ_SIGNALING_HOST";
pub const ENV_SIGNALING_PORT: &str = "LINQ_SIGNALING_PORT";
pub const ENV_STUN_SERVERS: &str = "LINQ_STUN_SERVERS";

/// Path the relay serves its WebSocket endpoint on.
pub const SIGNALING_PATH: &str = "/ws";

pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingConfig {
    pub host: String,
    pub port: u16,
    pub stun_servers: Vec<String>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SIGNALING_HOST.to_string(),
            port: DEFAULT_SIGNALING_PORT,
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SignalingConfig {
    /// Defaults overridden by `LINQ_SIGNALING_HOST`, `LINQ_SIGNALING_PORT`
    /// and `LINQ_STUN_SERVERS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup(ENV_SIGNALING_HOST) {
            let host = host.trim();
            if host.is_empty() {
                return Err(Error::config(format!("{ENV_SIGNALING_HOST} is empty")));
            }
            config.host = host.to_string();
        }

        if let Some(port) = lookup(ENV_SIGNALING_PORT) {
            config.port = parse_port(&port)?;
        }

        if let Some(servers) = lookup(ENV_STUN_SERVERS) {
            config.stun_servers = parse_stun_list(&servers);
        }

        debug!(
            "signaling config {}:{} with {} stun servers",
            config.host,
            config.port,
            config.stun_servers.len()
        );
        Ok(config)
    }

    /// Socket address the relay binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::config(format!("host {} did not resolve", self.host)))
    }

    /// WebSocket URL a peer dials to reach the relay.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, SIGNALING_PATH)
    }

    pub fn health_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, HEALTH_PATH)
    }
}

fn parse_port(value: &str) -> Result<u16> {
    match value.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::config(format!(
            "{ENV_SIGNALING_PORT} must be a port number in 1..=65535, got {value:?}"
        ))),
        Ok(port) => Ok(port),
    }
}

/// Split a comma or semicolon separated list of STUN URLs.
pub fn parse_stun_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SignalingConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9999);
        assert_eq!(config.stun_servers.len(), 2);
        assert_eq!(config.ws_url(), "ws://127.0.0.1:9999/ws");
        assert_eq!(config.health_url(), "http://127.0.0.1:9999/health");
        assert_eq!(
            config.listen_addr().unwrap(),
            "127.0.0.1:9999".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_env_overrides() {
        let config = SignalingConfig::from_lookup(lookup(&[
            (ENV_SIGNALING_HOST, " 10.1.2.3 "),
            (ENV_SIGNALING_PORT, "7000"),
            (ENV_STUN_SERVERS, "stun:a.example:3478; stun:b.example:3478,,"),
        ]))
        .unwrap();
        assert_eq!(config.host, "10.1.2.3");
        assert_eq!(config.port, 7000);
        assert_eq!(
            config.stun_servers,
            vec!["stun:a.example:3478", "stun:b.example:3478"]
        );
    }

    #[test]
    fn test_rejects_bad_port() {
        for bad in ["0", "70000", "abc", ""] {
            let err = SignalingConfig::from_lookup(lookup(&[(ENV_SIGNALING_PORT, bad)]));
            assert!(matches!(err, Err(Error::Config(_))), "port {bad:?} accepted");
        }
    }

    #[test]
    fn test_rejects_empty_host() {
        let err = SignalingConfig::from_lookup(lookup(&[(ENV_SIGNALING_HOST, "  ")]));
        assert!(matches!(err, Err(Error::Config(_))));
    }
}
