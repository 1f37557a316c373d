//! Run configuration. Immutable once a run starts.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_ALPN: &str = "h3";
/// Smallest datagram size a QUIC path must support.
pub const QUIC_MIN_MTU: u16 = 1200;

/// How server certificates are checked during the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialMode {
    /// Platform trust store.
    #[default]
    Strict,
    /// Trust roots bundled with the binary.
    BuiltIn,
    /// Accept any certificate.
    Unsecure,
}

/// Whether the counters start from zero on every pass or keep growing for the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CounterMode {
    #[default]
    PerPass,
    Cumulative,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub handshake_idle_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub peer_unidi_streams: u32,
    pub min_mtu: u16,
    pub max_mtu: u16,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            handshake_idle_timeout: Duration::from_millis(750),
            disconnect_timeout: Duration::from_millis(500),
            peer_unidi_streams: 3,
            // 1240 (QUIC) + 40 (IPv6) + 8 (UDP)
            min_mtu: 1288,
            max_mtu: 1500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReachConfig {
    /// Hosts probed on every pass, in output order. Duplicates are probed twice.
    pub hosts: Vec<String>,
    pub port: u16,
    /// Application protocols offered in the handshake.
    pub alpn: Vec<String>,
    pub settings: TransportSettings,
    pub credentials: CredentialMode,
    /// Maximum number of attempts in flight at once.
    pub parallelism: usize,
    /// Pause between passes. Zero runs a single pass.
    pub repeat_interval: Duration,
    pub counter_mode: CounterMode,
    /// Succeed only when every host was reachable.
    pub require_all: bool,
    pub local_address: Option<SocketAddr>,
    /// Connect here instead of resolving the hostname. The hostname is still used for SNI.
    pub remote_address: Option<SocketAddr>,
    pub output_file: Option<PathBuf>,
    /// Added to the handshake timeout to get the local per-attempt ceiling.
    pub attempt_slack: Duration,
}

impl Default for ReachConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            port: DEFAULT_PORT,
            alpn: vec![DEFAULT_ALPN.to_string()],
            settings: TransportSettings::default(),
            credentials: CredentialMode::default(),
            parallelism: 1,
            repeat_interval: Duration::ZERO,
            counter_mode: CounterMode::default(),
            require_all: false,
            local_address: None,
            remote_address: None,
            output_file: None,
            attempt_slack: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no hostnames to probe")]
    NoHosts,
    #[error("parallelism must be at least 1")]
    ZeroParallelism,
    #[error("at least one ALPN is required")]
    NoAlpn,
    #[error("invalid ALPN {0:?}: must be 1-255 bytes")]
    InvalidAlpn(String),
    #[error("MTU {0} is below the QUIC minimum of {QUIC_MIN_MTU}")]
    MtuTooSmall(u16),
    #[error("minimum MTU {min} exceeds maximum MTU {max}")]
    MtuRange { min: u16, max: u16 },
    #[error("handshake timeout must be non-zero")]
    ZeroTimeout,
    #[error("invalid port: 0")]
    ZeroPort,
}

impl ReachConfig {
    pub fn new(hosts: Vec<String>) -> Self {
        Self { hosts, ..Self::default() }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() {
            return Err(ConfigError::NoHosts);
        }
        if self.parallelism == 0 {
            return Err(ConfigError::ZeroParallelism);
        }
        if self.port == 0 && self.remote_address.is_none() {
            return Err(ConfigError::ZeroPort);
        }
        if self.alpn.is_empty() {
            return Err(ConfigError::NoAlpn);
        }
        if let Some(bad) = self.alpn.iter().find(|a| a.is_empty() || a.len() > 255) {
            return Err(ConfigError::InvalidAlpn(bad.clone()));
        }
        let s = &self.settings;
        if s.min_mtu < QUIC_MIN_MTU {
            return Err(ConfigError::MtuTooSmall(s.min_mtu));
        }
        if s.min_mtu > s.max_mtu {
            return Err(ConfigError::MtuRange { min: s.min_mtu, max: s.max_mtu });
        }
        if s.handshake_idle_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Local ceiling on how long an attempt may stay pending.
    pub fn attempt_timeout(&self) -> Duration {
        self.settings.handshake_idle_timeout + self.attempt_slack
    }

    /// How long a connected attempt waits for the transport to finish shutting down.
    pub fn shutdown_grace(&self) -> Duration {
        self.settings.disconnect_timeout + self.attempt_slack
    }

    pub fn repeats(&self) -> bool {
        !self.repeat_interval.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<String> {
        vec!["example.com".to_string()]
    }

    #[test]
    fn defaults_validate() {
        let cfg = ReachConfig::new(hosts());
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.port, 443);
        assert_eq!(cfg.alpn, vec!["h3"]);
        assert_eq!(cfg.settings.min_mtu, 1288);
        assert_eq!(cfg.attempt_timeout(), Duration::from_millis(1750));
        assert!(!cfg.repeats());
    }

    #[test]
    fn rejects_empty_hosts_and_zero_parallelism() {
        assert_eq!(ReachConfig::default().validate(), Err(ConfigError::NoHosts));
        let cfg = ReachConfig { parallelism: 0, ..ReachConfig::new(hosts()) };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroParallelism));
    }

    #[test]
    fn rejects_bad_mtu() {
        let mut cfg = ReachConfig::new(hosts());
        cfg.settings.min_mtu = 1100;
        assert_eq!(cfg.validate(), Err(ConfigError::MtuTooSmall(1100)));
        cfg.settings.min_mtu = 1600;
        assert_eq!(cfg.validate(), Err(ConfigError::MtuRange { min: 1600, max: 1500 }));
    }

    #[test]
    fn rejects_bad_alpn() {
        let cfg = ReachConfig { alpn: vec![], ..ReachConfig::new(hosts()) };
        assert_eq!(cfg.validate(), Err(ConfigError::NoAlpn));
        let cfg = ReachConfig { alpn: vec![String::new()], ..ReachConfig::new(hosts()) };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidAlpn(_))));
    }

    #[test]
    fn zero_port_allowed_with_remote_override() {
        let mut cfg = ReachConfig { port: 0, ..ReachConfig::new(hosts()) };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroPort));
        cfg.remote_address = Some("127.0.0.1:4433".parse().unwrap());
        assert_eq!(cfg.validate(), Ok(()));
    }
}
