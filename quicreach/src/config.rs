use quic_probe::{CounterMode, CredentialMode};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_FILE: &str = "quicreach.yaml";

/// Optional defaults read from YAML. Command-line values win.
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub alpn: Option<Vec<String>>,
    pub port: Option<u16>,
    pub mtu: Option<u16>,
    pub max_mtu: Option<u16>,
    pub credentials: Option<CredentialMode>,
    pub require_all: Option<bool>,
    pub stats: Option<bool>,
    pub parallel: Option<usize>,
    pub interval_ms: Option<u64>,
    pub counter_mode: Option<CounterMode>,
    pub timeout_ms: Option<u64>,
    pub disconnect_timeout_ms: Option<u64>,
    pub file: Option<String>,
    pub format: Option<String>,
}

pub fn load_config(path: Option<&Path>) -> Option<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() { p.to_path_buf() } else { return None; }
        }
    };
    let s = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read config file");
            return None;
        }
    };
    match serde_yaml::from_str::<Config>(&s) {
        Ok(cfg) => {
            debug!(path = %path.display(), "loaded config file");
            Some(cfg)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed config file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_yaml() {
        let cfg: Config = serde_yaml::from_str("port: 8443\nalpn: [h3, hq-interop]\ncredentials: built-in\n").unwrap();
        assert_eq!(cfg.port, Some(8443));
        assert_eq!(cfg.alpn, Some(vec!["h3".to_string(), "hq-interop".to_string()]));
        assert_eq!(cfg.credentials, Some(CredentialMode::BuiltIn));
        assert_eq!(cfg.parallel, None);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reach.yaml");
        fs::write(&path, "parallel: 8\ncounter_mode: cumulative\n").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.parallel, Some(8));
        assert_eq!(cfg.counter_mode, Some(CounterMode::Cumulative));
    }

    #[test]
    fn malformed_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "port: [not a number\n").unwrap();
        assert!(load_config(Some(&path)).is_none());
        assert!(load_config(Some(&dir.path().join("missing.yaml"))).is_none());
    }
}
