//! Daemon construction inputs and the TOML file they can be
//! loaded from.
//!
//! Nested `serde`-derived structs mirror the on-disk TOML shape, a
//! `Default` impl supplies the documented defaults, and `from_file`/`load`
//! turn the raw file shape into a validated `DaemonConfig` in one step.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SockError, SockResult};

pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PER_IP_LIMIT: u32 = 96;
pub const MIN_PASSWORD_LEN: usize = 7;

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_address")]
    pub address: String,
    pub password: String,
    pub tcp_ports: Vec<u16>,
    #[serde(default)]
    pub udp_ports: Vec<u16>,
    #[serde(default = "default_per_ip_limit")]
    pub per_ip_limit: u32,
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_per_ip_limit() -> u32 {
    DEFAULT_PER_IP_LIMIT
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> LoggingSection {
        LoggingSection {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileConfig {
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl FileConfig {
    /// Loads and parses a TOML configuration file. Panics with a
    /// descriptive message on a read or parse failure (callers that want
    /// a typed error should use `DaemonConfig::load` instead, which wraps
    /// this in `SockError::ConfigInvalid`).
    pub fn load<P: AsRef<Path>>(path: P) -> FileConfig {
        let contents = fs::read_to_string(path).expect("error reading sockd configuration file");
        toml::from_str(&contents).expect("error parsing sockd configuration file")
    }
}

/// Validated construction inputs for a `Daemon`.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub address: String,
    pub password: String,
    pub tcp_ports: Vec<u16>,
    pub udp_ports: Vec<u16>,
    pub per_ip_limit: u32,
    pub log_level: String,
}

impl DaemonConfig {
    /// Validates `file` into a `DaemonConfig`: password length >= 7, at
    /// least one TCP port each > 0, `per_ip_limit` defaulted to 96 if < 1.
    /// `logging.level` is carried through verbatim for the CLI to apply.
    pub fn from_file(file: FileConfig) -> SockResult<DaemonConfig> {
        if file.server.password.len() < MIN_PASSWORD_LEN {
            return Err(SockError::ConfigInvalid(format!(
                "password must be at least {MIN_PASSWORD_LEN} bytes"
            )));
        }
        if file.server.tcp_ports.is_empty() {
            return Err(SockError::ConfigInvalid("at least one TCP port is required".into()));
        }
        if file.server.tcp_ports.iter().any(|&port| port == 0) {
            return Err(SockError::ConfigInvalid("TCP ports must be non-zero".into()));
        }
        if file.server.udp_ports.iter().any(|&port| port == 0) {
            return Err(SockError::ConfigInvalid("UDP ports must be non-zero".into()));
        }

        let per_ip_limit = if file.server.per_ip_limit < 1 {
            DEFAULT_PER_IP_LIMIT
        } else {
            file.server.per_ip_limit
        };

        Ok(DaemonConfig {
            address: file.server.address,
            password: file.server.password,
            tcp_ports: file.server.tcp_ports,
            udp_ports: file.server.udp_ports,
            per_ip_limit,
            log_level: file.logging.level,
        })
    }

    /// Loads a config file from `path` and validates it in one step.
    pub fn load<P: AsRef<Path>>(path: P) -> SockResult<DaemonConfig> {
        DaemonConfig::from_file(FileConfig::load(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_file() -> FileConfig {
        FileConfig {
            server: ServerSection {
                address: default_address(),
                password: "abcdefg".into(),
                tcp_ports: vec![8388],
                udp_ports: vec![8388],
                per_ip_limit: 96,
            },
            logging: LoggingSection::default(),
        }
    }

    #[test]
    fn accepts_a_valid_config() {
        assert!(DaemonConfig::from_file(valid_file()).is_ok());
    }

    #[test]
    fn rejects_short_password() {
        let mut file = valid_file();
        file.server.password = "short".into();
        assert!(DaemonConfig::from_file(file).is_err());
    }

    #[test]
    fn rejects_empty_tcp_ports() {
        let mut file = valid_file();
        file.server.tcp_ports.clear();
        assert!(DaemonConfig::from_file(file).is_err());
    }

    #[test]
    fn defaults_per_ip_limit_when_unset() {
        let mut file = valid_file();
        file.server.per_ip_limit = 0;
        let config = DaemonConfig::from_file(file).unwrap();
        assert_eq!(config.per_ip_limit, DEFAULT_PER_IP_LIMIT);
    }

    #[test]
    fn udp_ports_may_be_empty() {
        let mut file = valid_file();
        file.server.udp_ports.clear();
        assert!(DaemonConfig::from_file(file).is_ok());
    }
}
