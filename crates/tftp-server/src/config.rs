//! Server configuration.
//!
//! Defaults reproduce a stock TFTP server on port 69 serving the current
//! directory. Environment variables override them; the daemon's `<port>`
//! argument overrides the port.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::TftpError;
use crate::options::{self, TransferParams};

/// Standard TFTP port
pub const DEFAULT_PORT: u16 = 69;

/// Environment variable holding the bind address
pub const ENV_BIND_ADDR: &str = "TFTP_BIND_ADDR";
/// Environment variable holding the served directory
pub const ENV_ROOT: &str = "TFTP_ROOT";
/// Environment variable holding the retransmission limit
pub const ENV_MAX_RETRANSMITS: &str = "TFTP_MAX_RETRANSMITS";
/// Environment variable holding the default acknowledgment timeout in seconds
pub const ENV_TIMEOUT_SECS: &str = "TFTP_TIMEOUT_SECS";

/// TFTP server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind the UDP socket to
    pub bind_addr: IpAddr,
    /// UDP port to listen on
    pub port: u16,
    /// Directory files are served from
    pub root: PathBuf,
    /// Block size when the client negotiates none
    pub default_block_size: u16,
    /// Acknowledgment timeout when the client negotiates none
    pub default_timeout: Duration,
    /// How many times the in-flight packet is re-sent before a transfer is
    /// abandoned. Zero aborts on the first timeout.
    pub max_retransmits: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            root: PathBuf::from("."),
            default_block_size: options::DEFAULT_BLOCK_SIZE,
            default_timeout: options::DEFAULT_TIMEOUT,
            max_retransmits: 0,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, TftpError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TftpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            config.bind_addr = addr.parse().map_err(|e| {
                TftpError::Configuration(format!("{ENV_BIND_ADDR}={addr:?} is not an IP address: {e}"))
            })?;
        }

        if let Some(root) = lookup(ENV_ROOT) {
            if root.is_empty() {
                return Err(TftpError::Configuration(format!("{ENV_ROOT} must not be empty")));
            }
            config.root = PathBuf::from(root);
        }

        if let Some(retransmits) = lookup(ENV_MAX_RETRANSMITS) {
            config.max_retransmits = retransmits.parse().map_err(|e| {
                TftpError::Configuration(format!(
                    "{ENV_MAX_RETRANSMITS}={retransmits:?} is not a count: {e}"
                ))
            })?;
        }

        if let Some(timeout) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = timeout.parse().map_err(|e| {
                TftpError::Configuration(format!("{ENV_TIMEOUT_SECS}={timeout:?} is not a number: {e}"))
            })?;
            if !options::TIMEOUT_RANGE_SECS.contains(&secs) {
                return Err(TftpError::Configuration(format!(
                    "{ENV_TIMEOUT_SECS} must be between 1 and 255 seconds, got {secs}"
                )));
            }
            config.default_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Overrides the listening port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Address the server socket binds to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Parameters used when a client negotiates no options
    pub fn transfer_defaults(&self) -> TransferParams {
        TransferParams {
            block_size: self.default_block_size,
            timeout: self.default_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| env.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).expect("defaults are valid");
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.socket_addr(), "0.0.0.0:69".parse().expect("valid address"));
        assert_eq!(config.transfer_defaults(), TransferParams::default());
    }

    #[test]
    fn test_environment_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            (ENV_BIND_ADDR, "127.0.0.1"),
            (ENV_ROOT, "/srv/tftp"),
            (ENV_MAX_RETRANSMITS, "3"),
            (ENV_TIMEOUT_SECS, "2"),
        ]))
        .expect("overrides are valid")
        .with_port(6969);

        assert_eq!(config.socket_addr(), "127.0.0.1:6969".parse().expect("valid address"));
        assert_eq!(config.root, PathBuf::from("/srv/tftp"));
        assert_eq!(config.max_retransmits, 3);
        assert_eq!(config.transfer_defaults().timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (key, value) in [
            (ENV_BIND_ADDR, "not-an-ip"),
            (ENV_ROOT, ""),
            (ENV_MAX_RETRANSMITS, "-1"),
            (ENV_TIMEOUT_SECS, "0"),
            (ENV_TIMEOUT_SECS, "forever"),
        ] {
            let result = ServerConfig::from_lookup(lookup(&[(key, value)]));
            assert!(
                matches!(result, Err(TftpError::Configuration(_))),
                "{key}={value:?} should be rejected"
            );
        }
    }
}
