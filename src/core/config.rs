use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::network::transport::DEFAULT_MAX_FRAME_SIZE;
use crate::utils::{DhtError, Result};

pub const DEFAULT_PORT: u16 = 8468;
pub const DEFAULT_BACKLOG_SIZE: u32 = 20;
pub const DEFAULT_MINIMUM_POOL_SIZE: usize = 1;
pub const DEFAULT_MAXIMUM_POOL_SIZE: usize = 30;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5_000;

/// What the accept loop does when every worker slot is taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverloadPolicy {
    /// Wait for a slot; further connections queue in the accept backlog.
    Block,
    /// Close the new connection straight away.
    Reject,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub backlog: u32,
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub idle_timeout_ms: u64,
    pub overload_policy: OverloadPolicy,
    /// No read timeout when unset: a silent peer holds its worker.
    pub read_timeout_ms: Option<u64>,
    pub drain_timeout_ms: u64,
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG_SIZE,
            min_pool_size: DEFAULT_MINIMUM_POOL_SIZE,
            max_pool_size: DEFAULT_MAXIMUM_POOL_SIZE,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            overload_policy: OverloadPolicy::Block,
            read_timeout_ms: None,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DhtError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            DhtError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_pool_size == 0 {
            return Err(DhtError::ConfigError(
                "min_pool_size must be at least 1".to_string(),
            ));
        }
        if self.max_pool_size < self.min_pool_size {
            return Err(DhtError::ConfigError(format!(
                "max_pool_size ({}) is smaller than min_pool_size ({})",
                self.max_pool_size, self.min_pool_size
            )));
        }
        if self.backlog == 0 {
            return Err(DhtError::ConfigError(
                "backlog must be at least 1".to_string(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(DhtError::ConfigError(
                "max_frame_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backlog, 20);
        assert_eq!(config.min_pool_size, 1);
        assert_eq!(config.max_pool_size, 30);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
        assert!(config.read_timeout().is_none());
        assert!(config.bind_addr.is_loopback());
    }

    #[test]
    fn test_validate_pool_bounds() {
        let mut config = ServerConfig::default();
        config.min_pool_size = 0;
        assert!(matches!(config.validate(), Err(DhtError::ConfigError(_))));

        config.min_pool_size = 8;
        config.max_pool_size = 4;
        assert!(matches!(config.validate(), Err(DhtError::ConfigError(_))));

        config.max_pool_size = 8;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_with_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "port": 9100, "overload_policy": "reject", "read_timeout_ms": 250 }}"#
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.overload_policy, OverloadPolicy::Reject);
        assert_eq!(config.read_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.backlog, DEFAULT_BACKLOG_SIZE);
    }

    #[test]
    fn test_from_file_errors() {
        assert!(matches!(
            ServerConfig::from_file("/definitely/not/here.json"),
            Err(DhtError::ConfigError(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            ServerConfig::from_file(file.path()),
            Err(DhtError::ConfigError(_))
        ));
    }
}
