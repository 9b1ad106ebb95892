//! Gateway configuration loaded from a TOML file.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Runtime tuning.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Close sessions with no inbound traffic for this many milliseconds.
    /// 0 disables the idle sweep.
    #[serde(default)]
    pub idle_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            runtime: RuntimeConfig::default(),
            logging: LoggingConfig::default(),
            idle_timeout_ms: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Number of worker threads (default: number of CPUs).
    pub worker_count: Option<usize>,

    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    #[serde(default = "default_write_chunk_size")]
    pub write_chunk_size: usize,

    #[serde(default = "default_initial_buffer_capacity")]
    pub initial_buffer_capacity: usize,

    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            read_chunk_size: default_read_chunk_size(),
            write_chunk_size: default_write_chunk_size(),
            initial_buffer_capacity: default_initial_buffer_capacity(),
            tcp_nodelay: default_tcp_nodelay(),
        }
    }
}

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter (overridden by RUST_LOG when set).
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_listen() -> SocketAddr {
    "127.0.0.1:7000".parse().expect("static address")
}

fn default_read_chunk_size() -> usize {
    8192
}

fn default_write_chunk_size() -> usize {
    8192
}

fn default_initial_buffer_capacity() -> usize {
    4096
}

fn default_tcp_nodelay() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatewayConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.runtime.worker_count == Some(0) {
            return Err("worker_count must be >= 1".into());
        }
        if self.runtime.read_chunk_size == 0 || self.runtime.write_chunk_size == 0 {
            return Err("chunk sizes must be non-zero".into());
        }
        Ok(())
    }

    /// The resolved worker thread count.
    pub fn worker_count(&self) -> usize {
        self.runtime.worker_count.unwrap_or_else(num_cpus::get)
    }

    /// Map onto the runtime's configuration.
    pub fn runtime_config(&self) -> io_reactor::Config {
        io_reactor::Config {
            worker_count: self.worker_count(),
            read_chunk_size: self.runtime.read_chunk_size,
            write_chunk_size: self.runtime.write_chunk_size,
            initial_buffer_capacity: self.runtime.initial_buffer_capacity,
            tcp_nodelay: self.runtime.tcp_nodelay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen.port(), 7000);
        assert_eq!(config.runtime.read_chunk_size, 8192);
        assert_eq!(config.idle_timeout_ms, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal() {
        let config: GatewayConfig = toml::from_str(
            r#"
            listen = "0.0.0.0:9001"

            [runtime]
            worker_count = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.listen.port(), 9001);
        assert_eq!(config.worker_count(), 4);
        assert!(config.runtime.tcp_nodelay);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<GatewayConfig, _> = toml::from_str("bogus = 1");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [runtime]
            worker_count = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
