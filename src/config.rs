// Configuration module
// Loads settings from an optional TOML file, environment overrides and defaults

use serde::Deserialize;
use std::net::SocketAddr;

use crate::dispatcher::FallbackStatus;
use crate::error::{Error, Result};

/// Default config file, looked up without extension
pub const DEFAULT_CONFIG_PATH: &str = "config";

/// Prefix for environment overrides, e.g. `DISPATCH_SERVER__PORT=9000`
const ENV_PREFIX: &str = "DISPATCH";

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
    pub http: HttpConfig,
    pub routing: RoutingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub access_log: bool,
    /// `combined`, `common`, `json` or a custom `$variable` pattern
    pub access_log_format: String,
    pub log_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PerformanceConfig {
    /// Non-zero enables HTTP/1 keep-alive; 0 disables it. The value is not an
    /// idle timeout: every connection, kept alive or not, is closed once
    /// `max(read_timeout, write_timeout)` seconds have passed.
    pub keep_alive_timeout: u64,
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub max_connections: Option<u64>,
    /// Seconds to wait for in-flight connections after a shutdown signal
    pub shutdown_grace_period: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub server_name: String,
    pub max_body_size: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoutingConfig {
    pub fallback_status: FallbackStatus,
}

impl Config {
    /// Load configuration using the default file name
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from specified file path (without extension).
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from(config_path: &str) -> Result<Self> {
        let settings = Self::defaults()?
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Parse configuration from an in-memory TOML document layered over the defaults
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings = Self::defaults()?
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(config::Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("logging.access_log_format", "combined")?
            .set_default("performance.keep_alive_timeout", 75)?
            .set_default("performance.read_timeout", 30)?
            .set_default("performance.write_timeout", 30)?
            .set_default("performance.shutdown_grace_period", 5)?
            .set_default("http.server_name", "rust_dispatcher/0.1")?
            .set_default("http.max_body_size", 10_485_760)? // 10MB
            .set_default("routing.fallback_status", "not_found")?)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse()
            .map_err(|source| Error::InvalidAddress { addr, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.workers, None);
        assert!(cfg.logging.access_log);
        assert_eq!(cfg.logging.access_log_format, "combined");
        assert_eq!(cfg.http.max_body_size, 10_485_760);
        assert_eq!(cfg.performance.max_connections, None);
        assert_eq!(cfg.routing.fallback_status, FallbackStatus::NotFound);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            [server]
            port = 9090
            workers = 2

            [routing]
            fallback_status = "default"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.workers, Some(2));
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.routing.fallback_status, FallbackStatus::TransportDefault);
    }

    #[test]
    fn test_unknown_fallback_status_rejected() {
        let result = Config::from_toml_str(
            r#"
            [routing]
            fallback_status = "teapot"
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_socket_addr() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.socket_addr().unwrap().to_string(), "127.0.0.1:8080");

        let mut cfg = cfg;
        cfg.server.host = "not a host".to_string();
        assert!(matches!(
            cfg.socket_addr(),
            Err(Error::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = Config::load_from("definitely/not/here/config").unwrap();
        assert_eq!(cfg.http.server_name, "rust_dispatcher/0.1");
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("DISPATCH_SERVER__PORT", "9001");
        std::env::set_var("DISPATCH_ROUTING__FALLBACK_STATUS", "default");
        std::env::set_var("DISPATCH_PERFORMANCE__MAX_CONNECTIONS", "7");

        let result = Config::load_from("definitely/not/here/env");

        std::env::remove_var("DISPATCH_SERVER__PORT");
        std::env::remove_var("DISPATCH_ROUTING__FALLBACK_STATUS");
        std::env::remove_var("DISPATCH_PERFORMANCE__MAX_CONNECTIONS");

        let cfg = result.unwrap();
        assert_eq!(cfg.server.port, 9001);
        assert_eq!(cfg.routing.fallback_status, FallbackStatus::TransportDefault);
        assert_eq!(cfg.performance.max_connections, Some(7));
        assert_eq!(cfg.server.host, "127.0.0.1");
    }
}
