//! Logger module
//!
//! Provides logging utilities for the dispatcher and its transport:
//! - Subscriber setup (stdout or append-only file)
//! - Server lifecycle logging
//! - Access logging with multiple formats
//! - Error and warning logging

mod format;

pub use format::{AccessLogEntry, AccessLogFormat};

use std::fs::{File, OpenOptions};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LoggingConfig};
use crate::dispatcher::RouteKey;
use crate::error::{Error, Result};

/// Target used for access log lines so they can be filtered separately
pub const ACCESS_TARGET: &str = "access";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `logging.level`. Should be called once at startup.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Logger(format!("Invalid log level '{}': {e}", config.level)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.log_file.as_deref() {
        Some(path) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(open_log_file(path)?))
            .try_init(),
        None => builder.try_init(),
    };

    installed.map_err(|e| Error::Logger(e.to_string()))
}

/// Open or create a log file for appending
fn open_log_file(path: &str) -> io::Result<File> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    OpenOptions::new().create(true).append(true).open(path)
}

pub fn log_server_start(addr: &SocketAddr, config: &Config) {
    tracing::info!("Dispatcher started, listening on http://{addr}");
    tracing::info!(
        level = %config.logging.level,
        access_log = config.logging.access_log,
        workers = ?config.server.workers,
        max_connections = ?config.performance.max_connections,
        fallback_status = ?config.routing.fallback_status,
        "Configuration loaded"
    );
    if let Some(ref path) = config.logging.log_file {
        tracing::info!("Log file: {path}");
    }
}

pub fn log_routes(routes: &[RouteKey]) {
    tracing::info!("{} route(s) registered", routes.len());
    for route in routes {
        tracing::info!("  - {route}");
    }
}

pub fn log_connection_accepted(peer_addr: &SocketAddr) {
    tracing::debug!("[Connection] Accepted from: {peer_addr}");
}

pub fn log_connection_rejected(peer_addr: &SocketAddr, active: usize, max: u64) {
    tracing::warn!(
        "Max connections reached: {active}/{max}. Connection from {peer_addr} rejected."
    );
}

pub fn log_connection_error(err: &impl std::fmt::Debug) {
    tracing::error!("Failed to serve connection: {err:?}");
}

pub fn log_connection_timeout(timeout: Duration) {
    tracing::warn!("Connection timeout after {} seconds", timeout.as_secs());
}

pub fn log_handler_panic(method: &str, uri: &str, message: &str) {
    tracing::error!("Handler panicked on {method} {uri}: {message}");
}

/// Log formatted access log entry
pub fn log_access(entry: &AccessLogEntry, format: &AccessLogFormat) {
    tracing::info!(target: ACCESS_TARGET, "{}", entry.format(format));
}

pub fn log_shutdown_started(active: usize) {
    tracing::info!("Shutdown signal received, draining {active} connection(s)");
}

pub fn log_shutdown_complete() {
    tracing::info!("Server stopped");
}

pub fn log_drain_timeout(remaining: usize) {
    tracing::warn!("Grace period elapsed with {remaining} connection(s) still open");
}

pub fn log_error(message: &str) {
    tracing::error!("{message}");
}

pub fn log_warning(message: &str) {
    tracing::warn!("{message}");
}
