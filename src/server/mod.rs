// Transport layer
// Binds the listen address, accepts connections and hands every request to a `Handler`

pub mod connection;
pub mod listener;
pub mod signal;

// `loop` is a keyword, so the module is exposed as `server_loop`
#[path = "loop.rs"]
pub mod server_loop;

pub use listener::create_reusable_listener;
pub use server_loop::serve;

use hyper::header::HeaderValue;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::dispatcher::Handler;
use crate::error::{Error, Result};
use crate::logger::{self, AccessLogFormat};

/// Per-connection settings derived from `Config`
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub keep_alive: bool,
    /// Upper bound on a connection's lifetime
    pub connection_timeout: Duration,
    pub max_connections: Option<u64>,
    pub max_body_size: u64,
    /// Added as `Server` unless the handler set one
    pub server_name: Option<HeaderValue>,
    /// `None` disables access logging
    pub access_log: Option<AccessLogFormat>,
    pub shutdown_grace_period: Duration,
}

impl ServerSettings {
    pub fn from_config(config: &Config) -> Self {
        let server_name = match HeaderValue::from_str(&config.http.server_name) {
            Ok(value) => Some(value),
            Err(_) => {
                logger::log_warning(&format!(
                    "Invalid server name '{}', Server header disabled",
                    config.http.server_name
                ));
                None
            }
        };

        Self {
            // On/off only; the connection timeout below bounds every connection
            keep_alive: config.performance.keep_alive_timeout > 0,
            connection_timeout: Duration::from_secs(std::cmp::max(
                config.performance.read_timeout,
                config.performance.write_timeout,
            )),
            max_connections: config.performance.max_connections,
            max_body_size: config.http.max_body_size,
            server_name,
            access_log: config
                .logging
                .access_log
                .then(|| AccessLogFormat::parse(&config.logging.access_log_format)),
            shutdown_grace_period: Duration::from_secs(config.performance.shutdown_grace_period),
        }
    }
}

/// Bind `addr` and serve `handler` until SIGINT/SIGTERM.
pub async fn run<H>(addr: &str, handler: Arc<H>, config: &Config) -> Result<()>
where
    H: Handler + ?Sized + 'static,
{
    let addr: SocketAddr = addr.parse().map_err(|source| Error::InvalidAddress {
        addr: addr.to_string(),
        source,
    })?;
    let listener = create_reusable_listener(addr)?;
    logger::log_server_start(&addr, config);

    serve(
        listener,
        handler,
        ServerSettings::from_config(config),
        signal::shutdown_signal(),
    )
    .await;
    Ok(())
}
