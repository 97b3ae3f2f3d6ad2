//! Minimal HTTP request dispatcher.
//!
//! A [`Dispatcher`] maps `(method, exact path)` pairs to handlers and writes a
//! fixed `404 NOT FOUND: <url>` body for anything else. The [`server`] module
//! is a tokio/hyper transport that feeds requests to any [`Handler`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logger;
pub mod request;
pub mod response;
pub mod server;

pub use crate::config::Config;
pub use crate::dispatcher::{Dispatcher, FallbackStatus, Handler, RouteKey};
pub use crate::error::{Error, Result};
pub use crate::request::Request;
pub use crate::response::ResponseWriter;
