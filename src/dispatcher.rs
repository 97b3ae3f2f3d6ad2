//! Exact-match request dispatcher
//!
//! Routes a request to the handler registered for its `(method, path)` pair.
//! Paths are compared literally: no parameters, no wildcards, no
//! normalisation, so `/hello`, `/hello/` and `/Hello` are three routes.
//! Requests with no registered pair get the fixed fallback body
//! `404 NOT FOUND: <url>`.

use hyper::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::request::Request;
use crate::response::ResponseWriter;

/// A unit of application logic producing the full response for a request
pub trait Handler: Send + Sync {
    fn handle(&self, w: &mut ResponseWriter, req: &Request);
}

impl<F> Handler for F
where
    F: Fn(&mut ResponseWriter, &Request) + Send + Sync,
{
    fn handle(&self, w: &mut ResponseWriter, req: &Request) {
        self(w, req);
    }
}

/// Status written with the fallback body
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStatus {
    /// Set 404 explicitly
    #[default]
    NotFound,
    /// Leave the status alone so the transport default (200) applies
    #[serde(rename = "default")]
    TransportDefault,
}

/// Route key: the `(method, path)` pair a handler is registered under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub method: String,
    pub path: String,
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Registry of handlers keyed by method, then path
#[derive(Default)]
pub struct Dispatcher {
    routes: HashMap<String, HashMap<String, Arc<dyn Handler>>>,
    fallback: FallbackStatus,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: FallbackStatus) -> Self {
        self.fallback = fallback;
        self
    }

    /// Register `handler` for `method` + `path`. A previous handler for the
    /// same pair is replaced.
    pub fn register<H>(&mut self, method: &str, path: &str, handler: H)
    where
        H: Handler + 'static,
    {
        let replaced = self
            .routes
            .entry(method.to_string())
            .or_default()
            .insert(path.to_string(), Arc::new(handler))
            .is_some();

        if replaced {
            tracing::debug!(method, path, "route handler replaced");
        }
    }

    pub fn get<H>(&mut self, path: &str, handler: H)
    where
        H: Handler + 'static,
    {
        self.register("GET", path, handler);
    }

    pub fn post<H>(&mut self, path: &str, handler: H)
    where
        H: Handler + 'static,
    {
        self.register("POST", path, handler);
    }

    /// Whether a handler is registered for `method` and `path`
    pub fn contains(&self, method: &str, path: &str) -> bool {
        self.lookup(method, path).is_some()
    }

    /// Number of registered routes across all methods
    pub fn route_count(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    /// Registered route keys, sorted by method then path
    pub fn routes(&self) -> Vec<RouteKey> {
        let mut keys: Vec<RouteKey> = self
            .routes
            .iter()
            .flat_map(|(method, paths)| {
                paths.keys().map(move |path| RouteKey {
                    method: method.clone(),
                    path: path.clone(),
                })
            })
            .collect();
        keys.sort();
        keys
    }

    /// Handle one request: run the matching handler or write the fallback.
    /// Handler panics are not caught here.
    pub fn serve(&self, w: &mut ResponseWriter, req: &Request) {
        match self.lookup(req.method(), req.path()) {
            Some(handler) => handler.handle(w, req),
            None => self.write_fallback(w, req),
        }
    }

    fn lookup(&self, method: &str, path: &str) -> Option<&Arc<dyn Handler>> {
        self.routes.get(method)?.get(path)
    }

    fn write_fallback(&self, w: &mut ResponseWriter, req: &Request) {
        if self.fallback == FallbackStatus::NotFound {
            w.set_status(StatusCode::NOT_FOUND);
        }
        writeln!(w, "404 NOT FOUND: {}", req.url());
    }
}

impl Handler for Dispatcher {
    fn handle(&self, w: &mut ResponseWriter, req: &Request) {
        self.serve(w, req);
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes())
            .field("fallback", &self.fallback)
            .finish()
    }
}
