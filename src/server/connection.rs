// Connection handling module
// Serves one TCP connection and turns each HTTP request into a `Handler` call

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body as _, Bytes, Incoming};
use hyper::header::{HeaderMap, CONTENT_LENGTH, SERVER};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Response;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::any::Any;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::ServerSettings;
use crate::dispatcher::Handler;
use crate::logger::{self, AccessLogEntry};
use crate::request::Request;
use crate::response::{build_400_response, build_413_response, build_500_response, ResponseWriter};

/// Accept a connection, enforcing the connection limit.
///
/// The counter is incremented before the limit check and rolled back on
/// rejection, so concurrent accepts cannot overshoot.
pub fn accept_connection<H>(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    handler: &Arc<H>,
    settings: &Arc<ServerSettings>,
    conn_counter: &Arc<AtomicUsize>,
    graceful: &GracefulShutdown,
) where
    H: Handler + ?Sized + 'static,
{
    let prev_count = conn_counter.fetch_add(1, Ordering::SeqCst);

    if let Some(max_conn) = settings.max_connections {
        if prev_count >= usize::try_from(max_conn).unwrap_or(usize::MAX) {
            conn_counter.fetch_sub(1, Ordering::SeqCst);
            logger::log_connection_rejected(&peer_addr, prev_count, max_conn);
            drop(stream);
            return;
        }
    }

    logger::log_connection_accepted(&peer_addr);

    handle_connection(
        stream,
        peer_addr,
        Arc::clone(handler),
        Arc::clone(settings),
        Arc::clone(conn_counter),
        graceful,
    );
}

/// Serve the connection on its own task; the counter is decremented when it ends.
fn handle_connection<H>(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    settings: Arc<ServerSettings>,
    conn_counter: Arc<AtomicUsize>,
    graceful: &GracefulShutdown,
) where
    H: Handler + ?Sized + 'static,
{
    let io = TokioIo::new(stream);
    let timeout = settings.connection_timeout;

    let mut builder = http1::Builder::new();
    builder.keep_alive(settings.keep_alive);

    let conn = builder.serve_connection(
        io,
        service_fn(move |req| {
            let handler = Arc::clone(&handler);
            let settings = Arc::clone(&settings);
            async move {
                Ok::<_, Infallible>(
                    serve_request(req, handler.as_ref(), &settings, peer_addr).await,
                )
            }
        }),
    );
    let conn = graceful.watch(conn);

    tokio::spawn(async move {
        match tokio::time::timeout(timeout, conn).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => logger::log_connection_error(&err),
            Err(_) => logger::log_connection_timeout(timeout),
        }

        conn_counter.fetch_sub(1, Ordering::SeqCst);
    });
}

/// Read the body, run the handler and finish the response
async fn serve_request<H>(
    req: hyper::Request<Incoming>,
    handler: &H,
    settings: &ServerSettings,
    peer_addr: SocketAddr,
) -> Response<Full<Bytes>>
where
    H: Handler + ?Sized,
{
    let started = Instant::now();
    let (parts, body) = req.into_parts();

    let (request, mut response) = match read_body(&parts.headers, body, settings.max_body_size).await {
        Ok(bytes) => {
            let request = Request::from_parts(parts, bytes, Some(peer_addr));
            let response = invoke_handler(handler, &request);
            (request, response)
        }
        Err(rejection) => (Request::from_parts(parts, Bytes::new(), Some(peer_addr)), rejection),
    };

    if let Some(server_name) = &settings.server_name {
        response
            .headers_mut()
            .entry(SERVER)
            .or_insert_with(|| server_name.clone());
    }

    if let Some(format) = &settings.access_log {
        let mut entry = AccessLogEntry::from_request(&request);
        entry.status = response.status().as_u16();
        entry.body_bytes = response
            .body()
            .size_hint()
            .exact()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0);
        entry.elapsed = started.elapsed();
        logger::log_access(&entry, format);
    }

    response
}

/// Run the handler against a fresh writer. A panicking handler yields a 500
/// and leaves the connection task alive.
fn invoke_handler<H>(handler: &H, request: &Request) -> Response<Full<Bytes>>
where
    H: Handler + ?Sized,
{
    let mut writer = ResponseWriter::new();
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&mut writer, request))) {
        Ok(()) => writer.into_response(),
        Err(payload) => {
            logger::log_handler_panic(request.method(), request.url(), &panic_message(&*payload));
            build_500_response()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Collect the request body, bounded by `max_body_size`
async fn read_body(
    headers: &HeaderMap,
    body: Incoming,
    max_body_size: u64,
) -> Result<Bytes, Response<Full<Bytes>>> {
    if let Some(rejection) = check_content_length(headers, max_body_size) {
        return Err(rejection);
    }

    let limit = usize::try_from(max_body_size).unwrap_or(usize::MAX);
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => {
            logger::log_error(&format!(
                "Request body too large: exceeds {max_body_size} bytes"
            ));
            Err(build_413_response())
        }
        Err(e) => {
            logger::log_warning(&format!("Failed to read request body: {e}"));
            Err(build_400_response())
        }
    }
}

/// Validate Content-Length header and return 413 if exceeded
fn check_content_length(headers: &HeaderMap, max_body_size: u64) -> Option<Response<Full<Bytes>>> {
    let content_length = headers.get(CONTENT_LENGTH)?;
    let Ok(size_str) = content_length.to_str() else {
        logger::log_warning("Content-Length header contains non-ASCII characters");
        return None;
    };

    match size_str.parse::<u64>() {
        Ok(size) if size > max_body_size => {
            logger::log_error(&format!(
                "Request body too large: {size} bytes (max: {max_body_size})"
            ));
            Some(build_413_response())
        }
        Ok(_) => None,
        Err(_) => {
            logger::log_warning(&format!(
                "Invalid Content-Length value: '{size_str}', skipping size check"
            ));
            None
        }
    }
}
