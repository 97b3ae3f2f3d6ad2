// Server loop module
// Accepts connections until the shutdown future resolves, then drains in-flight ones

use hyper_util::server::graceful::GracefulShutdown;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

use super::connection::accept_connection;
use super::ServerSettings;
use crate::dispatcher::Handler;
use crate::logger;

/// Serve `handler` on `listener` until `shutdown` resolves.
///
/// After shutdown the listener is closed, idle keep-alive connections are
/// told to close, and in-flight requests get `shutdown_grace_period` to
/// finish before the loop returns.
#[allow(clippy::ignored_unit_patterns)]
pub async fn serve<H, S>(listener: TcpListener, handler: Arc<H>, settings: ServerSettings, shutdown: S)
where
    H: Handler + ?Sized + 'static,
    S: Future<Output = ()>,
{
    let settings = Arc::new(settings);
    let active_connections = Arc::new(AtomicUsize::new(0));
    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        accept_connection(
                            stream,
                            peer_addr,
                            &handler,
                            &settings,
                            &active_connections,
                            &graceful,
                        );
                    }
                    Err(e) => {
                        logger::log_error(&format!("Failed to accept connection: {e}"));
                    }
                }
            }

            _ = &mut shutdown => break,
        }
    }

    drop(listener);
    logger::log_shutdown_started(active_connections.load(Ordering::SeqCst));

    tokio::select! {
        _ = graceful.shutdown() => {}
        _ = tokio::time::sleep(settings.shutdown_grace_period) => {
            logger::log_drain_timeout(active_connections.load(Ordering::SeqCst));
        }
    }

    logger::log_shutdown_complete();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatcher::Dispatcher;
    use crate::request::Request;
    use crate::response::ResponseWriter;
    use crate::server::create_reusable_listener;
    use hyper::StatusCode;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    struct TestServer {
        addr: SocketAddr,
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<()>,
    }

    impl TestServer {
        async fn stop(self) {
            let _ = self.shutdown.send(());
            self.task.await.unwrap();
        }
    }

    fn scenario_dispatcher() -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        dispatcher.get("/", |w: &mut ResponseWriter, _: &Request| w.write_str("root"));
        dispatcher.get("/hello", |w: &mut ResponseWriter, req: &Request| {
            let name = req.query_param("name").unwrap_or_default();
            write!(w, "hello, {name}");
        });
        dispatcher.post("/echo", |w: &mut ResponseWriter, req: &Request| {
            w.set_header("Content-Type", "application/octet-stream");
            w.write_bytes(req.body());
        });
        dispatcher.get("/panic", |_: &mut ResponseWriter, _: &Request| {
            panic!("handler failure");
        });
        dispatcher.get("/slow", |w: &mut ResponseWriter, _: &Request| {
            std::thread::sleep(Duration::from_millis(400));
            w.write_str("slow");
        });
        dispatcher
    }

    async fn start(dispatcher: Dispatcher, settings: ServerSettings) -> TestServer {
        let listener = create_reusable_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(listener, Arc::new(dispatcher), settings, async move {
            let _ = rx.await;
        }));
        TestServer {
            addr,
            shutdown: tx,
            task,
        }
    }

    fn test_settings() -> ServerSettings {
        let config = Config::from_toml_str(
            r#"
            [logging]
            access_log = false

            [performance]
            shutdown_grace_period = 1
            "#,
        )
        .unwrap();
        ServerSettings::from_config(&config)
    }

    /// Write `request` as-is and read until the server closes. A reset
    /// connection reads as whatever arrived before it, usually nothing.
    async fn exchange(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let _ = stream.write_all(request.as_bytes()).await;

        let mut raw = Vec::new();
        let _ = stream.read_to_end(&mut raw).await;
        String::from_utf8(raw).unwrap()
    }

    fn status_of(raw: &str) -> Option<u16> {
        raw.split_whitespace().nth(1).and_then(|code| code.parse().ok())
    }

    /// Send one raw HTTP/1.1 request with `Connection: close` and return (status, raw response)
    async fn send(addr: SocketAddr, method: &str, target: &str, body: &str) -> (u16, String) {
        let request = format!(
            "{method} {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let raw = exchange(addr, &request).await;
        (status_of(&raw).unwrap(), raw)
    }

    fn body_of(raw: &str) -> &str {
        raw.split_once("\r\n\r\n").map_or("", |(_, body)| body)
    }

    #[tokio::test]
    async fn test_hello_scenario_over_tcp() {
        let server = start(scenario_dispatcher(), test_settings()).await;

        let (status, raw) = send(server.addr, "GET", "/", "").await;
        assert_eq!(status, 200);
        assert_eq!(body_of(&raw), "root");

        let (status, raw) = send(server.addr, "GET", "/hello?name=world", "").await;
        assert_eq!(status, 200);
        assert_eq!(body_of(&raw), "hello, world");

        let (status, raw) = send(server.addr, "POST", "/hello", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND.as_u16());
        assert_eq!(body_of(&raw), "404 NOT FOUND: /hello\n");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_fallback_url_keeps_query() {
        let server = start(scenario_dispatcher(), test_settings()).await;

        let (_, raw) = send(server.addr, "GET", "/missing?a=1&b=2", "").await;
        assert_eq!(body_of(&raw), "404 NOT FOUND: /missing?a=1&b=2\n");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_transport_default_fallback_status() {
        let dispatcher =
            scenario_dispatcher().with_fallback(crate::dispatcher::FallbackStatus::TransportDefault);
        let server = start(dispatcher, test_settings()).await;

        let (status, raw) = send(server.addr, "DELETE", "/", "").await;
        assert_eq!(status, 200);
        assert_eq!(body_of(&raw), "404 NOT FOUND: /\n");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_body_reaches_handler() {
        let server = start(scenario_dispatcher(), test_settings()).await;

        let (status, raw) = send(server.addr, "POST", "/echo", "ping").await;
        assert_eq!(status, 200);
        assert!(raw.to_ascii_lowercase().contains("content-type: application/octet-stream"));
        assert_eq!(body_of(&raw), "ping");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_server_header_added() {
        let server = start(scenario_dispatcher(), test_settings()).await;

        let (_, raw) = send(server.addr, "GET", "/", "").await;
        assert!(raw.to_ascii_lowercase().contains("server: rust_dispatcher/0.1"));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_handler_panic_is_isolated() {
        let server = start(scenario_dispatcher(), test_settings()).await;

        let (status, _) = send(server.addr, "GET", "/panic", "").await;
        assert_eq!(status, 500);

        let (status, raw) = send(server.addr, "GET", "/", "").await;
        assert_eq!(status, 200);
        assert_eq!(body_of(&raw), "root");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let server = start(scenario_dispatcher(), test_settings()).await;
        let addr = server.addr;
        server.stop().await;

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_connection_limit_drops_extra_connections() {
        let mut settings = test_settings();
        settings.max_connections = Some(1);
        let server = start(scenario_dispatcher(), settings).await;

        let held = TcpStream::connect(server.addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let raw = exchange(
            server.addr,
            "GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(raw, "");

        drop(held);
        let mut status = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let raw = exchange(
                server.addr,
                "GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            )
            .await;
            status = status_of(&raw);
            if status.is_some() {
                assert_eq!(body_of(&raw), "root");
                break;
            }
        }
        assert_eq!(status, Some(200));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_chunked_body_over_limit_rejected() {
        let mut settings = test_settings();
        settings.max_body_size = 4;
        let server = start(scenario_dispatcher(), settings).await;

        let raw = exchange(
            server.addr,
            "POST /echo HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
             Transfer-Encoding: chunked\r\n\r\na\r\n0123456789\r\n0\r\n\r\n",
        )
        .await;
        assert_eq!(status_of(&raw), Some(413));
        assert_eq!(body_of(&raw), "413 Payload Too Large");

        let (status, raw) = send(server.addr, "POST", "/echo", "ok").await;
        assert_eq!(status, 200);
        assert_eq!(body_of(&raw), "ok");

        server.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_drains_in_flight_request() {
        let server = start(scenario_dispatcher(), test_settings()).await;
        let addr = server.addr;

        let client = tokio::spawn(async move { send(addr, "GET", "/slow", "").await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        server.stop().await;

        let (status, raw) = client.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body_of(&raw), "slow");
    }
}
