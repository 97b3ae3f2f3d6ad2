use hyper::StatusCode;
use std::sync::Arc;

use rust_dispatcher::{logger, server, Config, Dispatcher, Request, ResponseWriter};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = match std::env::args().nth(1) {
        Some(config_path) => Config::load_from(&config_path)?,
        None => Config::load()?,
    };
    logger::init(&cfg.logging)?;

    // Worker threads follow `server.workers`, CPU cores otherwise
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }
    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(cfg))
}

async fn async_main(cfg: Config) -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = build_dispatcher(&cfg);
    logger::log_routes(&dispatcher.routes());

    let addr = cfg.socket_addr()?.to_string();
    server::run(&addr, Arc::new(dispatcher), &cfg).await?;
    Ok(())
}

/// All registrations happen here, before the transport starts serving
fn build_dispatcher(cfg: &Config) -> Dispatcher {
    let mut dispatcher = Dispatcher::new().with_fallback(cfg.routing.fallback_status);
    dispatcher.get("/", root);
    dispatcher.get("/hello", hello);
    dispatcher.post("/echo", echo);
    dispatcher
}

fn root(w: &mut ResponseWriter, _req: &Request) {
    w.write_str("root");
}

fn hello(w: &mut ResponseWriter, req: &Request) {
    let name = req.query_param("name").unwrap_or_default();
    write!(w, "hello, {name}");
}

/// Echo the request body back inside a JSON document
fn echo(w: &mut ResponseWriter, req: &Request) {
    let document = serde_json::json!({
        "method": req.method(),
        "path": req.path(),
        "query": req.query(),
        "body": String::from_utf8_lossy(req.body()),
    });

    match serde_json::to_vec(&document) {
        Ok(bytes) => {
            w.set_header("Content-Type", "application/json");
            w.write_bytes(bytes);
        }
        Err(e) => {
            logger::log_error(&format!("Failed to encode echo response: {e}"));
            w.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}
