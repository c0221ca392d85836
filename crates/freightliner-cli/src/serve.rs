//! `freightliner serve`: a minimal HTTP surface for liveness and Prometheus
//! scraping. This lives entirely in the CLI, has no link to an in-progress
//! replication job, and only ever reports the process's own up/build-info
//! state — there is no metrics pipeline wired from the engine into this
//! yet.

use std::io::Write as _;
use std::thread;

use anyhow::{Context, Result};
use freightliner::CancellationToken;
use tiny_http::{Method, Response, Server};

const POLL_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(200);

pub fn run(port: u16, metrics_port: u16, cancel: CancellationToken) -> Result<()> {
    if port == metrics_port {
        serve_combined(port, cancel)
    } else {
        let metrics_cancel = cancel.clone();
        let metrics_handle = thread::spawn(move || serve_one(metrics_port, metrics_cancel, handle_metrics_only));
        serve_one(port, cancel, handle_health_only)?;
        metrics_handle.join().map_err(|_| anyhow::anyhow!("metrics server thread panicked"))?
    }
}

fn serve_combined(port: u16, cancel: CancellationToken) -> Result<()> {
    serve_one(port, cancel, handle_either)
}

fn serve_one(
    port: u16,
    cancel: CancellationToken,
    handler: fn(&tiny_http::Request) -> (u16, &'static str, String),
) -> Result<()> {
    let server =
        Server::http(("0.0.0.0", port)).map_err(|e| anyhow::anyhow!("failed to bind 0.0.0.0:{port}: {e}"))?;

    while !cancel.is_cancelled() {
        let Some(request) = server.recv_timeout(POLL_TIMEOUT).context("serve: accept failed")? else {
            continue;
        };
        let (status, content_type, body) = handler(&request);
        let response = Response::from_string(body)
            .with_status_code(status)
            .with_header(tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()).unwrap());
        let _ = request.respond(response);
    }
    Ok(())
}

fn handle_health_only(req: &tiny_http::Request) -> (u16, &'static str, String) {
    match (req.method(), req.url()) {
        (Method::Get, "/healthz") => (200, "text/plain", "ok\n".to_string()),
        _ => (404, "text/plain", "not found\n".to_string()),
    }
}

fn handle_metrics_only(req: &tiny_http::Request) -> (u16, &'static str, String) {
    match (req.method(), req.url()) {
        (Method::Get, "/metrics") => (200, "text/plain; version=0.0.4", render_metrics()),
        _ => (404, "text/plain", "not found\n".to_string()),
    }
}

fn handle_either(req: &tiny_http::Request) -> (u16, &'static str, String) {
    match (req.method(), req.url()) {
        (Method::Get, "/healthz") => (200, "text/plain", "ok\n".to_string()),
        (Method::Get, "/metrics") => (200, "text/plain; version=0.0.4", render_metrics()),
        _ => (404, "text/plain", "not found\n".to_string()),
    }
}

fn render_metrics() -> String {
    let mut out = Vec::new();
    let _ = writeln!(out, "# HELP freightliner_up 1 if the freightliner process is running.");
    let _ = writeln!(out, "# TYPE freightliner_up gauge");
    let _ = writeln!(out, "freightliner_up 1");
    let _ = writeln!(out, "# HELP freightliner_build_info Build metadata, value is always 1.");
    let _ = writeln!(out, "# TYPE freightliner_build_info gauge");
    let _ = writeln!(out, "freightliner_build_info{{version=\"{}\"}} 1", env!("CARGO_PKG_VERSION"));
    String::from_utf8(out).unwrap_or_default()
}
