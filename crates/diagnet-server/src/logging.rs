use axum::{
    body::Body,
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

static TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

/// Per-request trace ID, stashed in request extensions by
/// [`request_logging`] and echoed back in the `x-trace-id` header.
#[derive(Debug, Clone)]
pub struct TraceId(pub String);

/// Generate a 16-character hex trace ID (8 random bytes).
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::rng().random();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Request/response logging middleware. Logs method, path, status, and
/// latency; never the body (sensor payloads and credentials pass through
/// here).
pub async fn request_logging(mut req: Request<Body>, next: Next) -> Response {
    let trace_id = TraceId(generate_trace_id());
    req.extensions_mut().insert(trace_id.clone());

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let mut resp = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&trace_id.0) {
        resp.headers_mut().insert(&TRACE_ID_HEADER, value);
    }

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let status = resp.status().as_u16();
    if status >= 500 {
        tracing::error!(trace_id = %trace_id.0, %method, %path, status, elapsed_ms, "request");
    } else {
        tracing::info!(trace_id = %trace_id.0, %method, %path, status, elapsed_ms, "request");
    }

    resp
}
