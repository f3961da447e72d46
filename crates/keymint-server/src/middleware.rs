//! Request correlation and W3C trace-context middleware.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use rand::Rng;
use tracing::Instrument;
use uuid::Uuid;

use crate::state::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";
const TRACEPARENT_HEADER: &str = "traceparent";

/// Correlation id for one request, honored from `x-request-id` or minted.
#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

/// W3C TraceContext identifiers attached when tracing is enabled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub sampled: bool,
}

impl TraceContext {
    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!("00-{}-{}-{flags}", self.trace_id, self.span_id)
    }
}

/// Parse a `traceparent` header value: `00-{32 hex}-{16 hex}-{2 hex}`.
pub fn parse_traceparent(value: &str) -> Option<TraceContext> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let span_id = parts.next()?;
    let flags = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if version.len() != 2 || trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
        return None;
    }
    let all_hex = |s: &str| s.chars().all(|c| c.is_ascii_hexdigit());
    if !all_hex(version) || !all_hex(trace_id) || !all_hex(span_id) || !all_hex(flags) {
        return None;
    }
    // All-zero ids are invalid per the spec'd header format.
    if trace_id.chars().all(|c| c == '0') || span_id.chars().all(|c| c == '0') {
        return None;
    }
    Some(TraceContext {
        trace_id: trace_id.to_ascii_lowercase(),
        span_id: span_id.to_ascii_lowercase(),
        sampled: u8::from_str_radix(flags, 16).map(|f| f & 1 == 1).unwrap_or(false),
    })
}

fn hex_id(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..bytes)
        .map(|_| format!("{:02x}", rng.gen::<u8>()))
        .collect()
}

fn mint_trace_context(sampling_rate: f64) -> TraceContext {
    TraceContext {
        trace_id: hex_id(16),
        span_id: hex_id(8),
        sampled: rand::thread_rng().gen::<f64>() < sampling_rate,
    }
}

/// Assign a correlation id to every request and echo it on the response.
pub async fn correlation_middleware(mut req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(CorrelationId(request_id.clone()));

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// When tracing is enabled, carry the inbound trace context (or mint one,
/// subject to the sampling rate), wrap the handler in a span tagged with the
/// ids, and propagate `traceparent` on the response. When disabled, requests
/// carry no trace fields at all.
pub async fn trace_context_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if !state.otel.enabled {
        return next.run(req).await;
    }

    let trace = req
        .headers()
        .get(TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_traceparent)
        .unwrap_or_else(|| mint_trace_context(state.otel.sampling_rate));

    req.extensions_mut().insert(trace.clone());

    let span = tracing::info_span!(
        "request",
        otel.name = %state.otel.service_name,
        trace_id = %trace.trace_id,
        span_id = %trace.span_id,
        sampled = trace.sampled,
    );
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&trace.to_traceparent()) {
        response.headers_mut().insert(TRACEPARENT_HEADER, value);
    }
    response
}
