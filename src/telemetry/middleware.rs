//! Request instrumentation: capture, time, record and relay every request.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::body::CapturedBody;
use super::relay::{Exchange, RelayRequest, ResponseSnapshot, TelemetrySink};
use crate::config::Config;
use crate::error::HandlerError;
use crate::storage::{RequestLog, Store};

/// Request/response header carrying the correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state for the instrumentation layer.
#[derive(Clone)]
pub struct Instrumentation {
    store: Store,
    sink: Arc<dyn TelemetrySink>,
    max_body_bytes: usize,
    log_requests: bool,
    insert_timeout: Duration,
}

impl Instrumentation {
    pub fn new(store: Store, sink: Arc<dyn TelemetrySink>, config: &Config) -> Self {
        Self {
            store,
            sink,
            max_body_bytes: config.server.max_body_bytes,
            log_requests: config.logging.log_requests,
            insert_timeout: config.logging.insert_timeout(),
        }
    }
}

/// Request fields recorded before the handler runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RequestMeta {
    request_id: String,
    remote_ip: String,
    host: String,
    method: String,
    uri: String,
    user_agent: String,
}

impl RequestMeta {
    fn from_parts(parts: &Parts, request_id: String) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let host = header_str(&parts.headers, header::HOST)
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();
        let uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        Self {
            request_id,
            remote_ip: real_ip(&parts.headers, peer),
            host,
            method: parts.method.to_string(),
            uri,
            user_agent: header_str(&parts.headers, header::USER_AGENT)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer.
pub fn real_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(first) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return real.to_string();
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

/// Incoming `x-request-id` when usable, otherwise a fresh UUID v4.
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Content length announced by the client, used when the body was refused.
fn declared_length(headers: &HeaderMap) -> u64 {
    header_str(headers, header::CONTENT_LENGTH)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Axum middleware recording exactly one log entry per request.
///
/// The request body is read once and replayed to the handler and the relay.
/// Storage failures are logged and never change the client's response.
pub async fn instrument(
    State(inst): State<Instrumentation>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let meta = RequestMeta::from_parts(&parts, request_id(&parts.headers));
    let relay_parts = inst
        .sink
        .enabled()
        .then(|| (parts.method.clone(), parts.uri.clone(), parts.headers.clone()));

    let (response, captured, bytes_in) =
        match CapturedBody::capture(body, inst.max_body_bytes).await {
            Ok(captured) => {
                let bytes_in = captured.len() as u64;
                let request = Request::from_parts(parts, captured.replay());
                (next.run(request).await, captured, bytes_in)
            }
            Err(e) => (
                e.into_response(),
                CapturedBody::default(),
                declared_length(&parts.headers),
            ),
        };

    let (mut res_parts, res_body) = response.into_parts();
    let (delivered, body_error) = match CapturedBody::capture(res_body, usize::MAX).await {
        Ok(delivered) => (delivered, None),
        Err(e) => {
            res_parts.status = StatusCode::INTERNAL_SERVER_ERROR;
            res_parts.headers.remove(header::CONTENT_LENGTH);
            (CapturedBody::default(), Some(e.to_string()))
        }
    };
    let elapsed = start.elapsed();

    if let Ok(value) = HeaderValue::from_str(&meta.request_id) {
        res_parts.headers.insert(REQUEST_ID_HEADER, value);
    }

    let error = body_error
        .or_else(|| res_parts.extensions.get::<HandlerError>().map(|e| e.0.clone()))
        .unwrap_or_default();

    let log = RequestLog {
        request_id: meta.request_id.clone(),
        remote_ip: meta.remote_ip,
        host: meta.host,
        method: meta.method,
        uri: meta.uri,
        user_agent: meta.user_agent,
        status: res_parts.status.as_u16(),
        error,
        latency_us: elapsed.as_micros() as u64,
        latency_human: format!("{:?}", elapsed),
        bytes_in,
        bytes_out: delivered.len() as u64,
    };

    tracing::info!(
        request_id = %log.request_id,
        remote_ip = %log.remote_ip,
        method = %log.method,
        uri = %log.uri,
        status = log.status,
        latency = %log.latency_human,
        bytes_in = log.bytes_in,
        bytes_out = log.bytes_out,
        "Request completed"
    );

    if inst.log_requests {
        persist(&inst, &log).await;
    }

    if let Some((method, uri, headers)) = relay_parts {
        inst.sink.observe(Exchange {
            request_id: meta.request_id,
            request: RelayRequest {
                method,
                uri,
                headers,
                body: captured,
            },
            response: ResponseSnapshot {
                status: res_parts.status,
                headers: res_parts.headers.clone(),
                body: delivered.clone(),
            },
            latency: elapsed,
        });
    }

    Response::from_parts(res_parts, delivered.replay())
}

async fn persist(inst: &Instrumentation, log: &RequestLog) {
    match tokio::time::timeout(inst.insert_timeout, log.insert(&inst.store)).await {
        Ok(Ok(id)) => {
            tracing::debug!(request_id = %log.request_id, row_id = id, "Request log written");
        }
        Ok(Err(e)) => {
            tracing::warn!(
                request_id = %log.request_id,
                error = %e,
                "Failed to write request log"
            );
        }
        Err(_) => {
            tracing::warn!(
                request_id = %log.request_id,
                timeout = ?inst.insert_timeout,
                "Request log write timed out"
            );
        }
    }
}
