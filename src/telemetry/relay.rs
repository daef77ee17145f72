//! External telemetry relay: a fire-and-forget sink fed one exchange per request.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode, Uri};
use serde::Serialize;

use super::body::CapturedBody;
use crate::config::{ApiKey, TelemetryConfig};

/// Headers whose values never leave the process.
const REDACTED_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "proxy-authorization"];

/// The request half of an exchange, with its own replay of the body.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: CapturedBody,
}

/// What the client received, observed without touching the delivered response.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: CapturedBody,
}

/// One request/response pair handed to a sink.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub request_id: String,
    pub request: RelayRequest,
    pub response: ResponseSnapshot,
    pub latency: Duration,
}

/// Receiver of exchanges. Implementations must not block the caller.
pub trait TelemetrySink: Send + Sync + 'static {
    fn observe(&self, exchange: Exchange);

    /// Whether the pipeline should bother assembling exchanges.
    fn enabled(&self) -> bool {
        true
    }
}

/// Sink used when no relay is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn observe(&self, _exchange: Exchange) {}

    fn enabled(&self) -> bool {
        false
    }
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    request_id: &'a str,
    latency_us: u64,
    request: MessagePayload,
    response: MessagePayload,
}

#[derive(Debug, Serialize)]
struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: String,
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if REDACTED_HEADERS.contains(&name.as_str()) {
                "[REDACTED]".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_string(), value)
        })
        .collect()
}

impl Exchange {
    fn payload(&self) -> Payload<'_> {
        Payload {
            request_id: &self.request_id,
            latency_us: self.latency.as_micros() as u64,
            request: MessagePayload {
                method: Some(self.request.method.to_string()),
                uri: Some(self.request.uri.to_string()),
                status: None,
                headers: header_pairs(&self.request.headers),
                body: String::from_utf8_lossy(self.request.body.bytes()).into_owned(),
            },
            response: MessagePayload {
                method: None,
                uri: None,
                status: Some(self.response.status.as_u16()),
                headers: header_pairs(&self.response.headers),
                body: String::from_utf8_lossy(self.response.body.bytes()).into_owned(),
            },
        }
    }
}

/// Posts each exchange as JSON to an HTTP endpoint on a spawned task.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<ApiKey>,
}

impl HttpSink {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: Option<ApiKey>) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

impl TelemetrySink for HttpSink {
    fn observe(&self, exchange: Exchange) {
        let mut request = self.client.post(&self.endpoint).json(&exchange.payload());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        let request_id = exchange.request_id;
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(
                        request_id = %request_id,
                        status = %response.status(),
                        "Telemetry relay rejected exchange"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        request_id = %request_id,
                        error = %e,
                        "Failed to deliver exchange to telemetry relay"
                    );
                }
            }
        });
    }
}

/// Build the sink described by `config`.
pub fn sink_from_config(config: &TelemetryConfig) -> anyhow::Result<Arc<dyn TelemetrySink>> {
    let Some(endpoint) = &config.endpoint else {
        return Ok(Arc::new(NoopSink));
    };
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms.unwrap_or(5_000)))
        .build()?;
    tracing::info!(endpoint = %endpoint, "Telemetry relay enabled");
    Ok(Arc::new(HttpSink::new(
        client,
        endpoint.clone(),
        config.api_key.clone(),
    )))
}
