//! Per-request instrumentation and the external telemetry relay.

pub mod body;
pub mod middleware;
pub mod relay;

pub use body::CapturedBody;
pub use middleware::{instrument, real_ip, Instrumentation, REQUEST_ID_HEADER};
pub use relay::{
    sink_from_config, Exchange, HttpSink, NoopSink, RelayRequest, ResponseSnapshot, TelemetrySink,
};
