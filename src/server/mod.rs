//! HTTP server module.
//!
//! Serves the record endpoints and the request-log views, with every request
//! passing through the instrumentation layer.

mod app;
mod handlers;
mod logs;
mod records;

pub use app::{create_router, run_server, with_middleware, AppState};
