//! reqlog - request-logging record service over an embedded SQLite store
//!
//! This library provides the storage layer (dual read/write pools, request
//! log queries, health), the per-request instrumentation pipeline and the
//! HTTP server that ties them together.

pub mod config;
pub mod error;
pub mod server;
pub mod storage;
pub mod telemetry;

pub use config::Config;
pub use error::{Error, Result};
