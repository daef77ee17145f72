//! HTTP server setup and configuration.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::{request::Parts, HeaderName, HeaderValue, Method},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use super::{handlers, logs, records};
use crate::config::{Config, CorsConfig};
use crate::error::Error;
use crate::storage::{HealthReporter, Store};
use crate::telemetry::{self, Instrumentation, TelemetrySink};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub health: HealthReporter,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Store, config: Config) -> Self {
        let health = HealthReporter::new(store.clone(), config.health.clone());
        Self {
            store,
            health,
            config: Arc::new(config),
        }
    }
}

/// Create the axum router with all endpoints, instrumented by `sink`.
pub fn create_router(state: AppState, sink: Arc<dyn TelemetrySink>) -> Router {
    let router = Router::new()
        .route("/", get(handlers::hello))
        .route("/health", get(handlers::health))
        // Request logs
        .route("/logs", get(logs::list_all))
        .route("/logs/paginated", get(logs::list_paginated))
        .route("/logs/filtered", get(logs::list_filtered))
        // Records
        .route("/users", post(records::create_user).get(records::list_users))
        .route("/users/id/:id", get(records::user_by_id))
        .route("/users/username/:username", get(records::user_by_username))
        .route("/users/email/:email", get(records::user_by_email))
        .route("/posts", post(records::create_post).get(records::list_posts))
        .route("/posts/id/:id", get(records::post_by_id))
        .route("/posts/userid/:userid", get(records::posts_by_user))
        .fallback(handlers::not_found)
        .with_state(state.clone());

    with_middleware(router, &state, sink)
}

/// Wrap `router` in the request pipeline.
///
/// From the outside in: tracing, instrumentation, panic recovery, CORS.
/// Panics and CORS preflight answers are therefore recorded like any other
/// response.
pub fn with_middleware(router: Router, state: &AppState, sink: Arc<dyn TelemetrySink>) -> Router {
    let instrumentation = Instrumentation::new(state.store.clone(), sink, &state.config);

    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn_with_state(
                instrumentation,
                telemetry::instrument,
            ))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(cors_layer(&state.config.server.cors)),
    )
}

/// Turn a handler panic into a 500 carrying the panic text.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!(panic = %message, "Handler panicked");
    Error::Internal(format!("handler panicked: {}", message)).into_response()
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    if !config.enabled {
        return CorsLayer::new();
    }

    let origins = config.clone();
    let methods: Vec<Method> = config
        .allow_methods
        .iter()
        .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
        .collect();
    let headers: Vec<HeaderName> = config
        .allow_headers
        .iter()
        .filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .map(|o| origins.allows_origin(o))
                    .unwrap_or(false)
            },
        ))
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(config.allow_credentials)
        .max_age(config.max_age())
}

/// Run the HTTP server until Ctrl-C, then close the store.
pub async fn run_server(config: Config, store: Store) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let sink = telemetry::sink_from_config(&config.telemetry)?;

    let state = AppState::new(store.clone(), config);
    let app = create_router(state, sink);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(
        address = %listen_addr,
        database = %store.location(),
        "Starting reqlog server"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    store.close().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
