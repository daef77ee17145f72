//! Request log listing handlers.

use axum::{
    extract::{Query, State},
    Json,
};

use super::app::AppState;
use crate::error::Error;
use crate::storage::{self, FilterParams, LogFilter, LogRow, Page, PageParams};

/// Handle GET /logs -- every recorded request, newest first.
pub async fn list_all(State(state): State<AppState>) -> Result<Json<Vec<LogRow>>, Error> {
    Ok(Json(storage::logs::list_all(&state.store).await?))
}

/// Handle GET /logs/paginated
pub async fn list_paginated(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<LogRow>>, Error> {
    let page = Page::from_params(&params)?;
    Ok(Json(storage::logs::list_basic(&state.store, page).await?))
}

/// Handle GET /logs/filtered
///
/// `limit`, `offset` and `timeRange` are required together; `method` and
/// `response` narrow the result when present.
pub async fn list_filtered(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Result<Json<Vec<LogRow>>, Error> {
    let filter = LogFilter::from_params(&params, chrono::Utc::now())?;
    Ok(Json(storage::logs::list_filtered(&state.store, &filter).await?))
}
