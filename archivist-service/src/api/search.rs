//! Search API endpoint.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ServiceError;
use crate::service::SearchHit;

use super::AppState;

const DEFAULT_TOP_K: usize = 10;
const MAX_TOP_K: usize = 100;

/// Search request body
#[derive(Deserialize)]
pub struct SearchRequest {
    pub owner_id: String,
    pub query: String,
    pub top_k: Option<usize>,
}

/// Search response
#[derive(Serialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
}

/// Search an owner's indexed documents
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ServiceError> {
    let top_k = request
        .top_k
        .unwrap_or(DEFAULT_TOP_K)
        .clamp(1, MAX_TOP_K);

    let hits = state
        .service
        .search(&request.owner_id, &request.query, top_k)
        .await?;

    Ok(Json(SearchResponse { hits }))
}
