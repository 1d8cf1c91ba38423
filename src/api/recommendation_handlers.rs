use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{json_body, path_id, RecommendationState};
use crate::{
    error::{AppError, AppResult},
    models::{RecommendationResponse, UserPreference},
    services::PreferenceUpdateRequest,
};

#[derive(Debug, Default, Deserialize)]
pub struct RecommendationQuery {
    pub limit: Option<i64>,
}

/// GET /api/recommendations/:user_id?limit=N
pub async fn recommend(
    State(state): State<RecommendationState>,
    user_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<RecommendationQuery>, QueryRejection>,
) -> AppResult<Json<RecommendationResponse>> {
    let user_id = path_id(user_id)?;
    let Query(query) =
        query.map_err(|rejection| AppError::InvalidInput(rejection.body_text()))?;

    let response = state
        .recommendations
        .recommend(user_id, query.limit)
        .await?;
    Ok(Json(response))
}

/// POST /api/recommendations/update
pub async fn update_preferences(
    State(state): State<RecommendationState>,
    body: Result<Json<PreferenceUpdateRequest>, JsonRejection>,
) -> AppResult<Json<UserPreference>> {
    let request = json_body(body)?;
    let updated = state.recommendations.update_preferences(request).await?;
    Ok(Json(updated))
}

/// GET /api/recommendations/preferences/:user_id
pub async fn get_preferences(
    State(state): State<RecommendationState>,
    user_id: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<UserPreference>> {
    let user_id = path_id(user_id)?;
    Ok(Json(state.recommendations.get_preferences(user_id).await?))
}

/// GET /api/recommendations/health
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "healthy", "service": "recommendation" })),
    )
}
