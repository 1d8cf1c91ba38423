use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{json_body, path_id, required, VideoState};
use crate::{
    error::AppResult,
    models::{Rating, WatchEvent},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub user_id: Option<i64>,
    pub content_id: Option<i64>,
    pub progress: Option<i32>,
    #[serde(default)]
    pub completed: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingRequest {
    pub user_id: Option<i64>,
    pub content_id: Option<i64>,
    pub score: Option<f64>,
}

/// POST /api/videos/watch
pub async fn record_watch(
    State(state): State<VideoState>,
    body: Result<Json<WatchRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<WatchEvent>)> {
    let request = json_body(body)?;
    let user_id = required(request.user_id, "userId")?;
    let content_id = required(request.content_id, "contentId")?;
    let progress = required(request.progress, "progress")?;

    let saved = state
        .recorder
        .record_watch(
            user_id,
            content_id,
            progress,
            request.completed.unwrap_or(false),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(saved)))
}

/// POST /api/videos/rate
pub async fn submit_rating(
    State(state): State<VideoState>,
    body: Result<Json<RatingRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Rating>)> {
    let request = json_body(body)?;
    let user_id = required(request.user_id, "userId")?;
    let content_id = required(request.content_id, "contentId")?;
    let score = required(request.score, "score")?;

    let saved = state
        .recorder
        .submit_rating(user_id, content_id, score)
        .await?;

    Ok((StatusCode::CREATED, Json(saved)))
}

/// GET /api/videos/watch/user/:user_id
pub async fn watch_history(
    State(state): State<VideoState>,
    user_id: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<Vec<WatchEvent>>> {
    let user_id = path_id(user_id)?;
    Ok(Json(state.recorder.watch_history(user_id).await?))
}

/// GET /api/videos/rate/user/:user_id
pub async fn user_ratings(
    State(state): State<VideoState>,
    user_id: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<Vec<Rating>>> {
    let user_id = path_id(user_id)?;
    Ok(Json(state.recorder.ratings_for_user(user_id).await?))
}

/// GET /api/videos/rate/user/:user_id/average
pub async fn user_average_rating(
    State(state): State<VideoState>,
    user_id: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<Value>> {
    let user_id = path_id(user_id)?;
    let average = state.recorder.user_average_rating(user_id).await?;
    Ok(Json(json!({ "userId": user_id, "averageRating": average })))
}

/// GET /api/videos/rate/content/:content_id/average
pub async fn content_average_rating(
    State(state): State<VideoState>,
    content_id: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<Value>> {
    let content_id = path_id(content_id)?;
    let average = state.recorder.content_average_rating(content_id).await?;
    Ok(Json(
        json!({ "contentId": content_id, "averageRating": average }),
    ))
}

/// GET /api/videos/analytics
pub async fn analytics(State(state): State<VideoState>) -> Json<Value> {
    let counters = state.analytics.snapshot();
    let fanout = state.recorder.fanout();

    Json(json!({
        "watchEvents": counters.watch_events,
        "completions": counters.completions,
        "ratings": counters.ratings,
        "highRatings": counters.high_ratings,
        "lowRatings": counters.low_ratings,
        "fanout": fanout.totals(),
        "observers": fanout.observer_names(),
    }))
}

/// GET /api/videos/health
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "healthy", "service": "video" })),
    )
}
