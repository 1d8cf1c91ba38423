use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path,
    },
    Json,
};

use crate::error::{AppError, AppResult};

pub mod recommendation_handlers;
pub mod routes;
pub mod state;
pub mod video_handlers;

pub use routes::{create_recommendation_router, create_video_router};
pub use state::{RecommendationState, VideoState};

/// Unwraps a JSON body, reporting a malformed one as invalid input
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::InvalidInput(rejection.body_text()))
}

fn path_id(path: Result<Path<i64>, PathRejection>) -> AppResult<i64> {
    path.map(|Path(id)| id)
        .map_err(|rejection| AppError::InvalidInput(rejection.body_text()))
}

fn required<T>(value: Option<T>, field: &str) -> AppResult<T> {
    value.ok_or_else(|| AppError::InvalidInput(format!("{} is required", field)))
}
