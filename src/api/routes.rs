use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::{recommendation_handlers, video_handlers, RecommendationState, VideoState};
use crate::middleware::{make_span_with_request_id, request_id_middleware};

/// Router of the video role
pub fn create_video_router(state: VideoState) -> Router {
    let videos = Router::new()
        .route("/watch", post(video_handlers::record_watch))
        .route("/watch/user/:user_id", get(video_handlers::watch_history))
        .route("/rate", post(video_handlers::submit_rating))
        .route("/rate/user/:user_id", get(video_handlers::user_ratings))
        .route(
            "/rate/user/:user_id/average",
            get(video_handlers::user_average_rating),
        )
        .route(
            "/rate/content/:content_id/average",
            get(video_handlers::content_average_rating),
        )
        .route("/analytics", get(video_handlers::analytics))
        .route("/health", get(video_handlers::health));

    with_layers(
        Router::new()
            .route("/health", get(video_handlers::health))
            .nest("/api/videos", videos)
            .with_state(state),
    )
}

/// Router of the recommendation role
pub fn create_recommendation_router(state: RecommendationState) -> Router {
    let recommendations = Router::new()
        .route("/health", get(recommendation_handlers::health))
        .route("/update", post(recommendation_handlers::update_preferences))
        .route(
            "/preferences/:user_id",
            get(recommendation_handlers::get_preferences),
        )
        .route("/:user_id", get(recommendation_handlers::recommend));

    with_layers(
        Router::new()
            .route("/health", get(recommendation_handlers::health))
            .nest("/api/recommendations", recommendations)
            .with_state(state),
    )
}

/// Request id first so the trace span can read it
fn with_layers(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(middleware::from_fn(request_id_middleware))
            .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id)),
    )
}
