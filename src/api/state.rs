use std::sync::Arc;

use crate::services::{AnalyticsCounters, InteractionRecorder, RecommendationService};

/// Shared state of the video role's router
#[derive(Clone)]
pub struct VideoState {
    pub recorder: Arc<InteractionRecorder>,
    pub analytics: Arc<AnalyticsCounters>,
}

impl VideoState {
    pub fn new(recorder: Arc<InteractionRecorder>, analytics: Arc<AnalyticsCounters>) -> Self {
        Self {
            recorder,
            analytics,
        }
    }
}

/// Shared state of the recommendation role's router
#[derive(Clone)]
pub struct RecommendationState {
    pub recommendations: Arc<RecommendationService>,
}

impl RecommendationState {
    pub fn new(recommendations: Arc<RecommendationService>) -> Self {
        Self { recommendations }
    }
}
