use serde::Serialize;

use super::Content;

/// Ranked recommendation list returned to the caller
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResponse {
    pub user_id: i64,
    pub strategy_used: String,
    pub recommendations: Vec<Content>,
    pub total_recommendations: usize,
}

impl RecommendationResponse {
    pub fn new(user_id: i64, strategy_used: &str, recommendations: Vec<Content>) -> Self {
        Self {
            user_id,
            strategy_used: strategy_used.to_string(),
            total_recommendations: recommendations.len(),
            recommendations,
        }
    }
}
