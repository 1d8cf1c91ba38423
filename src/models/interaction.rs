use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest accepted rating score
pub const MIN_SCORE: f64 = 1.0;
/// Highest accepted rating score
pub const MAX_SCORE: f64 = 5.0;

/// One persisted watch-progress submission (append-only history)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
    pub id: i64,
    pub user_id: i64,
    pub content_id: i64,
    pub progress: i32,
    pub completed: bool,
    pub timestamp: DateTime<Utc>,
}

/// The persisted rating for one (user, content) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub id: i64,
    pub user_id: i64,
    pub content_id: i64,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Validated watch event, not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewWatchEvent {
    pub user_id: i64,
    pub content_id: i64,
    pub progress: i32,
    pub completed: bool,
    pub timestamp: DateTime<Utc>,
}

/// Validated rating, not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewRating {
    pub user_id: i64,
    pub content_id: i64,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Result of a rating upsert, read inside the same transaction
#[derive(Debug, Clone, PartialEq)]
pub struct RatingUpsert {
    pub rating: Rating,
    /// Score held by the row before this upsert, if it existed
    pub previous_score: Option<f64>,
    /// Average over all of the user's ratings, including this one
    pub user_average: f64,
}

pub fn is_valid_score(score: f64) -> bool {
    score.is_finite() && (MIN_SCORE..=MAX_SCORE).contains(&score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bounds_are_inclusive() {
        assert!(is_valid_score(1.0));
        assert!(is_valid_score(5.0));
        assert!(is_valid_score(3.7));
        assert!(!is_valid_score(0.99));
        assert!(!is_valid_score(5.01));
        assert!(!is_valid_score(f64::NAN));
    }

    #[test]
    fn test_watch_event_serializes_camel_case() {
        let event = WatchEvent {
            id: 1,
            user_id: 42,
            content_id: 7,
            progress: 120,
            completed: false,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["userId"], 42);
        assert_eq!(json["contentId"], 7);
        assert_eq!(json["progress"], 120);
        assert_eq!(json["completed"], false);
    }
}
