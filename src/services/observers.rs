use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::Serialize;
use serde_json::json;

use super::fanout::Observer;
use crate::{
    error::{AppError, AppResult},
    models::VideoEvent,
};

/// Rating at or above which a rating counts as high
pub const HIGH_RATING: f64 = 4.0;
/// Rating at or below which a rating counts as low
pub const LOW_RATING: f64 = 2.0;

/// Best-effort push of preference hints to the recommendation service
///
/// Only absolute values are sent (the user's average after a rating, or a
/// bare touch after a watch), so the call can race the bus message for the
/// same interaction without double counting.
pub fn recommendation_notifier(base_url: &str, timeout: Duration) -> AppResult<Observer> {
    let http_client = HttpClient::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build notifier client: {}", e)))?;
    let url = format!(
        "{}/api/recommendations/update",
        base_url.trim_end_matches('/')
    );

    Ok(Observer::new("recommendation-notifier", move |event| {
        let http_client = http_client.clone();
        let url = url.clone();
        async move {
            let body = match event.as_ref() {
                VideoEvent::ContentRated {
                    user_id,
                    average_rating,
                    ..
                } => json!({ "userId": user_id, "averageRating": average_rating }),
                VideoEvent::VideoWatched { user_id, .. } => json!({ "userId": user_id }),
            };

            let response = http_client.post(&url).json(&body).send().await?;
            if !response.status().is_success() {
                anyhow::bail!("Recommendation service returned status {}", response.status());
            }

            tracing::debug!(
                user_id = event.user_id(),
                event_type = event.event_type(),
                "Notified recommendation service"
            );
            Ok(())
        }
    }))
}

/// In-memory interaction counters fed by [`analytics_observer`]
#[derive(Debug, Default)]
pub struct AnalyticsCounters {
    watch_events: AtomicU64,
    completions: AtomicU64,
    ratings: AtomicU64,
    high_ratings: AtomicU64,
    low_ratings: AtomicU64,
}

/// Point-in-time copy of [`AnalyticsCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub watch_events: u64,
    pub completions: u64,
    pub ratings: u64,
    pub high_ratings: u64,
    pub low_ratings: u64,
}

impl AnalyticsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &VideoEvent) {
        match event {
            VideoEvent::VideoWatched { completed, .. } => {
                self.watch_events.fetch_add(1, Ordering::Relaxed);
                if *completed {
                    self.completions.fetch_add(1, Ordering::Relaxed);
                }
            }
            VideoEvent::ContentRated { score, .. } => {
                self.ratings.fetch_add(1, Ordering::Relaxed);
                if *score >= HIGH_RATING {
                    self.high_ratings.fetch_add(1, Ordering::Relaxed);
                } else if *score <= LOW_RATING {
                    self.low_ratings.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        AnalyticsSnapshot {
            watch_events: self.watch_events.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            ratings: self.ratings.load(Ordering::Relaxed),
            high_ratings: self.high_ratings.load(Ordering::Relaxed),
            low_ratings: self.low_ratings.load(Ordering::Relaxed),
        }
    }
}

/// Counts interactions and writes one structured log record per event
pub fn analytics_observer(counters: Arc<AnalyticsCounters>) -> Observer {
    Observer::new("analytics", move |event| {
        let counters = Arc::clone(&counters);
        async move {
            counters.record(&event);
            match event.as_ref() {
                VideoEvent::VideoWatched {
                    user_id,
                    content_id,
                    progress,
                    completed,
                    ..
                } => tracing::info!(
                    user_id,
                    content_id,
                    progress,
                    completed,
                    "Analytics: video watched"
                ),
                VideoEvent::ContentRated {
                    user_id,
                    content_id,
                    score,
                    ..
                } => tracing::info!(user_id, content_id, score, "Analytics: content rated"),
            }
            Ok(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fanout::EventFanout;
    use chrono::Utc;

    fn rated(score: f64) -> VideoEvent {
        VideoEvent::ContentRated {
            user_id: 5,
            content_id: 10,
            score,
            average_rating: score,
            genre: None,
            timestamp: Utc::now(),
        }
    }

    fn watched(completed: bool) -> VideoEvent {
        VideoEvent::VideoWatched {
            user_id: 5,
            content_id: 10,
            progress: 600,
            completed,
            genre: Some("Drama".into()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_counters_classify_events() {
        let counters = AnalyticsCounters::new();
        counters.record(&watched(false));
        counters.record(&watched(true));
        counters.record(&rated(4.0));
        counters.record(&rated(2.0));
        counters.record(&rated(3.0));

        assert_eq!(
            counters.snapshot(),
            AnalyticsSnapshot {
                watch_events: 2,
                completions: 1,
                ratings: 3,
                high_ratings: 1,
                low_ratings: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_analytics_observer_through_fanout() {
        let counters = Arc::new(AnalyticsCounters::new());
        let fanout = EventFanout::new();
        fanout.register(analytics_observer(Arc::clone(&counters)));

        let report = fanout.notify(watched(true)).await;

        assert_eq!(report.notified, 1);
        assert_eq!(counters.snapshot().completions, 1);
    }

    #[tokio::test]
    async fn test_unreachable_notifier_fails_quietly() {
        let notifier =
            recommendation_notifier("http://127.0.0.1:1/", Duration::from_millis(300)).unwrap();
        assert_eq!(notifier.name(), "recommendation-notifier");

        let fanout = EventFanout::new();
        fanout.register(notifier);

        let report = fanout.notify(rated(4.5)).await;
        assert_eq!(report.failed, vec!["recommendation-notifier".to_string()]);
    }
}
