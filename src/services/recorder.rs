use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use super::{catalog::CatalogClient, fanout::EventFanout};
use crate::{
    db::InteractionStore,
    error::{AppError, AppResult},
    messaging::EventPublisher,
    models::{
        is_valid_score, Content, NewRating, NewWatchEvent, PreferenceEvent, Rating, VideoEvent,
        WatchEvent, MAX_SCORE, MIN_SCORE,
    },
};

/// Interaction Recorder: the command side of the video role
///
/// Every command runs validate, catalog lookup, durable write, observer
/// fan-out and bus publish, strictly in that order. Nothing after the
/// durable write can fail the command.
pub struct InteractionRecorder {
    store: Arc<dyn InteractionStore>,
    catalog: Arc<dyn CatalogClient>,
    fanout: Arc<EventFanout>,
    publisher: Arc<dyn EventPublisher>,
}

impl InteractionRecorder {
    pub fn new(
        store: Arc<dyn InteractionStore>,
        catalog: Arc<dyn CatalogClient>,
        fanout: Arc<EventFanout>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            catalog,
            fanout,
            publisher,
        }
    }

    pub fn fanout(&self) -> &EventFanout {
        &self.fanout
    }

    #[instrument(skip(self))]
    pub async fn record_watch(
        &self,
        user_id: i64,
        content_id: i64,
        progress: i32,
        completed: bool,
    ) -> AppResult<WatchEvent> {
        validate_ids(user_id, content_id)?;
        if progress < 0 {
            return Err(AppError::InvalidInput(format!(
                "progress must be zero or positive, got {}",
                progress
            )));
        }

        let content = self.resolve_content(content_id).await?;

        let saved = self
            .store
            .insert_watch_event(NewWatchEvent {
                user_id,
                content_id,
                progress,
                completed,
                timestamp: Utc::now(),
            })
            .await?;

        tracing::info!(
            watch_event_id = saved.id,
            user_id,
            content_id,
            progress,
            completed,
            "Recorded watch event"
        );

        let genre = content.genre_token().map(str::to_string);
        self.fanout
            .notify(VideoEvent::VideoWatched {
                user_id,
                content_id,
                progress,
                completed,
                genre: genre.clone(),
                timestamp: saved.timestamp,
            })
            .await;

        self.publish(PreferenceEvent::watch(user_id, content_id, genre))
            .await;

        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn submit_rating(&self, user_id: i64, content_id: i64, score: f64) -> AppResult<Rating> {
        validate_ids(user_id, content_id)?;
        if !is_valid_score(score) {
            return Err(AppError::InvalidInput(format!(
                "score must be between {} and {}, got {}",
                MIN_SCORE, MAX_SCORE, score
            )));
        }

        let content = self.resolve_content(content_id).await?;

        let upsert = self
            .store
            .upsert_rating(NewRating {
                user_id,
                content_id,
                score,
                timestamp: Utc::now(),
            })
            .await?;

        match upsert.previous_score {
            Some(previous) => tracing::info!(
                rating_id = upsert.rating.id,
                user_id,
                content_id,
                previous_score = previous,
                score,
                user_average = upsert.user_average,
                "Updated rating"
            ),
            None => tracing::info!(
                rating_id = upsert.rating.id,
                user_id,
                content_id,
                score,
                user_average = upsert.user_average,
                "Recorded rating"
            ),
        }

        let genre = content.genre_token().map(str::to_string);
        self.fanout
            .notify(VideoEvent::ContentRated {
                user_id,
                content_id,
                score,
                average_rating: upsert.user_average,
                genre: genre.clone(),
                timestamp: upsert.rating.timestamp,
            })
            .await;

        self.publish(PreferenceEvent::rate(
            user_id,
            content_id,
            genre,
            upsert.user_average,
        ))
        .await;

        Ok(upsert.rating)
    }

    pub async fn watch_history(&self, user_id: i64) -> AppResult<Vec<WatchEvent>> {
        self.store.watch_history(user_id).await
    }

    pub async fn ratings_for_user(&self, user_id: i64) -> AppResult<Vec<Rating>> {
        self.store.ratings_for_user(user_id).await
    }

    pub async fn user_average_rating(&self, user_id: i64) -> AppResult<Option<f64>> {
        self.store.user_average_rating(user_id).await
    }

    pub async fn content_average_rating(&self, content_id: i64) -> AppResult<Option<f64>> {
        self.store.content_average_rating(content_id).await
    }

    /// Looks the content up before anything is written
    async fn resolve_content(&self, content_id: i64) -> AppResult<Content> {
        self.catalog.get_by_id(content_id).await.map_err(|e| {
            match &e {
                AppError::ContentNotFound(_) => {
                    tracing::info!(content_id, "Rejected interaction with unknown content")
                }
                _ => tracing::error!(content_id, error = %e, "Catalog lookup failed"),
            }
            e
        })
    }

    /// Publish failures are logged; the interaction is already committed
    async fn publish(&self, event: PreferenceEvent) {
        if let Err(e) = self.publisher.publish(&event).await {
            tracing::error!(
                user_id = event.user_id,
                event_type = ?event.event_type,
                kind = e.kind(),
                error = %e,
                "Failed to publish preference event"
            );
        }
    }
}

fn validate_ids(user_id: i64, content_id: i64) -> AppResult<()> {
    if user_id <= 0 {
        return Err(AppError::InvalidInput(format!(
            "userId must be positive, got {}",
            user_id
        )));
    }
    if content_id <= 0 {
        return Err(AppError::InvalidInput(format!(
            "contentId must be positive, got {}",
            content_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::InMemoryInteractionStore,
        messaging::InMemoryBus,
        models::{ContentKind, PreferenceEventType},
        services::{catalog::MockCatalogClient, fanout::Observer},
    };

    fn sci_fi(id: i64) -> Content {
        Content {
            id,
            title: "Arrival".to_string(),
            description: None,
            genre: Some(" Sci-Fi ".to_string()),
            release_year: Some(2016),
            rating: Some(4.5),
            view_count: Some(100),
            kind: ContentKind::Movie {
                duration: Some(116),
                director: None,
            },
        }
    }

    struct Harness {
        recorder: InteractionRecorder,
        store: Arc<InMemoryInteractionStore>,
        bus: Arc<InMemoryBus>,
    }

    fn harness(catalog: MockCatalogClient) -> Harness {
        let store = Arc::new(InMemoryInteractionStore::new());
        let bus = Arc::new(InMemoryBus::new());
        let recorder = InteractionRecorder::new(
            store.clone(),
            Arc::new(catalog),
            Arc::new(EventFanout::new()),
            bus.clone(),
        );
        Harness {
            recorder,
            store,
            bus,
        }
    }

    fn catalog_with(content: Content) -> MockCatalogClient {
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_get_by_id()
            .returning(move |_| Ok(content.clone()));
        catalog
    }

    #[tokio::test]
    async fn test_watch_persists_then_publishes_with_genre() {
        let h = harness(catalog_with(sci_fi(1)));

        let saved = h.recorder.record_watch(7, 1, 120, false).await.unwrap();

        assert_eq!(saved.user_id, 7);
        assert_eq!(saved.progress, 120);
        assert_eq!(h.store.watch_event_count().await, 1);

        let published = h.bus.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, PreferenceEventType::Watch);
        assert_eq!(published[0].genre.as_deref(), Some("Sci-Fi"));
        assert_eq!(published[0].watch_count_delta, Some(1));
    }

    #[tokio::test]
    async fn test_negative_progress_is_rejected_before_lookup() {
        let mut catalog = MockCatalogClient::new();
        catalog.expect_get_by_id().never();
        let h = harness(catalog);

        let err = h.recorder.record_watch(7, 1, -1, false).await.unwrap_err();

        assert_eq!(err.kind(), "INVALID_ARGUMENT");
        assert_eq!(h.store.watch_event_count().await, 0);
        assert!(h.bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_rejected() {
        let mut catalog = MockCatalogClient::new();
        catalog.expect_get_by_id().never();
        let h = harness(catalog);

        for score in [0.5, 5.5, f64::NAN] {
            let err = h.recorder.submit_rating(5, 10, score).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)));
        }
        assert_eq!(h.store.rating_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_content_writes_nothing() {
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_get_by_id()
            .returning(|id| Err(AppError::ContentNotFound(id)));
        let h = harness(catalog);

        let err = h.recorder.submit_rating(5, 99, 4.0).await.unwrap_err();

        assert!(matches!(err, AppError::ContentNotFound(99)));
        assert_eq!(h.store.rating_count().await, 0);
        assert!(h.bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_outage_aborts_command() {
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_get_by_id()
            .returning(|_| Err(AppError::CatalogUnavailable("timed out".into())));
        let h = harness(catalog);

        let err = h.recorder.record_watch(7, 1, 10, false).await.unwrap_err();

        assert_eq!(err.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(h.store.watch_event_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_write_skips_observers_and_publish() {
        let h = harness(catalog_with(sci_fi(1)));
        let notified = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&notified);
        h.recorder.fanout().register(Observer::new("counter", move |_event| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok(()) }
        }));
        h.store.set_fail_writes(true);

        let err = h.recorder.record_watch(7, 1, 10, false).await.unwrap_err();

        assert_eq!(err.kind(), "DURABLE_WRITE_FAILED");
        assert_eq!(notified.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(h.bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_command() {
        let h = harness(catalog_with(sci_fi(1)));
        h.bus.set_unavailable(true);

        let saved = h.recorder.record_watch(7, 1, 10, true).await;

        tokio_test::assert_ok!(&saved);
        assert_eq!(h.store.watch_event_count().await, 1);
        assert!(h.bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_observer_does_not_fail_command() {
        let h = harness(catalog_with(sci_fi(1)));
        h.recorder.fanout().register(Observer::new("broken", |_event| async {
            Err(anyhow::anyhow!("connection refused"))
        }));

        let rating = h.recorder.submit_rating(5, 1, 4.0).await.unwrap();

        assert_eq!(rating.score, 4.0);
        assert_eq!(h.bus.published().await.len(), 1);
        assert_eq!(h.recorder.fanout().totals().observer_failures, 1);
    }

    #[tokio::test]
    async fn test_rerating_carries_updated_average() {
        let h = harness(catalog_with(sci_fi(10)));

        h.recorder.submit_rating(5, 10, 4.2).await.unwrap();
        let second = h.recorder.submit_rating(5, 10, 2.0).await.unwrap();

        assert_eq!(second.score, 2.0);
        assert_eq!(h.store.rating_count().await, 1);
        assert_eq!(h.recorder.user_average_rating(5).await.unwrap(), Some(2.0));

        let published = h.bus.published().await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].event_type, PreferenceEventType::Rate);
        assert_eq!(published[1].average_rating, Some(2.0));
    }
}
