//! In-process implementations of the storage traits.
//!
//! They honour the same contracts as the Postgres stores (unique rating per
//! (user, content), atomic preference mutation, event-id dedupe) and are used
//! to drive the services without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{InteractionStore, MutationOutcome, PreferenceStore};
use crate::{
    error::{AppError, AppResult},
    models::{
        NewRating, NewWatchEvent, PreferenceMutation, Rating, RatingUpsert, UserPreference,
        WatchEvent,
    },
};

#[derive(Default)]
struct Interactions {
    watch_events: Vec<WatchEvent>,
    ratings: Vec<Rating>,
    next_watch_id: i64,
    next_rating_id: i64,
}

/// Interaction store held in memory
#[derive(Default)]
pub struct InMemoryInteractionStore {
    inner: Mutex<Interactions>,
    fail_writes: AtomicBool,
}

impl InMemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail as if the database were down
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn watch_event_count(&self) -> usize {
        self.inner.lock().await.watch_events.len()
    }

    pub async fn rating_count(&self) -> usize {
        self.inner.lock().await.ratings.len()
    }

    fn check_writable(&self) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

fn average(scores: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = scores.fold((0.0, 0usize), |(sum, count), s| (sum + s, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[async_trait::async_trait]
impl InteractionStore for InMemoryInteractionStore {
    async fn insert_watch_event(&self, event: NewWatchEvent) -> AppResult<WatchEvent> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;

        inner.next_watch_id += 1;
        let saved = WatchEvent {
            id: inner.next_watch_id,
            user_id: event.user_id,
            content_id: event.content_id,
            progress: event.progress,
            completed: event.completed,
            timestamp: event.timestamp,
        };
        inner.watch_events.push(saved.clone());

        Ok(saved)
    }

    async fn upsert_rating(&self, rating: NewRating) -> AppResult<RatingUpsert> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;

        let existing = inner
            .ratings
            .iter_mut()
            .find(|r| r.user_id == rating.user_id && r.content_id == rating.content_id);

        let (saved, previous_score) = match existing {
            Some(row) => {
                let previous = row.score;
                row.score = rating.score;
                row.timestamp = rating.timestamp;
                (row.clone(), Some(previous))
            }
            None => {
                inner.next_rating_id += 1;
                let row = Rating {
                    id: inner.next_rating_id,
                    user_id: rating.user_id,
                    content_id: rating.content_id,
                    score: rating.score,
                    timestamp: rating.timestamp,
                };
                inner.ratings.push(row.clone());
                (row, None)
            }
        };

        let user_average = average(
            inner
                .ratings
                .iter()
                .filter(|r| r.user_id == rating.user_id)
                .map(|r| r.score),
        )
        .unwrap_or(saved.score);

        Ok(RatingUpsert {
            rating: saved,
            previous_score,
            user_average,
        })
    }

    async fn watch_history(&self, user_id: i64) -> AppResult<Vec<WatchEvent>> {
        let inner = self.inner.lock().await;
        let mut events: Vec<WatchEvent> = inner
            .watch_events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(events)
    }

    async fn ratings_for_user(&self, user_id: i64) -> AppResult<Vec<Rating>> {
        let inner = self.inner.lock().await;
        let mut ratings: Vec<Rating> = inner
            .ratings
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        ratings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(ratings)
    }

    async fn user_average_rating(&self, user_id: i64) -> AppResult<Option<f64>> {
        let inner = self.inner.lock().await;
        Ok(average(
            inner
                .ratings
                .iter()
                .filter(|r| r.user_id == user_id)
                .map(|r| r.score),
        ))
    }

    async fn content_average_rating(&self, content_id: i64) -> AppResult<Option<f64>> {
        let inner = self.inner.lock().await;
        Ok(average(
            inner
                .ratings
                .iter()
                .filter(|r| r.content_id == content_id)
                .map(|r| r.score),
        ))
    }
}

#[derive(Default)]
struct Preferences {
    rows: HashMap<i64, UserPreference>,
    processed: HashMap<Uuid, DateTime<Utc>>,
}

/// Preference store held in memory
#[derive(Default)]
pub struct InMemoryPreferenceStore {
    inner: Mutex<Preferences>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a row directly, bypassing the mutation path
    pub async fn insert(&self, preference: UserPreference) {
        self.inner
            .lock()
            .await
            .rows
            .insert(preference.user_id, preference);
    }
}

#[async_trait::async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn find(&self, user_id: i64) -> AppResult<Option<UserPreference>> {
        Ok(self.inner.lock().await.rows.get(&user_id).cloned())
    }

    async fn mutate(
        &self,
        user_id: i64,
        dedupe_key: Option<Uuid>,
        mutation: PreferenceMutation,
    ) -> AppResult<MutationOutcome> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        if let Some(event_id) = dedupe_key {
            if inner.processed.contains_key(&event_id) {
                return Ok(MutationOutcome::Duplicate);
            }
            inner.processed.insert(event_id, now);
        }

        let preference = inner
            .rows
            .entry(user_id)
            .or_insert_with(|| UserPreference::new(user_id, now));
        preference.apply(&mutation, now);

        Ok(MutationOutcome::Applied(preference.clone()))
    }

    async fn prune_processed_events(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.processed.len();
        inner.processed.retain(|_, processed_at| *processed_at >= older_than);
        Ok((before - inner.processed.len()) as u64)
    }
}
