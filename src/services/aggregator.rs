use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    db::{MutationOutcome, PreferenceStore},
    error::{AppError, AppResult},
    messaging::MessageHandler,
    models::{
        ContentLifecycleEvent, PreferenceEvent, PreferenceEventType, PreferenceMutation,
        UserLifecycleEvent,
    },
};

fn decode<T: DeserializeOwned>(payload: &str) -> AppResult<T> {
    serde_json::from_str(payload).map_err(|e| AppError::MalformedMessage(e.to_string()))
}

/// Preference Aggregator: folds preference events into the per-user record
pub struct PreferenceAggregator {
    store: Arc<dyn PreferenceStore>,
}

impl PreferenceAggregator {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// Applies one event atomically. A redelivered event id is a no-op.
    pub async fn apply(&self, event: PreferenceEvent) -> AppResult<MutationOutcome> {
        if event.user_id <= 0 {
            return Err(AppError::MalformedMessage(format!(
                "userId must be positive, got {}",
                event.user_id
            )));
        }

        let user_id = event.user_id;
        let event_id = event.event_id;
        let event_type = event.event_type;
        let outcome = self
            .store
            .mutate(user_id, event_id, PreferenceMutation::Event(event))
            .await?;

        match &outcome {
            MutationOutcome::Applied(preference) => tracing::info!(
                user_id,
                event_type = ?event_type,
                watch_count = preference.watch_count,
                average_rating = ?preference.average_rating,
                preferred_genres = %preference.preferred_genres.to_joined(),
                "Updated user preference"
            ),
            MutationOutcome::Duplicate => tracing::debug!(
                user_id,
                event_id = ?event_id,
                "Skipping already processed preference event"
            ),
        }

        Ok(outcome)
    }

    /// Forgets dedupe keys recorded more than `retention` ago
    pub async fn prune_processed(&self, retention: Duration) -> AppResult<u64> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| AppError::Internal(format!("Invalid dedupe retention: {}", e)))?;
        let pruned = self
            .store
            .prune_processed_events(Utc::now() - retention)
            .await?;

        if pruned > 0 {
            tracing::info!(pruned, "Pruned processed preference event ids");
        }
        Ok(pruned)
    }

    /// Runs [`Self::prune_processed`] every `interval` until `shutdown` flips
    pub fn spawn_retention_sweep(
        self: Arc<Self>,
        retention: Duration,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while !*shutdown.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.prune_processed(retention).await {
                            tracing::warn!(error = %e, kind = e.kind(), "Dedupe retention sweep failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }

            tracing::info!("Dedupe retention sweep stopped");
        })
    }
}

#[async_trait::async_trait]
impl MessageHandler for PreferenceAggregator {
    fn name(&self) -> &'static str {
        "preference-aggregator"
    }

    async fn handle(&self, payload: &str) -> AppResult<()> {
        let event: PreferenceEvent = decode(payload)?;

        if event.event_type == PreferenceEventType::Unknown {
            tracing::debug!(user_id = event.user_id, "Ignoring unknown preference event type");
            return Ok(());
        }

        self.apply(event).await.map(|_| ())
    }
}

/// Logs `user.events`; never touches preference rows
pub struct UserEventsLogger;

#[async_trait::async_trait]
impl MessageHandler for UserEventsLogger {
    fn name(&self) -> &'static str {
        "user-events-logger"
    }

    async fn handle(&self, payload: &str) -> AppResult<()> {
        let event: UserLifecycleEvent = decode(payload)?;

        match event.event_type.as_str() {
            "USER_CREATED" => tracing::info!(
                user_id = event.user_id,
                username = ?event.username,
                "User created"
            ),
            "SUBSCRIPTION_UPDATED" => tracing::info!(
                user_id = event.user_id,
                tier = ?event.tier,
                "User subscription updated"
            ),
            other => tracing::debug!(user_id = event.user_id, event_type = other, "Ignoring user event"),
        }
        Ok(())
    }
}

/// Logs `content.events`; never touches preference rows
pub struct ContentEventsLogger;

#[async_trait::async_trait]
impl MessageHandler for ContentEventsLogger {
    fn name(&self) -> &'static str {
        "content-events-logger"
    }

    async fn handle(&self, payload: &str) -> AppResult<()> {
        let event: ContentLifecycleEvent = decode(payload)?;

        match event.event_type.as_str() {
            "CONTENT_CREATED" | "CONTENT_UPDATED" | "CONTENT_DELETED" => tracing::info!(
                content_id = event.content_id,
                event_type = %event.event_type,
                title = ?event.title,
                genre = ?event.genre,
                "Content lifecycle event"
            ),
            other => tracing::debug!(
                content_id = event.content_id,
                event_type = other,
                "Ignoring content event"
            ),
        }
        Ok(())
    }
}
