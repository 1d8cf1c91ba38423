use std::time::Duration;

use redis::{aio::ConnectionManager, streams::StreamMaxlen, AsyncCommands, Client};
use tokio::sync::OnceCell;

use super::{EventPublisher, PAYLOAD_FIELD, PREFERENCE_UPDATES_STREAM};
use crate::{
    error::{AppError, AppResult},
    models::PreferenceEvent,
};

/// Appends preference events to the `user.preference.updates` stream
///
/// The connection is established on first use, so the process can start
/// while Redis is still coming up.
pub struct RedisStreamPublisher {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    max_len: usize,
    timeout: Duration,
}

impl RedisStreamPublisher {
    pub fn new(client: Client, max_len: usize, timeout: Duration) -> Self {
        Self {
            client,
            conn: OnceCell::new(),
            max_len,
            timeout,
        }
    }

    async fn connection(&self) -> AppResult<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(conn.clone())
    }

    async fn append(&self, payload: String) -> AppResult<String> {
        let mut conn = self.connection().await?;
        let id: String = conn
            .xadd_maxlen(
                PREFERENCE_UPDATES_STREAM,
                StreamMaxlen::Approx(self.max_len),
                "*",
                &[(PAYLOAD_FIELD, payload)],
            )
            .await?;
        Ok(id)
    }
}

#[async_trait::async_trait]
impl EventPublisher for RedisStreamPublisher {
    async fn publish(&self, event: &PreferenceEvent) -> AppResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| AppError::Publish(format!("Failed to encode event: {}", e)))?;

        let entry_id = tokio::time::timeout(self.timeout, self.append(payload))
            .await
            .map_err(|_| {
                AppError::Publish(format!(
                    "Bus did not accept the event within {}ms",
                    self.timeout.as_millis()
                ))
            })??;

        tracing::debug!(
            user_id = event.user_id,
            event_type = ?event.event_type,
            entry_id = %entry_id,
            stream = PREFERENCE_UPDATES_STREAM,
            "Published preference event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_publish_appends_entry() {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let client = Client::open(url).unwrap();
        let publisher = RedisStreamPublisher::new(client, 1_000, Duration::from_secs(3));

        let event = PreferenceEvent::watch(1, 2, Some("Drama".into()));
        publisher.publish(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_bus_is_publish_error() {
        let client = Client::open("redis://127.0.0.1:1").unwrap();
        let publisher = RedisStreamPublisher::new(client, 1_000, Duration::from_millis(500));

        let result = publisher
            .publish(&PreferenceEvent::watch(1, 2, None))
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), "PUBLISH_FAILED");
    }
}
