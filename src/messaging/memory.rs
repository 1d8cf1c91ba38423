use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use super::{EventPublisher, MessageHandler};
use crate::{
    error::{AppError, AppResult},
    models::PreferenceEvent,
};

/// In-process stand-in for the preference stream
///
/// Published events queue up until [`InMemoryBus::deliver_to`] hands them to
/// a handler. Entries whose handler fails stay queued, mirroring a pending
/// stream entry.
#[derive(Default)]
pub struct InMemoryBus {
    queue: Mutex<Vec<PreferenceEvent>>,
    published: Mutex<Vec<PreferenceEvent>>,
    unavailable: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail as if the bus were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every event ever accepted, in publish order
    pub async fn published(&self) -> Vec<PreferenceEvent> {
        self.published.lock().await.clone()
    }

    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Delivers every queued event to `handler` as a JSON payload and
    /// returns how many were acknowledged
    pub async fn deliver_to(&self, handler: &dyn MessageHandler) -> usize {
        let batch: Vec<PreferenceEvent> = self.queue.lock().await.drain(..).collect();
        let mut retained = Vec::new();
        let mut acked = 0;

        for event in batch {
            let outcome = match serde_json::to_string(&event) {
                Ok(payload) => handler.handle(&payload).await,
                Err(e) => Err(AppError::MalformedMessage(e.to_string())),
            };
            match outcome {
                Ok(()) => acked += 1,
                Err(e) => {
                    tracing::warn!(error = %e, handler = handler.name(), "In-memory delivery failed");
                    retained.push(event);
                }
            }
        }

        self.queue.lock().await.extend(retained);
        acked
    }

    /// Redelivers the full publish history, as a bus would after a consumer
    /// restart with no acknowledgements
    pub async fn replay_to(&self, handler: &dyn MessageHandler) -> usize {
        let history = self.published().await;
        self.queue.lock().await.extend(history);
        self.deliver_to(handler).await
    }
}

#[async_trait::async_trait]
impl EventPublisher for InMemoryBus {
    async fn publish(&self, event: &PreferenceEvent) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Publish("Bus unavailable".to_string()));
        }

        self.published.lock().await.push(event.clone());
        self.queue.lock().await.push(event.clone());
        Ok(())
    }
}
