//! Durable event bus on Redis Streams.
//!
//! Every message is a stream entry with a single `payload` field holding the
//! JSON body. Consumers read through a consumer group so an entry that was
//! not acknowledged is redelivered to the group.

pub mod consumer;
pub mod memory;
pub mod publisher;

pub use consumer::{ConsumerSettings, Disposition, StreamConsumer};
pub use memory::InMemoryBus;
pub use publisher::RedisStreamPublisher;

use crate::{error::AppResult, models::PreferenceEvent};

/// Preference updates produced by the video role
pub const PREFERENCE_UPDATES_STREAM: &str = "user.preference.updates";
/// User lifecycle events produced by the user service
pub const USER_EVENTS_STREAM: &str = "user.events";
/// Content lifecycle events produced by the content service
pub const CONTENT_EVENTS_STREAM: &str = "content.events";

/// Field of a stream entry holding the JSON body
pub const PAYLOAD_FIELD: &str = "payload";

/// Dead-letter stream paired with `stream`
pub fn dead_letter_stream(stream: &str) -> String {
    format!("{}.dlq", stream)
}

/// Publishes preference events after their interaction was committed
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    /// Returns once the bus has accepted the event
    async fn publish(&self, event: &PreferenceEvent) -> AppResult<()>;
}

/// Processes one delivered message body
///
/// Returning `Ok` acknowledges the message. An error leaves it pending for
/// redelivery unless [`crate::error::AppError::is_poison`] holds, in which
/// case it is dead-lettered straight away.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, payload: &str) -> AppResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_stream_name() {
        assert_eq!(
            dead_letter_stream(PREFERENCE_UPDATES_STREAM),
            "user.preference.updates.dlq"
        );
    }
}
