use std::sync::Arc;
use std::time::Duration;

use redis::{
    aio::MultiplexedConnection,
    streams::{
        StreamClaimReply, StreamId, StreamMaxlen, StreamPendingCountReply, StreamReadOptions,
        StreamReadReply,
    },
    AsyncCommands, Client,
};
use tokio::sync::watch;
use tracing::Instrument;

use super::{dead_letter_stream, MessageHandler, PAYLOAD_FIELD};
use crate::{
    config::Config,
    error::{AppError, AppResult},
};

/// What to do with an entry once its handler returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed; acknowledge it
    Ack,
    /// Leave it pending so it is redelivered after the reclaim idle time
    Retry,
    /// Copy it to the dead-letter stream and acknowledge it
    DeadLetter,
}

/// Decides the fate of an entry after its `deliveries`-th delivery
pub fn disposition(result: &AppResult<()>, deliveries: usize, max_attempts: usize) -> Disposition {
    match result {
        Ok(()) => Disposition::Ack,
        Err(e) if e.is_poison() => Disposition::DeadLetter,
        Err(_) if deliveries >= max_attempts => Disposition::DeadLetter,
        Err(_) => Disposition::Retry,
    }
}

/// Whether a pending entry has been idle long enough to be taken over
pub fn should_reclaim(idle_ms: usize, reclaim_idle_ms: usize) -> bool {
    idle_ms >= reclaim_idle_ms
}

/// Extracts the JSON body of an entry
pub fn payload_of(entry: &StreamId) -> AppResult<String> {
    entry.get::<String>(PAYLOAD_FIELD).ok_or_else(|| {
        AppError::MalformedMessage(format!("Entry {} has no {} field", entry.id, PAYLOAD_FIELD))
    })
}

/// Tuning for a [`StreamConsumer`]
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub group: String,
    pub consumer: String,
    pub batch_size: usize,
    pub block_ms: usize,
    pub reclaim_idle_ms: usize,
    pub max_attempts: usize,
    pub dead_letter_max_len: usize,
}

impl ConsumerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            group: config.consumer_group(),
            consumer: config.consumer_name(),
            batch_size: config.consumer_batch_size,
            block_ms: config.consumer_block_ms,
            reclaim_idle_ms: config.consumer_reclaim_idle_ms,
            max_attempts: config.consumer_max_attempts,
            dead_letter_max_len: config.stream_max_len,
        }
    }
}

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Consumer-group reader for one stream, feeding entries to a handler
pub struct StreamConsumer {
    client: Client,
    stream: String,
    settings: ConsumerSettings,
    handler: Arc<dyn MessageHandler>,
}

impl StreamConsumer {
    pub fn new(
        client: Client,
        stream: impl Into<String>,
        settings: ConsumerSettings,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            client,
            stream: stream.into(),
            settings,
            handler,
        }
    }

    /// Spawns the consumer loop on the runtime
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Reads until `shutdown` flips to true. Connection failures are logged
    /// and retried; they never end the loop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            stream = %self.stream,
            group = %self.settings.group,
            consumer = %self.settings.consumer,
            handler = self.handler.name(),
            "Stream consumer started"
        );

        while !*shutdown.borrow() {
            let mut conn = match self.connect().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!(stream = %self.stream, error = %e, "Consumer failed to connect to bus");
                    if wait_or_shutdown(&mut shutdown, RECONNECT_DELAY).await {
                        break;
                    }
                    continue;
                }
            };

            if let Err(e) = self.consume(&mut conn, &mut shutdown).await {
                tracing::error!(stream = %self.stream, error = %e, "Consumer lost its bus connection");
                if wait_or_shutdown(&mut shutdown, RECONNECT_DELAY).await {
                    break;
                }
            }
        }

        tracing::info!(stream = %self.stream, "Stream consumer stopped");
    }

    async fn connect(&self) -> AppResult<MultiplexedConnection> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        self.ensure_group(&mut conn).await?;
        Ok(conn)
    }

    async fn ensure_group(&self, conn: &mut MultiplexedConnection) -> AppResult<()> {
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream, &self.settings.group, "0")
            .await;

        match created {
            Ok(()) => {
                tracing::info!(stream = %self.stream, group = %self.settings.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Polls until shutdown; returns only on a bus error
    async fn consume(
        &self,
        conn: &mut MultiplexedConnection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> AppResult<()> {
        let keys = [&self.stream];
        let ids = [">"];

        while !*shutdown.borrow() {
            self.reclaim_idle(conn).await?;

            let options = StreamReadOptions::default()
                .group(&self.settings.group, &self.settings.consumer)
                .count(self.settings.batch_size)
                .block(self.settings.block_ms);

            let reply: Option<StreamReadReply> = tokio::select! {
                reply = conn.xread_options(&keys, &ids, &options) => reply?,
                _ = shutdown.changed() => break,
            };

            let entries = reply
                .into_iter()
                .flat_map(|r| r.keys)
                .flat_map(|k| k.ids);

            for entry in entries {
                self.process(conn, &entry, 1).await?;
            }
        }

        Ok(())
    }

    /// Takes over entries another delivery left pending for too long
    async fn reclaim_idle(&self, conn: &mut MultiplexedConnection) -> AppResult<()> {
        let pending: StreamPendingCountReply = conn
            .xpending_count(
                &self.stream,
                &self.settings.group,
                "-",
                "+",
                self.settings.batch_size,
            )
            .await?;

        for info in pending.ids {
            if !should_reclaim(info.last_delivered_ms, self.settings.reclaim_idle_ms) {
                continue;
            }

            let claimed: StreamClaimReply = conn
                .xclaim(
                    &self.stream,
                    &self.settings.group,
                    &self.settings.consumer,
                    self.settings.reclaim_idle_ms,
                    &[&info.id],
                )
                .await?;

            for entry in claimed.ids {
                let deliveries = info.times_delivered + 1;
                if info.times_delivered >= self.settings.max_attempts {
                    let reason = format!("Exhausted {} deliveries", info.times_delivered);
                    self.dead_letter(conn, &entry, &reason, info.times_delivered)
                        .await?;
                    continue;
                }
                self.process(conn, &entry, deliveries).await?;
            }
        }

        Ok(())
    }

    /// Runs the handler on one entry and settles it. Handler failures are
    /// absorbed here; only bus errors propagate.
    async fn process(
        &self,
        conn: &mut MultiplexedConnection,
        entry: &StreamId,
        deliveries: usize,
    ) -> AppResult<()> {
        let span = tracing::info_span!(
            "consume",
            stream = %self.stream,
            entry_id = %entry.id,
            handler = self.handler.name(),
            deliveries
        );

        async {
            let result = match payload_of(entry) {
                Ok(payload) => self.handler.handle(&payload).await,
                Err(e) => Err(e),
            };

            match disposition(&result, deliveries, self.settings.max_attempts) {
                Disposition::Ack => self.ack(conn, &entry.id).await,
                Disposition::Retry => {
                    if let Err(e) = &result {
                        tracing::warn!(
                            error = %e,
                            kind = e.kind(),
                            "Message processing failed, leaving entry pending for redelivery"
                        );
                    }
                    Ok(())
                }
                Disposition::DeadLetter => {
                    let reason = match &result {
                        Err(e) => e.to_string(),
                        Ok(()) => String::new(),
                    };
                    tracing::error!(
                        reason = %reason,
                        kind = "CONSUMER_PROCESSING_FAILED",
                        "Dead-lettering message"
                    );
                    self.dead_letter(conn, entry, &reason, deliveries).await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn ack(&self, conn: &mut MultiplexedConnection, id: &str) -> AppResult<()> {
        let _: i64 = conn.xack(&self.stream, &self.settings.group, &[id]).await?;
        Ok(())
    }

    async fn dead_letter(
        &self,
        conn: &mut MultiplexedConnection,
        entry: &StreamId,
        reason: &str,
        deliveries: usize,
    ) -> AppResult<()> {
        let payload = entry.get::<String>(PAYLOAD_FIELD).unwrap_or_default();
        let fields = [
            (PAYLOAD_FIELD, payload),
            ("source_id", entry.id.clone()),
            ("error", reason.to_string()),
            ("deliveries", deliveries.to_string()),
        ];

        let _: String = conn
            .xadd_maxlen(
                dead_letter_stream(&self.stream),
                StreamMaxlen::Approx(self.settings.dead_letter_max_len),
                "*",
                &fields,
            )
            .await?;

        self.ack(conn, &entry.id).await
    }
}

/// Sleeps for `delay` unless shutdown is signalled first; returns true on shutdown
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::{streams::StreamRangeReply, Value};
    use std::collections::HashMap;

    fn entry_with(fields: Vec<(&str, &str)>) -> StreamId {
        let map: HashMap<String, Value> = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::BulkString(v.as_bytes().to_vec())))
            .collect();
        StreamId {
            id: "1-0".to_string(),
            map,
        }
    }

    #[test]
    fn test_success_is_acked() {
        assert_eq!(disposition(&Ok(()), 1, 5), Disposition::Ack);
        assert_eq!(disposition(&Ok(()), 5, 5), Disposition::Ack);
    }

    #[test]
    fn test_transient_failure_is_retried_until_exhausted() {
        let err = || Err(AppError::Database(sqlx::Error::PoolTimedOut));

        assert_eq!(disposition(&err(), 1, 5), Disposition::Retry);
        assert_eq!(disposition(&err(), 4, 5), Disposition::Retry);
        assert_eq!(disposition(&err(), 5, 5), Disposition::DeadLetter);
    }

    #[test]
    fn test_malformed_message_is_dead_lettered_at_once() {
        let result = Err(AppError::MalformedMessage("not json".into()));
        assert_eq!(disposition(&result, 1, 5), Disposition::DeadLetter);
    }

    #[test]
    fn test_reclaim_threshold_is_inclusive() {
        assert!(!should_reclaim(29_999, 30_000));
        assert!(should_reclaim(30_000, 30_000));
    }

    #[test]
    fn test_payload_extraction() {
        let entry = entry_with(vec![(PAYLOAD_FIELD, r#"{"userId":1}"#)]);
        assert_eq!(payload_of(&entry).unwrap(), r#"{"userId":1}"#);

        let missing = entry_with(vec![("body", "x")]);
        let err = payload_of(&missing).unwrap_err();
        assert!(err.is_poison());
    }

    #[test]
    fn test_settings_follow_config() {
        let config = Config::from_iter(vec![
            ("SERVICE_ROLE".to_string(), "recommendation".to_string()),
            ("CONSUMER_MAX_ATTEMPTS".to_string(), "3".to_string()),
        ])
        .unwrap();

        let settings = ConsumerSettings::from_config(&config);
        assert_eq!(settings.group, "recommendation-service");
        assert_eq!(settings.consumer, "recommendation-1");
        assert_eq!(settings.max_attempts, 3);
    }

    mod live {
        //! Round trips against a real Redis; run with `cargo test -- --ignored`.

        use super::*;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::sync::mpsc;

        fn redis_url() -> String {
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
        }

        fn settings() -> ConsumerSettings {
            ConsumerSettings {
                group: "test-group".to_string(),
                consumer: "test-consumer".to_string(),
                batch_size: 10,
                block_ms: 100,
                reclaim_idle_ms: 0,
                max_attempts: 3,
                dead_letter_max_len: 100,
            }
        }

        fn unique_stream() -> String {
            format!("test.consumer.{}", uuid::Uuid::new_v4())
        }

        struct FailingHandler {
            calls: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl MessageHandler for FailingHandler {
            fn name(&self) -> &'static str {
                "failing"
            }

            async fn handle(&self, _payload: &str) -> AppResult<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Database(sqlx::Error::PoolTimedOut))
            }
        }

        struct ForwardingHandler {
            tx: mpsc::UnboundedSender<String>,
        }

        #[async_trait::async_trait]
        impl MessageHandler for ForwardingHandler {
            fn name(&self) -> &'static str {
                "forwarding"
            }

            async fn handle(&self, payload: &str) -> AppResult<()> {
                let _ = self.tx.send(payload.to_string());
                Ok(())
            }
        }

        async fn read_one(
            consumer: &StreamConsumer,
            conn: &mut MultiplexedConnection,
        ) -> StreamId {
            let options = StreamReadOptions::default()
                .group(&consumer.settings.group, &consumer.settings.consumer)
                .count(1)
                .block(1_000);
            let reply: StreamReadReply = conn
                .xread_options(&[&consumer.stream], &[">"], &options)
                .await
                .unwrap();
            reply
                .keys
                .into_iter()
                .flat_map(|k| k.ids)
                .next()
                .expect("an entry should be delivered")
        }

        async fn pending(consumer: &StreamConsumer, conn: &mut MultiplexedConnection) -> usize {
            let reply: StreamPendingCountReply = conn
                .xpending_count(&consumer.stream, &consumer.settings.group, "-", "+", 10)
                .await
                .unwrap();
            reply.ids.len()
        }

        async fn cleanup(conn: &mut MultiplexedConnection, stream: &str) {
            let _: () = conn
                .del(&[stream.to_string(), dead_letter_stream(stream)])
                .await
                .unwrap();
        }

        #[tokio::test]
        #[ignore = "requires a running Redis"]
        async fn test_failing_entry_is_redelivered_then_dead_lettered() {
            let stream = unique_stream();
            let handler = Arc::new(FailingHandler {
                calls: AtomicUsize::new(0),
            });
            let consumer = StreamConsumer::new(
                Client::open(redis_url()).unwrap(),
                stream.clone(),
                settings(),
                handler.clone(),
            );
            let mut conn = consumer.connect().await.unwrap();
            let dlq = dead_letter_stream(&stream);

            let _: String = conn
                .xadd(&stream, "*", &[(PAYLOAD_FIELD, r#"{"userId":1}"#)])
                .await
                .unwrap();

            let entry = read_one(&consumer, &mut conn).await;
            consumer.process(&mut conn, &entry, 1).await.unwrap();
            assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
            assert_eq!(pending(&consumer, &mut conn).await, 1);
            let dlq_len: usize = conn.xlen(&dlq).await.unwrap();
            assert_eq!(dlq_len, 0);

            consumer.reclaim_idle(&mut conn).await.unwrap();
            assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
            assert_eq!(pending(&consumer, &mut conn).await, 1);

            consumer.reclaim_idle(&mut conn).await.unwrap();
            assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
            assert_eq!(pending(&consumer, &mut conn).await, 0);

            let dead: StreamRangeReply = conn.xrange_all(&dlq).await.unwrap();
            assert_eq!(dead.ids.len(), 1);
            let copied = &dead.ids[0];
            assert_eq!(
                copied.get::<String>(PAYLOAD_FIELD).as_deref(),
                Some(r#"{"userId":1}"#)
            );
            assert_eq!(copied.get::<String>("source_id"), Some(entry.id.clone()));
            assert_eq!(copied.get::<String>("deliveries").as_deref(), Some("3"));

            cleanup(&mut conn, &stream).await;
        }

        #[tokio::test]
        #[ignore = "requires a running Redis"]
        async fn test_entry_without_payload_is_dead_lettered_on_first_delivery() {
            let stream = unique_stream();
            let handler = Arc::new(FailingHandler {
                calls: AtomicUsize::new(0),
            });
            let consumer = StreamConsumer::new(
                Client::open(redis_url()).unwrap(),
                stream.clone(),
                settings(),
                handler.clone(),
            );
            let mut conn = consumer.connect().await.unwrap();

            let _: String = conn
                .xadd(&stream, "*", &[("body", "not the payload field")])
                .await
                .unwrap();

            let entry = read_one(&consumer, &mut conn).await;
            consumer.process(&mut conn, &entry, 1).await.unwrap();

            assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
            assert_eq!(pending(&consumer, &mut conn).await, 0);
            let dlq_len: usize = conn.xlen(dead_letter_stream(&stream)).await.unwrap();
            assert_eq!(dlq_len, 1);

            cleanup(&mut conn, &stream).await;
        }

        #[tokio::test]
        #[ignore = "requires a running Redis"]
        async fn test_run_loop_delivers_and_stops_on_shutdown() {
            let stream = unique_stream();
            let (tx, mut rx) = mpsc::unbounded_channel();
            let client = Client::open(redis_url()).unwrap();
            let consumer = StreamConsumer::new(
                client.clone(),
                stream.clone(),
                settings(),
                Arc::new(ForwardingHandler { tx }),
            );
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = consumer.spawn(shutdown_rx);

            let mut conn = client.get_multiplexed_async_connection().await.unwrap();
            let _: String = conn
                .xadd(&stream, "*", &[(PAYLOAD_FIELD, r#"{"userId":2}"#)])
                .await
                .unwrap();

            let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap();
            assert_eq!(received.as_deref(), Some(r#"{"userId":2}"#));

            shutdown_tx.send(true).unwrap();
            tokio_test::assert_ok!(tokio::time::timeout(Duration::from_secs(5), handle).await)
                .unwrap();

            let reply: StreamPendingCountReply = conn
                .xpending_count(&stream, "test-group", "-", "+", 10)
                .await
                .unwrap();
            assert!(reply.ids.is_empty());

            cleanup(&mut conn, &stream).await;
        }
    }
}
