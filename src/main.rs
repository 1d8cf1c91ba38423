use std::sync::Arc;

use anyhow::Context;
use tokio::{signal, sync::watch, task::JoinHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamcast::{
    api::{create_recommendation_router, create_video_router, RecommendationState, VideoState},
    db::{self, Cache, CacheWriterHandle, PgInteractionStore, PgPreferenceStore},
    messaging::{
        ConsumerSettings, MessageHandler, RedisStreamPublisher, StreamConsumer,
        CONTENT_EVENTS_STREAM, PREFERENCE_UPDATES_STREAM, USER_EVENTS_STREAM,
    },
    services::{
        analytics_observer, recommendation_notifier, AnalyticsCounters, CachedCatalogClient,
        CatalogClient, ContentEventsLogger, EventFanout, HttpCatalogClient, InteractionRecorder,
        PreferenceAggregator, RecommendationService, UserEventsLogger,
    },
    Config, ServiceRole,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamcast=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        role = config.service_role.as_str(),
        address = %config.bind_address(),
        "Starting streamcast"
    );

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    if config.run_migrations {
        db::run_migrations(&pool, config.service_role).await?;
    }

    let redis_client = db::create_redis_client(&config.redis_url)?;
    let (catalog, cache_writer) = build_catalog(&config, &redis_client)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (app, consumers) = match config.service_role {
        ServiceRole::Video => {
            let analytics = Arc::new(AnalyticsCounters::new());
            let fanout = Arc::new(EventFanout::new());
            fanout.register(analytics_observer(Arc::clone(&analytics)));
            if config.remote_observer_enabled {
                fanout.register(recommendation_notifier(
                    &config.recommendation_url,
                    config.notify_timeout(),
                )?);
            }

            let publisher = Arc::new(RedisStreamPublisher::new(
                redis_client.clone(),
                config.stream_max_len,
                config.bus_timeout(),
            ));
            let recorder = Arc::new(InteractionRecorder::new(
                Arc::new(PgInteractionStore::new(pool.clone())),
                catalog,
                fanout,
                publisher,
            ));

            let consumers = vec![spawn_consumer(
                &config,
                &redis_client,
                CONTENT_EVENTS_STREAM,
                Arc::new(ContentEventsLogger),
                &shutdown_rx,
            )];

            (
                create_video_router(VideoState::new(recorder, analytics)),
                consumers,
            )
        }
        ServiceRole::Recommendation => {
            let preferences = Arc::new(PgPreferenceStore::new(pool.clone()));
            let service = Arc::new(RecommendationService::new(
                preferences.clone(),
                catalog,
                config.default_recommendation_limit,
                config.max_recommendation_limit,
            ));

            let aggregator = Arc::new(PreferenceAggregator::new(preferences));
            let consumers = vec![
                Arc::clone(&aggregator).spawn_retention_sweep(
                    config.dedupe_retention(),
                    config.dedupe_sweep_interval(),
                    shutdown_rx.clone(),
                ),
                spawn_consumer(
                    &config,
                    &redis_client,
                    PREFERENCE_UPDATES_STREAM,
                    aggregator,
                    &shutdown_rx,
                ),
                spawn_consumer(
                    &config,
                    &redis_client,
                    USER_EVENTS_STREAM,
                    Arc::new(UserEventsLogger),
                    &shutdown_rx,
                ),
                spawn_consumer(
                    &config,
                    &redis_client,
                    CONTENT_EVENTS_STREAM,
                    Arc::new(ContentEventsLogger),
                    &shutdown_rx,
                ),
            ];

            (
                create_recommendation_router(RecommendationState::new(service)),
                consumers,
            )
        }
    };

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .context("Failed to bind to address")?;
    tracing::info!(address = %config.bind_address(), "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    for consumer in consumers {
        if let Err(e) = consumer.await {
            tracing::error!(error = %e, "Consumer task ended abnormally");
        }
    }
    if let Some(handle) = cache_writer {
        handle.shutdown().await;
    }

    pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// HTTP catalog client, behind the Redis cache when a TTL is configured
fn build_catalog(
    config: &Config,
    redis_client: &redis::Client,
) -> anyhow::Result<(Arc<dyn CatalogClient>, Option<CacheWriterHandle>)> {
    let http: Arc<dyn CatalogClient> = Arc::new(HttpCatalogClient::new(
        config.catalog_url.clone(),
        config.catalog_connect_timeout(),
        config.catalog_read_timeout(),
    )?);

    if config.catalog_cache_ttl_secs == 0 {
        return Ok((http, None));
    }

    let (cache, handle) = Cache::new(redis_client.clone());
    tracing::info!(ttl_secs = config.catalog_cache_ttl_secs, "Catalog cache enabled");
    let cached = CachedCatalogClient::new(http, cache, config.catalog_cache_ttl_secs);
    Ok((Arc::new(cached), Some(handle)))
}

fn spawn_consumer(
    config: &Config,
    redis_client: &redis::Client,
    stream: &str,
    handler: Arc<dyn MessageHandler>,
    shutdown: &watch::Receiver<bool>,
) -> JoinHandle<()> {
    StreamConsumer::new(
        redis_client.clone(),
        stream,
        ConsumerSettings::from_config(config),
        handler,
    )
    .spawn(shutdown.clone())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
