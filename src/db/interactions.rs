use sqlx::PgPool;

use crate::{
    error::{AppError, AppResult},
    models::{NewRating, NewWatchEvent, Rating, RatingUpsert, WatchEvent},
};

/// Durable storage for watch events and ratings
///
/// Each write runs in its own transaction and is committed before the
/// method returns, so callers may emit side effects once it succeeds.
#[async_trait::async_trait]
pub trait InteractionStore: Send + Sync {
    /// Appends a watch event
    async fn insert_watch_event(&self, event: NewWatchEvent) -> AppResult<WatchEvent>;

    /// Inserts or updates the rating for (user, content) and reports the
    /// previous score and the user's new average
    async fn upsert_rating(&self, rating: NewRating) -> AppResult<RatingUpsert>;

    /// Watch events for a user, newest first
    async fn watch_history(&self, user_id: i64) -> AppResult<Vec<WatchEvent>>;

    /// Ratings by a user, newest first
    async fn ratings_for_user(&self, user_id: i64) -> AppResult<Vec<Rating>>;

    async fn user_average_rating(&self, user_id: i64) -> AppResult<Option<f64>>;

    async fn content_average_rating(&self, content_id: i64) -> AppResult<Option<f64>>;
}

/// Postgres-backed interaction store
#[derive(Clone)]
pub struct PgInteractionStore {
    pool: PgPool,
}

impl PgInteractionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InteractionStore for PgInteractionStore {
    async fn insert_watch_event(&self, event: NewWatchEvent) -> AppResult<WatchEvent> {
        let mut tx = self.pool.begin().await?;

        let saved = sqlx::query_as::<_, WatchEvent>(
            r#"
            INSERT INTO watch_events (user_id, content_id, progress, completed, "timestamp")
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, content_id, progress, completed, "timestamp"
            "#,
        )
        .bind(event.user_id)
        .bind(event.content_id)
        .bind(event.progress)
        .bind(event.completed)
        .bind(event.timestamp)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(saved)
    }

    async fn upsert_rating(&self, rating: NewRating) -> AppResult<RatingUpsert> {
        let mut tx = self.pool.begin().await?;

        let previous_score = sqlx::query_scalar::<_, f64>(
            r#"
            SELECT score FROM ratings
            WHERE user_id = $1 AND content_id = $2
            FOR UPDATE
            "#,
        )
        .bind(rating.user_id)
        .bind(rating.content_id)
        .fetch_optional(&mut *tx)
        .await?;

        let saved = sqlx::query_as::<_, Rating>(
            r#"
            INSERT INTO ratings (user_id, content_id, score, "timestamp")
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, content_id)
            DO UPDATE SET score = EXCLUDED.score, "timestamp" = EXCLUDED."timestamp"
            RETURNING id, user_id, content_id, score, "timestamp"
            "#,
        )
        .bind(rating.user_id)
        .bind(rating.content_id)
        .bind(rating.score)
        .bind(rating.timestamp)
        .fetch_one(&mut *tx)
        .await?;

        let average = sqlx::query_scalar::<_, Option<f64>>(
            "SELECT AVG(score) FROM ratings WHERE user_id = $1",
        )
        .bind(rating.user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(RatingUpsert {
            user_average: average.unwrap_or(saved.score),
            rating: saved,
            previous_score,
        })
    }

    async fn watch_history(&self, user_id: i64) -> AppResult<Vec<WatchEvent>> {
        let events = sqlx::query_as::<_, WatchEvent>(
            r#"
            SELECT id, user_id, content_id, progress, completed, "timestamp"
            FROM watch_events
            WHERE user_id = $1
            ORDER BY "timestamp" DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::StoreRead)?;

        Ok(events)
    }

    async fn ratings_for_user(&self, user_id: i64) -> AppResult<Vec<Rating>> {
        let ratings = sqlx::query_as::<_, Rating>(
            r#"
            SELECT id, user_id, content_id, score, "timestamp"
            FROM ratings
            WHERE user_id = $1
            ORDER BY "timestamp" DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::StoreRead)?;

        Ok(ratings)
    }

    async fn user_average_rating(&self, user_id: i64) -> AppResult<Option<f64>> {
        let average = sqlx::query_scalar::<_, Option<f64>>(
            "SELECT AVG(score) FROM ratings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::StoreRead)?;

        Ok(average)
    }

    async fn content_average_rating(&self, content_id: i64) -> AppResult<Option<f64>> {
        let average = sqlx::query_scalar::<_, Option<f64>>(
            "SELECT AVG(score) FROM ratings WHERE content_id = $1",
        )
        .bind(content_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::StoreRead)?;

        Ok(average)
    }
}
