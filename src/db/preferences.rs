use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{GenreSet, PreferenceMutation, UserPreference},
};

/// Outcome of an atomic preference mutation
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The mutation was applied and the row committed
    Applied(UserPreference),
    /// The dedupe key was already recorded; nothing changed
    Duplicate,
}

/// Storage for the per-user preference projection
///
/// The aggregator is the only writer. Both the bus consumer and the update
/// RPC go through [`PreferenceStore::mutate`], which applies the whole
/// mutation atomically or not at all.
#[async_trait::async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn find(&self, user_id: i64) -> AppResult<Option<UserPreference>>;

    /// Loads or lazily creates the row for `user_id`, applies `mutation`
    /// and persists it in a single transaction. When `dedupe_key` was seen
    /// before, returns [`MutationOutcome::Duplicate`] without touching the row.
    async fn mutate(
        &self,
        user_id: i64,
        dedupe_key: Option<Uuid>,
        mutation: PreferenceMutation,
    ) -> AppResult<MutationOutcome>;

    /// Forgets dedupe keys recorded before `older_than`; returns how many
    /// were removed. A message redelivered after its key is pruned is
    /// applied again.
    async fn prune_processed_events(&self, older_than: DateTime<Utc>) -> AppResult<u64>;
}

#[derive(sqlx::FromRow)]
struct PreferenceRow {
    user_id: i64,
    preferred_genres: String,
    average_rating: Option<f64>,
    watch_count: i64,
    last_updated: DateTime<Utc>,
    rated_average: Option<f64>,
}

impl From<PreferenceRow> for UserPreference {
    fn from(row: PreferenceRow) -> Self {
        Self {
            user_id: row.user_id,
            preferred_genres: GenreSet::parse(&row.preferred_genres),
            average_rating: row.average_rating,
            watch_count: row.watch_count,
            last_updated: row.last_updated,
            rated_average: row.rated_average,
        }
    }
}

/// Postgres-backed preference store
#[derive(Clone)]
pub struct PgPreferenceStore {
    pool: PgPool,
}

impl PgPreferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn find(&self, user_id: i64) -> AppResult<Option<UserPreference>> {
        let row = sqlx::query_as::<_, PreferenceRow>(
            r#"
            SELECT user_id, preferred_genres, average_rating, watch_count, last_updated, rated_average
            FROM user_preferences
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::StoreRead)?;

        Ok(row.map(UserPreference::from))
    }

    async fn mutate(
        &self,
        user_id: i64,
        dedupe_key: Option<Uuid>,
        mutation: PreferenceMutation,
    ) -> AppResult<MutationOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        if let Some(event_id) = dedupe_key {
            let recorded = sqlx::query(
                r#"
                INSERT INTO processed_events (event_id, user_id, processed_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (event_id) DO NOTHING
                "#,
            )
            .bind(event_id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if recorded == 0 {
                tx.rollback().await?;
                return Ok(MutationOutcome::Duplicate);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO user_preferences (user_id, preferred_genres, average_rating, watch_count, last_updated)
            VALUES ($1, '', NULL, 0, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, PreferenceRow>(
            r#"
            SELECT user_id, preferred_genres, average_rating, watch_count, last_updated, rated_average
            FROM user_preferences
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut preference = UserPreference::from(row);
        preference.apply(&mutation, now);

        sqlx::query(
            r#"
            UPDATE user_preferences
            SET preferred_genres = $2, average_rating = $3, watch_count = $4, last_updated = $5,
                rated_average = $6
            WHERE user_id = $1
            "#,
        )
        .bind(preference.user_id)
        .bind(preference.preferred_genres.to_joined())
        .bind(preference.average_rating)
        .bind(preference.watch_count)
        .bind(preference.last_updated)
        .bind(preference.rated_average)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(MutationOutcome::Applied(preference))
    }

    async fn prune_processed_events(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let pruned = sqlx::query("DELETE FROM processed_events WHERE processed_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(pruned)
    }
}
