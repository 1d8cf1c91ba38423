use std::sync::Arc;

use chrono::Utc;
use futures::{stream, StreamExt};
use serde::Deserialize;
use tracing::instrument;

use super::{
    catalog::CatalogClient,
    strategy::{rank, select_strategy},
};
use crate::{
    db::{MutationOutcome, PreferenceStore},
    error::{AppError, AppResult},
    models::{
        is_valid_score, Content, GenreSet, PreferenceMutation, PreferenceUpdate,
        RecommendationResponse, UserPreference,
    },
};

/// Upper bound on concurrent catalog lookups while enriching one response
pub const ENRICH_CONCURRENCY: usize = 8;

/// Body of the out-of-band preference update
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceUpdateRequest {
    pub user_id: Option<i64>,
    #[serde(default)]
    pub preferred_genres: Option<String>,
    #[serde(default)]
    pub average_rating: Option<f64>,
    #[serde(default)]
    pub watch_count: Option<i64>,
}

impl PreferenceUpdateRequest {
    /// Checks field ranges and splits off the user id
    pub fn validate(self) -> AppResult<(i64, PreferenceUpdate)> {
        let user_id = match self.user_id {
            Some(id) if id > 0 => id,
            Some(id) => {
                return Err(AppError::InvalidInput(format!(
                    "userId must be positive, got {}",
                    id
                )))
            }
            None => return Err(AppError::InvalidInput("userId is required".to_string())),
        };

        if let Some(average) = self.average_rating {
            if !is_valid_score(average) {
                return Err(AppError::InvalidInput(format!(
                    "averageRating must be between 1 and 5, got {}",
                    average
                )));
            }
        }
        if let Some(count) = self.watch_count {
            if count < 0 {
                return Err(AppError::InvalidInput(format!(
                    "watchCount must be zero or positive, got {}",
                    count
                )));
            }
        }

        Ok((
            user_id,
            PreferenceUpdate {
                preferred_genres: self.preferred_genres.as_deref().map(GenreSet::parse),
                average_rating: self.average_rating,
                watch_count: self.watch_count,
            },
        ))
    }
}

/// Strategy Selector + Synthesizer, plus the preference read/update RPCs
pub struct RecommendationService {
    preferences: Arc<dyn PreferenceStore>,
    catalog: Arc<dyn CatalogClient>,
    default_limit: usize,
    max_limit: usize,
}

impl RecommendationService {
    pub fn new(
        preferences: Arc<dyn PreferenceStore>,
        catalog: Arc<dyn CatalogClient>,
        default_limit: usize,
        max_limit: usize,
    ) -> Self {
        Self {
            preferences,
            catalog,
            default_limit,
            max_limit: max_limit.max(default_limit),
        }
    }

    /// Absent or non-positive limits fall back to the default; large ones are clamped
    pub fn effective_limit(&self, requested: Option<i64>) -> usize {
        match requested {
            Some(limit) if limit > 0 => usize::try_from(limit)
                .unwrap_or(self.max_limit)
                .min(self.max_limit),
            _ => self.default_limit,
        }
    }

    #[instrument(skip(self))]
    pub async fn recommend(
        &self,
        user_id: i64,
        limit: Option<i64>,
    ) -> AppResult<RecommendationResponse> {
        validate_user_id(user_id)?;
        let limit = self.effective_limit(limit);

        let preference = self
            .preferences
            .find(user_id)
            .await?
            .unwrap_or_else(|| UserPreference::new(user_id, Utc::now()));
        let primary = select_strategy(preference.watch_count, preference.average_rating);

        let catalog = match self.catalog.list_all().await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(
                    user_id,
                    strategy = primary.name(),
                    kind = e.kind(),
                    error = %e,
                    "Catalog unavailable, returning empty recommendations"
                );
                return Ok(RecommendationResponse::new(user_id, primary.name(), Vec::new()));
            }
        };

        let (used, ids) = rank(primary, &preference, &catalog, limit);
        let items = self.enrich(&ids).await;

        tracing::info!(
            user_id,
            strategy = used.name(),
            ranked = ids.len(),
            returned = items.len(),
            "Generated recommendations"
        );

        Ok(RecommendationResponse::new(user_id, used.name(), items))
    }

    /// Fetches full metadata for every id, keeping order and dropping failures
    async fn enrich(&self, ids: &[i64]) -> Vec<Content> {
        let results: Vec<_> = stream::iter(ids.iter().copied())
            .map(|id| self.catalog.get_by_id(id))
            .buffered(ENRICH_CONCURRENCY)
            .collect()
            .await;
        results
            .into_iter()
            .zip(ids)
            .filter_map(|(result, id)| match result {
                Ok(content) => Some(content),
                Err(e) => {
                    tracing::warn!(content_id = id, error = %e, "Dropping recommendation that failed to load");
                    None
                }
            })
            .collect()
    }

    pub async fn get_preferences(&self, user_id: i64) -> AppResult<UserPreference> {
        validate_user_id(user_id)?;
        self.preferences
            .find(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No preferences for user {}", user_id)))
    }

    /// Overwrites the provided fields exactly as a consumed message would
    #[instrument(skip(self))]
    pub async fn update_preferences(
        &self,
        request: PreferenceUpdateRequest,
    ) -> AppResult<UserPreference> {
        let (user_id, update) = request.validate()?;

        match self
            .preferences
            .mutate(user_id, None, PreferenceMutation::Update(update))
            .await?
        {
            MutationOutcome::Applied(preference) => {
                tracing::info!(
                    user_id,
                    watch_count = preference.watch_count,
                    average_rating = ?preference.average_rating,
                    "Preference updated via RPC"
                );
                Ok(preference)
            }
            MutationOutcome::Duplicate => Err(AppError::Internal(
                "Update without dedupe key reported as duplicate".to_string(),
            )),
        }
    }
}

fn validate_user_id(user_id: i64) -> AppResult<()> {
    if user_id <= 0 {
        return Err(AppError::InvalidInput(format!(
            "userId must be positive, got {}",
            user_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::InMemoryPreferenceStore,
        models::ContentKind,
        services::catalog::{MockCatalogClient, StaticCatalog},
    };

    fn item(id: i64, genre: &str, view_count: i64, rating: f64) -> Content {
        Content {
            id,
            title: format!("Title {}", id),
            description: None,
            genre: Some(genre.to_string()),
            release_year: Some(2020),
            rating: Some(rating),
            view_count: Some(view_count),
            kind: ContentKind::Movie {
                duration: Some(100),
                director: None,
            },
        }
    }

    fn sample_catalog() -> Vec<Content> {
        vec![
            item(1, "Sci-Fi", 100, 4.5),
            item(2, "Drama", 300, 4.0),
            item(3, "Sci-Fi", 50, 4.9),
        ]
    }

    fn service_with(
        catalog: Arc<dyn CatalogClient>,
    ) -> (RecommendationService, Arc<InMemoryPreferenceStore>) {
        let store = Arc::new(InMemoryPreferenceStore::new());
        (RecommendationService::new(store.clone(), catalog, 10, 50), store)
    }

    fn ids(response: &RecommendationResponse) -> Vec<i64> {
        response.recommendations.iter().map(|c| c.id).collect()
    }

    #[tokio::test]
    async fn test_unknown_user_gets_trending() {
        let (service, _) = service_with(Arc::new(StaticCatalog::new(sample_catalog())));

        let response = service.recommend(7, Some(2)).await.unwrap();

        assert_eq!(response.strategy_used, "Trending");
        assert_eq!(ids(&response), vec![2, 1]);
        assert_eq!(response.total_recommendations, 2);
    }

    #[tokio::test]
    async fn test_rated_user_gets_rating_strategy() {
        let (service, store) = service_with(Arc::new(StaticCatalog::new(sample_catalog())));
        store
            .insert(UserPreference {
                user_id: 9,
                preferred_genres: GenreSet::parse("Sci-Fi"),
                average_rating: Some(4.6),
                watch_count: 5,
                last_updated: Utc::now(),
                rated_average: None,
            })
            .await;

        let response = service.recommend(9, None).await.unwrap();

        assert_eq!(response.strategy_used, "Rating-Based");
        assert_eq!(ids(&response), vec![3, 1]);
    }

    #[tokio::test]
    async fn test_failed_enrichment_drops_only_that_item() {
        let catalog = Arc::new(StaticCatalog::new(sample_catalog()));
        catalog.fail_lookup(1);
        let (service, _) = service_with(catalog);

        let response = service.recommend(7, Some(3)).await.unwrap();

        assert_eq!(response.strategy_used, "Trending");
        assert_eq!(ids(&response), vec![2, 3]);
        assert_eq!(response.total_recommendations, 2);
    }

    struct SlowCatalog {
        items: Vec<Content>,
        in_flight: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CatalogClient for SlowCatalog {
        async fn get_by_id(&self, content_id: i64) -> AppResult<Content> {
            use std::sync::atomic::Ordering;

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.items
                .iter()
                .find(|c| c.id == content_id)
                .cloned()
                .ok_or(AppError::ContentNotFound(content_id))
        }

        async fn list_all(&self) -> AppResult<Vec<Content>> {
            Ok(self.items.clone())
        }
    }

    #[tokio::test]
    async fn test_enrichment_bounds_concurrent_lookups() {
        let items: Vec<Content> = (1..=30)
            .map(|id| item(id, "Drama", 1000 - id, 4.0))
            .collect();
        let catalog = Arc::new(SlowCatalog {
            items,
            in_flight: Default::default(),
            peak: Default::default(),
        });
        let (service, _) = service_with(catalog.clone());

        let response = service.recommend(7, Some(30)).await.unwrap();

        assert_eq!(ids(&response), (1..=30).collect::<Vec<_>>());
        let peak = catalog.peak.load(std::sync::atomic::Ordering::SeqCst);
        assert!(peak >= 1);
        assert!(peak <= ENRICH_CONCURRENCY, "peak in-flight lookups was {}", peak);
    }

    #[tokio::test]
    async fn test_catalog_outage_degrades_to_empty_list() {
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_list_all()
            .times(1)
            .returning(|| Err(AppError::CatalogUnavailable("connect timeout".into())));
        catalog.expect_get_by_id().never();
        let (service, _) = service_with(Arc::new(catalog));

        let response = service.recommend(42, None).await.unwrap();

        assert_eq!(response.strategy_used, "Trending");
        assert!(response.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_limit_handling() {
        let (service, _) = service_with(Arc::new(StaticCatalog::new(vec![])));

        assert_eq!(service.effective_limit(None), 10);
        assert_eq!(service.effective_limit(Some(0)), 10);
        assert_eq!(service.effective_limit(Some(-3)), 10);
        assert_eq!(service.effective_limit(Some(25)), 25);
        assert_eq!(service.effective_limit(Some(10_000)), 50);
    }

    #[tokio::test]
    async fn test_update_overwrites_only_given_fields() {
        let (service, store) = service_with(Arc::new(StaticCatalog::new(vec![])));
        store
            .insert(UserPreference {
                user_id: 3,
                preferred_genres: GenreSet::parse("Drama"),
                average_rating: None,
                watch_count: 4,
                last_updated: Utc::now(),
                rated_average: None,
            })
            .await;

        let updated = service
            .update_preferences(PreferenceUpdateRequest {
                user_id: Some(3),
                average_rating: Some(3.9),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.watch_count, 4);
        assert_eq!(updated.average_rating, Some(3.9));
        assert_eq!(updated.preferred_genres.to_joined(), "Drama");
    }

    #[tokio::test]
    async fn test_update_validation() {
        let (service, _) = service_with(Arc::new(StaticCatalog::new(vec![])));

        let missing = service
            .update_preferences(PreferenceUpdateRequest::default())
            .await;
        assert!(matches!(missing, Err(AppError::InvalidInput(_))));

        let bad_average = service
            .update_preferences(PreferenceUpdateRequest {
                user_id: Some(1),
                average_rating: Some(9.0),
                ..Default::default()
            })
            .await;
        assert!(matches!(bad_average, Err(AppError::InvalidInput(_))));

        let negative_count = service
            .update_preferences(PreferenceUpdateRequest {
                user_id: Some(1),
                watch_count: Some(-1),
                ..Default::default()
            })
            .await;
        assert!(matches!(negative_count, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_missing_preferences_are_not_found() {
        let (service, _) = service_with(Arc::new(StaticCatalog::new(vec![])));
        let err = service.get_preferences(11).await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }
}
