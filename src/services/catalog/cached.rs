use std::sync::Arc;

use super::CatalogClient;
use crate::{
    cached,
    db::{Cache, CacheKey},
    error::AppResult,
    models::Content,
};

/// Read-through Redis cache in front of another catalog client
///
/// Only successful lookups are cached, so a missing item is re-checked on
/// every request.
pub struct CachedCatalogClient {
    inner: Arc<dyn CatalogClient>,
    cache: Cache,
    ttl: u64,
}

impl CachedCatalogClient {
    pub fn new(inner: Arc<dyn CatalogClient>, cache: Cache, ttl: u64) -> Self {
        Self { inner, cache, ttl }
    }
}

#[async_trait::async_trait]
impl CatalogClient for CachedCatalogClient {
    async fn get_by_id(&self, content_id: i64) -> AppResult<Content> {
        cached!(
            self.cache,
            CacheKey::Content(content_id),
            self.ttl,
            self.inner.get_by_id(content_id)
        )
    }

    async fn list_all(&self) -> AppResult<Vec<Content>> {
        cached!(self.cache, CacheKey::Catalog, self.ttl, self.inner.list_all())
    }
}
