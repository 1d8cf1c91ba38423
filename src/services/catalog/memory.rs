use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::CatalogClient;
use crate::{
    error::{AppError, AppResult},
    models::Content,
};

/// Fixed in-process catalog
///
/// Individual lookups can be made to fail and the whole catalog can be
/// marked unavailable.
#[derive(Default)]
pub struct StaticCatalog {
    items: Vec<Content>,
    failing_ids: RwLock<HashSet<i64>>,
    unavailable: AtomicBool,
}

impl StaticCatalog {
    pub fn new(items: Vec<Content>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes lookups of `content_id` fail with a transport error
    pub fn fail_lookup(&self, content_id: i64) {
        if let Ok(mut ids) = self.failing_ids.write() {
            ids.insert(content_id);
        }
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::CatalogUnavailable(
                "Catalog is unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn lookup_fails(&self, content_id: i64) -> bool {
        self.failing_ids
            .read()
            .map(|ids| ids.contains(&content_id))
            .unwrap_or(false)
    }
}

#[async_trait::async_trait]
impl CatalogClient for StaticCatalog {
    async fn get_by_id(&self, content_id: i64) -> AppResult<Content> {
        self.check_available()?;
        if self.lookup_fails(content_id) {
            return Err(AppError::CatalogUnavailable(format!(
                "Lookup of content {} failed",
                content_id
            )));
        }

        self.items
            .iter()
            .find(|c| c.id == content_id)
            .cloned()
            .ok_or(AppError::ContentNotFound(content_id))
    }

    async fn list_all(&self) -> AppResult<Vec<Content>> {
        self.check_available()?;
        Ok(self.items.clone())
    }
}
