//! Read access to the content catalog owned by the content service.
//!
//! The recorder uses it to check that content exists and to learn its genre;
//! the synthesizer uses it to list candidates and to enrich ranked ids.

use crate::{error::AppResult, models::Content};

pub mod cached;
pub mod http;
pub mod memory;

pub use cached::CachedCatalogClient;
pub use http::HttpCatalogClient;
pub use memory::StaticCatalog;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetches one item. Fails with `ContentNotFound` when the catalog has no
    /// such id and with `CatalogUnavailable` on transport errors.
    async fn get_by_id(&self, content_id: i64) -> AppResult<Content>;

    /// Lists the whole catalog
    async fn list_all(&self) -> AppResult<Vec<Content>>;
}
