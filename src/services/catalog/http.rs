use std::time::Duration;

use reqwest::{Client as HttpClient, StatusCode};
use tracing::instrument;

use super::CatalogClient;
use crate::{
    error::{AppError, AppResult},
    models::Content,
};

/// Catalog client over the content service's REST API
#[derive(Clone)]
pub struct HttpCatalogClient {
    http_client: HttpClient,
    base_url: String,
}

impl HttpCatalogClient {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> AppResult<Self> {
        let http_client = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build catalog client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn unavailable(context: &str, e: reqwest::Error) -> AppError {
        let reason = if e.is_timeout() {
            format!("{} timed out", context)
        } else {
            format!("{}: {}", context, e)
        };
        AppError::CatalogUnavailable(reason)
    }
}

#[async_trait::async_trait]
impl CatalogClient for HttpCatalogClient {
    #[instrument(skip(self))]
    async fn get_by_id(&self, content_id: i64) -> AppResult<Content> {
        let url = format!("{}/api/content/{}", self.base_url, content_id);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::unavailable("Catalog lookup", e))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(AppError::ContentNotFound(content_id)),
            status if !status.is_success() => {
                return Err(AppError::CatalogUnavailable(format!(
                    "Catalog returned status {} for content {}",
                    status, content_id
                )));
            }
            _ => {}
        }

        response
            .json::<Content>()
            .await
            .map_err(|e| Self::unavailable("Catalog response decoding", e))
    }

    #[instrument(skip(self))]
    async fn list_all(&self) -> AppResult<Vec<Content>> {
        let url = format!("{}/api/content", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::unavailable("Catalog listing", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::CatalogUnavailable(format!(
                "Catalog returned status {}: {}",
                status, body
            )));
        }

        let items: Vec<Content> = response
            .json()
            .await
            .map_err(|e| Self::unavailable("Catalog response decoding", e))?;

        tracing::debug!(count = items.len(), "Fetched catalog listing");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = HttpCatalogClient::new(
            "http://catalog:8082/",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.base_url, "http://catalog:8082");
    }

    #[tokio::test]
    async fn test_unreachable_catalog_is_unavailable() {
        let client = HttpCatalogClient::new(
            "http://127.0.0.1:1",
            Duration::from_millis(200),
            Duration::from_millis(500),
        )
        .unwrap();

        let err = client.get_by_id(1).await.unwrap_err();
        assert!(matches!(err, AppError::CatalogUnavailable(_)));

        let err = client.list_all().await.unwrap_err();
        assert_eq!(err.kind(), "CATALOG_UNAVAILABLE");
    }
}
