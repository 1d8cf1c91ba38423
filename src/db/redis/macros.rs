/// Read-through caching around an async computation.
///
/// Returns the cached value for `$key` when present. Otherwise awaits
/// `$block`, queues the result for a background cache write with `$ttl`
/// seconds to live, and returns it. A failing cache read is logged and
/// treated as a miss, so the computation still runs.
///
/// Expands to an `AppResult<_>`; use it as the tail of a function returning one.
///
/// # Example
/// ```rust,ignore
/// async fn get_by_id(&self, id: i64) -> AppResult<Content> {
///     cached!(self.cache, CacheKey::Content(id), self.ttl, self.inner.get_by_id(id))
/// }
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        let key = $key;
        match $cache.get_from_cache(&key).await {
            Ok(Some(cached)) => Ok(cached),
            other => {
                if let Err(e) = other {
                    tracing::warn!(key = %key, error = %e, "Cache read failed, bypassing cache");
                }
                let value = $block.await?;
                $cache.set_in_background(&key, &value, $ttl);
                Ok(value)
            }
        }
    }};
}
