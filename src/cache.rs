//! Cache-aside layer over an optional Redis backend.
//!
//! The cache is a pure read-path optimization: every helper swallows backend
//! failures and falls back to the canonical store fetch, so a missing or
//! unreachable Redis never fails a business operation.

use deadpool_redis::{Runtime, redis::AsyncCommands};
use serde::{Serialize, de::DeserializeOwned};

use crate::{app_error::AppError, config::RedisConfig};

/// `None` when caching is disabled or the pool could not be created.
pub type CachePool = Option<deadpool_redis::Pool>;

/// TTL for list caches, in seconds.
pub const LIST_TTL: u64 = 1800;
/// TTL for single-entity caches, in seconds.
pub const DETAIL_TTL: u64 = 3600;

pub fn connect(config: &RedisConfig) -> CachePool {
    if !config.enabled {
        tracing::info!("Cache disabled via configuration");
        return None;
    }
    match deadpool_redis::Config::from_url(&config.url).create_pool(Some(Runtime::Tokio1)) {
        Ok(pool) => Some(pool),
        Err(err) => {
            tracing::warn!("Failed to create cache pool, continuing without caching: {err}");
            None
        }
    }
}

/// Read-through fetch. Returns the cached value under `key` when present,
/// otherwise invokes `fetch` and stores its result with expiry `ttl`.
/// Errors from `fetch` propagate and are never cached; errors from the cache
/// backend are logged and treated as a miss.
pub async fn get_cached<T, F, Fut>(
    cache: &CachePool,
    key: &str,
    ttl: u64,
    fetch: F,
) -> Result<T, AppError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    if let Some(pool) = cache {
        match pool.get().await {
            Ok(mut conn) => {
                match conn.get::<_, Option<String>>(key).await {
                    Ok(Some(raw)) => match serde_json::from_str(&raw) {
                        Ok(value) => {
                            tracing::debug!("Cache HIT: {key}");
                            return Ok(value);
                        }
                        Err(err) => {
                            tracing::warn!("Discarding undecodable cache entry {key}: {err}")
                        }
                    },
                    Ok(None) => tracing::debug!("Cache MISS: {key}"),
                    Err(err) => tracing::warn!("Cache read failed for {key}: {err}"),
                }

                let value = fetch().await?;
                match serde_json::to_string(&value) {
                    Ok(raw) => {
                        if let Err(err) = conn.set_ex::<_, _, ()>(key, raw, ttl).await {
                            tracing::warn!("Cache write failed for {key}: {err}");
                        }
                    }
                    Err(err) => tracing::warn!("Failed to encode cache entry {key}: {err}"),
                }
                return Ok(value);
            }
            Err(err) => tracing::warn!("Cache backend unreachable, falling back to store: {err}"),
        }
    }

    fetch().await
}

/// Delete every key matching a glob pattern. A no-op when the backend is
/// absent or unreachable.
pub async fn invalidate_pattern(cache: &CachePool, pattern: &str) {
    let Some(pool) = cache else { return };

    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(err) => {
            tracing::warn!("Cache backend unreachable, skipping invalidation: {err}");
            return;
        }
    };

    let keys: Vec<String> = match conn.keys(pattern).await {
        Ok(keys) => keys,
        Err(err) => {
            tracing::warn!("Cache key scan failed for {pattern}: {err}");
            return;
        }
    };
    if keys.is_empty() {
        return;
    }

    match conn.del::<_, usize>(&keys).await {
        Ok(count) => tracing::debug!("Cache invalidated by pattern {pattern}: {count} keys"),
        Err(err) => tracing::warn!("Cache delete failed for {pattern}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unreachable_pool() -> CachePool {
        connect(&RedisConfig {
            // Nothing listens on this port; pool creation is lazy so the
            // failure only shows up on first use.
            url: "redis://127.0.0.1:1/".to_string(),
            enabled: true,
        })
    }

    #[tokio::test]
    async fn falls_back_to_fetch_without_backend() {
        let calls = AtomicUsize::new(0);
        let value: i32 = get_cached(&None, "k", 60, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn falls_back_to_fetch_with_unreachable_backend() {
        let cache = unreachable_pool();
        assert!(cache.is_some());
        let value: String = get_cached(&cache, "k", 60, || async { Ok("live".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "live");
    }

    #[tokio::test]
    async fn fetch_errors_propagate() {
        let result: Result<i32, _> = get_cached(&None, "k", 60, || async {
            Err(AppError::BadRequest("nope".into()))
        })
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn invalidation_is_a_noop_without_backend() {
        invalidate_pattern(&None, "products:*").await;
        invalidate_pattern(&unreachable_pool(), "products:*").await;
    }

    #[tokio::test]
    #[ignore = "requires a redis instance on 127.0.0.1:6379"]
    async fn second_read_is_served_from_cache() {
        let cache = connect(&RedisConfig {
            url: "redis://127.0.0.1:6379/".to_string(),
            enabled: true,
        });
        let key = format!("test:roundtrip:{}", uuid::Uuid::new_v4());
        let calls = AtomicUsize::new(0);

        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("stored".to_string())
        };
        let first: String = get_cached(&cache, &key, 60, fetch).await.unwrap();
        let second: String = get_cached(&cache, &key, 60, fetch).await.unwrap();
        assert_eq!(first, "stored");
        assert_eq!(second, "stored");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        invalidate_pattern(&cache, &key).await;
        let third: String = get_cached(&cache, &key, 60, fetch).await.unwrap();
        assert_eq!(third, "stored");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disabled_config_yields_no_pool() {
        let pool = connect(&RedisConfig {
            url: "redis://127.0.0.1:6379/".to_string(),
            enabled: false,
        });
        assert!(pool.is_none());
    }
}
