// db/cache.rs
use redis::{AsyncCommands, aio::ConnectionManager};
use std::sync::Arc;
use uuid::Uuid;
use serde::{Serialize, de::DeserializeOwned};

/// Cache TTL constants (in seconds)
pub const THREAD_VIEW_TTL: u64 = 600;      // 10 minutes

pub struct CacheHelper;

impl CacheHelper {
    pub fn thread_view_key(thread_id: Uuid) -> String {
        format!("negotiation:view:{}", thread_id)
    }

    /// Generic get from cache. Undecodable entries count as a miss.
    pub async fn get<T: DeserializeOwned>(
        redis: &Arc<ConnectionManager>,
        key: &str,
    ) -> Result<Option<T>, redis::RedisError> {
        let mut conn = ConnectionManager::clone(redis);
        let cached: Option<String> = conn.get(key).await?;

        match cached {
            Some(data) => match serde_json::from_str::<T>(&data) {
                Ok(value) => {
                    tracing::debug!("Cache HIT: {}", key);
                    Ok(Some(value))
                }
                Err(_) => {
                    tracing::warn!("Cache deserialization failed for: {}", key);
                    Ok(None)
                }
            },
            None => {
                tracing::debug!("Cache MISS: {}", key);
                Ok(None)
            }
        }
    }

    /// Generic set to cache with TTL
    pub async fn set<T: Serialize>(
        redis: &Arc<ConnectionManager>,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<(), redis::RedisError> {
        if let Ok(json) = serde_json::to_string(value) {
            let mut conn = ConnectionManager::clone(redis);
            let _: () = conn.set_ex(key, json, ttl_seconds as usize).await?;
            tracing::debug!("Cache SET: {} (TTL: {}s)", key, ttl_seconds);
        }
        Ok(())
    }

    pub async fn delete(
        redis: &Arc<ConnectionManager>,
        key: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = ConnectionManager::clone(redis);
        let _: () = conn.del(key).await?;
        tracing::debug!("Cache DELETE: {}", key);
        Ok(())
    }
}
