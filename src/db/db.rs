// db/db.rs
use sqlx::{Pool, Postgres};
use redis::aio::ConnectionManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct DBClient {
    pub pool: Pool<Postgres>,
    pub redis_client: Option<Arc<ConnectionManager>>,
}

impl std::fmt::Debug for DBClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DBClient")
            .field("pool", &"Pool<Postgres>")
            .field("redis_client", &self.redis_client.is_some())
            .finish()
    }
}

impl DBClient {
    /// PostgreSQL only, no view cache.
    pub fn new(pool: Pool<Postgres>) -> Self {
        DBClient {
            pool,
            redis_client: None,
        }
    }

    /// PostgreSQL plus redis. A redis failure is logged and the client
    /// falls back to running without a cache.
    pub async fn with_redis(pool: Pool<Postgres>, redis_url: &str) -> Self {
        match redis::Client::open(redis_url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => {
                    tracing::info!("Redis connection established, negotiation view cache enabled");
                    DBClient {
                        pool,
                        redis_client: Some(Arc::new(conn)),
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to connect to Redis: {}. Continuing without cache.", e);
                    DBClient::new(pool)
                }
            },
            Err(e) => {
                tracing::warn!("Failed to create Redis client: {}. Continuing without cache.", e);
                DBClient::new(pool)
            }
        }
    }

    pub fn cache_status(&self) -> &str {
        if self.redis_client.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    }
}
