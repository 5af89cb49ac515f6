// config.rs
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    // Settlement
    pub order_service_url: Option<String>,
    pub settlement_retry_interval_secs: u64,
    pub settlement_max_backoff_secs: u64,
    // Ledger append
    pub append_max_attempts: u32,
}

impl Config {
    pub fn init() -> Config {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let jwt_secret = std::env::var("JWT_SECRET_KEY").expect("JWT_SECRET_KEY must be set");

        let redis_url = std::env::var("REDIS_URL").ok().filter(|url| !url.is_empty());
        let order_service_url = std::env::var("ORDER_SERVICE_URL")
            .ok()
            .filter(|url| !url.is_empty());

        let port = env_or("PORT", 8000);
        let settlement_retry_interval_secs = env_or("SETTLEMENT_RETRY_INTERVAL_SECS", 30);
        let settlement_max_backoff_secs = env_or("SETTLEMENT_MAX_BACKOFF_SECS", 900);
        let append_max_attempts = env_or("APPEND_MAX_ATTEMPTS", 5);

        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173,http://localhost:8000".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Config {
            database_url,
            redis_url,
            jwt_secret,
            port,
            cors_origins,
            order_service_url,
            settlement_retry_interval_secs,
            settlement_max_backoff_secs,
            append_max_attempts,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            tracing::warn!("{} has an invalid value {:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Config {
        Config {
            database_url: "postgres://localhost/bargain".to_string(),
            redis_url: None,
            jwt_secret: "test-secret".to_string(),
            port: 8000,
            cors_origins: vec!["http://localhost:5173".to_string()],
            order_service_url: None,
            settlement_retry_interval_secs: 30,
            settlement_max_backoff_secs: 900,
            append_max_attempts: 5,
        }
    }
}
