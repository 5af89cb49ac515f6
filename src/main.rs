mod models;
mod service;
mod config;
mod dtos;
mod error;
mod db;
mod utils;
mod middleware;
mod handler;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE}, HeaderValue, Method};
use config::Config;
use crate::db::{db::DBClient, NegotiationStore};
use dotenv::dotenv;
use redis::aio::ConnectionManager;
use routes::create_router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::filter::LevelFilter;

use service::{
    background_jobs::start_settlement_retry_job,
    event_hub::EventHub,
    negotiation_service::NegotiationService,
    notification_service::NotificationService,
    order_consumer::{HttpOrderConsumer, SettlementConsumer, StoreOrderConsumer},
    settlement_service::SettlementService,
};

#[derive(Clone)]
pub struct AppState {
    pub env: Config,
    pub store: Arc<dyn NegotiationStore>,
    pub cache_status: &'static str,
    // Services
    pub negotiation_service: NegotiationService,
    pub settlement_service: SettlementService,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn NegotiationStore>,
        cache: Option<Arc<ConnectionManager>>,
    ) -> Self {
        let consumer: Arc<dyn SettlementConsumer> = match &config.order_service_url {
            Some(url) => {
                tracing::info!("Agreed negotiations are handed to the order service at {}", url);
                Arc::new(HttpOrderConsumer::new(url.clone()))
            }
            None => Arc::new(StoreOrderConsumer::new(store.clone())),
        };

        let notification_service = NotificationService::new(store.clone());
        let settlement_service = SettlementService::new(
            store.clone(),
            consumer,
            notification_service.clone(),
            Duration::from_secs(config.settlement_max_backoff_secs),
        );

        let cache_status = if cache.is_some() { "enabled" } else { "disabled" };
        let negotiation_service = NegotiationService::new(
            store.clone(),
            EventHub::new(),
            settlement_service.clone(),
            notification_service,
            cache,
            config.append_max_attempts,
        );

        Self {
            env: config,
            store,
            cache_status,
            negotiation_service,
            settlement_service,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .init();

    dotenv().ok();

    let config = Config::init();

    let pool = match PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => {
            tracing::info!("Connection to the database is successful");
            pool
        }
        Err(err) => {
            tracing::error!("Failed to connect to the database: {:?}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = sqlx::migrate!("./migrations").run(&pool).await {
        tracing::error!("Failed to run migrations: {:?}", err);
        std::process::exit(1);
    }

    let db_client = match &config.redis_url {
        Some(redis_url) => DBClient::with_redis(pool, redis_url).await,
        None => {
            tracing::info!("Redis not configured, running without view cache (set REDIS_URL to enable)");
            DBClient::new(pool)
        }
    };
    tracing::info!("Cache status: {}", db_client.cache_status());

    let allowed_origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST]);

    let cache = db_client.redis_client.clone();
    let app_state = Arc::new(AppState::new(config.clone(), Arc::new(db_client), cache));

    tokio::spawn(start_settlement_retry_job(app_state.clone()));

    let app = create_router(app_state).layer(cors);

    tracing::info!("Server is running on http://localhost:{}", config.port);

    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("Failed to bind port {}: {:?}", config.port, err);
            std::process::exit(1);
        }
    };

    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!("Server error: {:?}", err);
    }
}
