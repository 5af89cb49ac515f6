// service/order_consumer.rs
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::NegotiationStore,
    models::negotiationmodel::OrderRef,
    service::error::ServiceError,
};

/// Downstream that turns an agreed price into a payable order or job.
///
/// Implementations must be idempotent by `thread_id`: calling twice for the
/// same thread returns the order created by the first call.
#[async_trait]
pub trait SettlementConsumer: Send + Sync {
    async fn create_from_negotiation(
        &self,
        thread_id: Uuid,
        agreed_price: i64,
        payload: &serde_json::Value,
    ) -> Result<OrderRef, ServiceError>;
}

/// Writes the order into the local `negotiated_orders` table.
pub struct StoreOrderConsumer {
    store: Arc<dyn NegotiationStore>,
}

impl StoreOrderConsumer {
    pub fn new(store: Arc<dyn NegotiationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SettlementConsumer for StoreOrderConsumer {
    async fn create_from_negotiation(
        &self,
        thread_id: Uuid,
        agreed_price: i64,
        payload: &serde_json::Value,
    ) -> Result<OrderRef, ServiceError> {
        let order = self
            .store
            .create_negotiated_order(thread_id, agreed_price, payload.clone())
            .await
            .map_err(|e| ServiceError::Settlement {
                thread_id,
                reason: e.to_string(),
            })?;

        if order.agreed_price != agreed_price {
            return Err(ServiceError::Settlement {
                thread_id,
                reason: format!(
                    "existing order {} carries {}, not the agreed {}",
                    order.order_number, order.agreed_price, agreed_price
                ),
            });
        }

        Ok(OrderRef {
            id: order.id,
            order_number: order.order_number,
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    thread_id: Uuid,
    agreed_price: i64,
    payload: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: Uuid,
    order_number: String,
    agreed_price: i64,
}

/// Hands the agreement to a separate order service over HTTP. The thread id
/// doubles as the idempotency key.
pub struct HttpOrderConsumer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOrderConsumer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SettlementConsumer for HttpOrderConsumer {
    async fn create_from_negotiation(
        &self,
        thread_id: Uuid,
        agreed_price: i64,
        payload: &serde_json::Value,
    ) -> Result<OrderRef, ServiceError> {
        let response = self
            .client
            .post(format!("{}/orders/from-negotiation", self.base_url))
            .header("Idempotency-Key", thread_id.to_string())
            .header("Content-Type", "application/json")
            .json(&CreateOrderRequest {
                thread_id,
                agreed_price,
                payload,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Settlement {
                thread_id,
                reason: format!("order service returned {}: {}", status, body),
            });
        }

        let order: CreateOrderResponse = response.json().await?;
        if order.agreed_price != agreed_price {
            return Err(ServiceError::Settlement {
                thread_id,
                reason: format!(
                    "order service priced order {} at {}, not the agreed {}",
                    order.order_number, order.agreed_price, agreed_price
                ),
            });
        }

        Ok(OrderRef {
            id: order.id,
            order_number: order.order_number,
        })
    }
}
