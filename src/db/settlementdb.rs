// db/settlementdb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use sqlx::Error;
use super::db::DBClient;
use crate::models::negotiationmodel::*;

const SETTLEMENT_COLUMNS: &str = r#"
    id, thread_id, agreed_price, payload, status, order_id, order_number,
    attempts, last_error, next_attempt_at, created_at, settled_at
"#;

/// Order/job row owned by the fulfilment side once created.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct NegotiatedOrder {
    pub id: Uuid,
    pub order_number: String,
    pub thread_id: Uuid,
    pub agreed_price: i64,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait SettlementExt: Send + Sync {
    async fn get_settlement(
        &self,
        thread_id: Uuid,
    ) -> Result<Option<Settlement>, Error>;

    /// Creates the pending row for `thread_id` or returns the existing one.
    async fn create_pending_settlement(
        &self,
        thread_id: Uuid,
        agreed_price: i64,
        payload: serde_json::Value,
    ) -> Result<Settlement, Error>;

    async fn mark_settlement_settled(
        &self,
        thread_id: Uuid,
        order: &OrderRef,
    ) -> Result<Settlement, Error>;

    async fn record_settlement_failure(
        &self,
        thread_id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<Settlement, Error>;

    async fn get_due_settlements(
        &self,
        limit: i64,
    ) -> Result<Vec<Settlement>, Error>;

    /// Agreed threads that never got a settlement row, e.g. after a crash
    /// between the accept and the hand-off.
    async fn get_unsettled_agreements(
        &self,
        limit: i64,
    ) -> Result<Vec<NegotiationThread>, Error>;
}

#[async_trait]
pub trait OrderExt: Send + Sync {
    /// Idempotent by `thread_id`: a second call returns the first order.
    async fn create_negotiated_order(
        &self,
        thread_id: Uuid,
        agreed_price: i64,
        payload: serde_json::Value,
    ) -> Result<NegotiatedOrder, Error>;
}

#[async_trait]
impl SettlementExt for DBClient {
    async fn get_settlement(
        &self,
        thread_id: Uuid,
    ) -> Result<Option<Settlement>, Error> {
        sqlx::query_as::<_, Settlement>(&format!(
            "SELECT {} FROM settlements WHERE thread_id = $1",
            SETTLEMENT_COLUMNS
        ))
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn create_pending_settlement(
        &self,
        thread_id: Uuid,
        agreed_price: i64,
        payload: serde_json::Value,
    ) -> Result<Settlement, Error> {
        sqlx::query(
            r#"
            INSERT INTO settlements (thread_id, agreed_price, payload, status)
            VALUES ($1, $2, $3, 'pending'::settlement_status)
            ON CONFLICT (thread_id) DO NOTHING
            "#
        )
        .bind(thread_id)
        .bind(agreed_price)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        sqlx::query_as::<_, Settlement>(&format!(
            "SELECT {} FROM settlements WHERE thread_id = $1",
            SETTLEMENT_COLUMNS
        ))
        .bind(thread_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn mark_settlement_settled(
        &self,
        thread_id: Uuid,
        order: &OrderRef,
    ) -> Result<Settlement, Error> {
        sqlx::query_as::<_, Settlement>(&format!(
            r#"
            UPDATE settlements
            SET status = 'settled'::settlement_status,
                order_id = $2,
                order_number = $3,
                last_error = NULL,
                settled_at = NOW()
            WHERE thread_id = $1
            RETURNING {}
            "#,
            SETTLEMENT_COLUMNS
        ))
        .bind(thread_id)
        .bind(order.id)
        .bind(&order.order_number)
        .fetch_one(&self.pool)
        .await
    }

    async fn record_settlement_failure(
        &self,
        thread_id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<Settlement, Error> {
        sqlx::query_as::<_, Settlement>(&format!(
            r#"
            UPDATE settlements
            SET attempts = attempts + 1,
                last_error = $2,
                next_attempt_at = $3
            WHERE thread_id = $1 AND status = 'pending'::settlement_status
            RETURNING {}
            "#,
            SETTLEMENT_COLUMNS
        ))
        .bind(thread_id)
        .bind(error)
        .bind(next_attempt_at)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_due_settlements(
        &self,
        limit: i64,
    ) -> Result<Vec<Settlement>, Error> {
        sqlx::query_as::<_, Settlement>(&format!(
            r#"
            SELECT {}
            FROM settlements
            WHERE status = 'pending'::settlement_status
              AND next_attempt_at <= NOW()
            ORDER BY next_attempt_at ASC
            LIMIT $1
            "#,
            SETTLEMENT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_unsettled_agreements(
        &self,
        limit: i64,
    ) -> Result<Vec<NegotiationThread>, Error> {
        sqlx::query_as::<_, NegotiationThread>(
            r#"
            SELECT t.id, t.initiator_id, t.counterparty_id, t.context_kind, t.context_ref,
                   t.reference_price, t.payload, t.status, t.agreed_price, t.last_sequence,
                   t.created_at, t.updated_at
            FROM negotiation_threads t
            LEFT JOIN settlements s ON s.thread_id = t.id
            WHERE t.status = 'agreed'::negotiation_status
              AND s.id IS NULL
            ORDER BY t.updated_at ASC
            LIMIT $1
            "#
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}

#[async_trait]
impl OrderExt for DBClient {
    async fn create_negotiated_order(
        &self,
        thread_id: Uuid,
        agreed_price: i64,
        payload: serde_json::Value,
    ) -> Result<NegotiatedOrder, Error> {
        let order_number = format!("NEG-{}", Uuid::new_v4().to_string()[..8].to_uppercase());

        // The no-op update makes RETURNING yield the existing row on conflict.
        sqlx::query_as::<_, NegotiatedOrder>(
            r#"
            INSERT INTO negotiated_orders (order_number, thread_id, agreed_price, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (thread_id) DO UPDATE SET thread_id = EXCLUDED.thread_id
            RETURNING id, order_number, thread_id, agreed_price, payload, created_at
            "#
        )
        .bind(order_number)
        .bind(thread_id)
        .bind(agreed_price)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
    }
}
