// db/negotiationdb.rs
use async_trait::async_trait;
use uuid::Uuid;
use sqlx::Error;
use super::db::DBClient;
use crate::models::negotiationmodel::*;

const THREAD_COLUMNS: &str = r#"
    id, initiator_id, counterparty_id, context_kind, context_ref,
    reference_price, payload, status, agreed_price, last_sequence,
    created_at, updated_at
"#;

const EVENT_COLUMNS: &str = r#"
    id, thread_id, sequence, author_id, author_role, kind, amount, body, created_at
"#;

#[async_trait]
pub trait NegotiationExt: Send + Sync {
    async fn ping(&self) -> Result<(), Error>;

    async fn create_thread(
        &self,
        initiator_id: Uuid,
        counterparty_id: Uuid,
        context_kind: ContextKind,
        context_ref: Option<Uuid>,
        reference_price: i64,
        payload: serde_json::Value,
    ) -> Result<NegotiationThread, Error>;

    async fn get_thread(
        &self,
        thread_id: Uuid,
    ) -> Result<Option<NegotiationThread>, Error>;

    async fn get_user_threads(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NegotiationThread>, Error>;

    async fn get_thread_events(
        &self,
        thread_id: Uuid,
    ) -> Result<Vec<OfferEvent>, Error>;

    async fn get_events_after(
        &self,
        thread_id: Uuid,
        after_sequence: i64,
        limit: i64,
    ) -> Result<Vec<OfferEvent>, Error>;

    /// Conditional append. Returns `None` when the thread's tail is no
    /// longer `expected_sequence`; nothing is written in that case.
    async fn append_event(
        &self,
        thread_id: Uuid,
        expected_sequence: i64,
        event: &NewOfferEvent,
        status: NegotiationStatus,
        agreed_price: Option<i64>,
    ) -> Result<Option<OfferEvent>, Error>;
}

#[async_trait]
impl NegotiationExt for DBClient {
    async fn ping(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_thread(
        &self,
        initiator_id: Uuid,
        counterparty_id: Uuid,
        context_kind: ContextKind,
        context_ref: Option<Uuid>,
        reference_price: i64,
        payload: serde_json::Value,
    ) -> Result<NegotiationThread, Error> {
        sqlx::query_as::<_, NegotiationThread>(&format!(
            r#"
            INSERT INTO negotiation_threads
            (initiator_id, counterparty_id, context_kind, context_ref, reference_price, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            THREAD_COLUMNS
        ))
        .bind(initiator_id)
        .bind(counterparty_id)
        .bind(context_kind)
        .bind(context_ref)
        .bind(reference_price)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_thread(
        &self,
        thread_id: Uuid,
    ) -> Result<Option<NegotiationThread>, Error> {
        sqlx::query_as::<_, NegotiationThread>(&format!(
            "SELECT {} FROM negotiation_threads WHERE id = $1",
            THREAD_COLUMNS
        ))
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_user_threads(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NegotiationThread>, Error> {
        sqlx::query_as::<_, NegotiationThread>(&format!(
            r#"
            SELECT {}
            FROM negotiation_threads
            WHERE initiator_id = $1 OR counterparty_id = $1
            ORDER BY updated_at DESC
            LIMIT $2 OFFSET $3
            "#,
            THREAD_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_thread_events(
        &self,
        thread_id: Uuid,
    ) -> Result<Vec<OfferEvent>, Error> {
        sqlx::query_as::<_, OfferEvent>(&format!(
            "SELECT {} FROM offer_events WHERE thread_id = $1 ORDER BY sequence ASC",
            EVENT_COLUMNS
        ))
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_events_after(
        &self,
        thread_id: Uuid,
        after_sequence: i64,
        limit: i64,
    ) -> Result<Vec<OfferEvent>, Error> {
        sqlx::query_as::<_, OfferEvent>(&format!(
            r#"
            SELECT {}
            FROM offer_events
            WHERE thread_id = $1 AND sequence > $2
            ORDER BY sequence ASC
            LIMIT $3
            "#,
            EVENT_COLUMNS
        ))
        .bind(thread_id)
        .bind(after_sequence)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn append_event(
        &self,
        thread_id: Uuid,
        expected_sequence: i64,
        event: &NewOfferEvent,
        status: NegotiationStatus,
        agreed_price: Option<i64>,
    ) -> Result<Option<OfferEvent>, Error> {
        let mut tx = self.pool.begin().await?;
        let next_sequence = expected_sequence + 1;

        // Version check on the thread row is the compare-and-apply point.
        let bumped = sqlx::query(
            r#"
            UPDATE negotiation_threads
            SET last_sequence = $3,
                status = $4,
                agreed_price = COALESCE($5, agreed_price),
                updated_at = NOW()
            WHERE id = $1 AND last_sequence = $2
            "#
        )
        .bind(thread_id)
        .bind(expected_sequence)
        .bind(next_sequence)
        .bind(status)
        .bind(agreed_price)
        .execute(&mut *tx)
        .await?;

        if bumped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let inserted = sqlx::query_as::<_, OfferEvent>(&format!(
            r#"
            INSERT INTO offer_events
            (thread_id, sequence, author_id, author_role, kind, amount, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(thread_id)
        .bind(next_sequence)
        .bind(event.author_id)
        .bind(event.author_role)
        .bind(event.kind)
        .bind(event.amount)
        .bind(&event.body)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(row) => {
                tx.commit().await?;
                Ok(Some(row))
            }
            // UNIQUE (thread_id, sequence) backstop
            Err(Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
