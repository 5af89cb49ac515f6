// service/settlement_service.rs
//! Turns an agreed negotiation into exactly one downstream order.
//!
//! The agreement itself is already durable in the ledger by the time this
//! runs. A `settlements` row records the hand-off so that a failed or
//! interrupted attempt is picked up again by the retry job, and so that
//! repeated calls for the same thread return the first order.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::{
    db::NegotiationStore,
    models::negotiationmodel::*,
    service::{
        error::ServiceError,
        notification_service::NotificationService,
        order_consumer::SettlementConsumer,
    },
};

const BASE_BACKOFF: Duration = Duration::from_secs(5);

/// Delay before the next attempt after `attempts` consecutive failures.
/// Exponential from 5s, capped at `max`, with up to 20% jitter.
pub fn backoff_delay(attempts: i32, max: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).clamp(0, 16) as u32;
    let capped = BASE_BACKOFF.saturating_mul(2u32.pow(exponent)).min(max);
    let jitter_ms = rand::rng().random_range(0..=capped.as_millis() as u64 / 5);
    (capped + Duration::from_millis(jitter_ms)).min(max)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryReport {
    pub settled: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct SettlementService {
    store: Arc<dyn NegotiationStore>,
    consumer: Arc<dyn SettlementConsumer>,
    notification_service: NotificationService,
    max_backoff: Duration,
}

impl SettlementService {
    pub fn new(
        store: Arc<dyn NegotiationStore>,
        consumer: Arc<dyn SettlementConsumer>,
        notification_service: NotificationService,
        max_backoff: Duration,
    ) -> Self {
        Self {
            store,
            consumer,
            notification_service,
            max_backoff,
        }
    }

    pub async fn settlement_for(&self, thread_id: Uuid) -> Result<Option<Settlement>, ServiceError> {
        Ok(self.store.get_settlement(thread_id).await?)
    }

    /// Creates the order for an agreed thread, or returns the one already
    /// created. On failure the settlement stays pending and is scheduled
    /// for retry; the agreement is untouched.
    pub async fn materialize(
        &self,
        thread: &NegotiationThread,
        agreed_price: i64,
    ) -> Result<OrderRef, ServiceError> {
        let settlement = match self.store.get_settlement(thread.id).await? {
            Some(existing) => existing,
            None => {
                self.store
                    .create_pending_settlement(thread.id, agreed_price, thread.payload.clone())
                    .await?
            }
        };

        if settlement.agreed_price != agreed_price {
            return Err(ServiceError::Settlement {
                thread_id: thread.id,
                reason: format!(
                    "already settling at {}, refusing {}",
                    settlement.agreed_price, agreed_price
                ),
            });
        }

        if settlement.status == SettlementStatus::Settled {
            if let Some(order) = settlement.order_ref() {
                return Ok(order);
            }
        }

        self.attempt(thread, &settlement).await
    }

    /// Re-drives settlements whose backoff has elapsed, plus agreed threads
    /// whose settlement row was never written.
    pub async fn retry_due(&self, limit: i64) -> Result<RetryReport, ServiceError> {
        let mut report = RetryReport::default();

        for thread in self.store.get_unsettled_agreements(limit).await? {
            let Some(agreed_price) = thread.agreed_price else {
                tracing::error!("Agreed negotiation {} has no agreed price", thread.id);
                continue;
            };
            match self.materialize(&thread, agreed_price).await {
                Ok(_) => report.settled += 1,
                Err(_) => report.failed += 1,
            }
        }

        for settlement in self.store.get_due_settlements(limit).await? {
            let Some(thread) = self.store.get_thread(settlement.thread_id).await? else {
                tracing::error!(
                    "Settlement {} points at missing negotiation {}",
                    settlement.id,
                    settlement.thread_id
                );
                continue;
            };
            match self.attempt(&thread, &settlement).await {
                Ok(_) => report.settled += 1,
                Err(_) => report.failed += 1,
            }
        }

        Ok(report)
    }

    async fn attempt(
        &self,
        thread: &NegotiationThread,
        settlement: &Settlement,
    ) -> Result<OrderRef, ServiceError> {
        let result = self
            .consumer
            .create_from_negotiation(thread.id, settlement.agreed_price, &settlement.payload)
            .await;

        match result {
            Ok(order) => {
                self.store.mark_settlement_settled(thread.id, &order).await?;
                tracing::info!(
                    "Negotiation {} settled as order {} after {} failed attempts",
                    thread.id,
                    order.order_number,
                    settlement.attempts
                );

                if let Err(e) = self
                    .notification_service
                    .notify_deal_agreed(thread, settlement.agreed_price, &order)
                    .await
                {
                    tracing::warn!("Failed to notify deal for negotiation {}: {}", thread.id, e);
                }
                Ok(order)
            }
            Err(e) => {
                let attempts = settlement.attempts + 1;
                let delay = backoff_delay(attempts, self.max_backoff);
                let next_attempt_at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                tracing::warn!(
                    "Settlement attempt {} for negotiation {} failed: {}. Retrying in {:?}",
                    attempts,
                    thread.id,
                    e,
                    delay
                );

                self.store
                    .record_settlement_failure(thread.id, &e.to_string(), next_attempt_at)
                    .await?;

                if settlement.attempts == 0 {
                    if let Err(e) = self
                        .notification_service
                        .notify_settlement_delayed(thread, settlement.agreed_price)
                        .await
                    {
                        tracing::warn!("Failed to notify delay for negotiation {}: {}", thread.id, e);
                    }
                }

                Err(ServiceError::Settlement {
                    thread_id: thread.id,
                    reason: e.to_string(),
                })
            }
        }
    }
}
