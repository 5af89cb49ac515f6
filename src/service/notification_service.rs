// service/notification_service.rs
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    db::NegotiationStore,
    models::negotiationmodel::*,
    service::error::ServiceError,
    utils::currency::format_tugrik,
};

/// Stores in-app notifications for negotiation participants.
///
/// Callers treat every method as best effort: a failure here is logged and
/// never undoes the ledger write or settlement that triggered it.
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NegotiationStore>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NegotiationStore>) -> Self {
        Self { store }
    }

    /// Tells the other participant that `event` was appended.
    pub async fn notify_thread_updated(
        &self,
        thread: &NegotiationThread,
        event: &OfferEvent,
    ) -> Result<(), ServiceError> {
        let recipient = thread.participant_id(event.author_role.other());

        let message = match (event.kind, event.amount) {
            (OfferKind::Propose, Some(amount)) => {
                format!("New offer: {}", format_tugrik(amount))
            }
            (OfferKind::Accept, Some(amount)) => {
                format!("Your offer of {} was accepted", format_tugrik(amount))
            }
            (OfferKind::Reject, _) => "Your offer was declined".to_string(),
            (OfferKind::Cancel, _) => "The negotiation was cancelled".to_string(),
            _ => "New message in your negotiation".to_string(),
        };

        tracing::info!(
            "Negotiation update: {} #{} on thread {} for user {}",
            event.kind.to_str(),
            event.sequence,
            thread.id,
            recipient
        );

        self.store_notification(
            recipient,
            &format!("negotiation_{}", event.kind.to_str()),
            Some(thread.id),
            Some(serde_json::json!({
                "sequence": event.sequence,
                "kind": event.kind.to_str(),
                "amount": event.amount,
            })),
            message,
        )
        .await
    }

    /// Tells both participants that the agreed deal became an order.
    pub async fn notify_deal_agreed(
        &self,
        thread: &NegotiationThread,
        agreed_price: i64,
        order: &OrderRef,
    ) -> Result<(), ServiceError> {
        tracing::info!(
            "Deal agreed on thread {}: {} as order {}",
            thread.id,
            agreed_price,
            order.order_number
        );

        for recipient in [thread.initiator_id, thread.counterparty_id] {
            self.store_notification(
                recipient,
                "negotiation_order_created",
                Some(thread.id),
                Some(serde_json::json!({
                    "agreed_price": agreed_price,
                    "order_id": order.id,
                    "order_number": order.order_number,
                })),
                format!(
                    "Deal agreed at {}. Order {} has been created",
                    format_tugrik(agreed_price),
                    order.order_number
                ),
            )
            .await?;
        }
        Ok(())
    }

    pub async fn notify_settlement_delayed(
        &self,
        thread: &NegotiationThread,
        agreed_price: i64,
    ) -> Result<(), ServiceError> {
        tracing::warn!("Order creation delayed for thread {}", thread.id);

        for recipient in [thread.initiator_id, thread.counterparty_id] {
            self.store_notification(
                recipient,
                "negotiation_order_pending",
                Some(thread.id),
                Some(serde_json::json!({ "agreed_price": agreed_price })),
                format!(
                    "Deal agreed at {}. Your order is being prepared",
                    format_tugrik(agreed_price)
                ),
            )
            .await?;
        }
        Ok(())
    }

    async fn store_notification(
        &self,
        user_id: Uuid,
        notification_type: &str,
        thread_id: Option<Uuid>,
        metadata: Option<serde_json::Value>,
        message: String,
    ) -> Result<(), ServiceError> {
        self.store
            .store_notification(user_id, notification_type, thread_id, metadata, message)
            .await
            .map_err(ServiceError::Database)
    }
}
