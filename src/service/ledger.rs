// service/ledger.rs
//! Append-only offer ledger for a negotiation thread.
use std::sync::Arc;

use futures::stream::{self, Stream};
use uuid::Uuid;

use crate::{
    db::NegotiationStore,
    models::negotiationmodel::*,
    service::error::ServiceError,
};

const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_BODY_LEN: usize = 5000;

/// Shape checks every entry must pass before it can be appended.
/// Amounts are whole currency units.
pub fn check_entry(event: &NewOfferEvent) -> Result<(), ServiceError> {
    match (event.kind.requires_amount(), event.amount) {
        (true, None) => {
            return Err(ServiceError::Validation(format!(
                "{} requires an amount",
                event.kind.to_str()
            )))
        }
        (true, Some(amount)) if amount <= 0 => {
            return Err(ServiceError::Validation(format!(
                "Amount must be a positive whole number, got {}",
                amount
            )))
        }
        (false, Some(_)) => {
            return Err(ServiceError::Validation(format!(
                "{} does not take an amount",
                event.kind.to_str()
            )))
        }
        _ => {}
    }

    if let Some(body) = &event.body {
        if body.chars().count() > MAX_BODY_LEN {
            return Err(ServiceError::Validation(format!(
                "Message must be at most {} characters",
                MAX_BODY_LEN
            )));
        }
    }

    if event.kind == OfferKind::Message
        && event.body.as_deref().map_or(true, |body| body.trim().is_empty())
    {
        return Err(ServiceError::Validation("Message cannot be empty".to_string()));
    }

    Ok(())
}

#[derive(Clone)]
pub struct OfferLedger {
    store: Arc<dyn NegotiationStore>,
    page_size: i64,
}

impl OfferLedger {
    pub fn new(store: Arc<dyn NegotiationStore>) -> Self {
        Self {
            store,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Appends `event` only if the thread's tail is still `expected_sequence`.
    /// `status` and `agreed_price` are written to the thread's cached
    /// columns in the same transaction.
    pub async fn append(
        &self,
        thread_id: Uuid,
        expected_sequence: i64,
        event: &NewOfferEvent,
        status: NegotiationStatus,
        agreed_price: Option<i64>,
    ) -> Result<OfferEvent, ServiceError> {
        check_entry(event)?;

        let appended = self
            .store
            .append_event(thread_id, expected_sequence, event, status, agreed_price)
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        match appended {
            Some(event) => {
                tracing::debug!(
                    "Appended {} #{} to negotiation {}",
                    event.kind.to_str(),
                    event.sequence,
                    thread_id
                );
                Ok(event)
            }
            None => Err(ServiceError::LedgerConflict(thread_id, expected_sequence)),
        }
    }

    /// Full ordered history.
    pub async fn history(&self, thread_id: Uuid) -> Result<Vec<OfferEvent>, ServiceError> {
        self.store
            .get_thread_events(thread_id)
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))
    }

    /// One page of entries with `sequence > cursor`.
    pub async fn page_after(
        &self,
        thread_id: Uuid,
        cursor: i64,
        limit: i64,
    ) -> Result<Vec<OfferEvent>, ServiceError> {
        self.store
            .get_events_after(thread_id, cursor, limit)
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))
    }

    /// Lazily pages through every entry after `cursor` in sequence order.
    /// The stream ends at the tail as it was when the last page was read.
    pub fn entries_since(
        &self,
        thread_id: Uuid,
        cursor: i64,
    ) -> impl Stream<Item = Result<OfferEvent, ServiceError>> + Send + 'static {
        struct Paging {
            ledger: OfferLedger,
            thread_id: Uuid,
            cursor: i64,
            buffered: std::collections::VecDeque<OfferEvent>,
            exhausted: bool,
        }

        let paging = Paging {
            ledger: self.clone(),
            thread_id,
            cursor,
            buffered: Default::default(),
            exhausted: false,
        };

        stream::unfold(paging, |mut paging| async move {
            if paging.buffered.is_empty() {
                if paging.exhausted {
                    return None;
                }
                let limit = paging.ledger.page_size;
                match paging.ledger.page_after(paging.thread_id, paging.cursor, limit).await {
                    Ok(page) => {
                        paging.exhausted = (page.len() as i64) < limit;
                        paging.buffered.extend(page);
                    }
                    Err(e) => {
                        paging.exhausted = true;
                        return Some((Err(e), paging));
                    }
                }
            }

            let event = paging.buffered.pop_front()?;
            paging.cursor = event.sequence;
            Some((Ok(event), paging))
        })
    }
}
