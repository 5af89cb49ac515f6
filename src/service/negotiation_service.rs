// service/negotiation_service.rs
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::{
    db::{cache::{CacheHelper, THREAD_VIEW_TTL}, NegotiationStore},
    dtos::negotiationdtos::*,
    models::{negotiationmodel::*, usermodel::{AuthUser, UserRole}},
    service::{
        error::ServiceError,
        event_hub::EventHub,
        ledger::{self, OfferLedger},
        negotiation_machine::NegotiationState,
        notification_service::NotificationService,
        settlement_service::SettlementService,
    },
    utils::currency::{price_delta, suggested_counter_offers},
};

const DEFAULT_EVENTS_PAGE: i64 = 50;
const MAX_EVENTS_PAGE: i64 = 200;
const RECENT_EVENTS: i64 = 20;

/// What a participant asked to do, before it has an author or a sequence.
#[derive(Debug, Clone)]
pub enum NegotiationIntent {
    Propose { amount: i64, note: Option<String> },
    Accept { amount: i64 },
    Reject { reason: Option<String> },
    Message { body: String },
    Cancel { reason: Option<String> },
}

impl NegotiationIntent {
    fn into_action(self, author_id: Uuid, author_role: PartyRole) -> NewOfferEvent {
        let (kind, amount, body) = match self {
            NegotiationIntent::Propose { amount, note } => (OfferKind::Propose, Some(amount), note),
            NegotiationIntent::Accept { amount } => (OfferKind::Accept, Some(amount), None),
            NegotiationIntent::Reject { reason } => (OfferKind::Reject, None, reason),
            NegotiationIntent::Message { body } => (OfferKind::Message, None, Some(body)),
            NegotiationIntent::Cancel { reason } => (OfferKind::Cancel, None, reason),
        };

        NewOfferEvent {
            author_id,
            author_role,
            kind,
            amount,
            body: body.filter(|text| !text.trim().is_empty() || kind == OfferKind::Message),
        }
    }
}

/// Entry point for everything a participant does to a negotiation.
///
/// Every write goes through one optimistic loop: read the ledger, fold it,
/// validate the action against the folded state, then append conditioned on
/// the tail that was read. Losing the race re-reads and re-validates, so an
/// accept can never land on an offer that was replaced in between.
#[derive(Clone)]
pub struct NegotiationService {
    store: Arc<dyn NegotiationStore>,
    ledger: OfferLedger,
    event_hub: EventHub,
    settlement_service: SettlementService,
    notification_service: NotificationService,
    cache: Option<Arc<ConnectionManager>>,
    max_attempts: u32,
}

impl NegotiationService {
    pub fn new(
        store: Arc<dyn NegotiationStore>,
        event_hub: EventHub,
        settlement_service: SettlementService,
        notification_service: NotificationService,
        cache: Option<Arc<ConnectionManager>>,
        max_attempts: u32,
    ) -> Self {
        Self {
            ledger: OfferLedger::new(store.clone()),
            store,
            event_hub,
            settlement_service,
            notification_service,
            cache,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn open_thread(
        &self,
        caller: &AuthUser,
        body: OpenNegotiationDto,
    ) -> Result<NegotiationThread, ServiceError> {
        if caller.role != UserRole::Customer {
            return Err(ServiceError::Validation(format!(
                "Only customers can open a negotiation, not {}",
                caller.role.to_str()
            )));
        }
        if body.counterparty_id == caller.id {
            return Err(ServiceError::Validation(
                "You cannot negotiate with yourself".to_string(),
            ));
        }
        if body.reference_price < 0 {
            return Err(ServiceError::Validation(
                "Reference price cannot be negative".to_string(),
            ));
        }

        let thread = self
            .store
            .create_thread(
                caller.id,
                body.counterparty_id,
                body.context_kind,
                body.context_ref,
                body.reference_price,
                body.payload.unwrap_or_else(|| serde_json::json!({})),
            )
            .await?;

        tracing::info!(
            "Negotiation {} opened by {} {} with {} ({})",
            thread.id,
            caller.role.to_str(),
            caller.id,
            thread.counterparty_id,
            thread.context_kind.to_str()
        );
        Ok(thread)
    }

    pub async fn list_threads(
        &self,
        caller: &AuthUser,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NegotiationThread>, ServiceError> {
        Ok(self.store.get_user_threads(caller.id, limit, offset).await?)
    }

    pub async fn submit(
        &self,
        thread_id: Uuid,
        caller: &AuthUser,
        intent: NegotiationIntent,
    ) -> Result<SubmissionResponse, ServiceError> {
        let (thread, party) = self.thread_for(thread_id, caller).await?;
        let action = intent.into_action(caller.id, party);
        ledger::check_entry(&action)?;

        let mut attempt = 0;
        let (event, state, previous) = loop {
            attempt += 1;

            let history = self.ledger.history(thread_id).await?;
            let current = NegotiationState::fold(thread_id, &history)?;

            if let Some(last) = history.last() {
                if NegotiationState::is_retry_of(&action, Some(last)) {
                    tracing::debug!(
                        "Repeated {} on negotiation {} matches #{}, not appending",
                        action.kind.to_str(),
                        thread_id,
                        last.sequence
                    );
                    let (settlement, order) = self.settlement_view(&thread, &current, true).await;
                    return Ok(SubmissionResponse {
                        event: last.clone(),
                        state: current,
                        duplicate: true,
                        settlement,
                        order,
                    });
                }
            }

            let next = current.after(&action, current.last_sequence + 1)?;
            match self
                .ledger
                .append(thread_id, current.last_sequence, &action, next.status, next.agreed_price)
                .await
            {
                Ok(event) => break (event, next, current),
                Err(ServiceError::LedgerConflict(..)) if attempt >= self.max_attempts => {
                    tracing::warn!(
                        "Giving up on {} for negotiation {} after {} conflicting appends",
                        action.kind.to_str(),
                        thread_id,
                        attempt
                    );
                    return Err(ServiceError::Transport(format!(
                        "negotiation {} is too busy, please retry",
                        thread_id
                    )));
                }
                Err(ServiceError::LedgerConflict(..)) => {
                    tracing::debug!(
                        "Negotiation {} moved during {} (attempt {}), re-reading",
                        thread_id,
                        action.kind.to_str(),
                        attempt
                    );
                }
                Err(e) => return Err(e),
            }
        };

        tracing::info!(
            "Negotiation {}: {} #{} by {} -> {}",
            thread_id,
            event.kind.to_str(),
            event.sequence,
            party.to_str(),
            state.status.to_str()
        );

        self.event_hub.publish(&event).await;
        self.invalidate_cached_state(thread_id).await;

        if let Err(e) = self
            .notification_service
            .notify_thread_updated(&thread, &event)
            .await
        {
            tracing::warn!("Failed to notify negotiation {} update: {}", thread_id, e);
        }

        let just_agreed = state.status == NegotiationStatus::Agreed
            && previous.status != NegotiationStatus::Agreed;
        let (settlement, order) = self.settlement_view(&thread, &state, just_agreed).await;

        Ok(SubmissionResponse {
            event,
            state,
            duplicate: false,
            settlement,
            order,
        })
    }

    pub async fn view(
        &self,
        thread_id: Uuid,
        caller: &AuthUser,
    ) -> Result<NegotiationView, ServiceError> {
        let (thread, party) = self.thread_for(thread_id, caller).await?;
        let state = self.current_state(thread_id).await?;
        let (settlement, order) = self.settlement_view(&thread, &state, false).await;
        let recent_events = self
            .ledger
            .page_after(thread_id, (state.last_sequence - RECENT_EVENTS).max(0), RECENT_EVENTS)
            .await?;

        let awaiting = state.awaiting();
        let reference_delta = state
            .agreed_price
            .or(state.active_offer.map(|offer| offer.amount))
            .and_then(|amount| price_delta(thread.reference_price, amount));

        let suggested = if state.status.is_terminal() {
            Vec::new()
        } else {
            match state.active_offer {
                Some(offer) if offer.author != party => suggested_counter_offers(offer.amount),
                _ => suggested_counter_offers(thread.reference_price),
            }
        };

        Ok(NegotiationView {
            your_role: party,
            awaiting,
            your_turn: awaiting == Some(party),
            allowed_actions: state.allowed_actions(party),
            settlement,
            order,
            reference_delta,
            suggested_counter_offers: suggested,
            recent_events,
            state,
            thread,
        })
    }

    /// One participant-checked page of ledger entries after `after`.
    pub async fn entries_since(
        &self,
        thread_id: Uuid,
        caller: &AuthUser,
        after: i64,
        limit: Option<i64>,
    ) -> Result<EventsPage, ServiceError> {
        self.thread_for(thread_id, caller).await?;

        let limit = limit.unwrap_or(DEFAULT_EVENTS_PAGE).clamp(1, MAX_EVENTS_PAGE);
        let mut events = self.ledger.page_after(thread_id, after.max(0), limit + 1).await?;
        let has_more = events.len() as i64 > limit;
        events.truncate(limit as usize);

        Ok(EventsPage {
            next_cursor: events.last().map_or(after.max(0), |e| e.sequence),
            events,
            has_more,
        })
    }

    /// Ledger entries after `after`, then live appends until the stream is
    /// dropped.
    pub async fn subscribe(
        &self,
        thread_id: Uuid,
        caller: &AuthUser,
        after: i64,
    ) -> Result<BoxStream<'static, Result<OfferEvent, ServiceError>>, ServiceError> {
        self.thread_for(thread_id, caller).await?;
        Ok(self
            .event_hub
            .subscribe(self.ledger.clone(), thread_id, after.max(0))
            .await)
    }

    async fn thread_for(
        &self,
        thread_id: Uuid,
        caller: &AuthUser,
    ) -> Result<(NegotiationThread, PartyRole), ServiceError> {
        let thread = self
            .store
            .get_thread(thread_id)
            .await?
            .ok_or(ServiceError::ThreadNotFound(thread_id))?;

        let party = thread
            .party_of(caller.id)
            .ok_or(ServiceError::NotParticipant(caller.id, thread_id))?;

        if party == PartyRole::Counterparty && caller.role != thread.context_kind.counterparty_role() {
            tracing::warn!(
                "User {} holds {} but negotiation {} needs a {}",
                caller.id,
                caller.role.to_str(),
                thread_id,
                thread.context_kind.counterparty_role().to_str()
            );
            return Err(ServiceError::NotParticipant(caller.id, thread_id));
        }

        Ok((thread, party))
    }

    /// Folded state, resumed from the cached snapshot when there is one.
    async fn current_state(&self, thread_id: Uuid) -> Result<NegotiationState, ServiceError> {
        let mut state = self.cached_state(thread_id).await.unwrap_or_default();
        let cached_tail = state.last_sequence;

        let mut entries = self.ledger.entries_since(thread_id, cached_tail).boxed();
        while let Some(event) = entries.next().await {
            state.apply(&event?)?;
        }

        if state.last_sequence != cached_tail {
            self.cache_state(thread_id, &state).await;
        }
        Ok(state)
    }

    async fn cached_state(&self, thread_id: Uuid) -> Option<NegotiationState> {
        let redis = self.cache.as_ref()?;
        match CacheHelper::get::<NegotiationState>(redis, &CacheHelper::thread_view_key(thread_id)).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Cache read failed for negotiation {}: {}", thread_id, e);
                None
            }
        }
    }

    async fn cache_state(&self, thread_id: Uuid, state: &NegotiationState) {
        if let Some(redis) = &self.cache {
            let key = CacheHelper::thread_view_key(thread_id);
            if let Err(e) = CacheHelper::set(redis, &key, state, THREAD_VIEW_TTL).await {
                tracing::warn!("Cache write failed for negotiation {}: {}", thread_id, e);
            }
        }
    }

    async fn invalidate_cached_state(&self, thread_id: Uuid) {
        if let Some(redis) = &self.cache {
            let key = CacheHelper::thread_view_key(thread_id);
            if let Err(e) = CacheHelper::delete(redis, &key).await {
                tracing::warn!("Cache invalidation failed for negotiation {}: {}", thread_id, e);
            }
        }
    }

    /// Settlement display for an agreed thread. With `drive` set, the
    /// hand-off is attempted (idempotently) before reporting.
    async fn settlement_view(
        &self,
        thread: &NegotiationThread,
        state: &NegotiationState,
        drive: bool,
    ) -> (SettlementDisplay, Option<OrderRef>) {
        let Some(agreed_price) = state.agreed_price.filter(|_| state.status == NegotiationStatus::Agreed) else {
            return (SettlementDisplay::None, None);
        };

        if drive {
            return match self.settlement_service.materialize(thread, agreed_price).await {
                Ok(order) => (SettlementDisplay::OrderCreated, Some(order)),
                Err(e) => {
                    tracing::warn!("Negotiation {} agreed but not yet settled: {}", thread.id, e);
                    (SettlementDisplay::OrderPending, None)
                }
            };
        }

        match self.settlement_service.settlement_for(thread.id).await {
            Ok(Some(row)) => (SettlementDisplay::from_settlement(Some(&row)), row.order_ref()),
            Ok(None) => (SettlementDisplay::OrderPending, None),
            Err(e) => {
                tracing::warn!("Failed to load settlement for negotiation {}: {}", thread.id, e);
                (SettlementDisplay::OrderPending, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::service::order_consumer::StoreOrderConsumer;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: NegotiationService,
        thread: NegotiationThread,
        customer: AuthUser,
        owner: AuthUser,
    }

    async fn fixture(reference_price: i64) -> Fixture {
        fixture_with_attempts(reference_price, 5).await
    }

    async fn fixture_with_attempts(reference_price: i64, max_attempts: u32) -> Fixture {
        let store = Arc::new(MemoryStore::default());
        let notifications = NotificationService::new(store.clone());
        let settlement = SettlementService::new(
            store.clone(),
            Arc::new(StoreOrderConsumer::new(store.clone())),
            notifications.clone(),
            Duration::from_secs(900),
        );
        let service = NegotiationService::new(
            store.clone(),
            EventHub::new(),
            settlement,
            notifications,
            None,
            max_attempts,
        );

        let customer = AuthUser { id: Uuid::new_v4(), role: UserRole::Customer };
        let owner = AuthUser { id: Uuid::new_v4(), role: UserRole::StoreOwner };
        let thread = service
            .open_thread(
                &customer,
                OpenNegotiationDto {
                    counterparty_id: owner.id,
                    context_kind: ContextKind::ProductCart,
                    context_ref: None,
                    reference_price,
                    payload: Some(serde_json::json!({ "items": [{ "sku": "A1", "qty": 2 }] })),
                },
            )
            .await
            .unwrap();

        Fixture { store, service, thread, customer, owner }
    }

    fn propose(amount: i64) -> NegotiationIntent {
        NegotiationIntent::Propose { amount, note: None }
    }

    #[tokio::test]
    async fn test_open_thread_rejects_self_negotiation() {
        let f = fixture(0).await;
        let err = f
            .service
            .open_thread(
                &f.customer,
                OpenNegotiationDto {
                    counterparty_id: f.customer.id,
                    context_kind: ContextKind::ServiceRequest,
                    context_ref: None,
                    reference_price: 0,
                    payload: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_only_customers_open_negotiations() {
        let f = fixture(0).await;
        let driver = AuthUser { id: Uuid::new_v4(), role: UserRole::Driver };

        let err = f
            .service
            .open_thread(
                &driver,
                OpenNegotiationDto {
                    counterparty_id: f.owner.id,
                    context_kind: ContextKind::ProductCart,
                    context_ref: None,
                    reference_price: 100_000,
                    payload: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(f.service.list_threads(&f.owner, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_counterparty_must_hold_the_role_for_the_context() {
        let f = fixture(0).await;
        let driver = AuthUser { id: Uuid::new_v4(), role: UserRole::Driver };
        let thread = f
            .service
            .open_thread(
                &f.customer,
                OpenNegotiationDto {
                    counterparty_id: driver.id,
                    context_kind: ContextKind::ServiceRequest,
                    context_ref: None,
                    reference_price: 60_000,
                    payload: None,
                },
            )
            .await
            .unwrap();

        let err = f.service.view(thread.id, &driver).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotParticipant(..)));

        let err = f.service.submit(thread.id, &driver, propose(55_000)).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotParticipant(..)));

        let worker = AuthUser { id: driver.id, role: UserRole::Worker };
        let sent = f.service.submit(thread.id, &worker, propose(55_000)).await.unwrap();
        assert_eq!(sent.state.status, NegotiationStatus::Pending);
    }

    #[tokio::test]
    async fn test_customer_accepts_store_counter_offer() {
        let f = fixture(355_000).await;
        let id = f.thread.id;

        f.service.submit(id, &f.customer, propose(340_000)).await.unwrap();
        f.service.submit(id, &f.owner, propose(350_000)).await.unwrap();
        let agreed = f
            .service
            .submit(id, &f.customer, NegotiationIntent::Accept { amount: 350_000 })
            .await
            .unwrap();

        assert_eq!(agreed.state.status, NegotiationStatus::Agreed);
        assert_eq!(agreed.state.agreed_price, Some(350_000));
        assert_eq!(agreed.settlement, SettlementDisplay::OrderCreated);

        let orders = f.store.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].thread_id, id);
        assert_eq!(orders[0].agreed_price, 350_000);
        assert_eq!(agreed.order.map(|o| o.id), Some(orders[0].id));

        let view = f.service.view(id, &f.owner).await.unwrap();
        assert_eq!(view.reference_delta.map(|d| d.amount), Some(-5_000));
        assert!(view.suggested_counter_offers.is_empty());
    }

    #[tokio::test]
    async fn test_view_survives_huge_offers() {
        let f = fixture(0).await;
        f.service
            .submit(f.thread.id, &f.customer, propose(200_000_000_000_000_000))
            .await
            .unwrap();

        let view = f.service.view(f.thread.id, &f.owner).await.unwrap();
        assert_eq!(view.suggested_counter_offers.len(), 3);
        assert!(view.suggested_counter_offers.iter().all(|amount| *amount < 200_000_000_000_000_000));
    }

    #[tokio::test]
    async fn test_counter_offers_end_in_one_order() {
        let f = fixture(400_000).await;
        let id = f.thread.id;

        f.service.submit(id, &f.customer, propose(350_000)).await.unwrap();
        f.service.submit(id, &f.owner, propose(360_000)).await.unwrap();
        f.service.submit(id, &f.customer, propose(355_000)).await.unwrap();

        let stale = f
            .service
            .submit(id, &f.owner, NegotiationIntent::Accept { amount: 360_000 })
            .await
            .unwrap_err();
        assert!(matches!(stale, ServiceError::StaleOffer { current: 355_000, attempted: 360_000 }));

        let agreed = f
            .service
            .submit(id, &f.owner, NegotiationIntent::Accept { amount: 355_000 })
            .await
            .unwrap();
        assert_eq!(agreed.state.status, NegotiationStatus::Agreed);
        assert_eq!(agreed.state.agreed_price, Some(355_000));
        assert_eq!(agreed.settlement, SettlementDisplay::OrderCreated);
        assert!(agreed.order.is_some());

        let orders = f.store.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].agreed_price, 355_000);
        assert_eq!(orders[0].payload["items"][0]["sku"], "A1");

        let view = f.service.view(id, &f.customer).await.unwrap();
        assert_eq!(view.state.last_sequence, 4);
        assert_eq!(view.recent_events.len(), 4);
        assert_eq!(view.allowed_actions, vec![OfferKind::Message]);
        assert_eq!(view.settlement, SettlementDisplay::OrderCreated);
        assert_eq!(view.reference_delta.map(|d| d.amount), Some(-45_000));
    }

    #[tokio::test]
    async fn test_accept_racing_a_counter_offer_is_revalidated() {
        let f = fixture(0).await;
        let id = f.thread.id;
        f.service.submit(id, &f.customer, propose(100_000)).await.unwrap();

        // The customer lowers the offer between the owner's read and append.
        f.store.race_next_append(NewOfferEvent {
            author_id: f.customer.id,
            author_role: PartyRole::Initiator,
            kind: OfferKind::Propose,
            amount: Some(95_000),
            body: None,
        });

        let err = f
            .service
            .submit(id, &f.owner, NegotiationIntent::Accept { amount: 100_000 })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::StaleOffer { current: 95_000, attempted: 100_000 }));

        let view = f.service.view(id, &f.owner).await.unwrap();
        assert_eq!(view.state.status, NegotiationStatus::Pending);
        assert_eq!(view.state.active_offer.map(|o| o.amount), Some(95_000));
        assert!(view.your_turn);
        assert!(f.store.orders().is_empty());
    }

    #[tokio::test]
    async fn test_message_racing_an_offer_still_lands() {
        let f = fixture(0).await;
        let id = f.thread.id;

        f.store.race_next_append(NewOfferEvent {
            author_id: f.owner.id,
            author_role: PartyRole::Counterparty,
            kind: OfferKind::Propose,
            amount: Some(80_000),
            body: None,
        });
        let sent = f
            .service
            .submit(id, &f.customer, NegotiationIntent::Message { body: "Is delivery included?".into() })
            .await
            .unwrap();

        assert_eq!(sent.event.sequence, 2);
        assert_eq!(sent.state.status, NegotiationStatus::Pending);
    }

    #[tokio::test]
    async fn test_exhausted_append_attempts_surface_as_transport() {
        let f = fixture_with_attempts(0, 1).await;
        f.store.race_next_append(NewOfferEvent {
            author_id: f.owner.id,
            author_role: PartyRole::Counterparty,
            kind: OfferKind::Message,
            amount: None,
            body: Some("hello".into()),
        });

        let err = f
            .service
            .submit(f.thread.id, &f.customer, propose(50_000))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)));

        let page = f.service.entries_since(f.thread.id, &f.customer, 0, None).await.unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].kind, OfferKind::Message);
    }

    #[tokio::test]
    async fn test_repeated_accept_is_a_no_op() {
        let f = fixture(0).await;
        let id = f.thread.id;
        f.service.submit(id, &f.owner, propose(120_000)).await.unwrap();

        let accept = NegotiationIntent::Accept { amount: 120_000 };
        let first = f.service.submit(id, &f.customer, accept.clone()).await.unwrap();
        let again = f.service.submit(id, &f.customer, accept).await.unwrap();

        assert!(!first.duplicate);
        assert!(again.duplicate);
        assert_eq!(first.event, again.event);
        assert_eq!(first.order, again.order);
        assert_eq!(f.store.orders().len(), 1);

        let history = f.service.entries_since(id, &f.customer, 0, None).await.unwrap();
        assert_eq!(history.events.len(), 2);
    }

    #[tokio::test]
    async fn test_settlement_failure_keeps_agreement() {
        let f = fixture(0).await;
        let id = f.thread.id;
        f.service.submit(id, &f.owner, propose(70_000)).await.unwrap();
        f.store.fail_next_orders(1);

        let agreed = f
            .service
            .submit(id, &f.customer, NegotiationIntent::Accept { amount: 70_000 })
            .await
            .unwrap();
        assert_eq!(agreed.state.status, NegotiationStatus::Agreed);
        assert_eq!(agreed.settlement, SettlementDisplay::OrderPending);
        assert!(agreed.order.is_none());

        let view = f.service.view(id, &f.owner).await.unwrap();
        assert_eq!(view.state.status, NegotiationStatus::Agreed);
        assert_eq!(view.settlement, SettlementDisplay::OrderPending);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_block_the_action() {
        let f = fixture(0).await;
        f.store.fail_next_notifications(1);

        let sent = f.service.submit(f.thread.id, &f.customer, propose(10_000)).await;
        assert!(sent.is_ok());
        assert_eq!(f.service.entries_since(f.thread.id, &f.owner, 0, None).await.unwrap().events.len(), 1);
    }

    #[tokio::test]
    async fn test_outsiders_and_self_accept_are_refused() {
        let f = fixture(0).await;
        let id = f.thread.id;
        let outsider = AuthUser { id: Uuid::new_v4(), role: UserRole::Driver };

        let err = f.service.view(id, &outsider).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotParticipant(..)));

        f.service.submit(id, &f.customer, propose(5_000)).await.unwrap();
        let err = f
            .service
            .submit(id, &f.customer, NegotiationIntent::Accept { amount: 5_000 })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::IllegalTransition { .. }));

        let err = f.service.view(Uuid::new_v4(), &f.customer).await.unwrap_err();
        assert!(matches!(err, ServiceError::ThreadNotFound(_)));
    }

    #[tokio::test]
    async fn test_events_page_with_cursor() {
        let f = fixture(0).await;
        let id = f.thread.id;
        for i in 0..5 {
            f.service
                .submit(id, &f.customer, NegotiationIntent::Message { body: format!("note {}", i) })
                .await
                .unwrap();
        }

        let first = f.service.entries_since(id, &f.owner, 0, Some(3)).await.unwrap();
        assert_eq!(first.events.len(), 3);
        assert!(first.has_more);
        assert_eq!(first.next_cursor, 3);

        let rest = f.service.entries_since(id, &f.owner, first.next_cursor, Some(3)).await.unwrap();
        assert_eq!(rest.events.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![4, 5]);
        assert!(!rest.has_more);
    }

    #[tokio::test]
    async fn test_subscription_sees_submissions() {
        let f = fixture(0).await;
        let id = f.thread.id;
        f.service.submit(id, &f.customer, propose(42_000)).await.unwrap();

        let mut stream = f.service.subscribe(id, &f.owner, 0).await.unwrap();
        f.service
            .submit(id, &f.owner, NegotiationIntent::Reject { reason: Some("too low".into()) })
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            seen.push(event.kind);
        }
        assert_eq!(seen, vec![OfferKind::Propose, OfferKind::Reject]);
    }
}
