// db/memory.rs
//! In-process store used by the service and handler tests.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Error;
use uuid::Uuid;

use super::{
    negotiationdb::NegotiationExt,
    notificationdb::NotificationExt,
    settlementdb::{NegotiatedOrder, OrderExt, SettlementExt},
};
use crate::models::negotiationmodel::*;

#[derive(Debug, Clone)]
pub struct StoredNotification {
    pub user_id: Uuid,
    pub notification_type: String,
    pub thread_id: Option<Uuid>,
}

#[derive(Default)]
struct Tables {
    threads: HashMap<Uuid, NegotiationThread>,
    events: HashMap<Uuid, Vec<OfferEvent>>,
    settlements: HashMap<Uuid, Settlement>,
    orders: HashMap<Uuid, NegotiatedOrder>,
    notifications: Vec<StoredNotification>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    // Written by "another client" right before the next append lands.
    racing_append: Mutex<Option<NewOfferEvent>>,
    failing_orders: AtomicUsize,
    failing_notifications: AtomicUsize,
    order_calls: AtomicUsize,
}

impl MemoryStore {
    pub async fn seed_thread(&self, reference_price: i64) -> NegotiationThread {
        self.create_thread(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ContextKind::ProductCart,
            None,
            reference_price,
            serde_json::json!({ "items": [] }),
        )
        .await
        .expect("memory store never fails to create")
    }

    pub fn race_next_append(&self, event: NewOfferEvent) {
        *self.racing_append.lock().unwrap() = Some(event);
    }

    pub fn fail_next_orders(&self, count: usize) {
        self.failing_orders.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_notifications(&self, count: usize) {
        self.failing_notifications.store(count, Ordering::SeqCst);
    }

    pub fn order_calls(&self) -> usize {
        self.order_calls.load(Ordering::SeqCst)
    }

    pub fn orders(&self) -> Vec<NegotiatedOrder> {
        self.tables.lock().unwrap().orders.values().cloned().collect()
    }

    pub fn notifications(&self) -> Vec<StoredNotification> {
        self.tables.lock().unwrap().notifications.clone()
    }

    /// Makes every pending settlement due immediately.
    pub fn expire_backoff(&self) {
        let mut tables = self.tables.lock().unwrap();
        for settlement in tables.settlements.values_mut() {
            settlement.next_attempt_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn push_event(tables: &mut Tables, thread_id: Uuid, event: &NewOfferEvent) -> Option<OfferEvent> {
        let thread = tables.threads.get_mut(&thread_id)?;
        thread.last_sequence += 1;
        thread.updated_at = Utc::now();
        let row = OfferEvent {
            id: Uuid::new_v4(),
            thread_id,
            sequence: thread.last_sequence,
            author_id: event.author_id,
            author_role: event.author_role,
            kind: event.kind,
            amount: event.amount,
            body: event.body.clone(),
            created_at: Utc::now(),
        };
        tables.events.entry(thread_id).or_default().push(row.clone());
        Some(row)
    }
}

#[async_trait]
impl NegotiationExt for MemoryStore {
    async fn ping(&self) -> Result<(), Error> {
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
        let now = Utc::now();
        let thread = NegotiationThread {
            id: Uuid::new_v4(),
            initiator_id,
            counterparty_id,
            context_kind,
            context_ref,
            reference_price,
            payload,
            status: NegotiationStatus::NoOffer,
            agreed_price: None,
            last_sequence: 0,
            created_at: now,
            updated_at: now,
        };
        self.tables
            .lock()
            .unwrap()
            .threads
            .insert(thread.id, thread.clone());
        Ok(thread)
    }

    async fn get_thread(&self, thread_id: Uuid) -> Result<Option<NegotiationThread>, Error> {
        Ok(self.tables.lock().unwrap().threads.get(&thread_id).cloned())
    }

    async fn get_user_threads(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NegotiationThread>, Error> {
        let tables = self.tables.lock().unwrap();
        let mut threads: Vec<NegotiationThread> = tables
            .threads
            .values()
            .filter(|t| t.initiator_id == user_id || t.counterparty_id == user_id)
            .cloned()
            .collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(threads
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn get_thread_events(&self, thread_id: Uuid) -> Result<Vec<OfferEvent>, Error> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .events
            .get(&thread_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_events_after(
        &self,
        thread_id: Uuid,
        after_sequence: i64,
        limit: i64,
    ) -> Result<Vec<OfferEvent>, Error> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .events
            .get(&thread_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.sequence > after_sequence)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_event(
        &self,
        thread_id: Uuid,
        expected_sequence: i64,
        event: &NewOfferEvent,
        status: NegotiationStatus,
        agreed_price: Option<i64>,
    ) -> Result<Option<OfferEvent>, Error> {
        let racing = self.racing_append.lock().unwrap().take();
        let mut tables = self.tables.lock().unwrap();

        if let Some(racing) = racing {
            Self::push_event(&mut tables, thread_id, &racing);
        }

        let current = match tables.threads.get(&thread_id) {
            Some(thread) => thread.last_sequence,
            None => return Err(Error::RowNotFound),
        };
        if current != expected_sequence {
            return Ok(None);
        }

        let row = Self::push_event(&mut tables, thread_id, event);
        if let Some(thread) = tables.threads.get_mut(&thread_id) {
            thread.status = status;
            if agreed_price.is_some() {
                thread.agreed_price = agreed_price;
            }
        }
        Ok(row)
    }
}

#[async_trait]
impl SettlementExt for MemoryStore {
    async fn get_settlement(&self, thread_id: Uuid) -> Result<Option<Settlement>, Error> {
        Ok(self.tables.lock().unwrap().settlements.get(&thread_id).cloned())
    }

    async fn create_pending_settlement(
        &self,
        thread_id: Uuid,
        agreed_price: i64,
        payload: serde_json::Value,
    ) -> Result<Settlement, Error> {
        let mut tables = self.tables.lock().unwrap();
        let settlement = tables
            .settlements
            .entry(thread_id)
            .or_insert_with(|| Settlement {
                id: Uuid::new_v4(),
                thread_id,
                agreed_price,
                payload,
                status: SettlementStatus::Pending,
                order_id: None,
                order_number: None,
                attempts: 0,
                last_error: None,
                next_attempt_at: Utc::now(),
                created_at: Utc::now(),
                settled_at: None,
            });
        Ok(settlement.clone())
    }

    async fn mark_settlement_settled(
        &self,
        thread_id: Uuid,
        order: &OrderRef,
    ) -> Result<Settlement, Error> {
        let mut tables = self.tables.lock().unwrap();
        let settlement = tables
            .settlements
            .get_mut(&thread_id)
            .ok_or(Error::RowNotFound)?;
        settlement.status = SettlementStatus::Settled;
        settlement.order_id = Some(order.id);
        settlement.order_number = Some(order.order_number.clone());
        settlement.last_error = None;
        settlement.settled_at = Some(Utc::now());
        Ok(settlement.clone())
    }

    async fn record_settlement_failure(
        &self,
        thread_id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<Settlement, Error> {
        let mut tables = self.tables.lock().unwrap();
        let settlement = tables
            .settlements
            .get_mut(&thread_id)
            .filter(|s| s.status == SettlementStatus::Pending)
            .ok_or(Error::RowNotFound)?;
        settlement.attempts += 1;
        settlement.last_error = Some(error.to_string());
        settlement.next_attempt_at = next_attempt_at;
        Ok(settlement.clone())
    }

    async fn get_due_settlements(&self, limit: i64) -> Result<Vec<Settlement>, Error> {
        let now = Utc::now();
        let tables = self.tables.lock().unwrap();
        let mut due: Vec<Settlement> = tables
            .settlements
            .values()
            .filter(|s| s.status == SettlementStatus::Pending && s.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_attempt_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn get_unsettled_agreements(&self, limit: i64) -> Result<Vec<NegotiationThread>, Error> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .threads
            .values()
            .filter(|t| {
                t.status == NegotiationStatus::Agreed && !tables.settlements.contains_key(&t.id)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OrderExt for MemoryStore {
    async fn create_negotiated_order(
        &self,
        thread_id: Uuid,
        agreed_price: i64,
        payload: serde_json::Value,
    ) -> Result<NegotiatedOrder, Error> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_orders) {
            return Err(Error::PoolTimedOut);
        }

        let mut tables = self.tables.lock().unwrap();
        let order = tables
            .orders
            .entry(thread_id)
            .or_insert_with(|| NegotiatedOrder {
                id: Uuid::new_v4(),
                order_number: format!("NEG-{}", &Uuid::new_v4().to_string()[..8]),
                thread_id,
                agreed_price,
                payload,
                created_at: Utc::now(),
            });
        Ok(order.clone())
    }
}

#[async_trait]
impl NotificationExt for MemoryStore {
    async fn store_notification(
        &self,
        user_id: Uuid,
        notification_type: &str,
        thread_id: Option<Uuid>,
        _metadata: Option<serde_json::Value>,
        _message: String,
    ) -> Result<(), Error> {
        if Self::take_failure(&self.failing_notifications) {
            return Err(Error::PoolTimedOut);
        }
        self.tables.lock().unwrap().notifications.push(StoredNotification {
            user_id,
            notification_type: notification_type.to_string(),
            thread_id,
        });
        Ok(())
    }
}
