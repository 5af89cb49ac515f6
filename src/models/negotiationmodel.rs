// models/negotiationmodel.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::usermodel::UserRole;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "party_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Initiator,
    Counterparty,
}

impl PartyRole {
    pub fn to_str(&self) -> &str {
        match self {
            PartyRole::Initiator => "initiator",
            PartyRole::Counterparty => "counterparty",
        }
    }

    pub fn other(&self) -> PartyRole {
        match self {
            PartyRole::Initiator => PartyRole::Counterparty,
            PartyRole::Counterparty => PartyRole::Initiator,
        }
    }
}

/// What is being bargained over. The counterparty's marketplace role
/// follows from it.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "negotiation_context", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    ProductCart,
    ServiceRequest,
    DriverTask,
}

impl ContextKind {
    pub fn to_str(&self) -> &str {
        match self {
            ContextKind::ProductCart => "product_cart",
            ContextKind::ServiceRequest => "service_request",
            ContextKind::DriverTask => "driver_task",
        }
    }

    /// The role a counterparty must hold for this kind of negotiation.
    pub fn counterparty_role(&self) -> UserRole {
        match self {
            ContextKind::ProductCart => UserRole::StoreOwner,
            ContextKind::ServiceRequest => UserRole::Worker,
            ContextKind::DriverTask => UserRole::Driver,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "negotiation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    NoOffer,
    Pending,
    Agreed,
    Rejected,
    Cancelled,
}

impl NegotiationStatus {
    pub fn to_str(&self) -> &str {
        match self {
            NegotiationStatus::NoOffer => "no_offer",
            NegotiationStatus::Pending => "pending",
            NegotiationStatus::Agreed => "agreed",
            NegotiationStatus::Rejected => "rejected",
            NegotiationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationStatus::Agreed | NegotiationStatus::Rejected | NegotiationStatus::Cancelled
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "offer_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OfferKind {
    Propose,
    Accept,
    Reject,
    Message,
    Cancel,
}

impl OfferKind {
    pub fn to_str(&self) -> &str {
        match self {
            OfferKind::Propose => "propose",
            OfferKind::Accept => "accept",
            OfferKind::Reject => "reject",
            OfferKind::Message => "message",
            OfferKind::Cancel => "cancel",
        }
    }

    pub fn requires_amount(&self) -> bool {
        matches!(self, OfferKind::Propose | OfferKind::Accept)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct NegotiationThread {
    pub id: Uuid,
    pub initiator_id: Uuid,
    pub counterparty_id: Uuid,
    pub context_kind: ContextKind,
    pub context_ref: Option<Uuid>,
    pub reference_price: i64,
    pub payload: serde_json::Value,
    pub status: NegotiationStatus,
    pub agreed_price: Option<i64>,
    pub last_sequence: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NegotiationThread {
    pub fn party_of(&self, user_id: Uuid) -> Option<PartyRole> {
        if user_id == self.initiator_id {
            Some(PartyRole::Initiator)
        } else if user_id == self.counterparty_id {
            Some(PartyRole::Counterparty)
        } else {
            None
        }
    }

    pub fn participant_id(&self, role: PartyRole) -> Uuid {
        match role {
            PartyRole::Initiator => self.initiator_id,
            PartyRole::Counterparty => self.counterparty_id,
        }
    }
}

/// One ledger entry. Never updated or deleted once written.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct OfferEvent {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub sequence: i64,
    pub author_id: Uuid,
    pub author_role: PartyRole,
    pub kind: OfferKind,
    pub amount: Option<i64>,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An action that has not been appended yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOfferEvent {
    pub author_id: Uuid,
    pub author_role: PartyRole,
    pub kind: OfferKind,
    pub amount: Option<i64>,
    pub body: Option<String>,
}

impl NewOfferEvent {
    /// True when `event` is the same logical action, i.e. a client retry.
    pub fn same_action_as(&self, event: &OfferEvent) -> bool {
        self.author_role == event.author_role
            && self.kind == event.kind
            && self.amount == event.amount
            && self.body == event.body
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ActiveOffer {
    pub amount: i64,
    pub author: PartyRole,
    pub sequence: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "settlement_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Settled,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Settlement {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub agreed_price: i64,
    pub payload: serde_json::Value,
    pub status: SettlementStatus,
    pub order_id: Option<Uuid>,
    pub order_number: Option<String>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Settlement {
    pub fn order_ref(&self) -> Option<OrderRef> {
        match (self.order_id, &self.order_number) {
            (Some(id), Some(order_number)) => Some(OrderRef {
                id,
                order_number: order_number.clone(),
            }),
            _ => None,
        }
    }
}

/// Handle to the order/job record created from an agreed negotiation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OrderRef {
    pub id: Uuid,
    pub order_number: String,
}

/// Transient settlement state shown next to the ledger-derived status.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementDisplay {
    None,
    OrderPending,
    OrderCreated,
}

impl SettlementDisplay {
    pub fn from_settlement(settlement: Option<&Settlement>) -> Self {
        match settlement.map(|s| s.status) {
            None => SettlementDisplay::None,
            Some(SettlementStatus::Pending) => SettlementDisplay::OrderPending,
            Some(SettlementStatus::Settled) => SettlementDisplay::OrderCreated,
        }
    }
}
