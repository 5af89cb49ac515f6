use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    models::negotiationmodel::*,
    service::negotiation_machine::NegotiationState,
    utils::currency::PriceDelta,
};

// Thread DTOs
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct OpenNegotiationDto {
    pub counterparty_id: Uuid,

    pub context_kind: ContextKind,

    pub context_ref: Option<Uuid>,

    #[serde(default)]
    #[validate(range(min = 0, message = "Reference price cannot be negative"))]
    pub reference_price: i64,

    /// Cart, service request or task details carried into the order.
    pub payload: Option<serde_json::Value>,
}

// Action DTOs. Amounts are whole tögrög.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ProposeDto {
    #[validate(range(min = 1, message = "Offer must be a positive amount"))]
    pub amount: i64,

    #[validate(length(max = 1000, message = "Note must be at most 1000 characters"))]
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct AcceptDto {
    /// The amount the caller saw; must still be the active offer.
    #[validate(range(min = 1, message = "Amount must be positive"))]
    pub amount: i64,
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct RejectDto {
    #[validate(length(max = 1000, message = "Reason must be at most 1000 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct SendMessageDto {
    #[validate(length(min = 1, max = 5000, message = "Message must be between 1 and 5000 characters"))]
    pub body: String,
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct CancelDto {
    #[validate(length(max = 1000, message = "Reason must be at most 1000 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub after: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub after: Option<i64>,
}

// Responses
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NegotiationView {
    pub thread: NegotiationThread,
    pub your_role: PartyRole,
    pub state: NegotiationState,
    pub awaiting: Option<PartyRole>,
    pub your_turn: bool,
    pub allowed_actions: Vec<OfferKind>,
    pub settlement: SettlementDisplay,
    pub order: Option<OrderRef>,
    /// Active offer (or agreed price) against the reference price.
    pub reference_delta: Option<PriceDelta>,
    pub suggested_counter_offers: Vec<i64>,
    pub recent_events: Vec<OfferEvent>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubmissionResponse {
    pub event: OfferEvent,
    pub state: NegotiationState,
    /// True when the request repeated the latest entry and nothing was written.
    pub duplicate: bool,
    pub settlement: SettlementDisplay,
    pub order: Option<OrderRef>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventsPage {
    pub events: Vec<OfferEvent>,
    pub next_cursor: i64,
    pub has_more: bool,
}
