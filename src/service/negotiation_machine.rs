// service/negotiation_machine.rs
//! Derives negotiation state from the offer ledger and gates new actions.
//!
//! Nothing here performs I/O. Folding the same ordered ledger always yields
//! the same state, so the cached status on a thread row can be thrown away
//! and rebuilt at any time.
//!
//! ```text
//! no_offer --propose--> pending --propose--> pending
//!    ^                     |
//!    +-------reject--------+--accept--> agreed
//! no_offer | pending --cancel--> cancelled
//! ```
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    models::negotiationmodel::*,
    service::{error::ServiceError, ledger},
};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationState {
    pub status: NegotiationStatus,
    pub active_offer: Option<ActiveOffer>,
    pub agreed_price: Option<i64>,
    pub last_sequence: i64,
}

impl Default for NegotiationState {
    fn default() -> Self {
        Self {
            status: NegotiationStatus::NoOffer,
            active_offer: None,
            agreed_price: None,
            last_sequence: 0,
        }
    }
}

impl NegotiationState {
    /// Folds an ordered ledger left to right.
    ///
    /// The ledger must be gap-free from sequence 1. An entry that the rules
    /// would have refused means the ledger was written around this machine,
    /// and is reported as corruption instead of being skipped.
    pub fn fold<'a, I>(thread_id: Uuid, events: I) -> Result<Self, ServiceError>
    where
        I: IntoIterator<Item = &'a OfferEvent>,
    {
        let mut state = Self::default();
        for event in events {
            debug_assert_eq!(event.thread_id, thread_id);
            state.apply(event)?;
        }
        Ok(state)
    }

    /// Validates and applies one persisted entry. Any refusal is reported
    /// as ledger corruption.
    pub fn apply(&mut self, event: &OfferEvent) -> Result<(), ServiceError> {
        if event.sequence != self.last_sequence + 1 {
            return Err(ServiceError::CorruptLedger(
                event.thread_id,
                event.sequence,
                format!("expected sequence {}", self.last_sequence + 1),
            ));
        }

        let action = NewOfferEvent {
            author_id: event.author_id,
            author_role: event.author_role,
            kind: event.kind,
            amount: event.amount,
            body: event.body.clone(),
        };
        self.validate(&action)
            .map_err(|e| ServiceError::CorruptLedger(event.thread_id, event.sequence, e.to_string()))?;
        *self = self.transition(&action, event.sequence);
        Ok(())
    }

    /// Checks whether `action` is legal from this state. Never mutates.
    pub fn validate(&self, action: &NewOfferEvent) -> Result<(), ServiceError> {
        ledger::check_entry(action)?;

        match action.kind {
            OfferKind::Message => Ok(()),

            OfferKind::Propose | OfferKind::Cancel => {
                if self.status.is_terminal() {
                    return Err(ServiceError::illegal(
                        action.kind,
                        self.status,
                        "the negotiation is closed",
                    ));
                }
                Ok(())
            }

            OfferKind::Accept | OfferKind::Reject => {
                let offer = self.outstanding_offer(action.kind)?;

                if offer.author == action.author_role {
                    return Err(ServiceError::illegal(
                        action.kind,
                        self.status,
                        "you cannot respond to your own offer",
                    ));
                }

                if action.kind == OfferKind::Accept {
                    let attempted = action.amount.unwrap_or_default();
                    if attempted != offer.amount {
                        return Err(ServiceError::StaleOffer {
                            current: offer.amount,
                            attempted,
                        });
                    }
                }
                Ok(())
            }
        }
    }

    /// True when `action` repeats the most recent ledger entry.
    pub fn is_retry_of(action: &NewOfferEvent, last: Option<&OfferEvent>) -> bool {
        last.map_or(false, |event| action.same_action_as(event))
    }

    /// Actions `party` may take right now, in the order a UI would offer them.
    pub fn allowed_actions(&self, party: PartyRole) -> Vec<OfferKind> {
        let mut actions = vec![OfferKind::Message];
        if self.status.is_terminal() {
            return actions;
        }

        actions.push(OfferKind::Propose);
        if let Some(offer) = self.active_offer {
            if offer.author != party {
                actions.push(OfferKind::Accept);
                actions.push(OfferKind::Reject);
            }
        }
        actions.push(OfferKind::Cancel);
        actions
    }

    /// Whose move it is, if anyone is being waited on.
    pub fn awaiting(&self) -> Option<PartyRole> {
        match (self.status, self.active_offer) {
            (NegotiationStatus::Pending, Some(offer)) => Some(offer.author.other()),
            _ => None,
        }
    }

    fn outstanding_offer(&self, kind: OfferKind) -> Result<ActiveOffer, ServiceError> {
        match (self.status, self.active_offer) {
            (NegotiationStatus::Pending, Some(offer)) => Ok(offer),
            _ => Err(ServiceError::illegal(
                kind,
                self.status,
                "there is no outstanding offer",
            )),
        }
    }

    // Caller has validated `action` against `self`.
    fn transition(&self, action: &NewOfferEvent, sequence: i64) -> Self {
        let mut next = Self {
            last_sequence: sequence,
            ..*self
        };

        match action.kind {
            OfferKind::Message => {}
            OfferKind::Propose => {
                next.status = NegotiationStatus::Pending;
                next.active_offer = Some(ActiveOffer {
                    amount: action.amount.unwrap_or_default(),
                    author: action.author_role,
                    sequence,
                });
            }
            OfferKind::Accept => {
                next.status = NegotiationStatus::Agreed;
                next.agreed_price = action.amount;
                next.active_offer = None;
            }
            OfferKind::Reject => {
                next.status = NegotiationStatus::NoOffer;
                next.active_offer = None;
            }
            OfferKind::Cancel => {
                next.status = NegotiationStatus::Cancelled;
                next.active_offer = None;
            }
        }
        next
    }

    /// State after `action` is appended at `sequence`. Validates first.
    pub fn after(&self, action: &NewOfferEvent, sequence: i64) -> Result<Self, ServiceError> {
        self.validate(action)?;
        Ok(self.transition(action, sequence))
    }
}
