use thiserror::Error;
use uuid::Uuid;
use axum::http::StatusCode;

use crate::{
    error::HttpError,
    models::negotiationmodel::{NegotiationStatus, OfferKind},
};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cannot {} while the negotiation is {}: {}", .action.to_str(), .status.to_str(), .reason)]
    IllegalTransition {
        action: OfferKind,
        status: NegotiationStatus,
        reason: String,
    },

    #[error("The price changed to {current}, the offer of {attempted} is no longer available")]
    StaleOffer { current: i64, attempted: i64 },

    #[error("Settlement for negotiation {thread_id} failed: {reason}")]
    Settlement { thread_id: Uuid, reason: String },

    #[error("Negotiation {0} not found")]
    ThreadNotFound(Uuid),

    #[error("User {0} is not a participant of negotiation {1}")]
    NotParticipant(Uuid, Uuid),

    #[error("Ledger for negotiation {0} moved past sequence {1}")]
    LedgerConflict(Uuid, i64),

    #[error("Ledger for negotiation {0} is corrupt at sequence {1}: {2}")]
    CorruptLedger(Uuid, i64, String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Transport(err.to_string())
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(err: redis::RedisError) -> Self {
        ServiceError::Transport(err.to_string())
    }
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        let status = error.status_code();
        match error {
            // Internals stay in the logs.
            ServiceError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                HttpError::new("Negotiation store is unavailable, please retry", status)
            }
            ServiceError::CorruptLedger(..) => {
                tracing::error!("{}", error);
                HttpError::server_error(crate::error::ErrorMessage::ServerError.to_string())
            }
            _ => HttpError::new(error.to_string(), status),
        }
    }
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,

            ServiceError::IllegalTransition { .. }
            | ServiceError::StaleOffer { .. } => StatusCode::CONFLICT,

            ServiceError::ThreadNotFound(_) => StatusCode::NOT_FOUND,

            ServiceError::NotParticipant(_, _) => StatusCode::FORBIDDEN,

            ServiceError::Settlement { .. } => StatusCode::ACCEPTED,

            ServiceError::LedgerConflict(_, _)
            | ServiceError::Transport(_)
            | ServiceError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,

            ServiceError::CorruptLedger(..) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn illegal(action: OfferKind, status: NegotiationStatus, reason: impl Into<String>) -> Self {
        ServiceError::IllegalTransition {
            action,
            status,
            reason: reason.into(),
        }
    }
}
