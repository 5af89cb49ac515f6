use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query},
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Extension, Json, Router,
};
use futures::stream::{Stream, StreamExt};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::negotiationdtos::*,
    error::HttpError,
    middleware::JWTAuthMiddeware,
    service::negotiation_service::NegotiationIntent,
    AppState,
};

pub fn negotiation_handler() -> Router {
    Router::new()
        .route("/", get(list_negotiations).post(open_negotiation))
        .route("/:thread_id", get(get_negotiation))
        .route("/:thread_id/events", get(get_events))
        .route("/:thread_id/stream", get(stream_events))
        .route("/:thread_id/propose", post(propose))
        .route("/:thread_id/accept", post(accept))
        .route("/:thread_id/reject", post(reject))
        .route("/:thread_id/messages", post(send_message))
        .route("/:thread_id/cancel", post(cancel))
}

pub async fn open_negotiation(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<OpenNegotiationDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let thread = app_state
        .negotiation_service
        .open_thread(&auth.user, body)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": thread
    })))
}

pub async fn list_negotiations(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let page = pagination.page.unwrap_or(1).max(1);
    let limit = pagination.limit.unwrap_or(20).clamp(1, 100) as i64;
    let offset = (page as i64 - 1) * limit;

    let threads = app_state
        .negotiation_service
        .list_threads(&auth.user, limit, offset)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": threads,
        "page": page,
        "limit": limit
    })))
}

pub async fn get_negotiation(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(thread_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let view = app_state
        .negotiation_service
        .view(thread_id, &auth.user)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": view
    })))
}

pub async fn get_events(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(thread_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let page = app_state
        .negotiation_service
        .entries_since(thread_id, &auth.user, query.after.unwrap_or(0), query.limit)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": page
    })))
}

/// Server-sent events: ledger entries after the cursor, then live ones.
/// A reconnecting client resumes from `Last-Event-ID`.
pub async fn stream_events(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(thread_id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HttpError> {
    let after = stream_cursor(&headers, query.after);

    let entries = app_state
        .negotiation_service
        .subscribe(thread_id, &auth.user, after)
        .await?;

    let events = entries.map(move |entry| {
        let event = match entry {
            Ok(offer) => Event::default()
                .id(offer.sequence.to_string())
                .event(offer.kind.to_str())
                .json_data(&offer)
                .unwrap_or_else(|_| Event::default().event("error").data("unserializable entry")),
            Err(e) => {
                tracing::warn!("Negotiation stream for {} ended: {}", thread_id, e);
                Event::default().event("error").data(e.to_string())
            }
        };
        Ok(event)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// `Last-Event-ID` wins over `?after=`: browsers reconnect to the original
/// URL and only the header moves forward.
fn stream_cursor(headers: &HeaderMap, after: Option<i64>) -> i64 {
    headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
        .or(after)
        .unwrap_or(0)
}

pub async fn propose(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(thread_id): Path<Uuid>,
    Json(body): Json<ProposeDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    submit(
        &app_state,
        &auth,
        thread_id,
        NegotiationIntent::Propose {
            amount: body.amount,
            note: body.note,
        },
    )
    .await
}

pub async fn accept(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(thread_id): Path<Uuid>,
    Json(body): Json<AcceptDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    submit(&app_state, &auth, thread_id, NegotiationIntent::Accept { amount: body.amount }).await
}

pub async fn reject(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(thread_id): Path<Uuid>,
    body: Option<Json<RejectDto>>,
) -> Result<impl IntoResponse, HttpError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    submit(&app_state, &auth, thread_id, NegotiationIntent::Reject { reason: body.reason }).await
}

pub async fn send_message(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(thread_id): Path<Uuid>,
    Json(body): Json<SendMessageDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    submit(&app_state, &auth, thread_id, NegotiationIntent::Message { body: body.body }).await
}

pub async fn cancel(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(thread_id): Path<Uuid>,
    body: Option<Json<CancelDto>>,
) -> Result<impl IntoResponse, HttpError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    submit(&app_state, &auth, thread_id, NegotiationIntent::Cancel { reason: body.reason }).await
}

async fn submit(
    app_state: &AppState,
    auth: &JWTAuthMiddeware,
    thread_id: Uuid,
    intent: NegotiationIntent,
) -> Result<Json<serde_json::Value>, HttpError> {
    let submission = app_state
        .negotiation_service
        .submit(thread_id, &auth.user, intent)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": submission
    })))
}
