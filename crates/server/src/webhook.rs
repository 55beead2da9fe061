//! Inbound call-event webhooks.
//!
//! The handler validates `CALL_ID`, queues the call event and holds the HTTP
//! request open until the dispatch worker has finished that item, so the
//! caller learns the outcome of its own call id.

use std::collections::HashMap;

use axum::{
    extract::{FromRequest, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use callsync_core::domain::call::scalar_text;
use callsync_core::{CallId, DispatchQueue, EnqueueError, QueueItem};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

pub const EVENT_HANDLER_PATH: &str = "/bx24-event-handler";
const FORM_CALL_ID_KEY: &str = "data[CALL_ID]";

#[derive(Clone)]
pub struct WebhookState {
    queue: DispatchQueue,
}

#[derive(Clone, Debug, Serialize)]
pub struct WebhookError {
    pub error: String,
}

pub fn router(queue: DispatchQueue) -> Router {
    Router::new()
        .route("/", get(root))
        .route(EVENT_HANDLER_PATH, post(call_event))
        .with_state(WebhookState { queue })
}

async fn root() -> &'static str {
    "App is running!"
}

pub async fn call_event(State(state): State<WebhookState>, request: Request) -> Response {
    let payload = read_payload(request).await;
    info!(
        event_name = "webhook.call_event.received",
        correlation_id = "ingress",
        payload = %without_auth(&payload),
        "call event webhook received"
    );

    let Some(call_id) = call_id_from(&payload) else {
        warn!(
            event_name = "webhook.call_event.invalid",
            correlation_id = "ingress",
            "call event webhook without CALL_ID"
        );
        return error_response(StatusCode::BAD_REQUEST, "Invalid request: Missing CALL_ID.");
    };

    let (item, completion) = QueueItem::new(call_id);
    let correlation_id = item.correlation_id.clone();
    let call_id = item.call_id.clone();

    if let Err(enqueue_error) = state.queue.enqueue(item).await {
        let message = match enqueue_error {
            EnqueueError::Full { .. } => "Call event queue is full, retry later.",
            EnqueueError::Closed => "Call event queue is shutting down.",
        };
        return error_response(StatusCode::SERVICE_UNAVAILABLE, message);
    }

    match completion.wait().await {
        Ok(()) => {
            info!(
                event_name = "webhook.call_event.responded",
                correlation_id = %correlation_id,
                call_id = %call_id,
                status = 200,
                "call event webhook answered"
            );
            (StatusCode::OK, "Call data processed successfully.").into_response()
        }
        Err(pipeline_error) => {
            warn!(
                event_name = "webhook.call_event.responded",
                correlation_id = %correlation_id,
                call_id = %call_id,
                status = 500,
                error = %pipeline_error,
                "call event webhook answered with failure"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, pipeline_error.to_string()).into_response()
        }
    }
}

/// Parses the body as form data when declared so, as JSON otherwise. An
/// unreadable body is treated as empty.
async fn read_payload(request: Request) -> Value {
    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

    if is_form {
        match Form::<HashMap<String, String>>::from_request(request, &()).await {
            Ok(Form(fields)) => Value::Object(
                fields.into_iter().map(|(key, value)| (key, Value::String(value))).collect(),
            ),
            Err(_) => Value::Null,
        }
    } else {
        match Json::<Value>::from_request(request, &()).await {
            Ok(Json(payload)) => payload,
            Err(_) => Value::Null,
        }
    }
}

fn call_id_from(payload: &Value) -> Option<CallId> {
    payload
        .get("data")
        .and_then(|data| data.get("CALL_ID"))
        .or_else(|| payload.get(FORM_CALL_ID_KEY))
        .and_then(scalar_text)
        .and_then(|raw| CallId::parse(&raw))
}

/// Platform webhooks carry application credentials under `auth`; keep them
/// out of the logs.
fn without_auth(payload: &Value) -> Value {
    match payload {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .filter(|(key, _)| *key != "auth" && !key.starts_with("auth["))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(WebhookError { error: message.to_string() })).into_response()
}
