use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::ports::SignatureHeaders;
use crate::services::{WebhookOutcome, WebhookResponse};
use crate::AppState;

/// Provider callback addressed to a known gateway, e.g. `POST /webhooks/click`.
pub async fn receive(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    handle(&state, Some(&gateway), &headers, &body).await
}

/// Shared callback URL; the gateway is detected from headers and payload.
pub async fn receive_detected(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    handle(&state, None, &headers, &body).await
}

async fn handle(
    state: &AppState,
    gateway: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<Value>, AppError> {
    let headers = signature_headers(headers);
    match state.webhooks.respond(gateway, body, &headers).await? {
        WebhookResponse::Reply(reply) => Ok(Json(reply)),
        WebhookResponse::Outcome(outcome) => Ok(Json(acknowledgement(&outcome))),
    }
}

fn signature_headers(headers: &HeaderMap) -> SignatureHeaders {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)))
        .collect()
}

fn acknowledgement(outcome: &WebhookOutcome) -> Value {
    match outcome {
        WebhookOutcome::Applied {
            transaction_id,
            status,
            warning,
        } => json!({
            "result": "applied",
            "transaction_id": transaction_id,
            "status": status,
            "warning": warning,
        }),
        WebhookOutcome::Duplicate { transaction_id } => json!({
            "result": "duplicate",
            "transaction_id": transaction_id,
        }),
        WebhookOutcome::Ignored { reason, .. } => json!({
            "result": "ignored",
            "reason": reason,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionStatus;
    use crate::ports::WebhookRefusal;
    use axum::http::HeaderValue;
    use uuid::Uuid;

    #[test]
    fn test_signature_headers_keep_every_readable_header() {
        let mut headers = HeaderMap::new();
        headers.insert("stripe-signature", HeaderValue::from_static("t=1,v1=abc"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let converted = signature_headers(&headers);
        assert_eq!(converted.get("Stripe-Signature"), Some("t=1,v1=abc"));
        assert!(converted.contains("content-type"));
    }

    #[test]
    fn test_acknowledgement_shapes() {
        let id = Uuid::new_v4();
        let applied = acknowledgement(&WebhookOutcome::Applied {
            transaction_id: id,
            status: TransactionStatus::Completed,
            warning: None,
        });
        assert_eq!(applied["result"], "applied");
        assert_eq!(applied["status"], "completed");

        let ignored = acknowledgement(&WebhookOutcome::Ignored {
            reason: "late".to_string(),
            refusal: WebhookRefusal::InvalidState,
        });
        assert_eq!(ignored["result"], "ignored");
    }
}
