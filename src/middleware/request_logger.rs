use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_BODY_LOG_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogging {
    pub log_body: bool,
}

pub async fn request_logger_middleware(
    State(logging): State<RequestLogging>,
    mut req: Request<Body>,
    next: Next<Body>,
) -> Response {
    // Reuse a caller-supplied id
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value = HeaderValue::from_str(&request_id).ok();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    if let Some(value) = header_value.clone() {
        req.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    if logging.log_body {
        let (parts, body) = req.into_parts();
        let bytes = match Bytes::from_request(Request::new(body), &()).await {
            Ok(bytes) => bytes,
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    method = %method,
                    uri = %uri,
                    "Request body too large or failed to read"
                );
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
            }
        };

        tracing::info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            body_size = bytes.len(),
            body = %describe_body(&bytes),
            "Incoming request"
        );

        req = Request::from_parts(parts, Body::from(bytes));
    } else {
        tracing::info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            "Incoming request"
        );
    }

    let mut response = next.run(req).await;

    let latency = start.elapsed();
    let status = response.status();
    if status.is_server_error() {
        tracing::error!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            latency_ms = latency.as_millis(),
            "Outgoing response"
        );
    } else {
        tracing::info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            latency_ms = latency.as_millis(),
            "Outgoing response"
        );
    }

    if let Some(value) = header_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn describe_body(bytes: &[u8]) -> String {
    if bytes.len() > MAX_BODY_LOG_SIZE {
        return format!("[{} bytes, not logged]", bytes.len());
    }
    crate::utils::sanitize::sanitize_payload(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Router};
    use tower::ServiceExt;

    fn app(log_body: bool) -> Router {
        Router::new()
            .route("/test", post(|body: String| async move { body }))
            .layer(axum::middleware::from_fn_with_state(
                RequestLogging { log_body },
                request_logger_middleware,
            ))
    }

    #[tokio::test]
    async fn test_request_logger_adds_request_id() {
        let app = app(false);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_request_logger_keeps_caller_request_id() {
        let app = app(false);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/test")
                    .header(REQUEST_ID_HEADER, "provider-retry-7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "provider-retry-7"
        );
    }

    #[test]
    fn test_describe_body_masks_secrets() {
        let body = br#"{"params":{"id":"abc"},"signature":"deadbeefcafebabe"}"#;
        let described = describe_body(body);
        assert!(described.contains("****"));
        assert!(!described.contains("deadbeefcafebabe"));
        assert_eq!(describe_body(b"click_trans_id=1"), "click_trans_id=1");
        assert_eq!(
            describe_body(&[b'a'; MAX_BODY_LOG_SIZE + 1]),
            "[1025 bytes, not logged]"
        );
    }

    #[tokio::test]
    async fn test_logged_body_still_reaches_the_handler() {
        let response = app(true)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/test")
                    .body(Body::from("merchant_trans_id=order-1"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = Bytes::from_request(Request::new(response.into_body()), &())
            .await
            .unwrap();
        assert_eq!(&body[..], b"merchant_trans_id=order-1");
    }
}
