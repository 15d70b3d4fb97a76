use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::BillingError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        let message = err.to_string();
        match err {
            BillingError::Validation(_) => AppError::Validation(message),
            BillingError::NotFound(_)
            | BillingError::UnknownTransaction { .. }
            | BillingError::UnknownGateway(_)
            | BillingError::GatewayNotConfigured(_) => AppError::NotFound(message),
            BillingError::InvalidSignature { .. } => AppError::Unauthorized(message),
            BillingError::Malformed { .. } => AppError::BadRequest(message),
            BillingError::InvalidTransition { .. }
            | BillingError::AlreadyCaptured { .. }
            | BillingError::RefundKeyReused { .. }
            | BillingError::Conflict { .. } => AppError::Conflict(message),
            BillingError::RefundExceedsCaptured { .. } | BillingError::AmountMismatch { .. } => {
                AppError::Unprocessable(message)
            }
            BillingError::GatewayRejected { .. } => AppError::PaymentDeclined(message),
            BillingError::Unsupported { .. } => AppError::NotImplemented(message),
            BillingError::GatewayUnavailable { .. } => AppError::Unavailable(message),
            BillingError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure");
                AppError::Internal("storage failure".to_string())
            }
            BillingError::Internal(e) => {
                tracing::error!(error = %e, "Internal failure");
                AppError::Internal("internal failure".to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Gateway, TransactionStatus};
    use crate::ports::RepositoryError;
    use uuid::Uuid;

    #[test]
    fn test_validation_error_status_code() {
        let error = AppError::Validation("Invalid input".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unknown_transaction_is_not_found() {
        let error: AppError = BillingError::UnknownTransaction {
            gateway: Gateway::Click,
            lookup: "merchant_trans_id = 42".to_string(),
        }
        .into();
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_signature_is_unauthorized() {
        let error: AppError = BillingError::InvalidSignature {
            gateway: Gateway::Stripe,
            reason: "mismatch".to_string(),
        }
        .into();
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_invalid_transition_is_conflict() {
        let error: AppError = BillingError::InvalidTransition {
            id: Uuid::new_v4(),
            from: TransactionStatus::Canceled,
            action: "refund".to_string(),
        }
        .into();
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_refund_exceeding_capture_is_unprocessable() {
        let error: AppError = BillingError::RefundExceedsCaptured {
            id: Uuid::new_v4(),
            reason: "requested 200, refundable 100".to_string(),
        }
        .into();
        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_gateway_unavailable_is_service_unavailable() {
        let error: AppError = BillingError::GatewayUnavailable {
            id: Uuid::new_v4(),
            gateway: Gateway::Octo,
            reason: "timeout".to_string(),
        }
        .into();
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_storage_error_hides_details() {
        let error: AppError =
            BillingError::Storage(RepositoryError::Database(sqlx::Error::PoolTimedOut)).into();
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error.to_string().contains("pool"));
    }

    #[tokio::test]
    async fn test_not_found_error_response() {
        let error = AppError::NotFound("Transaction not found".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
