use thiserror::Error;
use uuid::Uuid;

use crate::domain::{DomainError, Gateway, TransactionStatus};
use crate::ports::{GatewayError, RepositoryError, WebhookRefusal};
use crate::validation::ValidationError;

/// Everything a billing command or query can fail with. Messages carry the
/// transaction id and gateway where known, never credentials.
#[derive(Error, Debug)]
pub enum BillingError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("transaction {0} not found")]
    NotFound(Uuid),

    #[error("no {gateway} transaction matches {lookup}")]
    UnknownTransaction { gateway: Gateway, lookup: String },

    #[error("unknown gateway {0}")]
    UnknownGateway(String),

    #[error("gateway {0} is not configured")]
    GatewayNotConfigured(Gateway),

    #[error("transaction {id}: cannot {action} while {from}")]
    InvalidTransition {
        id: Uuid,
        from: TransactionStatus,
        action: String,
    },

    #[error("transaction {id}: refund exceeds captured amount ({reason})")]
    RefundExceedsCaptured { id: Uuid, reason: String },

    #[error("transaction {id}: provider reported amount {reported}, expected {expected}")]
    AmountMismatch {
        id: Uuid,
        expected: i64,
        reported: i64,
    },

    #[error("{gateway} unavailable for transaction {id}: {reason}")]
    GatewayUnavailable {
        id: Uuid,
        gateway: Gateway,
        reason: String,
    },

    #[error("{gateway} rejected transaction {id}: {reason}")]
    GatewayRejected {
        id: Uuid,
        gateway: Gateway,
        reason: String,
    },

    #[error("{gateway} already captured transaction {id}: {reason}")]
    AlreadyCaptured {
        id: Uuid,
        gateway: Gateway,
        reason: String,
    },

    #[error("invalid {gateway} webhook signature: {reason}")]
    InvalidSignature { gateway: Gateway, reason: String },

    #[error("malformed {gateway} payload: {reason}")]
    Malformed { gateway: Gateway, reason: String },

    #[error("{gateway} does not support this operation: {reason}")]
    Unsupported { gateway: Gateway, reason: String },

    #[error("transaction {id}: refund {key} was already recorded with a different amount")]
    RefundKeyReused { id: Uuid, key: String },

    #[error("transaction {id} kept changing; gave up after {attempts} attempts")]
    Conflict { id: Uuid, attempts: u32 },

    #[error("storage error: {0}")]
    Storage(RepositoryError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Short machine-readable kind for logs and audit trails.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::Validation(_) => "validation",
            BillingError::NotFound(_) | BillingError::UnknownTransaction { .. } => "not_found",
            BillingError::UnknownGateway(_) => "unknown_gateway",
            BillingError::GatewayNotConfigured(_) => "gateway_not_configured",
            BillingError::InvalidTransition { .. } => "invalid_transition",
            BillingError::RefundExceedsCaptured { .. } => "refund_exceeds_captured",
            BillingError::AmountMismatch { .. } => "amount_mismatch",
            BillingError::GatewayUnavailable { .. } => "gateway_unavailable",
            BillingError::GatewayRejected { .. } => "gateway_rejected",
            BillingError::AlreadyCaptured { .. } => "already_captured",
            BillingError::InvalidSignature { .. } => "invalid_signature",
            BillingError::Malformed { .. } => "malformed",
            BillingError::Unsupported { .. } => "unsupported",
            BillingError::RefundKeyReused { .. } => "refund_key_reused",
            BillingError::Conflict { .. } => "conflict",
            BillingError::Storage(_) => "storage",
            BillingError::Internal(_) => "internal",
        }
    }

    /// How a failed callback is reported back to the provider.
    pub fn webhook_refusal(&self) -> WebhookRefusal {
        match self {
            BillingError::InvalidSignature { .. } => WebhookRefusal::Unauthorized,
            BillingError::Malformed { .. } | BillingError::Validation(_) => WebhookRefusal::Malformed,
            BillingError::UnknownGateway(_)
            | BillingError::GatewayNotConfigured(_)
            | BillingError::Unsupported { .. } => WebhookRefusal::Unsupported,
            BillingError::NotFound(_) | BillingError::UnknownTransaction { .. } => {
                WebhookRefusal::UnknownTransaction
            }
            BillingError::AmountMismatch { .. } => WebhookRefusal::AmountMismatch,
            BillingError::InvalidTransition { .. }
            | BillingError::RefundExceedsCaptured { .. }
            | BillingError::RefundKeyReused { .. }
            | BillingError::AlreadyCaptured { .. } => WebhookRefusal::InvalidState,
            BillingError::GatewayUnavailable { .. }
            | BillingError::GatewayRejected { .. }
            | BillingError::Conflict { .. }
            | BillingError::Storage(_)
            | BillingError::Internal(_) => WebhookRefusal::Internal,
        }
    }

    /// Attaches transaction id and gateway to an adapter failure.
    pub fn from_gateway(id: Uuid, gateway: Gateway, err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(reason) => BillingError::GatewayUnavailable {
                id,
                gateway,
                reason,
            },
            GatewayError::Rejected(reason) => BillingError::GatewayRejected {
                id,
                gateway,
                reason,
            },
            GatewayError::RefundExceedsCaptured(reason) => {
                BillingError::RefundExceedsCaptured { id, reason }
            }
            GatewayError::AlreadyCaptured(reason) => BillingError::AlreadyCaptured {
                id,
                gateway,
                reason,
            },
            GatewayError::InvalidSignature(reason) => {
                BillingError::InvalidSignature { gateway, reason }
            }
            GatewayError::UnrecognizedEventKind(reason) | GatewayError::Malformed(reason) => {
                BillingError::Malformed { gateway, reason }
            }
            GatewayError::Unsupported(reason) => BillingError::Unsupported { gateway, reason },
        }
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(e) => BillingError::Validation(e),
            DomainError::DetailsMismatch { .. } => {
                BillingError::Validation(ValidationError::new("details", err.to_string()))
            }
            DomainError::InvalidTransition { id, from, action } => {
                BillingError::InvalidTransition { id, from, action }
            }
            DomainError::RefundExceedsCaptured {
                id,
                requested,
                refundable,
            } => BillingError::RefundExceedsCaptured {
                id,
                reason: format!("requested {}, refundable {}", requested, refundable),
            },
            DomainError::RefundKeyReused { id, key, .. } => {
                BillingError::RefundKeyReused { id, key }
            }
            DomainError::AmountMismatch {
                id,
                expected,
                reported,
            } => BillingError::AmountMismatch {
                id,
                expected,
                reported,
            },
        }
    }
}

impl From<RepositoryError> for BillingError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => BillingError::NotFound(id),
            RepositoryError::Query(reason) => {
                BillingError::Validation(ValidationError::new("filters", reason))
            }
            other => BillingError::Storage(other),
        }
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
