use thiserror::Error;
use uuid::Uuid;

use super::gateway::Gateway;
use super::transaction::TransactionStatus;
use crate::validation::ValidationError;

/// Aggregate rule violations. None of these mutate the transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("details for {details} cannot be attached to a {gateway} transaction")]
    DetailsMismatch { gateway: Gateway, details: Gateway },

    #[error("transaction {id}: cannot {action} while {from}")]
    InvalidTransition {
        id: Uuid,
        from: TransactionStatus,
        action: String,
    },

    #[error("transaction {id}: refund of {requested} exceeds refundable balance {refundable}")]
    RefundExceedsCaptured {
        id: Uuid,
        requested: i64,
        refundable: i64,
    },

    #[error("transaction {id}: refund key {key} already recorded for {recorded}, not {requested}")]
    RefundKeyReused {
        id: Uuid,
        key: String,
        recorded: i64,
        requested: i64,
    },

    #[error("transaction {id}: provider reported amount {reported}, expected {expected}")]
    AmountMismatch {
        id: Uuid,
        expected: i64,
        reported: i64,
    },
}
