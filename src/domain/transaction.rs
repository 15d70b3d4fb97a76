//! Transaction aggregate.
//! Framework-agnostic entity plus the state machine every write goes through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::currency::Currency;
use super::details::Details;
use super::error::DomainError;
use super::gateway::Gateway;
use super::provider::{EventKind, NormalizedEvent, Outcome};
use crate::validation::{validate_positive_amount, validate_tenant_id, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Canceled,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 6] = [
        TransactionStatus::Pending,
        TransactionStatus::Completed,
        TransactionStatus::Canceled,
        TransactionStatus::Failed,
        TransactionStatus::Refunded,
        TransactionStatus::PartiallyRefunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Canceled => "canceled",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    /// The complete edge table. Money-moved-wins edges out of `Canceled` and
    /// `Failed` are only reachable from provider reports.
    pub fn allows(self, next: TransactionStatus, origin: Origin) -> bool {
        use TransactionStatus::*;
        match (self, next) {
            (Pending, Completed) | (Pending, Canceled) | (Pending, Failed) => true,
            (Canceled, Completed) | (Failed, Completed) => origin == Origin::Provider,
            (Completed, PartiallyRefunded) | (Completed, Refunded) => true,
            (PartiallyRefunded, PartiallyRefunded) | (PartiallyRefunded, Refunded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| ValidationError::new("status", format!("unknown status {}", s)))
    }
}

/// Who asked for a change: a client command or a provider report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Command,
    Provider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

impl Transition {
    pub fn changes_status(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub amount: i64,
    pub idempotency_key: String,
    pub at: DateTime<Utc>,
}

/// Result of folding a provider event into the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventApplication {
    Applied(AppliedEvent),
    /// Already applied earlier; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppliedEvent {
    pub transition: Option<Transition>,
    pub refunded: Option<i64>,
    pub warning: Option<String>,
}

/// Every stored column of a transaction, used by repositories to rebuild the aggregate.
#[derive(Debug, Clone)]
pub struct TransactionParts {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: TransactionStatus,
    pub quantity: i64,
    pub currency: Currency,
    pub gateway: Gateway,
    pub details: Details,
    pub refunds: Vec<Refund>,
    pub applied_events: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    id: Uuid,
    tenant_id: Uuid,
    status: TransactionStatus,
    quantity: i64,
    currency: Currency,
    gateway: Gateway,
    details: Details,
    refunds: Vec<Refund>,
    applied_events: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl Transaction {
    pub fn new(
        id: Uuid,
        tenant_id: Uuid,
        quantity: i64,
        currency: Currency,
        gateway: Gateway,
        details: Details,
    ) -> Result<Self, DomainError> {
        validate_tenant_id(tenant_id)?;
        validate_positive_amount("quantity", quantity)?;
        ensure_details_match(gateway, &details)?;

        let now = Utc::now();
        Ok(Self {
            id,
            tenant_id,
            status: TransactionStatus::Pending,
            quantity,
            currency,
            gateway,
            details,
            refunds: Vec::new(),
            applied_events: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }

    pub fn from_parts(parts: TransactionParts) -> Result<Self, DomainError> {
        ensure_details_match(parts.gateway, &parts.details)?;
        Ok(Self {
            id: parts.id,
            tenant_id: parts.tenant_id,
            status: parts.status,
            quantity: parts.quantity,
            currency: parts.currency,
            gateway: parts.gateway,
            details: parts.details,
            refunds: parts.refunds,
            applied_events: parts.applied_events,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
            version: parts.version,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn gateway(&self) -> Gateway {
        self.gateway
    }

    pub fn details(&self) -> &Details {
        &self.details
    }

    pub fn refunds(&self) -> &[Refund] {
        &self.refunds
    }

    pub fn applied_events(&self) -> &[String] {
        &self.applied_events
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn refunded_total(&self) -> i64 {
        self.refunds.iter().map(|refund| refund.amount).sum()
    }

    pub fn refundable(&self) -> i64 {
        match self.status {
            TransactionStatus::Completed | TransactionStatus::PartiallyRefunded => {
                self.quantity - self.refunded_total()
            }
            _ => 0,
        }
    }

    /// Stable key handed to gateways for one command on this transaction.
    pub fn idempotency_key(&self, command: &str) -> String {
        format!("{}:{}", self.id, command)
    }

    /// Key for one refund command. Concurrent refunds carry different ids,
    /// so a provider never folds two of them into one.
    pub fn refund_key(&self, refund_id: Uuid) -> String {
        format!("{}:refund:{}", self.id, refund_id)
    }

    pub fn find_refund(&self, idempotency_key: &str) -> Option<&Refund> {
        self.refunds
            .iter()
            .find(|refund| refund.idempotency_key == idempotency_key)
    }

    pub fn has_refund(&self, idempotency_key: &str) -> bool {
        self.find_refund(idempotency_key).is_some()
    }

    /// Replaces the gateway details, e.g. with what `Prepare` returned.
    pub fn set_details(&mut self, details: Details) -> Result<(), DomainError> {
        ensure_details_match(self.gateway, &details)?;
        self.details = details;
        self.touch();
        Ok(())
    }

    /// Applies the outcome of an explicit Confirm. `Pending` leaves the aggregate untouched.
    pub fn confirm(&mut self, outcome: Outcome) -> Result<Option<Transition>, DomainError> {
        match outcome {
            Outcome::Pending => {
                self.ensure_status("confirm", &[TransactionStatus::Pending])?;
                Ok(None)
            }
            Outcome::Completed => self
                .transition_to(TransactionStatus::Completed, Origin::Command, "confirm")
                .map(Some),
            Outcome::Failed => self
                .transition_to(TransactionStatus::Failed, Origin::Command, "fail")
                .map(Some),
        }
    }

    /// Applies a capture the gateway reported in reply to Confirm. Funds have
    /// moved, so this follows the provider edges: a row canceled or failed
    /// meanwhile becomes Completed with a reconciliation warning. Already
    /// captured rows are left as they are.
    pub fn capture_reported(&mut self) -> Result<Option<AppliedEvent>, DomainError> {
        let from = self.status;
        if matches!(
            from,
            TransactionStatus::Completed
                | TransactionStatus::PartiallyRefunded
                | TransactionStatus::Refunded
        ) {
            return Ok(None);
        }
        let transition = self.transition_to(TransactionStatus::Completed, Origin::Provider, "complete")?;
        let warning = (from != TransactionStatus::Pending)
            .then(|| format!("gateway confirmed capture of a {} transaction", from));
        Ok(Some(AppliedEvent {
            transition: Some(transition),
            refunded: None,
            warning,
        }))
    }

    pub fn cancel(&mut self) -> Result<Transition, DomainError> {
        self.transition_to(TransactionStatus::Canceled, Origin::Command, "cancel")
    }

    /// Records a refund. Returns `None` when the same key was already recorded
    /// for the same amount; the same key with another amount is an error.
    pub fn refund(
        &mut self,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<Option<Transition>, DomainError> {
        if self.ensure_refund_key(amount, idempotency_key)? {
            return Ok(None);
        }
        validate_positive_amount("amount", amount)?;
        self.record_refund(amount, idempotency_key.to_string(), Origin::Command)
            .map(Some)
    }

    /// `true` when this exact refund is already recorded.
    pub fn ensure_refund_key(&self, amount: i64, idempotency_key: &str) -> Result<bool, DomainError> {
        match self.find_refund(idempotency_key) {
            Some(recorded) if recorded.amount == amount => Ok(true),
            Some(recorded) => Err(DomainError::RefundKeyReused {
                id: self.id,
                key: idempotency_key.to_string(),
                recorded: recorded.amount,
                requested: amount,
            }),
            None => Ok(false),
        }
    }

    /// Checks a refund without recording it.
    pub fn ensure_refundable(&self, amount: i64) -> Result<(), DomainError> {
        validate_positive_amount("amount", amount)?;
        self.ensure_status(
            "refund",
            &[
                TransactionStatus::Completed,
                TransactionStatus::PartiallyRefunded,
                TransactionStatus::Refunded,
            ],
        )?;
        let refundable = self.refundable();
        if amount > refundable {
            return Err(DomainError::RefundExceedsCaptured {
                id: self.id,
                requested: amount,
                refundable,
            });
        }
        Ok(())
    }

    /// Folds a provider report into the aggregate. Replays of an already applied
    /// report come back as `Duplicate`; anything off the edge table is rejected.
    pub fn apply_event(
        &mut self,
        event: &NormalizedEvent,
    ) -> Result<EventApplication, DomainError> {
        let key = event.dedupe_key();
        if self.applied_events.iter().any(|applied| applied == &key) {
            return Ok(EventApplication::Duplicate);
        }

        let mut applied = AppliedEvent::default();
        match (event.kind, event.outcome) {
            (EventKind::Prepared, _) | (EventKind::Confirmed, Outcome::Pending) => {
                self.ensure_status("prepare", &[TransactionStatus::Pending])?;
                self.ensure_amount(event.amount)?;
            }
            (EventKind::Confirmed, Outcome::Completed) => {
                self.ensure_amount(event.amount)?;
                let from = self.status;
                applied.transition = Some(self.transition_to(
                    TransactionStatus::Completed,
                    Origin::Provider,
                    "complete",
                )?);
                if from != TransactionStatus::Pending {
                    applied.warning = Some(format!(
                        "provider reported completion for a {} transaction",
                        from
                    ));
                }
            }
            (EventKind::Confirmed, Outcome::Failed) | (EventKind::Failed, _) => {
                applied.transition = Some(self.transition_to(
                    TransactionStatus::Failed,
                    Origin::Provider,
                    "fail",
                )?);
            }
            (EventKind::Canceled, _) => match self.status {
                TransactionStatus::Completed | TransactionStatus::PartiallyRefunded => {
                    let remaining = self.refundable();
                    applied.transition =
                        Some(self.record_refund(remaining, provider_key(&key), Origin::Provider)?);
                    applied.refunded = Some(remaining);
                }
                _ => {
                    applied.transition = Some(self.transition_to(
                        TransactionStatus::Canceled,
                        Origin::Provider,
                        "cancel",
                    )?);
                }
            },
            (EventKind::Refunded, _) => {
                self.ensure_status(
                    "refund",
                    &[
                        TransactionStatus::Completed,
                        TransactionStatus::PartiallyRefunded,
                        TransactionStatus::Refunded,
                    ],
                )?;
                let cumulative = event.amount.unwrap_or(self.quantity);
                let already = self.refunded_total();
                if cumulative <= already {
                    return Ok(EventApplication::Duplicate);
                }
                if cumulative > self.quantity {
                    return Err(DomainError::RefundExceedsCaptured {
                        id: self.id,
                        requested: cumulative - already,
                        refundable: self.quantity - already,
                    });
                }
                let delta = cumulative - already;
                applied.transition =
                    Some(self.record_refund(delta, provider_key(&key), Origin::Provider)?);
                applied.refunded = Some(delta);
            }
        }

        self.details.record_event(event);
        self.applied_events.push(key);
        self.touch();
        Ok(EventApplication::Applied(applied))
    }

    fn record_refund(
        &mut self,
        amount: i64,
        idempotency_key: String,
        origin: Origin,
    ) -> Result<Transition, DomainError> {
        self.ensure_refundable(amount)?;
        let next = if self.refunded_total() + amount == self.quantity {
            TransactionStatus::Refunded
        } else {
            TransactionStatus::PartiallyRefunded
        };
        let transition = self.transition_to(next, origin, "refund")?;
        self.refunds.push(Refund {
            amount,
            idempotency_key,
            at: self.updated_at,
        });
        Ok(transition)
    }

    fn transition_to(
        &mut self,
        next: TransactionStatus,
        origin: Origin,
        action: &str,
    ) -> Result<Transition, DomainError> {
        if !self.status.allows(next, origin) {
            return Err(self.invalid(action));
        }
        let transition = Transition {
            from: self.status,
            to: next,
        };
        self.status = next;
        self.touch();
        Ok(transition)
    }

    fn ensure_status(
        &self,
        action: &str,
        allowed: &[TransactionStatus],
    ) -> Result<(), DomainError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn ensure_amount(&self, reported: Option<i64>) -> Result<(), DomainError> {
        match reported {
            Some(reported) if reported != self.quantity => Err(DomainError::AmountMismatch {
                id: self.id,
                expected: self.quantity,
                reported,
            }),
            _ => Ok(()),
        }
    }

    fn invalid(&self, action: &str) -> DomainError {
        DomainError::InvalidTransition {
            id: self.id,
            from: self.status,
            action: action.to_string(),
        }
    }

    // Version is bumped once per persisted command; repeated touches in one
    // command only move `updated_at`.
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Marks the in-memory aggregate as one write ahead of `expected_version`.
    pub fn advance_version(&mut self, expected_version: i64) {
        self.version = expected_version + 1;
    }
}

fn provider_key(dedupe_key: &str) -> String {
    format!("provider:{}", dedupe_key)
}

fn ensure_details_match(gateway: Gateway, details: &Details) -> Result<(), DomainError> {
    if details.gateway() != gateway {
        return Err(DomainError::DetailsMismatch {
            gateway,
            details: details.gateway(),
        });
    }
    Ok(())
}
