//! Domain events appended to the outbox alongside every committed write.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transaction::{TransactionStatus, Transition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    TransactionCreated {
        id: Uuid,
    },
    TransactionUpdated {
        id: Uuid,
        old_status: TransactionStatus,
        new_status: TransactionStatus,
    },
    TransactionRefunded {
        id: Uuid,
        amount: i64,
    },
    ReconciliationRequired {
        id: Uuid,
        reason: String,
    },
}

impl DomainEvent {
    pub fn transaction_id(&self) -> Uuid {
        match self {
            DomainEvent::TransactionCreated { id }
            | DomainEvent::TransactionUpdated { id, .. }
            | DomainEvent::TransactionRefunded { id, .. }
            | DomainEvent::ReconciliationRequired { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::TransactionCreated { .. } => "TransactionCreated",
            DomainEvent::TransactionUpdated { .. } => "TransactionUpdated",
            DomainEvent::TransactionRefunded { .. } => "TransactionRefunded",
            DomainEvent::ReconciliationRequired { .. } => "ReconciliationRequired",
        }
    }

    /// Events describing one committed change to a transaction.
    pub fn for_change(
        id: Uuid,
        transition: Option<Transition>,
        refunded: Option<i64>,
        warning: Option<&str>,
    ) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        if let Some(transition) = transition.filter(Transition::changes_status) {
            events.push(DomainEvent::TransactionUpdated {
                id,
                old_status: transition.from,
                new_status: transition.to,
            });
        }
        if let Some(amount) = refunded {
            events.push(DomainEvent::TransactionRefunded { id, amount });
        }
        if let Some(reason) = warning {
            events.push(DomainEvent::ReconciliationRequired {
                id,
                reason: reason.to_string(),
            });
        }
        events
    }
}
