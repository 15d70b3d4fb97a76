//! Sweep over stale pending transactions that asks each gateway for the
//! authoritative status and feeds the answer through the webhook path.

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::billing_service::{BillingService, WebhookOutcome};
use super::error::{BillingError, BillingResult};
use crate::domain::{
    DetailsFieldFilter, EventKind, NormalizedEvent, Outcome, ProviderRef, Transaction,
};

pub const RECONCILED_STATUS: &str = "reconciled";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl BillingService {
    pub async fn reconcile(&self, older_than: Duration, limit: i64) -> BillingResult<ReconcileReport> {
        let cutoff = Utc::now() - older_than;
        let pending = self
            .repository()
            .list_pending_before(cutoff, limit)
            .await?;
        info!(count = pending.len(), cutoff = %cutoff, "Reconciling pending transactions");

        let mut report = ReconcileReport::default();
        for tx in pending {
            report.checked += 1;
            let id = tx.id();
            match self.reconcile_one(tx).await {
                Ok(true) => report.updated += 1,
                Ok(false) => report.unchanged += 1,
                Err(e) => {
                    warn!(transaction_id = %id, error = %e, kind = e.kind(), "Reconciliation failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            checked = report.checked,
            updated = report.updated,
            unchanged = report.unchanged,
            failed = report.failed,
            "Reconciliation finished"
        );
        Ok(report)
    }

    async fn reconcile_one(&self, tx: Transaction) -> BillingResult<bool> {
        let client = self.client(tx.gateway())?;
        let status = client
            .fetch_status(tx.details())
            .await
            .map_err(|e| BillingError::from_gateway(tx.id(), tx.gateway(), e))?;

        let (kind, outcome) = match status {
            Some(Outcome::Completed) => (EventKind::Confirmed, Outcome::Completed),
            Some(Outcome::Failed) => (EventKind::Failed, Outcome::Failed),
            Some(Outcome::Pending) | None => return Ok(false),
        };

        let event = synthesized_event(&tx, kind, outcome);
        match self.apply_event(tx, event).await? {
            WebhookOutcome::Applied { .. } => Ok(true),
            WebhookOutcome::Duplicate { .. } | WebhookOutcome::Ignored { .. } => Ok(false),
        }
    }
}

fn synthesized_event(tx: &Transaction, kind: EventKind, outcome: Outcome) -> NormalizedEvent {
    let provider_ref = tx
        .details()
        .provider_ref()
        .unwrap_or_else(|| ProviderRef::new(tx.id().to_string()));
    let lookup = tx
        .details()
        .reference_filter()
        .unwrap_or_else(|| DetailsFieldFilter::equals(["id"], tx.id().to_string()));
    NormalizedEvent::new(provider_ref, kind, outcome, RECONCILED_STATUS, lookup)
}
