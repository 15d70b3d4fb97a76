//! Billing orchestrator.
//!
//! Every command follows the same order: load, call the gateway, apply the
//! result to the aggregate, persist under the loaded version, and let the
//! repository append the domain events to the outbox in the same write.
//! Version conflicts reload and reapply; gateway results are never re-requested
//! because of a conflict.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{BillingError, BillingResult};
use super::retry::RetryPolicy;
use crate::adapters::gateways::GatewayRegistry;
use crate::config::BillingSettings;
use crate::domain::{
    AppliedEvent, Currency, Details, DetailsFieldFilter, DomainEvent, EventApplication, Gateway,
    NormalizedEvent, Outcome, Transaction, TransactionStatus,
};
use crate::ports::{
    FindParams, GatewayClient, GatewayError, PrepareRequest, RefundRequest, RepositoryError,
    TransactionRepository, WebhookQuery, WebhookRefusal,
};
use crate::validation::{validate_merchant_ref, validate_tenant_id, ValidationError};

#[derive(Debug, Clone)]
pub struct CreateTransaction {
    /// Caller-chosen id. Retrying a create with the same id returns the stored transaction.
    pub id: Option<Uuid>,
    pub tenant_id: Uuid,
    pub amount: i64,
    pub currency: Currency,
    pub gateway: Gateway,
    /// Reference handed to the provider. Defaults to the transaction id.
    pub merchant_ref: Option<String>,
    /// Gateway-specific details blob; decoded strictly against the gateway's schema.
    pub details: Option<Value>,
}

/// What happened to an inbound provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied {
        transaction_id: Uuid,
        status: TransactionStatus,
        warning: Option<String>,
    },
    Duplicate {
        transaction_id: Uuid,
    },
    /// Recognized but not applicable; the provider should stop retrying.
    Ignored {
        reason: String,
        refusal: WebhookRefusal,
    },
}

#[derive(Clone)]
pub struct BillingService {
    repo: Arc<dyn TransactionRepository>,
    gateways: GatewayRegistry,
    settings: BillingSettings,
    retry: RetryPolicy,
}

impl BillingService {
    pub fn new(
        repo: Arc<dyn TransactionRepository>,
        gateways: GatewayRegistry,
        settings: BillingSettings,
    ) -> Self {
        let retry = RetryPolicy::from_settings(&settings);
        Self {
            repo,
            gateways,
            settings,
            retry,
        }
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    pub(crate) fn repository(&self) -> &Arc<dyn TransactionRepository> {
        &self.repo
    }

    pub(crate) fn client(&self, gateway: Gateway) -> BillingResult<Arc<dyn GatewayClient>> {
        self.gateways
            .get(gateway)
            .ok_or(BillingError::GatewayNotConfigured(gateway))
    }

    pub async fn create(&self, command: CreateTransaction) -> BillingResult<Transaction> {
        validate_tenant_id(command.tenant_id)?;
        let client = self.client(command.gateway)?;
        let id = command.id.unwrap_or_else(Uuid::new_v4);

        if command.id.is_some() {
            match self.repo.get_by_id(command.tenant_id, id).await {
                Ok(existing) => {
                    info!(transaction_id = %id, tenant_id = %command.tenant_id, "Create replayed, returning stored transaction");
                    return Ok(existing);
                }
                Err(RepositoryError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let merchant_ref = match command.merchant_ref {
            Some(merchant_ref) => {
                validate_merchant_ref(&merchant_ref)?;
                merchant_ref
            }
            None => id.to_string(),
        };
        let details = match command.details {
            Some(blob) => Details::decode(command.gateway, blob)
                .map_err(|e| ValidationError::new("details", e.to_string()))?,
            None => Details::default_for(command.gateway, &merchant_ref),
        };
        let tx = Transaction::new(
            id,
            command.tenant_id,
            command.amount,
            command.currency,
            command.gateway,
            details,
        )?;

        let service = self.clone();
        detached(async move { service.prepare_and_store(client, tx).await }).await
    }

    async fn prepare_and_store(
        &self,
        client: Arc<dyn GatewayClient>,
        mut tx: Transaction,
    ) -> BillingResult<Transaction> {
        let request = PrepareRequest {
            transaction_id: tx.id(),
            idempotency_key: tx.idempotency_key("prepare"),
            amount: tx.quantity(),
            currency: tx.currency(),
            details: tx.details().clone(),
        };
        let client = client.as_ref();
        let request = &request;
        let prepared = self
            .retry
            .run(tx.gateway(), "prepare", move || client.prepare(request.clone()))
            .await;

        let mut events = vec![DomainEvent::TransactionCreated { id: tx.id() }];
        let mut rejection = None;
        match prepared {
            Ok(prepared) => {
                debug!(
                    transaction_id = %tx.id(),
                    gateway = %tx.gateway(),
                    provider_ref = ?prepared.provider_ref,
                    outcome = %prepared.outcome,
                    "Gateway prepared payment"
                );
                tx.set_details(prepared.details)?;
                // A new transaction only completes through Confirm or a provider report.
                if prepared.outcome == Outcome::Failed {
                    let transition = tx.confirm(Outcome::Failed)?;
                    events.extend(DomainEvent::for_change(tx.id(), transition, None, None));
                }
            }
            Err(GatewayError::Rejected(reason)) => {
                warn!(transaction_id = %tx.id(), gateway = %tx.gateway(), reason = %reason, "Gateway rejected payment");
                let transition = tx.confirm(Outcome::Failed)?;
                events.extend(DomainEvent::for_change(tx.id(), transition, None, None));
                rejection = Some(BillingError::GatewayRejected {
                    id: tx.id(),
                    gateway: tx.gateway(),
                    reason,
                });
            }
            Err(e) => return Err(BillingError::from_gateway(tx.id(), tx.gateway(), e)),
        }

        match self.repo.create(&tx, &events).await {
            Ok(()) => {}
            Err(RepositoryError::DuplicateId(id)) => {
                warn!(transaction_id = %id, "Concurrent create with the same id, returning stored transaction");
                return Ok(self.repo.get_by_id(tx.tenant_id(), id).await?);
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            transaction_id = %tx.id(),
            tenant_id = %tx.tenant_id(),
            gateway = %tx.gateway(),
            status = %tx.status(),
            "Transaction created"
        );
        match rejection {
            Some(err) => Err(err),
            None => Ok(tx),
        }
    }

    /// Explicit confirmation. Gateways that settle through callbacks answer
    /// `Pending` and the transaction is left untouched.
    pub async fn confirm(&self, tenant_id: Uuid, id: Uuid) -> BillingResult<Transaction> {
        let tx = self.repo.get_by_id(tenant_id, id).await?;
        tx.clone().confirm(Outcome::Pending)?;
        let client = self.client(tx.gateway())?;

        let service = self.clone();
        detached(async move {
            let key = tx.idempotency_key("confirm");
            let outcome = {
                let (client, details, key) = (client.as_ref(), tx.details(), key.as_str());
                service
                    .retry
                    .run(tx.gateway(), "confirm", move || client.confirm(details, key))
                    .await
                    .map_err(|e| BillingError::from_gateway(tx.id(), tx.gateway(), e))?
            };

            let (tx, applied) = service
                .mutate(tx, "confirm", |tx| match outcome {
                    Outcome::Completed => Ok(tx.capture_reported()?),
                    Outcome::Failed
                        if matches!(
                            tx.status(),
                            TransactionStatus::Canceled | TransactionStatus::Failed
                        ) =>
                    {
                        Ok(None)
                    }
                    _ => {
                        let transition = tx.confirm(outcome)?;
                        Ok(transition.map(|transition| AppliedEvent {
                            transition: Some(transition),
                            ..AppliedEvent::default()
                        }))
                    }
                })
                .await?;
            if let Some(warning) = &applied.warning {
                warn!(transaction_id = %tx.id(), gateway = %tx.gateway(), reconciliation = true, warning = %warning, "Confirm captured funds on a transaction that moved on");
            }
            Ok(tx)
        })
        .await
    }

    pub async fn refund(&self, tenant_id: Uuid, id: Uuid, amount: i64) -> BillingResult<Transaction> {
        self.refund_with_id(tenant_id, id, amount, Uuid::new_v4()).await
    }

    /// Refund under a caller-chosen id. Retrying with the same id and amount
    /// returns the stored transaction without contacting the gateway again.
    pub async fn refund_with_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        amount: i64,
        refund_id: Uuid,
    ) -> BillingResult<Transaction> {
        let tx = self.repo.get_by_id(tenant_id, id).await?;
        let key = tx.refund_key(refund_id);
        if tx.ensure_refund_key(amount, &key)? {
            info!(transaction_id = %id, refund_id = %refund_id, "Refund replayed, returning stored transaction");
            return Ok(tx);
        }
        tx.ensure_refundable(amount)?;
        let client = self.client(tx.gateway())?;

        let service = self.clone();
        detached(async move {
            let request = RefundRequest {
                transaction_id: tx.id(),
                idempotency_key: key.clone(),
                amount,
                captured: tx.quantity(),
                refundable: tx.refundable(),
                currency: tx.currency(),
                details: tx.details().clone(),
            };
            let outcome = {
                let (client, request) = (client.as_ref(), &request);
                service
                    .retry
                    .run(tx.gateway(), "refund", move || client.refund(request.clone()))
                    .await
                    .map_err(|e| BillingError::from_gateway(tx.id(), tx.gateway(), e))?
            };

            match outcome {
                Outcome::Completed => {
                    let (id, gateway) = (tx.id(), tx.gateway());
                    let (tx, _) = service
                        .mutate(tx, "refund", |tx| {
                            let transition = tx.refund(amount, &key)?;
                            Ok(transition.map(|transition| AppliedEvent {
                                transition: Some(transition),
                                refunded: Some(amount),
                                warning: None,
                            }))
                        })
                        .await
                        .map_err(|e| {
                            if matches!(e, BillingError::RefundExceedsCaptured { .. }) {
                                error!(transaction_id = %id, gateway = %gateway, refund_key = %key, amount, reconciliation = true, "Gateway refunded but a concurrent refund used the balance");
                            }
                            e
                        })?;
                    Ok(tx)
                }
                Outcome::Pending => {
                    info!(transaction_id = %tx.id(), gateway = %tx.gateway(), amount, "Refund accepted, awaiting provider confirmation");
                    Ok(tx)
                }
                Outcome::Failed => Err(BillingError::GatewayRejected {
                    id: tx.id(),
                    gateway: tx.gateway(),
                    reason: "refund failed".to_string(),
                }),
            }
        })
        .await
    }

    pub async fn cancel(&self, tenant_id: Uuid, id: Uuid) -> BillingResult<Transaction> {
        let tx = self.repo.get_by_id(tenant_id, id).await?;
        tx.clone().cancel()?;
        let client = self.client(tx.gateway())?;

        let service = self.clone();
        detached(async move {
            let key = tx.idempotency_key("cancel");
            {
                let (client, details, key) = (client.as_ref(), tx.details(), key.as_str());
                let cancelled = service
                    .retry
                    .run(tx.gateway(), "cancel", move || client.cancel(details, key))
                    .await;
                if let Err(e) = cancelled {
                    if matches!(e, GatewayError::AlreadyCaptured(_)) {
                        warn!(transaction_id = %tx.id(), gateway = %tx.gateway(), reconciliation = true, "Cancel refused, provider already captured funds");
                    }
                    return Err(BillingError::from_gateway(tx.id(), tx.gateway(), e));
                }
            }

            let (tx, _) = service
                .mutate(tx, "cancel", |tx| {
                    if tx.status() == TransactionStatus::Canceled {
                        return Ok(None);
                    }
                    Ok(Some(AppliedEvent {
                        transition: Some(tx.cancel()?),
                        ..AppliedEvent::default()
                    }))
                })
                .await?;
            Ok(tx)
        })
        .await
    }

    /// Applies a parsed provider event to the transaction it refers to.
    pub async fn apply_webhook(
        &self,
        gateway: Gateway,
        event: NormalizedEvent,
    ) -> BillingResult<WebhookOutcome> {
        let tx = self.find_for_provider(gateway, &event.lookup).await?;
        self.apply_event(tx, event).await
    }

    /// The transaction a provider callback refers to, across tenants.
    pub async fn find_for_provider(
        &self,
        gateway: Gateway,
        lookup: &DetailsFieldFilter,
    ) -> BillingResult<Transaction> {
        let found = self
            .repo
            .get_by_details_fields(gateway, std::slice::from_ref(lookup))
            .await?;
        if found.len() > 1 {
            warn!(gateway = %gateway, lookup = %describe(lookup), matches = found.len(), "Provider event matches several transactions, using the newest");
        }
        found
            .into_iter()
            .next()
            .ok_or_else(|| BillingError::UnknownTransaction {
                gateway,
                lookup: describe(lookup),
            })
    }

    /// Answers a read-only provider callback from stored state.
    pub async fn answer_query(
        &self,
        gateway: Gateway,
        query: &WebhookQuery,
    ) -> BillingResult<Vec<Transaction>> {
        match query {
            WebhookQuery::CanPerform { lookup, amount } => {
                let tx = self.find_for_provider(gateway, lookup).await?;
                if let Some(reported) = *amount {
                    if reported != tx.quantity() {
                        return Err(BillingError::AmountMismatch {
                            id: tx.id(),
                            expected: tx.quantity(),
                            reported,
                        });
                    }
                }
                if tx.status() != TransactionStatus::Pending {
                    return Err(BillingError::InvalidTransition {
                        id: tx.id(),
                        from: tx.status(),
                        action: "perform".to_string(),
                    });
                }
                Ok(vec![tx])
            }
            WebhookQuery::Status { lookup } => Ok(vec![self.find_for_provider(gateway, lookup).await?]),
            WebhookQuery::Statement { lookup } => Ok(self
                .repo
                .get_by_details_fields(gateway, std::slice::from_ref(lookup))
                .await?),
        }
    }

    /// Idempotent event application shared by webhooks and reconciliation.
    pub async fn apply_event(
        &self,
        tx: Transaction,
        event: NormalizedEvent,
    ) -> BillingResult<WebhookOutcome> {
        let (id, gateway) = (tx.id(), tx.gateway());
        let mut duplicate = false;
        let result = self
            .mutate(tx, "apply_event", |tx| match tx.apply_event(&event)? {
                EventApplication::Duplicate => {
                    duplicate = true;
                    Ok(None)
                }
                EventApplication::Applied(applied) => {
                    duplicate = false;
                    Ok(Some(applied))
                }
            })
            .await;

        match result {
            Ok(_) if duplicate => {
                debug!(transaction_id = %id, gateway = %gateway, event = %event.dedupe_key(), "Duplicate provider event");
                Ok(WebhookOutcome::Duplicate { transaction_id: id })
            }
            Ok((tx, applied)) => {
                if let Some(warning) = &applied.warning {
                    warn!(transaction_id = %id, gateway = %gateway, reconciliation = true, warning = %warning, "Provider event needs reconciliation");
                }
                Ok(WebhookOutcome::Applied {
                    transaction_id: id,
                    status: tx.status(),
                    warning: applied.warning,
                })
            }
            Err(e @ BillingError::InvalidTransition { .. }) => {
                warn!(transaction_id = %id, gateway = %gateway, kind = %event.kind, error = %e, "Provider event does not apply");
                Ok(WebhookOutcome::Ignored {
                    reason: e.to_string(),
                    refusal: WebhookRefusal::InvalidState,
                })
            }
            Err(e @ (BillingError::AmountMismatch { .. } | BillingError::RefundExceedsCaptured { .. })) => {
                error!(transaction_id = %id, gateway = %gateway, reconciliation = true, error = %e, "Provider event rejected");
                Ok(WebhookOutcome::Ignored {
                    reason: e.to_string(),
                    refusal: e.webhook_refusal(),
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_by_id(&self, tenant_id: Uuid, id: Uuid) -> BillingResult<Transaction> {
        validate_tenant_id(tenant_id)?;
        Ok(self.repo.get_by_id(tenant_id, id).await?)
    }

    pub async fn get_paginated(&self, params: &FindParams) -> BillingResult<Vec<Transaction>> {
        validate_tenant_id(params.tenant_id)?;
        Ok(self.repo.get_paginated(params).await?)
    }

    pub async fn count(&self, params: &FindParams) -> BillingResult<i64> {
        validate_tenant_id(params.tenant_id)?;
        Ok(self.repo.count(params).await?)
    }

    /// Storage liveness for health checks.
    pub async fn ping(&self) -> BillingResult<()> {
        Ok(self.repo.ping().await?)
    }

    pub async fn get_by_details_fields(
        &self,
        tenant_id: Uuid,
        gateway: Gateway,
        filters: &[DetailsFieldFilter],
    ) -> BillingResult<Vec<Transaction>> {
        validate_tenant_id(tenant_id)?;
        let found = self.repo.get_by_details_fields(gateway, filters).await?;
        Ok(found
            .into_iter()
            .filter(|tx| tx.tenant_id() == tenant_id)
            .collect())
    }

    /// Applies `apply` to the transaction and writes it under the loaded
    /// version. On a version conflict the transaction is reloaded and `apply`
    /// runs again, up to `max_conflict_retries` times. `Ok(None)` from `apply`
    /// means there is nothing to write.
    async fn mutate<F>(
        &self,
        mut tx: Transaction,
        action: &'static str,
        mut apply: F,
    ) -> BillingResult<(Transaction, AppliedEvent)>
    where
        F: FnMut(&mut Transaction) -> BillingResult<Option<AppliedEvent>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let expected = tx.version();
            let mut next = tx.clone();
            let Some(applied) = apply(&mut next)? else {
                return Ok((tx, AppliedEvent::default()));
            };
            let events = DomainEvent::for_change(
                next.id(),
                applied.transition,
                applied.refunded,
                applied.warning.as_deref(),
            );

            match self.repo.update(&next, expected, &events).await {
                Ok(()) => {
                    next.advance_version(expected);
                    info!(
                        transaction_id = %next.id(),
                        tenant_id = %next.tenant_id(),
                        gateway = %next.gateway(),
                        status = %next.status(),
                        version = next.version(),
                        action,
                        "Transaction updated"
                    );
                    return Ok((next, applied));
                }
                Err(RepositoryError::VersionConflict { .. })
                    if attempt <= self.settings.max_conflict_retries =>
                {
                    warn!(transaction_id = %next.id(), action, attempt, "Version conflict, reloading transaction");
                    tx = self.repo.get_by_id(next.tenant_id(), next.id()).await?;
                    attempt += 1;
                }
                Err(RepositoryError::VersionConflict { .. }) => {
                    error!(transaction_id = %next.id(), action, attempts = attempt, "Version conflicts exhausted retries");
                    return Err(BillingError::Conflict {
                        id: next.id(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Runs the rest of a command on its own task so it completes even if the
/// caller goes away once the gateway has been contacted.
async fn detached<T, F>(work: F) -> BillingResult<T>
where
    T: Send + 'static,
    F: Future<Output = BillingResult<T>> + Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| BillingError::Internal(format!("billing task failed: {}", e)))?
}

fn describe(filter: &DetailsFieldFilter) -> String {
    format!("{} {:?}", filter.path.join("."), filter.condition)
}
