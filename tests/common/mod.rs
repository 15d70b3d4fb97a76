#![allow(dead_code)]

use async_trait::async_trait;
use billing_core::adapters::gateways::ClickGateway;
use billing_core::adapters::gateways::http::GatewayHttp;
use billing_core::adapters::{GatewayRegistry, InMemoryTransactionRepository};
use billing_core::config::{BillingSettings, ClickConfig, SecretString};
use billing_core::domain::{Details, DetailsFieldFilter, DomainEvent, Gateway, Outcome, Transaction};
use billing_core::ports::{
    FindParams, GatewayClient, GatewayError, GatewayResult, PrepareRequest, Prepared,
    RefundRequest, RepositoryResult, SignatureHeaders, TransactionRepository,
};
use billing_core::services::BillingService;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Barrier, Notify};
use uuid::Uuid;

pub const CLICK_SERVICE_ID: i64 = 77;
pub const CLICK_SECRET: &str = "click-secret";

pub fn fast_settings() -> BillingSettings {
    BillingSettings {
        max_conflict_retries: 3,
        gateway_timeout: Duration::from_secs(2),
        gateway_retry_attempts: 3,
        gateway_retry_base: Duration::from_millis(1),
    }
}

pub fn click_config() -> ClickConfig {
    ClickConfig {
        service_id: CLICK_SERVICE_ID,
        merchant_id: 5,
        merchant_user_id: 9,
        secret_key: SecretString::new(CLICK_SECRET),
        base_url: "http://127.0.0.1:9".to_string(),
        checkout_url: "https://my.click.uz/services/pay".to_string(),
    }
}

pub fn click_gateway() -> ClickGateway {
    ClickGateway::new(click_config(), GatewayHttp::new(Gateway::Click, "http://127.0.0.1:9"))
}

/// Form body of a signed Click callback.
pub fn click_callback(click_trans_id: &str, merchant_trans_id: &str, amount: &str, action: i64) -> String {
    let gateway = click_gateway();
    let sign_time = "2025-01-01 10:00:00";
    let prepare_id = if action == 1 { Some("1") } else { None };
    let sign = gateway.sign(click_trans_id, merchant_trans_id, prepare_id, amount, action, sign_time);
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("click_trans_id", click_trans_id)
        .append_pair("service_id", &CLICK_SERVICE_ID.to_string())
        .append_pair("click_paydoc_id", "555")
        .append_pair("merchant_trans_id", merchant_trans_id)
        .append_pair("merchant_prepare_id", "1")
        .append_pair("amount", amount)
        .append_pair("action", &action.to_string())
        .append_pair("error", "0")
        .append_pair("error_note", "Success")
        .append_pair("sign_time", sign_time)
        .append_pair("sign_string", &sign)
        .finish()
}

pub struct Harness {
    pub repo: Arc<InMemoryTransactionRepository>,
    pub service: BillingService,
}

pub fn harness_with(gateways: GatewayRegistry, settings: BillingSettings) -> Harness {
    let repo = Arc::new(InMemoryTransactionRepository::new());
    let service = BillingService::new(repo.clone(), gateways, settings);
    Harness { repo, service }
}

pub fn harness() -> Harness {
    harness_with(
        GatewayRegistry::new().with(Arc::new(click_gateway())),
        fast_settings(),
    )
}

pub async fn event_names(repo: &InMemoryTransactionRepository, id: Uuid) -> Vec<&'static str> {
    repo.outbox_events()
        .await
        .iter()
        .filter(|event| event.transaction_id() == id)
        .map(DomainEvent::name)
        .collect()
}

/// Pauses a gateway call until the test lets it go.
#[derive(Default)]
pub struct Hold {
    pub entered: Notify,
    pub release: Notify,
}

impl Hold {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// Gateway double with a fixed prepare/confirm/status script. Counts calls
/// and records every refund it is asked for.
pub struct StubGateway {
    pub gateway: Gateway,
    pub prepare: GatewayResult<Outcome>,
    pub confirm: GatewayResult<Outcome>,
    pub status: Option<Outcome>,
    pub prepare_calls: AtomicU32,
    pub confirm_calls: AtomicU32,
    pub confirm_hold: Option<Arc<Hold>>,
    pub refund_barrier: Option<Arc<Barrier>>,
    pub refunds: Mutex<Vec<(String, i64)>>,
}

impl StubGateway {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            prepare: Ok(Outcome::Pending),
            confirm: Ok(Outcome::Completed),
            status: None,
            prepare_calls: AtomicU32::new(0),
            confirm_calls: AtomicU32::new(0),
            confirm_hold: None,
            refund_barrier: None,
            refunds: Mutex::new(Vec::new()),
        }
    }

    pub fn preparing(mut self, result: GatewayResult<Outcome>) -> Self {
        self.prepare = result;
        self
    }

    pub fn confirming(mut self, result: GatewayResult<Outcome>) -> Self {
        self.confirm = result;
        self
    }

    pub fn reporting(mut self, status: Outcome) -> Self {
        self.status = Some(status);
        self
    }

    /// Confirm calls wait on `hold` before answering.
    pub fn holding_confirm(mut self, hold: Arc<Hold>) -> Self {
        self.confirm_hold = Some(hold);
        self
    }

    /// Refund calls only answer once `parties` of them are in flight.
    pub fn refunds_in_step(mut self, parties: usize) -> Self {
        self.refund_barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    pub fn refund_requests(&self) -> Vec<(String, i64)> {
        self.refunds.lock().unwrap().clone()
    }
}

#[async_trait]
impl GatewayClient for StubGateway {
    fn gateway(&self) -> Gateway {
        self.gateway
    }

    async fn prepare(&self, request: PrepareRequest) -> GatewayResult<Prepared> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.prepare.clone()?;
        Ok(Prepared {
            provider_ref: request.details.provider_ref(),
            outcome,
            details: request.details,
        })
    }

    async fn confirm(&self, _details: &Details, _idempotency_key: &str) -> GatewayResult<Outcome> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hold) = &self.confirm_hold {
            hold.pass().await;
        }
        self.confirm.clone()
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<Outcome> {
        self.refunds
            .lock()
            .unwrap()
            .push((request.idempotency_key.clone(), request.amount));
        if let Some(barrier) = &self.refund_barrier {
            barrier.wait().await;
        }
        Ok(Outcome::Completed)
    }

    async fn cancel(&self, _details: &Details, _idempotency_key: &str) -> GatewayResult<()> {
        Ok(())
    }

    fn parse_webhook(
        &self,
        _payload: &[u8],
        _headers: &SignatureHeaders,
    ) -> GatewayResult<billing_core::domain::NormalizedEvent> {
        Err(GatewayError::Unsupported("stub has no webhooks".to_string()))
    }

    async fn fetch_status(&self, _details: &Details) -> GatewayResult<Option<Outcome>> {
        Ok(self.status)
    }
}

/// Repository wrapper that lets a concurrent writer win the first
/// `conflicts` updates by bumping the stored version just before them.
pub struct ConflictingRepository {
    pub inner: Arc<InMemoryTransactionRepository>,
    conflicts: AtomicU32,
}

impl ConflictingRepository {
    pub fn new(inner: Arc<InMemoryTransactionRepository>, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts: AtomicU32::new(conflicts),
        }
    }
}

#[async_trait]
impl TransactionRepository for ConflictingRepository {
    async fn create(&self, tx: &Transaction, events: &[DomainEvent]) -> RepositoryResult<()> {
        self.inner.create(tx, events).await
    }

    async fn get_by_id(&self, tenant_id: Uuid, id: Uuid) -> RepositoryResult<Transaction> {
        self.inner.get_by_id(tenant_id, id).await
    }

    async fn update(
        &self,
        tx: &Transaction,
        expected_version: i64,
        events: &[DomainEvent],
    ) -> RepositoryResult<()> {
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            self.inner.bump_version(tx.id()).await?;
        }
        self.inner.update(tx, expected_version, events).await
    }

    async fn get_by_details_fields(
        &self,
        gateway: Gateway,
        filters: &[DetailsFieldFilter],
    ) -> RepositoryResult<Vec<Transaction>> {
        self.inner.get_by_details_fields(gateway, filters).await
    }

    async fn get_paginated(&self, params: &FindParams) -> RepositoryResult<Vec<Transaction>> {
        self.inner.get_paginated(params).await
    }

    async fn count(&self, params: &FindParams) -> RepositoryResult<i64> {
        self.inner.count(params).await
    }

    async fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        self.inner.list_pending_before(cutoff, limit).await
    }

    async fn ping(&self) -> RepositoryResult<()> {
        self.inner.ping().await
    }
}
