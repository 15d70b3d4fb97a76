//! In-process repository with the same semantics as the Postgres one.
//! Backs tests and database-less local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{DetailsFieldFilter, DomainEvent, Gateway, Transaction, TransactionStatus};
use crate::ports::repository::validate_filters;
use crate::ports::{
    EventOutbox, EventPublisher, FindParams, RepositoryError, RepositoryResult, SortOrder,
    TransactionRepository,
};

#[derive(Debug, Clone)]
struct OutboxEntry {
    event: DomainEvent,
    published: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryTransactionRepository {
    rows: Arc<RwLock<HashMap<Uuid, Transaction>>>,
    outbox: Arc<Mutex<Vec<OutboxEntry>>>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event ever appended, in order.
    pub async fn outbox_events(&self) -> Vec<DomainEvent> {
        self.outbox
            .lock()
            .await
            .iter()
            .map(|entry| entry.event.clone())
            .collect()
    }

    pub async fn unpublished_count(&self) -> usize {
        self.outbox
            .lock()
            .await
            .iter()
            .filter(|entry| !entry.published)
            .count()
    }

    /// Simulates a concurrent writer by advancing the stored version.
    pub async fn bump_version(&self, id: Uuid) -> RepositoryResult<()> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        let current = row.version();
        row.advance_version(current);
        Ok(())
    }

    async fn append(&self, events: &[DomainEvent]) {
        let mut outbox = self.outbox.lock().await;
        outbox.extend(events.iter().cloned().map(|event| OutboxEntry {
            event,
            published: false,
        }));
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn create(&self, tx: &Transaction, events: &[DomainEvent]) -> RepositoryResult<()> {
        {
            let mut rows = self.rows.write().await;
            if rows.contains_key(&tx.id()) {
                return Err(RepositoryError::DuplicateId(tx.id()));
            }
            rows.insert(tx.id(), tx.clone());
        }
        self.append(events).await;
        Ok(())
    }

    async fn get_by_id(&self, tenant_id: Uuid, id: Uuid) -> RepositoryResult<Transaction> {
        self.rows
            .read()
            .await
            .get(&id)
            .filter(|tx| tx.tenant_id() == tenant_id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    async fn update(
        &self,
        tx: &Transaction,
        expected_version: i64,
        events: &[DomainEvent],
    ) -> RepositoryResult<()> {
        {
            let mut rows = self.rows.write().await;
            let stored = rows
                .get_mut(&tx.id())
                .filter(|stored| stored.tenant_id() == tx.tenant_id())
                .ok_or(RepositoryError::NotFound(tx.id()))?;
            if stored.version() != expected_version {
                return Err(RepositoryError::VersionConflict {
                    id: tx.id(),
                    expected: expected_version,
                });
            }
            let mut next = tx.clone();
            next.advance_version(expected_version);
            *stored = next;
        }
        self.append(events).await;
        Ok(())
    }

    async fn get_by_details_fields(
        &self,
        gateway: Gateway,
        filters: &[DetailsFieldFilter],
    ) -> RepositoryResult<Vec<Transaction>> {
        validate_filters(filters)?;
        let rows = self.rows.read().await;
        let mut found: Vec<Transaction> = rows
            .values()
            .filter(|tx| tx.gateway() == gateway)
            .filter(|tx| {
                let blob = tx.details().encode();
                filters.iter().all(|filter| filter.matches(&blob))
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(found)
    }

    async fn get_paginated(&self, params: &FindParams) -> RepositoryResult<Vec<Transaction>> {
        let rows = self.rows.read().await;
        let mut found: Vec<Transaction> = rows
            .values()
            .filter(|tx| params.matches(tx))
            .cloned()
            .collect();
        found.sort_by(|a, b| match params.sort {
            SortOrder::Asc => a.created_at().cmp(&b.created_at()),
            SortOrder::Desc => b.created_at().cmp(&a.created_at()),
        });
        Ok(found
            .into_iter()
            .skip(params.offset.max(0) as usize)
            .take(params.limit.clamp(1, FindParams::MAX_LIMIT) as usize)
            .collect())
    }

    async fn count(&self, params: &FindParams) -> RepositoryResult<i64> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|tx| params.matches(tx)).count() as i64)
    }

    async fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let rows = self.rows.read().await;
        let mut found: Vec<Transaction> = rows
            .values()
            .filter(|tx| tx.status() == TransactionStatus::Pending && tx.created_at() < cutoff)
            .cloned()
            .collect();
        found.sort_by_key(|tx| tx.created_at());
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

#[async_trait]
impl EventOutbox for InMemoryTransactionRepository {
    async fn publish_pending(
        &self,
        limit: i64,
        publisher: &dyn EventPublisher,
    ) -> RepositoryResult<usize> {
        let mut outbox = self.outbox.lock().await;
        let mut published = 0;
        for entry in outbox
            .iter_mut()
            .filter(|entry| !entry.published)
            .take(limit.max(0) as usize)
        {
            if let Err(e) = publisher.publish(&entry.event).await {
                warn!(error = %e, "Outbox publish failed, stopping batch");
                break;
            }
            entry.published = true;
            published += 1;
        }
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, Details};

    fn transaction(tenant_id: Uuid) -> Transaction {
        Transaction::new(
            Uuid::new_v4(),
            tenant_id,
            1_000,
            Currency::Uzs,
            Gateway::Click,
            Details::default_for(Gateway::Click, "order-1"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let repo = InMemoryTransactionRepository::new();
        let tx = transaction(Uuid::new_v4());
        repo.create(&tx, &[]).await.unwrap();

        repo.update(&tx, tx.version(), &[]).await.unwrap();
        let err = repo.update(&tx, tx.version(), &[]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::VersionConflict { expected: 1, .. }));

        let stored = repo.get_by_id(tx.tenant_id(), tx.id()).await.unwrap();
        assert_eq!(stored.version(), 2);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let repo = InMemoryTransactionRepository::new();
        let tx = transaction(Uuid::new_v4());
        repo.create(&tx, &[]).await.unwrap();
        assert!(matches!(
            repo.create(&tx, &[]).await,
            Err(RepositoryError::DuplicateId(id)) if id == tx.id()
        ));
    }

    #[tokio::test]
    async fn reads_are_tenant_scoped() {
        let repo = InMemoryTransactionRepository::new();
        let tx = transaction(Uuid::new_v4());
        repo.create(&tx, &[]).await.unwrap();

        assert!(matches!(
            repo.get_by_id(Uuid::new_v4(), tx.id()).await,
            Err(RepositoryError::NotFound(_))
        ));
        assert_eq!(repo.count(&FindParams::for_tenant(tx.tenant_id())).await.unwrap(), 1);
        assert_eq!(repo.count(&FindParams::for_tenant(Uuid::new_v4())).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn finds_by_details_fields() {
        let repo = InMemoryTransactionRepository::new();
        let tx = transaction(Uuid::new_v4());
        repo.create(&tx, &[]).await.unwrap();

        let found = repo
            .get_by_details_fields(
                Gateway::Click,
                &[DetailsFieldFilter::equals(["merchant_trans_id"], "order-1")],
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        assert!(repo.get_by_details_fields(Gateway::Click, &[]).await.is_err());
        assert!(repo
            .get_by_details_fields(
                Gateway::Payme,
                &[DetailsFieldFilter::equals(["merchant_trans_id"], "order-1")]
            )
            .await
            .unwrap()
            .is_empty());
    }
}
