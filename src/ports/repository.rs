use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    DetailsError, DetailsFieldFilter, DomainError, DomainEvent, Gateway, Transaction,
    TransactionStatus,
};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("transaction {0} not found")]
    NotFound(Uuid),

    #[error("transaction {0} already exists")]
    DuplicateId(Uuid),

    #[error("transaction {id} changed since version {expected}")]
    VersionConflict { id: Uuid, expected: i64 },

    #[error("stored transaction {id} is unreadable: {reason}")]
    SchemaMismatch { id: Uuid, reason: String },

    #[error("invalid query: {0}")]
    Query(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RepositoryError {
    pub(crate) fn schema(id: Uuid, err: impl std::fmt::Display) -> Self {
        RepositoryError::SchemaMismatch {
            id,
            reason: err.to_string(),
        }
    }
}

impl From<(Uuid, DetailsError)> for RepositoryError {
    fn from((id, err): (Uuid, DetailsError)) -> Self {
        RepositoryError::schema(id, err)
    }
}

impl From<(Uuid, DomainError)> for RepositoryError {
    fn from((id, err): (Uuid, DomainError)) -> Self {
        RepositoryError::schema(id, err)
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filter and page for listing a tenant's transactions.
#[derive(Debug, Clone)]
pub struct FindParams {
    pub tenant_id: Uuid,
    pub status: Option<TransactionStatus>,
    pub gateway: Option<Gateway>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub sort: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

impl FindParams {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    pub fn for_tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            status: None,
            gateway: None,
            created_from: None,
            created_to: None,
            sort: SortOrder::Desc,
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        tx.tenant_id() == self.tenant_id
            && self.status.map_or(true, |status| tx.status() == status)
            && self.gateway.map_or(true, |gateway| tx.gateway() == gateway)
            && self.created_from.map_or(true, |from| tx.created_at() >= from)
            && self.created_to.map_or(true, |to| tx.created_at() < to)
    }
}

pub(crate) fn validate_filters(filters: &[DetailsFieldFilter]) -> RepositoryResult<()> {
    if filters.is_empty() {
        return Err(RepositoryError::Query(
            "at least one details filter is required".to_string(),
        ));
    }
    if filters
        .iter()
        .any(|filter| filter.path.is_empty() || filter.path.iter().any(|p| p.is_empty()))
    {
        return Err(RepositoryError::Query(
            "details filter paths may not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Persistence contract for the transaction aggregate.
///
/// Every write carries the domain events it produced; implementations append
/// them to the outbox atomically with the row.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn create(&self, tx: &Transaction, events: &[DomainEvent]) -> RepositoryResult<()>;

    async fn get_by_id(&self, tenant_id: Uuid, id: Uuid) -> RepositoryResult<Transaction>;

    /// Writes `tx` only if the stored version still equals `expected_version`.
    /// The stored version becomes `expected_version + 1`.
    async fn update(
        &self,
        tx: &Transaction,
        expected_version: i64,
        events: &[DomainEvent],
    ) -> RepositoryResult<()>;

    /// Cross-tenant lookup used to correlate provider callbacks.
    async fn get_by_details_fields(
        &self,
        gateway: Gateway,
        filters: &[DetailsFieldFilter],
    ) -> RepositoryResult<Vec<Transaction>>;

    async fn get_paginated(&self, params: &FindParams) -> RepositoryResult<Vec<Transaction>>;

    async fn count(&self, params: &FindParams) -> RepositoryResult<i64>;

    /// Pending transactions created before `cutoff`, oldest first, across tenants.
    async fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>>;

    async fn ping(&self) -> RepositoryResult<()>;
}
