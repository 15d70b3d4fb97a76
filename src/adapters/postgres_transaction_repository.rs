//! Postgres implementation of TransactionRepository and EventOutbox.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::domain::{
    Currency, Details, DetailsFieldFilter, DomainEvent, FieldCondition, Gateway, Refund,
    Transaction, TransactionParts, TransactionStatus,
};
use crate::ports::repository::validate_filters;
use crate::ports::{
    EventOutbox, EventPublisher, FindParams, RepositoryError, RepositoryResult, SortOrder,
    TransactionRepository,
};

const SELECT_COLUMNS: &str = "SELECT id, tenant_id, status, quantity, currency, gateway, \
     details, refunds, applied_events, created_at, updated_at, version \
     FROM billing_transactions";

/// Postgres-backed transaction repository.
#[derive(Clone)]
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn append_events(
        db_tx: &mut sqlx::Transaction<'_, Postgres>,
        events: &[DomainEvent],
    ) -> RepositoryResult<()> {
        for event in events {
            let payload = serde_json::to_value(event).unwrap_or_default();
            sqlx::query(
                "INSERT INTO billing_outbox (transaction_id, event_type, payload) VALUES ($1, $2, $3)",
            )
            .bind(event.transaction_id())
            .bind(event.name())
            .bind(payload)
            .execute(&mut **db_tx)
            .await?;
        }
        Ok(())
    }
}

fn refunds_json(tx: &Transaction) -> serde_json::Value {
    serde_json::to_value(tx.refunds()).unwrap_or_default()
}

fn applied_events_json(tx: &Transaction) -> serde_json::Value {
    serde_json::to_value(tx.applied_events()).unwrap_or_default()
}

fn push_find_filters(builder: &mut QueryBuilder<'_, Postgres>, params: &FindParams) {
    builder.push(" WHERE tenant_id = ").push_bind(params.tenant_id);
    if let Some(status) = params.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(gateway) = params.gateway {
        builder.push(" AND gateway = ").push_bind(gateway.as_str());
    }
    if let Some(from) = params.created_from {
        builder.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = params.created_to {
        builder.push(" AND created_at < ").push_bind(to);
    }
}

fn push_details_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &DetailsFieldFilter) {
    let path = filter.path.clone();
    if let FieldCondition::Equals(value) = &filter.condition {
        builder
            .push(" AND details #>> ")
            .push_bind(path)
            .push("::text[] = ")
            .push_bind(value.clone());
        return;
    }

    // Non-numeric text yields NULL instead of a cast error.
    builder
        .push(" AND (CASE WHEN details #>> ")
        .push_bind(path.clone())
        .push("::text[] ~ '^-?[0-9]+$' THEN (details #>> ")
        .push_bind(path)
        .push("::text[])::bigint END)");
    match filter.condition {
        FieldCondition::GreaterThan(v) => {
            builder.push(" > ").push_bind(v);
        }
        FieldCondition::LessThan(v) => {
            builder.push(" < ").push_bind(v);
        }
        FieldCondition::GreaterOrEqual(v) => {
            builder.push(" >= ").push_bind(v);
        }
        FieldCondition::LessOrEqual(v) => {
            builder.push(" <= ").push_bind(v);
        }
        FieldCondition::Between(lo, hi) => {
            builder.push(" BETWEEN ").push_bind(lo).push(" AND ").push_bind(hi);
        }
        FieldCondition::Equals(_) => {}
    }
}

fn into_domain(rows: Vec<TransactionRow>) -> RepositoryResult<Vec<Transaction>> {
    rows.into_iter().map(TransactionRow::into_domain).collect()
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn create(&self, tx: &Transaction, events: &[DomainEvent]) -> RepositoryResult<()> {
        let mut db_tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO billing_transactions (
                id, tenant_id, status, quantity, currency, gateway,
                details, refunds, applied_events, created_at, updated_at, version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(tx.id())
        .bind(tx.tenant_id())
        .bind(tx.status().as_str())
        .bind(tx.quantity())
        .bind(tx.currency().code())
        .bind(tx.gateway().as_str())
        .bind(tx.details().encode())
        .bind(refunds_json(tx))
        .bind(applied_events_json(tx))
        .bind(tx.created_at())
        .bind(tx.updated_at())
        .bind(tx.version())
        .execute(&mut *db_tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::DuplicateId(tx.id()));
        }

        Self::append_events(&mut db_tx, events).await?;
        db_tx.commit().await?;
        Ok(())
    }

    async fn get_by_id(&self, tenant_id: Uuid, id: Uuid) -> RepositoryResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "{} WHERE id = $1 AND tenant_id = $2",
            SELECT_COLUMNS
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(RepositoryError::NotFound(id))?.into_domain()
    }

    async fn update(
        &self,
        tx: &Transaction,
        expected_version: i64,
        events: &[DomainEvent],
    ) -> RepositoryResult<()> {
        let mut db_tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE billing_transactions
            SET status = $4, details = $5, refunds = $6, applied_events = $7,
                updated_at = $8, version = $3 + 1
            WHERE id = $1 AND tenant_id = $2 AND version = $3
            "#,
        )
        .bind(tx.id())
        .bind(tx.tenant_id())
        .bind(expected_version)
        .bind(tx.status().as_str())
        .bind(tx.details().encode())
        .bind(refunds_json(tx))
        .bind(applied_events_json(tx))
        .bind(tx.updated_at())
        .execute(&mut *db_tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM billing_transactions WHERE id = $1 AND tenant_id = $2",
            )
            .bind(tx.id())
            .bind(tx.tenant_id())
            .fetch_optional(&mut *db_tx)
            .await?;

            return Err(match exists {
                Some(_) => RepositoryError::VersionConflict {
                    id: tx.id(),
                    expected: expected_version,
                },
                None => RepositoryError::NotFound(tx.id()),
            });
        }

        Self::append_events(&mut db_tx, events).await?;
        db_tx.commit().await?;
        Ok(())
    }

    async fn get_by_details_fields(
        &self,
        gateway: Gateway,
        filters: &[DetailsFieldFilter],
    ) -> RepositoryResult<Vec<Transaction>> {
        validate_filters(filters)?;

        let mut builder = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        builder.push(" WHERE gateway = ").push_bind(gateway.as_str());
        for filter in filters {
            push_details_filter(&mut builder, filter);
        }
        builder.push(" ORDER BY created_at DESC");

        let rows = builder
            .build_query_as::<TransactionRow>()
            .fetch_all(&self.pool)
            .await?;

        into_domain(rows)
    }

    async fn get_paginated(&self, params: &FindParams) -> RepositoryResult<Vec<Transaction>> {
        let mut builder = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        push_find_filters(&mut builder, params);
        builder.push(match params.sort {
            SortOrder::Asc => " ORDER BY created_at ASC",
            SortOrder::Desc => " ORDER BY created_at DESC",
        });
        builder
            .push(" LIMIT ")
            .push_bind(params.limit.clamp(1, FindParams::MAX_LIMIT))
            .push(" OFFSET ")
            .push_bind(params.offset.max(0));

        let rows = builder
            .build_query_as::<TransactionRow>()
            .fetch_all(&self.pool)
            .await?;

        into_domain(rows)
    }

    async fn count(&self, params: &FindParams) -> RepositoryResult<i64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM billing_transactions");
        push_find_filters(&mut builder, params);

        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "{} WHERE status = 'pending' AND created_at < $1 ORDER BY created_at ASC LIMIT $2",
            SELECT_COLUMNS
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_domain(rows)
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EventOutbox for PostgresTransactionRepository {
    async fn publish_pending(
        &self,
        limit: i64,
        publisher: &dyn EventPublisher,
    ) -> RepositoryResult<usize> {
        let mut db_tx = self.pool.begin().await?;

        // SKIP LOCKED lets several dispatchers share the outbox.
        let entries: Vec<OutboxRow> = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, event_type, payload
            FROM billing_outbox
            WHERE published_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *db_tx)
        .await?;

        if entries.is_empty() {
            db_tx.commit().await?;
            return Ok(0);
        }

        let mut done = Vec::with_capacity(entries.len());
        let mut published = 0;
        for entry in entries {
            match serde_json::from_value::<DomainEvent>(entry.payload) {
                Ok(event) => {
                    if let Err(e) = publisher.publish(&event).await {
                        warn!(outbox_id = entry.id, error = %e, "Outbox publish failed, stopping batch");
                        break;
                    }
                    published += 1;
                }
                Err(e) => {
                    error!(
                        outbox_id = entry.id,
                        event_type = %entry.event_type,
                        error = %e,
                        "Dropping undecodable outbox entry"
                    );
                }
            }
            done.push(entry.id);
        }

        if !done.is_empty() {
            sqlx::query("UPDATE billing_outbox SET published_at = NOW() WHERE id = ANY($1)")
                .bind(&done)
                .execute(&mut *db_tx)
                .await?;
        }
        db_tx.commit().await?;

        debug!(published, "Outbox batch published");
        Ok(published)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    event_type: String,
    payload: serde_json::Value,
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    tenant_id: Uuid,
    status: String,
    quantity: i64,
    currency: String,
    gateway: String,
    details: serde_json::Value,
    refunds: serde_json::Value,
    applied_events: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TransactionRow {
    /// Decodes eagerly; a row that does not fit the domain model is a `SchemaMismatch`.
    fn into_domain(self) -> RepositoryResult<Transaction> {
        let id = self.id;
        let gateway: Gateway = self.gateway.parse().map_err(|e| RepositoryError::schema(id, e))?;
        let status: TransactionStatus =
            self.status.parse().map_err(|e| RepositoryError::schema(id, e))?;
        let currency: Currency = self
            .currency
            .trim()
            .parse()
            .map_err(|e| RepositoryError::schema(id, e))?;
        let details = Details::decode(gateway, self.details).map_err(|e| (id, e))?;
        let refunds: Vec<Refund> =
            serde_json::from_value(self.refunds).map_err(|e| RepositoryError::schema(id, e))?;
        let applied_events: Vec<String> = serde_json::from_value(self.applied_events)
            .map_err(|e| RepositoryError::schema(id, e))?;

        Transaction::from_parts(TransactionParts {
            id,
            tenant_id: self.tenant_id,
            status,
            quantity: self.quantity,
            currency,
            gateway,
            details,
            refunds,
            applied_events,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
        .map_err(|e| (id, e).into())
    }
}
