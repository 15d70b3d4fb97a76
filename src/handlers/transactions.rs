use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{Currency, Gateway, Transaction, TransactionStatus};
use crate::error::AppError;
use crate::ports::{FindParams, SortOrder};
use crate::services::CreateTransaction;
use crate::AppState;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant scope of a request, taken from the `X-Tenant-Id` header.
#[derive(Debug, Clone, Copy)]
pub struct TenantId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::BadRequest("X-Tenant-Id header is required".to_string()))?;
        Uuid::parse_str(raw.trim())
            .map(TenantId)
            .map_err(|_| AppError::BadRequest("X-Tenant-Id must be a UUID".to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub id: Option<Uuid>,
    pub amount: i64,
    pub currency: String,
    pub gateway: String,
    pub merchant_ref: Option<String>,
    pub details: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RefundTransactionRequest {
    pub amount: i64,
    /// Makes client retries of the same refund idempotent.
    pub refund_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub gateway: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub sort: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListQuery {
    fn into_params(self, tenant_id: Uuid) -> Result<FindParams, AppError> {
        let mut params = FindParams::for_tenant(tenant_id);
        params.status = self
            .status
            .as_deref()
            .map(TransactionStatus::from_str)
            .transpose()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        params.gateway = self
            .gateway
            .as_deref()
            .map(Gateway::from_str)
            .transpose()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        params.created_from = self.created_from;
        params.created_to = self.created_to;
        params.sort = match self.sort.as_deref() {
            None | Some("desc") => SortOrder::Desc,
            Some("asc") => SortOrder::Asc,
            Some(other) => {
                return Err(AppError::Validation(format!(
                    "sort must be 'asc' or 'desc', got '{}'",
                    other
                )))
            }
        };
        params.limit = self
            .limit
            .unwrap_or(FindParams::DEFAULT_LIMIT)
            .clamp(1, FindParams::MAX_LIMIT);
        params.offset = self.offset.unwrap_or(0).max(0);
        Ok(params)
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: TransactionStatus,
    pub amount: i64,
    pub currency: Currency,
    pub gateway: Gateway,
    pub merchant_ref: String,
    pub provider_ref: Option<String>,
    pub refunded: i64,
    pub refundable: i64,
    pub details: Value,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id(),
            tenant_id: tx.tenant_id(),
            status: tx.status(),
            amount: tx.quantity(),
            currency: tx.currency(),
            gateway: tx.gateway(),
            merchant_ref: tx.details().merchant_ref().to_string(),
            provider_ref: tx.details().provider_ref().map(|r| r.as_str().to_string()),
            refunded: tx.refunded_total(),
            refundable: tx.refundable(),
            details: tx.details().encode(),
            version: tx.version(),
            created_at: tx.created_at(),
            updated_at: tx.updated_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionPage {
    pub items: Vec<TransactionResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

pub async fn create_transaction(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Json(payload): Json<CreateTransactionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let currency =
        Currency::from_str(&payload.currency).map_err(|e| AppError::Validation(e.to_string()))?;
    let gateway =
        Gateway::from_str(&payload.gateway).map_err(|e| AppError::Validation(e.to_string()))?;

    let tx = state
        .billing
        .create(CreateTransaction {
            id: payload.id,
            tenant_id,
            amount: payload.amount,
            currency,
            gateway,
            merchant_ref: payload.merchant_ref,
            details: payload.details,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(TransactionResponse::from(&tx))))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let params = query.into_params(tenant_id)?;
    let items = state.billing.get_paginated(&params).await?;
    let total = state.billing.count(&params).await?;

    Ok(Json(TransactionPage {
        items: items.iter().map(TransactionResponse::from).collect(),
        total,
        limit: params.limit,
        offset: params.offset,
    }))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.billing.get_by_id(tenant_id, id).await?;
    Ok(Json(TransactionResponse::from(&tx)))
}

pub async fn confirm_transaction(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.billing.confirm(tenant_id, id).await?;
    Ok(Json(TransactionResponse::from(&tx)))
}

pub async fn refund_transaction(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<Uuid>,
    Json(payload): Json<RefundTransactionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tx = match payload.refund_id {
        Some(refund_id) => {
            state
                .billing
                .refund_with_id(tenant_id, id, payload.amount, refund_id)
                .await?
        }
        None => state.billing.refund(tenant_id, id, payload.amount).await?,
    };
    Ok(Json(TransactionResponse::from(&tx)))
}

pub async fn cancel_transaction(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.billing.cancel(tenant_id, id).await?;
    Ok(Json(TransactionResponse::from(&tx)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_defaults() {
        let tenant = Uuid::new_v4();
        let params = ListQuery::default().into_params(tenant).unwrap();
        assert_eq!(params.tenant_id, tenant);
        assert_eq!(params.limit, FindParams::DEFAULT_LIMIT);
        assert_eq!(params.offset, 0);
        assert_eq!(params.sort, SortOrder::Desc);
    }

    #[test]
    fn test_list_query_clamps_limit_and_parses_filters() {
        let query = ListQuery {
            status: Some("completed".to_string()),
            gateway: Some("click".to_string()),
            sort: Some("asc".to_string()),
            limit: Some(10_000),
            offset: Some(-5),
            ..Default::default()
        };
        let params = query.into_params(Uuid::new_v4()).unwrap();
        assert_eq!(params.status, Some(TransactionStatus::Completed));
        assert_eq!(params.gateway, Some(Gateway::Click));
        assert_eq!(params.sort, SortOrder::Asc);
        assert_eq!(params.limit, FindParams::MAX_LIMIT);
        assert_eq!(params.offset, 0);
    }

    #[test]
    fn test_list_query_rejects_unknown_sort() {
        let query = ListQuery {
            sort: Some("sideways".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            query.into_params(Uuid::new_v4()),
            Err(AppError::Validation(_))
        ));
    }
}
