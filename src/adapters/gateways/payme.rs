//! Payme (paycom.uz) adapter.
//!
//! Checkout happens on Payme's hosted page. Payme drives the lifecycle with
//! JSON-RPC calls to our endpoint, authenticated with HTTP Basic auth.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::signature::constant_time_eq;
use crate::config::PaymeConfig;
use crate::domain::details::PaymeDetails;
use crate::domain::{
    Details, DetailsFieldFilter, EventKind, FieldCondition, Gateway, NormalizedEvent, Outcome,
    ProviderRef, Transaction,
};
use crate::ports::{
    GatewayClient, GatewayError, GatewayResult, PrepareRequest, Prepared, RefundRequest,
    SignatureHeaders, WebhookQuery, WebhookRefusal, WebhookVerdict,
};

/// JSON-RPC error codes of the Payme merchant API.
pub mod rpc_code {
    pub const INVALID_AMOUNT: i64 = -31001;
    pub const TRANSACTION_NOT_FOUND: i64 = -31003;
    pub const CANNOT_PERFORM: i64 = -31008;
    pub const INVALID_ACCOUNT: i64 = -31050;
    pub const SYSTEM_ERROR: i64 = -32400;
    pub const INSUFFICIENT_PRIVILEGES: i64 = -32504;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const PARSE_ERROR: i64 = -32700;
}

#[derive(Clone)]
pub struct PaymeGateway {
    config: PaymeConfig,
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    method: String,
    #[serde(default)]
    params: RpcParams,
}

#[derive(Debug, Default, Deserialize)]
struct RpcParams {
    #[serde(default)]
    id: String,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    account: Map<String, Value>,
    #[serde(default)]
    reason: Option<i64>,
    #[serde(default)]
    from: Option<i64>,
    #[serde(default)]
    to: Option<i64>,
}

impl PaymeGateway {
    pub fn new(config: PaymeConfig) -> Self {
        Self { config }
    }

    /// `{checkout_url}/{base64("m=..;ac.order_id=..;a=..")}`
    pub fn checkout_link(&self, order_id: &str, amount: i64) -> String {
        let params = format!(
            "m={};ac.order_id={};a={}",
            self.config.merchant_id, order_id, amount
        );
        format!(
            "{}/{}",
            self.config.checkout_url.trim_end_matches('/'),
            STANDARD.encode(params)
        )
    }

    fn authorize(&self, headers: &SignatureHeaders) -> GatewayResult<()> {
        let header = headers
            .get("authorization")
            .ok_or_else(|| GatewayError::InvalidSignature("missing authorization".to_string()))?;
        let encoded = header
            .strip_prefix("Basic ")
            .ok_or_else(|| GatewayError::InvalidSignature("expected basic auth".to_string()))?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| GatewayError::InvalidSignature("undecodable credentials".to_string()))?;

        let expected = format!("{}:{}", self.config.user, self.config.secret_key.expose());
        if !constant_time_eq(&decoded, &expected) {
            return Err(GatewayError::InvalidSignature(
                "payme credentials mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

fn account_filter(account: &Map<String, Value>) -> GatewayResult<DetailsFieldFilter> {
    let (key, value) = account
        .get_key_value("order_id")
        .or_else(|| account.iter().next())
        .ok_or_else(|| GatewayError::Malformed("payme account is empty".to_string()))?;
    let value = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok(DetailsFieldFilter::equals(["account", key.as_str()], value))
}

fn require_id(params: &RpcParams) -> GatewayResult<ProviderRef> {
    if params.id.is_empty() {
        return Err(GatewayError::Malformed("payme params.id is missing".to_string()));
    }
    Ok(ProviderRef::new(params.id.clone()))
}

/// Localized message Payme shows for an error code.
fn rpc_error(code: i64, data: Option<&str>) -> Value {
    use rpc_code::*;
    let (ru, uz, en) = match code {
        INVALID_AMOUNT => ("Неверная сумма", "Noto'g'ri summa", "Invalid amount"),
        TRANSACTION_NOT_FOUND => ("Транзакция не найдена", "Tranzaksiya topilmadi", "Transaction not found"),
        CANNOT_PERFORM => (
            "Невозможно выполнить операцию",
            "Amalni bajarib bo'lmaydi",
            "Unable to perform operation",
        ),
        INVALID_ACCOUNT => ("Заказ не найден или недоступен", "Buyurtma topilmadi", "Order not found or unavailable"),
        INSUFFICIENT_PRIVILEGES => (
            "Недостаточно привилегий для выполнения метода",
            "Metodni bajarish uchun huquq yetarli emas",
            "Insufficient privileges to perform this method",
        ),
        INVALID_REQUEST => ("Неверный JSON-RPC объект", "JSON-RPC so'rovi noto'g'ri", "Invalid JSON-RPC request"),
        METHOD_NOT_FOUND => ("Метод не найден", "Metod topilmadi", "Method not found"),
        PARSE_ERROR => ("Ошибка разбора JSON", "JSON tahlil xatosi", "Parse error"),
        _ => ("Системная ошибка", "Tizim xatosi", "System error"),
    };
    let mut error = json!({"code": code, "message": {"ru": ru, "uz": uz, "en": en}});
    if let Some(data) = data {
        error["data"] = Value::from(data);
    }
    error
}

fn refusal_error(refusal: WebhookRefusal, method: &str, parsed: bool) -> Value {
    use rpc_code::*;
    let opens_order = matches!(method, "CheckPerformTransaction" | "CreateTransaction");
    match refusal {
        WebhookRefusal::Unauthorized => rpc_error(INSUFFICIENT_PRIVILEGES, None),
        WebhookRefusal::Malformed if !parsed => rpc_error(PARSE_ERROR, None),
        WebhookRefusal::Malformed => rpc_error(INVALID_REQUEST, None),
        WebhookRefusal::Unsupported => rpc_error(METHOD_NOT_FOUND, Some(method)),
        WebhookRefusal::UnknownTransaction | WebhookRefusal::InvalidState if opens_order => {
            rpc_error(INVALID_ACCOUNT, Some("order_id"))
        }
        WebhookRefusal::UnknownTransaction => rpc_error(TRANSACTION_NOT_FOUND, None),
        WebhookRefusal::AmountMismatch => rpc_error(INVALID_AMOUNT, Some("amount")),
        WebhookRefusal::InvalidState => rpc_error(CANNOT_PERFORM, None),
        WebhookRefusal::Internal => rpc_error(SYSTEM_ERROR, None),
    }
}

fn payme_details(tx: &Transaction) -> Option<&PaymeDetails> {
    match tx.details() {
        Details::Payme(payme) => Some(payme),
        _ => None,
    }
}

fn nullable_reason(payme: &PaymeDetails) -> Value {
    if payme.reason == 0 {
        Value::Null
    } else {
        Value::from(payme.reason)
    }
}

/// Result object of a state-changing method, built from the stored details.
fn method_result(method: &str, payme: &PaymeDetails) -> Option<Value> {
    let result = match method {
        "CreateTransaction" => {
            let mut result = json!({
                "create_time": payme.created_time,
                "transaction": payme.transaction,
                "state": payme.state,
            });
            if !payme.receivers.is_empty() {
                result["receivers"] = json!(payme.receivers);
            }
            result
        }
        "PerformTransaction" => json!({
            "transaction": payme.transaction,
            "perform_time": payme.perform_time,
            "state": payme.state,
        }),
        "CancelTransaction" => json!({
            "transaction": payme.transaction,
            "cancel_time": payme.cancel_time,
            "state": payme.state,
        }),
        _ => return None,
    };
    Some(result)
}

fn check_result(payme: &PaymeDetails) -> Value {
    json!({
        "create_time": payme.created_time,
        "perform_time": payme.perform_time,
        "cancel_time": payme.cancel_time,
        "transaction": payme.transaction,
        "state": payme.state,
        "reason": nullable_reason(payme),
    })
}

fn statement_entry(tx: &Transaction, payme: &PaymeDetails) -> Value {
    let mut entry = json!({
        "id": payme.id,
        "time": payme.time,
        "amount": tx.quantity(),
        "account": payme.account,
        "create_time": payme.created_time,
        "perform_time": payme.perform_time,
        "cancel_time": payme.cancel_time,
        "transaction": payme.transaction,
        "state": payme.state,
        "reason": nullable_reason(payme),
    });
    if !payme.receivers.is_empty() {
        entry["receivers"] = json!(payme.receivers);
    }
    entry
}

fn answer(query: &WebhookQuery, transactions: &[Transaction]) -> Result<Value, Value> {
    match query {
        WebhookQuery::CanPerform { .. } => Ok(json!({"allow": true})),
        WebhookQuery::Status { .. } => transactions
            .first()
            .and_then(payme_details)
            .map(check_result)
            .ok_or_else(|| rpc_error(rpc_code::TRANSACTION_NOT_FOUND, None)),
        WebhookQuery::Statement { .. } => Ok(json!({
            "transactions": transactions
                .iter()
                .filter_map(|tx| payme_details(tx).map(|payme| statement_entry(tx, payme)))
                .collect::<Vec<_>>(),
        })),
    }
}

#[async_trait]
impl GatewayClient for PaymeGateway {
    fn gateway(&self) -> Gateway {
        Gateway::Payme
    }

    async fn prepare(&self, request: PrepareRequest) -> GatewayResult<Prepared> {
        let Details::Payme(mut payme) = request.details else {
            return Err(GatewayError::Malformed("expected payme details".to_string()));
        };

        payme.merchant_id = self.config.merchant_id.clone();
        payme.link = self.checkout_link(&payme.transaction, request.amount);

        Ok(Prepared {
            provider_ref: None,
            outcome: Outcome::Pending,
            details: Details::Payme(payme),
        })
    }

    /// Payme performs the transaction itself via `PerformTransaction`.
    async fn confirm(&self, _details: &Details, _idempotency_key: &str) -> GatewayResult<Outcome> {
        Ok(Outcome::Pending)
    }

    async fn refund(&self, _request: RefundRequest) -> GatewayResult<Outcome> {
        Err(GatewayError::Rejected(
            "payme refunds are initiated from the merchant cabinet".to_string(),
        ))
    }

    async fn cancel(&self, details: &Details, _idempotency_key: &str) -> GatewayResult<()> {
        match details {
            Details::Payme(payme) if payme.perform_time > 0 => Err(GatewayError::AlreadyCaptured(
                "payme transaction already performed".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn parse_query(
        &self,
        payload: &[u8],
        headers: &SignatureHeaders,
    ) -> GatewayResult<Option<WebhookQuery>> {
        self.authorize(headers)?;

        let request: RpcRequest = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::Malformed(format!("payme rpc: {}", e)))?;
        let params = request.params;

        let query = match request.method.as_str() {
            "CheckPerformTransaction" => WebhookQuery::CanPerform {
                lookup: account_filter(&params.account)?,
                amount: params.amount,
            },
            "CheckTransaction" => WebhookQuery::Status {
                lookup: DetailsFieldFilter::equals(["id"], require_id(&params)?.0),
            },
            "GetStatement" => {
                let (from, to) = params.from.zip(params.to).ok_or_else(|| {
                    GatewayError::Malformed("payme GetStatement needs from and to".to_string())
                })?;
                WebhookQuery::Statement {
                    lookup: DetailsFieldFilter::new(["time"], FieldCondition::Between(from, to)),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(query))
    }

    /// JSON-RPC reply: `{"id", "result"}` or `{"id", "error": {"code", "message", "data"}}`.
    fn webhook_reply(&self, payload: &[u8], verdict: &WebhookVerdict<'_>) -> Option<Value> {
        let request = serde_json::from_slice::<Value>(payload).ok();
        let id = request
            .as_ref()
            .and_then(|request| request.get("id"))
            .cloned()
            .unwrap_or(Value::Null);
        let method = request
            .as_ref()
            .and_then(|request| request.get("method"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let reply = match verdict {
            WebhookVerdict::Accepted { transaction } => payme_details(transaction)
                .ok_or_else(|| rpc_error(rpc_code::SYSTEM_ERROR, None))
                .and_then(|payme| {
                    method_result(method, payme)
                        .ok_or_else(|| rpc_error(rpc_code::METHOD_NOT_FOUND, Some(method)))
                }),
            WebhookVerdict::Answered {
                query,
                transactions,
            } => answer(query, transactions),
            WebhookVerdict::Refused { refusal, .. } => {
                Err(refusal_error(*refusal, method, request.is_some()))
            }
        };

        Some(match reply {
            Ok(result) => json!({"id": id, "result": result}),
            Err(error) => json!({"id": id, "error": error}),
        })
    }

    fn parse_webhook(
        &self,
        payload: &[u8],
        headers: &SignatureHeaders,
    ) -> GatewayResult<NormalizedEvent> {
        self.authorize(headers)?;

        let request: RpcRequest = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::Malformed(format!("payme rpc: {}", e)))?;
        let params = request.params;

        let mut event = match request.method.as_str() {
            "CreateTransaction" => NormalizedEvent::new(
                require_id(&params)?,
                EventKind::Prepared,
                Outcome::Pending,
                request.method.clone(),
                account_filter(&params.account)?,
            ),
            "PerformTransaction" => NormalizedEvent::new(
                require_id(&params)?,
                EventKind::Confirmed,
                Outcome::Completed,
                request.method.clone(),
                DetailsFieldFilter::equals(["id"], params.id.clone()),
            ),
            "CancelTransaction" => NormalizedEvent::new(
                require_id(&params)?,
                EventKind::Canceled,
                Outcome::Failed,
                request.method.clone(),
                DetailsFieldFilter::equals(["id"], params.id.clone()),
            ),
            "CheckPerformTransaction" | "CheckTransaction" | "GetStatement" => {
                return Err(GatewayError::UnrecognizedEventKind(format!(
                    "payme {} carries no state change",
                    request.method
                )))
            }
            other => {
                return Err(GatewayError::UnrecognizedEventKind(format!(
                    "payme method {}",
                    other
                )))
            }
        };

        if let Some(time) = params.time {
            event = event.with_attribute("time", time.to_string());
        }
        if let Some(reason) = params.reason {
            event = event.with_attribute("reason", reason.to_string());
        }
        if let Some(amount) = params.amount {
            event = event.with_amount(amount);
        }
        Ok(event)
    }
}
