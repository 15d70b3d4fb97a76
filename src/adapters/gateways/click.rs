//! Click (click.uz) adapter.
//!
//! Payments start from a hosted payment link. Click then calls back twice,
//! `action=0` (prepare) and `action=1` (complete), with form-encoded bodies
//! signed by an MD5 `sign_string`. Refunds go through the merchant API.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;
use url::Url;

use super::http::GatewayHttp;
use super::signature::{constant_time_eq, md5_hex, sha1_hex};
use crate::config::ClickConfig;
use crate::domain::{
    Currency, Details, DetailsFieldFilter, EventKind, Gateway, NormalizedEvent, Outcome,
    ProviderRef, Transaction, TransactionStatus,
};
use crate::ports::{
    GatewayClient, GatewayError, GatewayResult, PrepareRequest, Prepared, RefundRequest,
    SignatureHeaders, WebhookRefusal, WebhookVerdict,
};

pub const ACTION_PREPARE: i64 = 0;
pub const ACTION_COMPLETE: i64 = 1;

/// Error codes Click expects in callback replies.
pub mod reply_code {
    pub const SUCCESS: i64 = 0;
    pub const SIGN_CHECK_FAILED: i64 = -1;
    pub const INCORRECT_AMOUNT: i64 = -2;
    pub const ACTION_NOT_FOUND: i64 = -3;
    pub const ALREADY_PAID: i64 = -4;
    pub const ORDER_NOT_FOUND: i64 = -5;
    pub const TRANSACTION_NOT_FOUND: i64 = -6;
    pub const BAD_REQUEST: i64 = -8;
    pub const TRANSACTION_CANCELLED: i64 = -9;
}

#[derive(Clone)]
pub struct ClickGateway {
    config: ClickConfig,
    http: GatewayHttp,
}

#[derive(Debug, Deserialize)]
struct ClickApiReply {
    error_code: i64,
    #[serde(default)]
    error_note: String,
    #[serde(default)]
    payment_status: Option<i64>,
}

/// Fields of a prepare/complete callback, as strings exactly as signed.
#[derive(Debug)]
struct Callback {
    click_trans_id: String,
    service_id: String,
    click_paydoc_id: String,
    merchant_trans_id: String,
    merchant_prepare_id: String,
    amount: String,
    action: i64,
    error: i64,
    error_note: String,
    sign_time: String,
    sign_string: String,
}

impl Callback {
    fn parse(payload: &[u8]) -> GatewayResult<Self> {
        let form: HashMap<String, String> = url::form_urlencoded::parse(payload)
            .into_owned()
            .collect();
        let field = |name: &str| -> GatewayResult<String> {
            form.get(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| GatewayError::Malformed(format!("click callback is missing {}", name)))
        };
        let number = |name: &str| -> GatewayResult<i64> {
            field(name)?
                .parse()
                .map_err(|_| GatewayError::Malformed(format!("click callback {} is not a number", name)))
        };

        Ok(Self {
            click_trans_id: field("click_trans_id")?,
            service_id: field("service_id")?,
            click_paydoc_id: form.get("click_paydoc_id").cloned().unwrap_or_default(),
            merchant_trans_id: field("merchant_trans_id")?,
            merchant_prepare_id: form.get("merchant_prepare_id").cloned().unwrap_or_default(),
            amount: field("amount")?,
            action: number("action")?,
            error: form
                .get("error")
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(0),
            error_note: form.get("error_note").cloned().unwrap_or_default(),
            sign_time: field("sign_time")?,
            sign_string: field("sign_string")?,
        })
    }
}

impl ClickGateway {
    pub fn new(config: ClickConfig, http: GatewayHttp) -> Self {
        Self { config, http }
    }

    /// MD5 over the callback fields. The complete callback also signs `merchant_prepare_id`.
    pub fn sign(
        &self,
        click_trans_id: &str,
        merchant_trans_id: &str,
        merchant_prepare_id: Option<&str>,
        amount: &str,
        action: i64,
        sign_time: &str,
    ) -> String {
        md5_hex(&format!(
            "{}{}{}{}{}{}{}{}",
            click_trans_id,
            self.config.service_id,
            self.config.secret_key.expose(),
            merchant_trans_id,
            merchant_prepare_id.unwrap_or(""),
            amount,
            action,
            sign_time
        ))
    }

    fn auth_header(&self) -> String {
        let timestamp = Utc::now().timestamp();
        let digest = sha1_hex(&format!("{}{}", timestamp, self.config.secret_key.expose()));
        format!("{}:{}:{}", self.config.merchant_user_id, digest, timestamp)
    }

    fn payment_link(&self, merchant_trans_id: &str, amount: i64, currency: Currency) -> GatewayResult<String> {
        let mut link = Url::parse(&self.config.checkout_url)
            .map_err(|e| GatewayError::Rejected(format!("invalid click checkout url: {}", e)))?;
        link.query_pairs_mut()
            .append_pair("service_id", &self.config.service_id.to_string())
            .append_pair("merchant_id", &self.config.merchant_id.to_string())
            .append_pair("amount", &currency.format_major(amount))
            .append_pair("transaction_param", merchant_trans_id);
        Ok(link.into())
    }

    fn payment_id(details: &Details) -> GatewayResult<i64> {
        match details {
            Details::Click(click) if click.payment_id > 0 => Ok(click.payment_id),
            Details::Click(_) => Err(GatewayError::Rejected(
                "click payment id is not known yet".to_string(),
            )),
            other => Err(GatewayError::Malformed(format!(
                "expected click details, got {}",
                other.gateway()
            ))),
        }
    }
}

/// Code and note for a callback Click should not retry. Transient failures
/// have no code; those are left to fail with an HTTP error instead.
fn refusal_code(
    refusal: WebhookRefusal,
    action: Option<i64>,
    transaction: Option<&Transaction>,
) -> Option<(i64, &'static str)> {
    use reply_code::*;
    Some(match refusal {
        WebhookRefusal::Unauthorized => (SIGN_CHECK_FAILED, "SIGN CHECK FAILED!"),
        WebhookRefusal::AmountMismatch => (INCORRECT_AMOUNT, "Incorrect parameter amount"),
        WebhookRefusal::Unsupported => (ACTION_NOT_FOUND, "Action not found"),
        WebhookRefusal::UnknownTransaction if action == Some(ACTION_COMPLETE) => {
            (TRANSACTION_NOT_FOUND, "Transaction does not exist")
        }
        WebhookRefusal::UnknownTransaction => (ORDER_NOT_FOUND, "User does not exist"),
        WebhookRefusal::InvalidState => match transaction.map(Transaction::status) {
            Some(TransactionStatus::Canceled | TransactionStatus::Failed) => {
                (TRANSACTION_CANCELLED, "Transaction cancelled")
            }
            Some(
                TransactionStatus::Completed
                | TransactionStatus::PartiallyRefunded
                | TransactionStatus::Refunded,
            ) => (ALREADY_PAID, "Already paid"),
            _ => (BAD_REQUEST, "Error in request from click"),
        },
        WebhookRefusal::Malformed => (BAD_REQUEST, "Error in request from click"),
        WebhookRefusal::Internal => return None,
    })
}

#[async_trait]
impl GatewayClient for ClickGateway {
    fn gateway(&self) -> Gateway {
        Gateway::Click
    }

    async fn prepare(&self, request: PrepareRequest) -> GatewayResult<Prepared> {
        let Details::Click(mut click) = request.details else {
            return Err(GatewayError::Malformed("expected click details".to_string()));
        };

        click.service_id = self.config.service_id;
        click.merchant_id = self.config.merchant_id;
        click.merchant_user_id = self.config.merchant_user_id;
        click.link = self.payment_link(&click.merchant_trans_id, request.amount, request.currency)?;

        debug!(transaction_id = %request.transaction_id, "Click payment link generated");
        Ok(Prepared {
            provider_ref: Some(ProviderRef::new(click.merchant_trans_id.clone())),
            outcome: Outcome::Pending,
            details: Details::Click(click),
        })
    }

    /// Click completes through its own callback; there is nothing to confirm.
    async fn confirm(&self, _details: &Details, _idempotency_key: &str) -> GatewayResult<Outcome> {
        Ok(Outcome::Pending)
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<Outcome> {
        if request.amount > request.refundable {
            return Err(GatewayError::RefundExceedsCaptured(format!(
                "requested {}, refundable {}",
                request.amount, request.refundable
            )));
        }
        if request.amount != request.captured {
            return Err(GatewayError::Rejected(
                "click only supports full refunds".to_string(),
            ));
        }
        let payment_id = Self::payment_id(&request.details)?;

        let url = self.http.url(&format!(
            "/v2/merchant/payment/reversal/{}/{}",
            self.config.service_id, payment_id
        ));
        let reply = self
            .http
            .send(
                self.http
                    .client()
                    .delete(url)
                    .header("Accept", "application/json")
                    .header("Auth", self.auth_header()),
            )
            .await?;
        if !reply.is_success() {
            return Err(self.http.rejected(&reply));
        }

        let body: ClickApiReply = reply.json()?;
        if body.error_code != 0 {
            return Err(GatewayError::Rejected(format!(
                "click reversal failed ({}): {}",
                body.error_code, body.error_note
            )));
        }
        Ok(Outcome::Completed)
    }

    /// Nothing is captured before the complete callback, so there is nothing to void.
    async fn cancel(&self, _details: &Details, _idempotency_key: &str) -> GatewayResult<()> {
        Ok(())
    }

    fn parse_webhook(
        &self,
        payload: &[u8],
        _headers: &SignatureHeaders,
    ) -> GatewayResult<NormalizedEvent> {
        let callback = Callback::parse(payload)?;

        if callback.service_id != self.config.service_id.to_string() {
            return Err(GatewayError::InvalidSignature(
                "click callback for a different service".to_string(),
            ));
        }

        let prepare_id = match callback.action {
            ACTION_PREPARE => None,
            ACTION_COMPLETE => Some(callback.merchant_prepare_id.as_str()),
            other => {
                return Err(GatewayError::UnrecognizedEventKind(format!(
                    "click action {}",
                    other
                )))
            }
        };
        let expected = self.sign(
            &callback.click_trans_id,
            &callback.merchant_trans_id,
            prepare_id,
            &callback.amount,
            callback.action,
            &callback.sign_time,
        );
        if !constant_time_eq(&expected, &callback.sign_string.to_ascii_lowercase()) {
            return Err(GatewayError::InvalidSignature(
                "click sign_string mismatch".to_string(),
            ));
        }

        let amount = Currency::Uzs.parse_major(&callback.amount).ok_or_else(|| {
            GatewayError::Malformed(format!("click amount {} is not a number", callback.amount))
        })?;

        let (kind, outcome) = match (callback.action, callback.error) {
            (_, error) if error < 0 => (EventKind::Failed, Outcome::Failed),
            (ACTION_PREPARE, _) => (EventKind::Prepared, Outcome::Pending),
            _ => (EventKind::Confirmed, Outcome::Completed),
        };

        let mut event = NormalizedEvent::new(
            ProviderRef::new(callback.click_trans_id),
            kind,
            outcome,
            format!("action={} error={}", callback.action, callback.error),
            DetailsFieldFilter::equals(["merchant_trans_id"], callback.merchant_trans_id),
        )
        .with_attribute("action", callback.action.to_string())
        .with_attribute("click_paydoc_id", callback.click_paydoc_id)
        .with_attribute("error", callback.error.to_string())
        .with_attribute("error_note", callback.error_note)
        .with_attribute("sign_time", callback.sign_time)
        .with_attribute("sign_string", callback.sign_string);
        if kind == EventKind::Confirmed {
            event = event.with_amount(amount);
        }
        Ok(event)
    }

    /// `{click_trans_id, merchant_trans_id, merchant_prepare_id | merchant_confirm_id, error, error_note}`
    fn webhook_reply(&self, payload: &[u8], verdict: &WebhookVerdict<'_>) -> Option<Value> {
        let form: HashMap<String, String> = url::form_urlencoded::parse(payload)
            .into_owned()
            .collect();
        let action = form
            .get("action")
            .and_then(|value| value.trim().parse::<i64>().ok());

        let (error, note, transaction) = match verdict {
            WebhookVerdict::Accepted { transaction } => match transaction.status() {
                TransactionStatus::Canceled | TransactionStatus::Failed => (
                    reply_code::TRANSACTION_CANCELLED,
                    "Transaction cancelled",
                    Some(*transaction),
                ),
                _ => (reply_code::SUCCESS, "Success", Some(*transaction)),
            },
            WebhookVerdict::Refused {
                refusal,
                transaction,
            } => {
                let (code, note) = refusal_code(*refusal, action, *transaction)?;
                (code, note, *transaction)
            }
            WebhookVerdict::Answered { .. } => return None,
        };

        let click_trans_id = form
            .get("click_trans_id")
            .map(|value| match value.trim().parse::<i64>() {
                Ok(id) => Value::from(id),
                Err(_) => Value::from(value.as_str()),
            })
            .unwrap_or(Value::Null);
        let mut reply = json!({
            "click_trans_id": click_trans_id,
            "merchant_trans_id": form.get("merchant_trans_id").cloned().unwrap_or_default(),
            "error": error,
            "error_note": note,
        });

        let click = transaction.and_then(|tx| match tx.details() {
            Details::Click(click) => Some(click),
            _ => None,
        });
        let (field, id) = if action == Some(ACTION_COMPLETE) {
            ("merchant_confirm_id", click.map(|c| c.merchant_confirm_id))
        } else {
            ("merchant_prepare_id", click.map(|c| c.merchant_prepare_id))
        };
        reply[field] = id.filter(|id| *id > 0).map(Value::from).unwrap_or(Value::Null);
        Some(reply)
    }

    async fn fetch_status(&self, details: &Details) -> GatewayResult<Option<Outcome>> {
        let Ok(payment_id) = Self::payment_id(details) else {
            return Ok(None);
        };

        let url = self.http.url(&format!(
            "/v2/merchant/payment/status/{}/{}",
            self.config.service_id, payment_id
        ));
        let reply = self
            .http
            .send(
                self.http
                    .client()
                    .get(url)
                    .header("Accept", "application/json")
                    .header("Auth", self.auth_header()),
            )
            .await?;
        if !reply.is_success() {
            return Err(self.http.rejected(&reply));
        }

        let body: ClickApiReply = reply.json()?;
        if body.error_code != 0 {
            return Ok(None);
        }
        Ok(match body.payment_status {
            Some(2) => Some(Outcome::Completed),
            Some(status) if status < 0 => Some(Outcome::Failed),
            _ => Some(Outcome::Pending),
        })
    }
}
