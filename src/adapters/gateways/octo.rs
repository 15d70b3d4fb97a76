//! Octo (octo.uz) adapter: JSON API for prepare, capture/cancel and refund,
//! plus SHA-1 signed status notifications.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::http::GatewayHttp;
use super::signature::{constant_time_eq, sha1_hex};
use crate::config::OctoConfig;
use crate::domain::details::OctoDetails;
use crate::domain::{
    Currency, Details, DetailsFieldFilter, EventKind, Gateway, NormalizedEvent, Outcome,
    ProviderRef,
};
use crate::ports::{
    GatewayClient, GatewayError, GatewayResult, PrepareRequest, Prepared, RefundRequest,
    SignatureHeaders,
};

#[derive(Clone)]
pub struct OctoGateway {
    config: OctoConfig,
    http: GatewayHttp,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: i64,
    #[serde(default, rename = "errMessage")]
    err_message: Option<String>,
    #[serde(default)]
    data: Option<PaymentData>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentData {
    #[serde(default, rename = "octo_payment_UUID")]
    octo_payment_uuid: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    octo_pay_url: String,
}

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "octo_payment_UUID")]
    octo_payment_uuid: String,
    shop_transaction_id: String,
    status: String,
    signature: String,
    #[serde(default)]
    hash_key: String,
    #[serde(default)]
    total_sum: Option<Value>,
    #[serde(default)]
    refunded_sum: Option<Value>,
    #[serde(default)]
    transfer_sum: Option<Value>,
    #[serde(default)]
    card_type: String,
    #[serde(default)]
    card_country: String,
    #[serde(default, rename = "maskedPan")]
    masked_pan: String,
    #[serde(default)]
    is_physical_card: Option<bool>,
    #[serde(default)]
    rrn: String,
    #[serde(default, rename = "riskLevel")]
    risk_level: Option<i64>,
    #[serde(default)]
    payed_time: String,
}

/// Octo speaks major units (`1000.50`); keep our side integral.
fn major_value(currency: Currency, minor: i64) -> Value {
    serde_json::from_str(&currency.format_major(minor)).unwrap_or(Value::Null)
}

fn minor_amount(currency: Currency, value: &Option<Value>) -> GatewayResult<Option<i64>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Null => return Ok(None),
        other => {
            return Err(GatewayError::Malformed(format!("octo amount {} is not a number", other)))
        }
    };
    currency
        .parse_major(&raw)
        .map(Some)
        .ok_or_else(|| GatewayError::Malformed(format!("octo amount {} is not a number", raw)))
}

impl OctoGateway {
    pub fn new(config: OctoConfig, http: GatewayHttp) -> Self {
        Self { config, http }
    }

    pub fn notification_signature(&self, payment_uuid: &str, status: &str) -> String {
        sha1_hex(&format!(
            "{}{}{}",
            self.config.unique_key.expose(),
            payment_uuid,
            status
        ))
        .to_ascii_uppercase()
    }

    async fn call(&self, path: &str, body: Value) -> GatewayResult<PaymentData> {
        let reply = self
            .http
            .send(self.http.client().post(self.http.url(path)).json(&body))
            .await?;
        if !reply.is_success() {
            return Err(self.http.rejected(&reply));
        }

        let envelope: Envelope = reply.json()?;
        if envelope.error != 0 {
            return Err(GatewayError::Rejected(format!(
                "octo error {}: {}",
                envelope.error,
                envelope.err_message.unwrap_or_default()
            )));
        }
        Ok(envelope.data.unwrap_or_default())
    }

    fn octo_details(details: &Details) -> GatewayResult<&OctoDetails> {
        match details {
            Details::Octo(octo) => Ok(octo),
            other => Err(GatewayError::Malformed(format!(
                "expected octo details, got {}",
                other.gateway()
            ))),
        }
    }
}

fn outcome_for_status(status: &str) -> Outcome {
    match status {
        "succeeded" => Outcome::Completed,
        "canceled" | "cancelled" | "failed" => Outcome::Failed,
        _ => Outcome::Pending,
    }
}

#[async_trait]
impl GatewayClient for OctoGateway {
    fn gateway(&self) -> Gateway {
        Gateway::Octo
    }

    async fn prepare(&self, request: PrepareRequest) -> GatewayResult<Prepared> {
        let Details::Octo(mut octo) = request.details else {
            return Err(GatewayError::Malformed("expected octo details".to_string()));
        };

        octo.octo_shop_id = self.config.shop_id;
        octo.test = octo.test || self.config.test;
        if octo.init_time.is_empty() {
            octo.init_time = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        }
        if octo.notify_url.is_empty() {
            octo.notify_url = self.config.notify_url.clone().unwrap_or_default();
        }
        if octo.return_url.is_empty() {
            octo.return_url = self.config.return_url.clone().unwrap_or_default();
        }

        let data = self
            .call(
                "/prepare_payment",
                json!({
                    "octo_shop_id": self.config.shop_id,
                    "octo_secret": self.config.secret.expose(),
                    "shop_transaction_id": octo.shop_transaction_id,
                    "auto_capture": octo.auto_capture,
                    "test": octo.test,
                    "init_time": octo.init_time,
                    "total_sum": major_value(request.currency, request.amount),
                    "currency": request.currency.code(),
                    "description": octo.description,
                    "return_url": octo.return_url,
                    "notify_url": octo.notify_url,
                }),
            )
            .await?;

        debug!(transaction_id = %request.transaction_id, status = %data.status, "Octo payment prepared");
        octo.octo_payment_uuid = data.octo_payment_uuid;
        octo.octo_pay_url = data.octo_pay_url;
        octo.status = data.status;

        let provider_ref = (!octo.octo_payment_uuid.is_empty())
            .then(|| ProviderRef::new(octo.octo_payment_uuid.clone()));
        Ok(Prepared {
            provider_ref,
            outcome: match outcome_for_status(&octo.status) {
                // Completion is only trusted from the confirm step or a signed notification.
                Outcome::Completed => Outcome::Pending,
                other => other,
            },
            details: Details::Octo(octo),
        })
    }

    /// Captures a two-stage payment. Auto-captured payments settle on their own.
    async fn confirm(&self, details: &Details, _idempotency_key: &str) -> GatewayResult<Outcome> {
        let octo = Self::octo_details(details)?;
        if octo.auto_capture || octo.octo_payment_uuid.is_empty() {
            return Ok(Outcome::Pending);
        }

        let data = self
            .call(
                "/set_accept",
                json!({
                    "octo_shop_id": self.config.shop_id,
                    "octo_secret": self.config.secret.expose(),
                    "octo_payment_UUID": octo.octo_payment_uuid,
                    "accept_status": "capture",
                }),
            )
            .await?;
        Ok(outcome_for_status(&data.status))
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<Outcome> {
        if request.amount > request.refundable {
            return Err(GatewayError::RefundExceedsCaptured(format!(
                "requested {}, refundable {}",
                request.amount, request.refundable
            )));
        }
        let octo = Self::octo_details(&request.details)?;
        if octo.octo_payment_uuid.is_empty() {
            return Err(GatewayError::Rejected("octo payment was never started".to_string()));
        }

        self.call(
            "/refund",
            json!({
                "octo_shop_id": self.config.shop_id,
                "octo_secret": self.config.secret.expose(),
                "shop_refund_id": request.idempotency_key,
                "octo_payment_UUID": octo.octo_payment_uuid,
                "amount": major_value(request.currency, request.amount),
            }),
        )
        .await?;
        Ok(Outcome::Completed)
    }

    async fn cancel(&self, details: &Details, _idempotency_key: &str) -> GatewayResult<()> {
        let octo = Self::octo_details(details)?;
        if octo.status == "succeeded" {
            return Err(GatewayError::AlreadyCaptured(
                "octo payment already succeeded".to_string(),
            ));
        }
        if octo.octo_payment_uuid.is_empty() {
            return Ok(());
        }

        let data = self
            .call(
                "/set_accept",
                json!({
                    "octo_shop_id": self.config.shop_id,
                    "octo_secret": self.config.secret.expose(),
                    "octo_payment_UUID": octo.octo_payment_uuid,
                    "accept_status": "cancel",
                }),
            )
            .await?;
        if data.status == "succeeded" {
            return Err(GatewayError::AlreadyCaptured(
                "octo payment already succeeded".to_string(),
            ));
        }
        Ok(())
    }

    fn parse_webhook(
        &self,
        payload: &[u8],
        _headers: &SignatureHeaders,
    ) -> GatewayResult<NormalizedEvent> {
        let note: Notification = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::Malformed(format!("octo notification: {}", e)))?;

        let expected = self.notification_signature(&note.octo_payment_uuid, &note.status);
        if !constant_time_eq(&expected, &note.signature.to_ascii_uppercase()) {
            return Err(GatewayError::InvalidSignature(
                "octo signature mismatch".to_string(),
            ));
        }

        // Octo notifications carry no currency; amounts are compared in the shop currency.
        let currency = Currency::Uzs;
        let total = minor_amount(currency, &note.total_sum)?;
        let refunded = minor_amount(currency, &note.refunded_sum)?;
        let transferred = minor_amount(currency, &note.transfer_sum)?;

        let (kind, outcome, amount) = match note.status.as_str() {
            "created" | "wait_user_action" | "waiting_for_capture" => {
                (EventKind::Prepared, Outcome::Pending, None)
            }
            "succeeded" => (EventKind::Confirmed, Outcome::Completed, total),
            "canceled" | "cancelled" => (EventKind::Canceled, Outcome::Failed, None),
            "failed" => (EventKind::Failed, Outcome::Failed, None),
            "refunded" | "partial_refunded" => (EventKind::Refunded, Outcome::Completed, refunded),
            other => {
                return Err(GatewayError::UnrecognizedEventKind(format!(
                    "octo status {}",
                    other
                )))
            }
        };

        let mut event = NormalizedEvent::new(
            ProviderRef::new(note.octo_payment_uuid),
            kind,
            outcome,
            note.status,
            DetailsFieldFilter::equals(["shop_transaction_id"], note.shop_transaction_id),
        )
        .with_attribute("card_type", note.card_type)
        .with_attribute("card_country", note.card_country)
        .with_attribute("masked_pan", note.masked_pan)
        .with_attribute("rrn", note.rrn)
        .with_attribute("payed_time", note.payed_time)
        .with_attribute("signature", note.signature)
        .with_attribute("hash_key", note.hash_key);
        if let Some(physical) = note.is_physical_card {
            event = event.with_attribute("is_physical_card", physical.to_string());
        }
        if let Some(risk) = note.risk_level {
            event = event.with_attribute("risk_level", risk.to_string());
        }
        if let Some(refunded) = refunded {
            event = event.with_attribute("refunded_sum", refunded.to_string());
        }
        if let Some(transferred) = transferred {
            event = event.with_attribute("transfer_sum", transferred.to_string());
        }
        if let Some(amount) = amount {
            event = event.with_amount(amount);
        }
        Ok(event)
    }
}
