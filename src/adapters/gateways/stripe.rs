//! Stripe adapter: hosted Checkout sessions, refunds and signed webhooks.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::http::{GatewayHttp, HttpReply};
use super::signature::{parse_timestamped_header, verify_hmac_sha256_hex};
use crate::config::StripeConfig;
use crate::domain::details::StripeDetails;
use crate::domain::{
    Details, DetailsFieldFilter, EventKind, Gateway, NormalizedEvent, Outcome, ProviderRef,
};
use crate::ports::{
    GatewayClient, GatewayError, GatewayResult, PrepareRequest, Prepared, RefundRequest,
    SignatureHeaders,
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Clone)]
pub struct StripeGateway {
    config: StripeConfig,
    http: GatewayHttp,
    tolerance_secs: i64,
}

#[derive(Debug, Default, Deserialize)]
struct Session {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    payment_intent: Value,
    #[serde(default)]
    customer: Value,
    #[serde(default)]
    subscription: Value,
    #[serde(default)]
    invoice: Value,
    #[serde(default)]
    amount_total: Option<i64>,
}

impl Session {
    fn outcome(&self) -> Outcome {
        match (self.payment_status.as_deref(), self.status.as_deref()) {
            (Some("paid") | Some("no_payment_required"), _) => Outcome::Completed,
            (_, Some("expired")) => Outcome::Failed,
            _ => Outcome::Pending,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Refund {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: Value,
}

/// Stripe fields may arrive as a bare id or as an expanded object.
fn id_of(value: &Value) -> String {
    match value {
        Value::String(id) => id.clone(),
        Value::Object(object) => object
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

fn str_field(object: &Value, key: &str) -> String {
    object.get(key).map(id_of).unwrap_or_default()
}

fn int_field(object: &Value, key: &str) -> Option<i64> {
    object.get(key).and_then(Value::as_i64)
}

impl StripeGateway {
    pub fn new(config: StripeConfig, http: GatewayHttp) -> Self {
        Self {
            config,
            http,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Verifies `t=..,v1=..` against `HMAC-SHA256("{t}.{payload}")` as of `now`.
    pub fn verify_signature_at(
        &self,
        payload: &[u8],
        header: &str,
        now: i64,
    ) -> GatewayResult<()> {
        let (timestamp, signatures) = parse_timestamped_header(header).ok_or_else(|| {
            GatewayError::InvalidSignature("malformed stripe-signature header".to_string())
        })?;

        if (now - timestamp).abs() > self.tolerance_secs {
            return Err(GatewayError::InvalidSignature(format!(
                "stripe signature timestamp {} outside tolerance",
                timestamp
            )));
        }

        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(payload);
        let secret = self.config.signing_secret.expose().as_bytes();
        if signatures
            .iter()
            .any(|signature| verify_hmac_sha256_hex(secret, &signed, signature))
        {
            Ok(())
        } else {
            Err(GatewayError::InvalidSignature(
                "stripe signature mismatch".to_string(),
            ))
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(self.config.secret_key.expose())
    }

    /// Maps a 4xx reply onto the closest gateway error, reading Stripe's error envelope.
    fn api_error(&self, reply: &HttpReply) -> GatewayError {
        let Ok(envelope) = reply.json::<ErrorEnvelope>() else {
            return self.http.rejected(reply);
        };
        let code = envelope.error.code.unwrap_or_default();
        let message = envelope.error.message.unwrap_or_default();
        match code.as_str() {
            "amount_too_large" | "charge_exceeds_source_limit" => {
                GatewayError::RefundExceedsCaptured(message)
            }
            "charge_already_refunded" => GatewayError::RefundExceedsCaptured(message),
            _ => GatewayError::Rejected(format!("stripe {}: {}", code, message)),
        }
    }

    async fn get_session(&self, session_id: &str) -> GatewayResult<Session> {
        let url = self
            .http
            .url(&format!("/v1/checkout/sessions/{}", session_id));
        let reply = self
            .http
            .send(self.authorized(self.http.client().get(url)))
            .await?;
        if !reply.is_success() {
            return Err(self.api_error(&reply));
        }
        reply.json()
    }

    fn session_form(&self, stripe: &StripeDetails, request: &PrepareRequest) -> Vec<(String, String)> {
        let success_url = if stripe.success_url.is_empty() {
            self.config.success_url.clone()
        } else {
            stripe.success_url.clone()
        };
        let cancel_url = if stripe.cancel_url.is_empty() {
            self.config.cancel_url.clone()
        } else {
            stripe.cancel_url.clone()
        };

        let mut form = vec![
            ("mode".to_string(), stripe.mode.clone()),
            (
                "client_reference_id".to_string(),
                stripe.client_reference_id.clone(),
            ),
            ("success_url".to_string(), success_url),
            ("cancel_url".to_string(), cancel_url),
            (
                "metadata[transaction_id]".to_string(),
                request.transaction_id.to_string(),
            ),
        ];
        if !stripe.customer_id.is_empty() {
            form.push(("customer".to_string(), stripe.customer_id.clone()));
        }

        if stripe.items.is_empty() {
            form.extend([
                (
                    "line_items[0][price_data][currency]".to_string(),
                    request.currency.code().to_ascii_lowercase(),
                ),
                (
                    "line_items[0][price_data][unit_amount]".to_string(),
                    request.amount.to_string(),
                ),
                (
                    "line_items[0][price_data][product_data][name]".to_string(),
                    format!("Order {}", stripe.client_reference_id),
                ),
                ("line_items[0][quantity]".to_string(), "1".to_string()),
            ]);
        } else {
            for (i, item) in stripe.items.iter().enumerate() {
                form.push((format!("line_items[{}][price]", i), item.price_id.clone()));
                form.push((
                    format!("line_items[{}][quantity]", i),
                    item.quantity.to_string(),
                ));
            }
        }
        form
    }
}

#[async_trait]
impl GatewayClient for StripeGateway {
    fn gateway(&self) -> Gateway {
        Gateway::Stripe
    }

    async fn prepare(&self, request: PrepareRequest) -> GatewayResult<Prepared> {
        let Details::Stripe(stripe) = &request.details else {
            return Err(GatewayError::Malformed("expected stripe details".to_string()));
        };
        let form = self.session_form(stripe, &request);
        let mut stripe = stripe.clone();

        let reply = self
            .http
            .send(
                self.authorized(self.http.client().post(self.http.url("/v1/checkout/sessions")))
                    .header("Idempotency-Key", &request.idempotency_key)
                    .form(&form),
            )
            .await?;
        if !reply.is_success() {
            return Err(self.api_error(&reply));
        }
        let session: Session = reply.json()?;

        debug!(transaction_id = %request.transaction_id, session_id = %session.id, "Stripe checkout session created");
        stripe.session_id = session.id.clone();
        stripe.url = session.url.clone().unwrap_or_default();
        stripe.status = session.status.clone().unwrap_or_default();
        stripe.payment_intent_id = id_of(&session.payment_intent);
        if stripe.customer_id.is_empty() {
            stripe.customer_id = id_of(&session.customer);
        }

        Ok(Prepared {
            provider_ref: Some(ProviderRef::new(session.id.clone())),
            outcome: session.outcome(),
            details: Details::Stripe(stripe),
        })
    }

    async fn confirm(&self, details: &Details, _idempotency_key: &str) -> GatewayResult<Outcome> {
        match details {
            Details::Stripe(stripe) if !stripe.session_id.is_empty() => {
                Ok(self.get_session(&stripe.session_id).await?.outcome())
            }
            Details::Stripe(_) => Ok(Outcome::Pending),
            other => Err(GatewayError::Malformed(format!(
                "expected stripe details, got {}",
                other.gateway()
            ))),
        }
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<Outcome> {
        if request.amount > request.refundable {
            return Err(GatewayError::RefundExceedsCaptured(format!(
                "requested {}, refundable {}",
                request.amount, request.refundable
            )));
        }
        let Details::Stripe(stripe) = &request.details else {
            return Err(GatewayError::Malformed("expected stripe details".to_string()));
        };
        if stripe.payment_intent_id.is_empty() {
            return Err(GatewayError::Rejected(
                "stripe payment intent is not known yet".to_string(),
            ));
        }

        let form = [
            ("payment_intent", stripe.payment_intent_id.clone()),
            ("amount", request.amount.to_string()),
            ("metadata[transaction_id]", request.transaction_id.to_string()),
        ];
        let reply = self
            .http
            .send(
                self.authorized(self.http.client().post(self.http.url("/v1/refunds")))
                    .header("Idempotency-Key", &request.idempotency_key)
                    .form(&form),
            )
            .await?;
        if !reply.is_success() {
            return Err(self.api_error(&reply));
        }

        let refund: Refund = reply.json()?;
        Ok(match refund.status.as_deref() {
            Some("succeeded") => Outcome::Completed,
            Some("failed") | Some("canceled") => Outcome::Failed,
            _ => Outcome::Pending,
        })
    }

    async fn cancel(&self, details: &Details, idempotency_key: &str) -> GatewayResult<()> {
        let Details::Stripe(stripe) = details else {
            return Err(GatewayError::Malformed("expected stripe details".to_string()));
        };
        if stripe.session_id.is_empty() {
            return Ok(());
        }

        let url = self
            .http
            .url(&format!("/v1/checkout/sessions/{}/expire", stripe.session_id));
        let reply = self
            .http
            .send(
                self.authorized(self.http.client().post(url))
                    .header("Idempotency-Key", idempotency_key),
            )
            .await?;
        if reply.is_success() {
            return Ok(());
        }

        // Expiring fails once the session is complete or already expired.
        let session = self.get_session(&stripe.session_id).await?;
        match session.outcome() {
            Outcome::Completed => Err(GatewayError::AlreadyCaptured(format!(
                "stripe session {} is already paid",
                session.id
            ))),
            Outcome::Failed => Ok(()),
            Outcome::Pending => Err(self.api_error(&reply)),
        }
    }

    fn parse_webhook(
        &self,
        payload: &[u8],
        headers: &SignatureHeaders,
    ) -> GatewayResult<NormalizedEvent> {
        let header = headers.get(SIGNATURE_HEADER).ok_or_else(|| {
            GatewayError::InvalidSignature("missing stripe-signature header".to_string())
        })?;
        self.verify_signature_at(payload, header, Utc::now().timestamp())?;

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::Malformed(format!("stripe event: {}", e)))?;
        let object = &event.data.object;
        let object_id = str_field(object, "id");
        if object_id.is_empty() {
            return Err(GatewayError::Malformed(
                "stripe event object has no id".to_string(),
            ));
        }

        let session_lookup = || DetailsFieldFilter::equals(["session_id"], object_id.clone());
        let invoice_lookup = || DetailsFieldFilter::equals(["invoice_id"], object_id.clone());

        let normalized = match event.event_type.as_str() {
            "checkout.session.completed" => {
                let session: Session = serde_json::from_value(object.clone())
                    .map_err(|e| GatewayError::Malformed(format!("stripe session: {}", e)))?;
                let (kind, outcome) = match session.outcome() {
                    Outcome::Completed => (EventKind::Confirmed, Outcome::Completed),
                    _ => (EventKind::Prepared, Outcome::Pending),
                };
                let mut normalized = NormalizedEvent::new(
                    ProviderRef::new(session.id.clone()),
                    kind,
                    outcome,
                    event.event_type.clone(),
                    session_lookup(),
                )
                .with_attribute("session_id", session.id.clone())
                .with_attribute("payment_intent_id", id_of(&session.payment_intent))
                .with_attribute("customer_id", id_of(&session.customer))
                .with_attribute("subscription_id", id_of(&session.subscription))
                .with_attribute("invoice_id", id_of(&session.invoice));
                if let (EventKind::Confirmed, Some(total)) = (kind, session.amount_total) {
                    normalized = normalized.with_amount(total);
                }
                normalized
            }
            "checkout.session.async_payment_succeeded" => {
                let mut normalized = NormalizedEvent::new(
                    ProviderRef::new(object_id.clone()),
                    EventKind::Confirmed,
                    Outcome::Completed,
                    event.event_type.clone(),
                    session_lookup(),
                )
                .with_attribute("payment_intent_id", str_field(object, "payment_intent"));
                if let Some(total) = int_field(object, "amount_total") {
                    normalized = normalized.with_amount(total);
                }
                normalized
            }
            "checkout.session.async_payment_failed" => NormalizedEvent::new(
                ProviderRef::new(object_id.clone()),
                EventKind::Failed,
                Outcome::Failed,
                event.event_type.clone(),
                session_lookup(),
            ),
            "checkout.session.expired" => NormalizedEvent::new(
                ProviderRef::new(object_id.clone()),
                EventKind::Canceled,
                Outcome::Failed,
                event.event_type.clone(),
                session_lookup(),
            ),
            "charge.refunded" => {
                let payment_intent = str_field(object, "payment_intent");
                if payment_intent.is_empty() {
                    return Err(GatewayError::Malformed(
                        "stripe charge has no payment_intent".to_string(),
                    ));
                }
                let refunded = int_field(object, "amount_refunded").ok_or_else(|| {
                    GatewayError::Malformed("stripe charge has no amount_refunded".to_string())
                })?;
                NormalizedEvent::new(
                    ProviderRef::new(payment_intent.clone()),
                    EventKind::Refunded,
                    Outcome::Completed,
                    event.event_type.clone(),
                    DetailsFieldFilter::equals(["payment_intent_id"], payment_intent),
                )
                .with_amount(refunded)
            }
            "invoice.payment_succeeded" | "invoice.paid" => {
                let mut normalized = NormalizedEvent::new(
                    ProviderRef::new(object_id.clone()),
                    EventKind::Confirmed,
                    Outcome::Completed,
                    event.event_type.clone(),
                    invoice_lookup(),
                )
                .with_attribute("payment_intent_id", str_field(object, "payment_intent"))
                .with_attribute("subscription_id", str_field(object, "subscription"))
                .with_attribute("customer_id", str_field(object, "customer"))
                .with_attribute("billing_reason", str_field(object, "billing_reason"));
                if let Some(paid) = int_field(object, "amount_paid") {
                    normalized = normalized.with_amount(paid);
                }
                normalized
            }
            "invoice.payment_failed" => NormalizedEvent::new(
                ProviderRef::new(object_id.clone()),
                EventKind::Failed,
                Outcome::Failed,
                event.event_type.clone(),
                invoice_lookup(),
            )
            .with_attribute("billing_reason", str_field(object, "billing_reason")),
            other => {
                warn!(event_type = %other, "Unhandled stripe event type");
                return Err(GatewayError::UnrecognizedEventKind(format!(
                    "stripe event {}",
                    other
                )));
            }
        };
        Ok(normalized)
    }

    async fn fetch_status(&self, details: &Details) -> GatewayResult<Option<Outcome>> {
        match details {
            Details::Stripe(stripe) if !stripe.session_id.is_empty() => {
                Ok(Some(self.get_session(&stripe.session_id).await?.outcome()))
            }
            _ => Ok(None),
        }
    }
}
