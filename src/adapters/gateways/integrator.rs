//! Adapter for partner integrators that settle payments on their side and
//! report the result back with an HMAC-signed JSON callback.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::signature::verify_hmac_sha256_hex;
use crate::config::IntegratorConfig;
use crate::domain::{
    Details, DetailsFieldFilter, EventKind, Gateway, NormalizedEvent, Outcome, ProviderRef,
};
use crate::ports::{
    GatewayClient, GatewayError, GatewayResult, PrepareRequest, Prepared, RefundRequest,
    SignatureHeaders,
};

pub const SIGNATURE_HEADER: &str = "x-integrator-signature";

#[derive(Clone)]
pub struct IntegratorGateway {
    config: IntegratorConfig,
}

#[derive(Debug, Deserialize)]
struct Callback {
    reference: String,
    status: String,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    amount_refunded: Option<i64>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_note: Option<String>,
    #[serde(default)]
    data: Map<String, Value>,
}

impl IntegratorGateway {
    pub fn new(config: IntegratorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl GatewayClient for IntegratorGateway {
    fn gateway(&self) -> Gateway {
        Gateway::Integrator
    }

    /// The integrator owns checkout; we only record the reference it will call back with.
    async fn prepare(&self, request: PrepareRequest) -> GatewayResult<Prepared> {
        let Details::Integrator(integrator) = request.details else {
            return Err(GatewayError::Malformed("expected integrator details".to_string()));
        };
        Ok(Prepared {
            provider_ref: Some(ProviderRef::new(integrator.reference.clone())),
            outcome: Outcome::Pending,
            details: Details::Integrator(integrator),
        })
    }

    async fn confirm(&self, _details: &Details, _idempotency_key: &str) -> GatewayResult<Outcome> {
        Ok(Outcome::Pending)
    }

    async fn refund(&self, _request: RefundRequest) -> GatewayResult<Outcome> {
        Err(GatewayError::Unsupported(
            "integrator refunds are reported through callbacks".to_string(),
        ))
    }

    async fn cancel(&self, details: &Details, _idempotency_key: &str) -> GatewayResult<()> {
        match details {
            Details::Integrator(integrator) if integrator.status == "completed" => {
                Err(GatewayError::AlreadyCaptured(format!(
                    "integrator reference {} already completed",
                    integrator.reference
                )))
            }
            _ => Ok(()),
        }
    }

    fn parse_webhook(
        &self,
        payload: &[u8],
        headers: &SignatureHeaders,
    ) -> GatewayResult<NormalizedEvent> {
        let signature = headers.get(SIGNATURE_HEADER).ok_or_else(|| {
            GatewayError::InvalidSignature("missing x-integrator-signature header".to_string())
        })?;
        if !verify_hmac_sha256_hex(
            self.config.signing_secret.expose().as_bytes(),
            payload,
            signature,
        ) {
            return Err(GatewayError::InvalidSignature(
                "integrator signature mismatch".to_string(),
            ));
        }

        let callback: Callback = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::Malformed(format!("integrator callback: {}", e)))?;
        if callback.reference.trim().is_empty() {
            return Err(GatewayError::Malformed(
                "integrator callback has no reference".to_string(),
            ));
        }

        let (kind, outcome, amount) = match callback.status.as_str() {
            "pending" | "created" => (EventKind::Prepared, Outcome::Pending, callback.amount),
            "completed" | "paid" => (EventKind::Confirmed, Outcome::Completed, callback.amount),
            "failed" => (EventKind::Failed, Outcome::Failed, None),
            "canceled" | "cancelled" => (EventKind::Canceled, Outcome::Failed, None),
            "refunded" => (EventKind::Refunded, Outcome::Completed, callback.amount_refunded),
            other => {
                return Err(GatewayError::UnrecognizedEventKind(format!(
                    "integrator status {}",
                    other
                )))
            }
        };

        let mut event = NormalizedEvent::new(
            ProviderRef::new(callback.reference.clone()),
            kind,
            outcome,
            callback.status.clone(),
            DetailsFieldFilter::equals(["reference"], callback.reference),
        )
        .with_attribute("status", callback.status)
        .with_attribute("error_note", callback.error_note.unwrap_or_default());
        if let Some(code) = callback.error_code {
            event = event.with_attribute("error_code", code.to_string());
        }
        for (key, value) in callback.data {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            event = event.with_attribute(&format!("data.{}", key), value);
        }
        if let Some(amount) = amount {
            event = event.with_amount(amount);
        }
        Ok(event)
    }
}
