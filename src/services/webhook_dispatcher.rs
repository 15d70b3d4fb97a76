//! Routes inbound provider callbacks to the right adapter and on to the
//! billing service.

use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::billing_service::{BillingService, WebhookOutcome};
use super::error::{BillingError, BillingResult};
use crate::adapters::gateways::{integrator, stripe};
use crate::domain::{Gateway, NormalizedEvent, Transaction};
use crate::ports::{
    GatewayClient, GatewayError, SignatureHeaders, WebhookRefusal, WebhookVerdict,
};
use crate::utils::sanitize::sanitize_payload;

#[derive(Clone)]
pub struct WebhookDispatcher {
    service: BillingService,
}

impl WebhookDispatcher {
    pub fn new(service: BillingService) -> Self {
        Self { service }
    }

    /// Picks the gateway from provider-identifying headers, falling back to the
    /// shape of the payload.
    pub fn detect_gateway(headers: &SignatureHeaders, payload: &[u8]) -> Option<Gateway> {
        if headers.contains(stripe::SIGNATURE_HEADER) {
            return Some(Gateway::Stripe);
        }
        if headers.contains(integrator::SIGNATURE_HEADER) {
            return Some(Gateway::Integrator);
        }
        if headers
            .get("authorization")
            .map_or(false, |value| value.starts_with("Basic "))
        {
            return Some(Gateway::Payme);
        }

        let body = String::from_utf8_lossy(payload);
        if body.contains("click_trans_id=") {
            return Some(Gateway::Click);
        }
        if body.contains("\"octo_payment_UUID\"") {
            return Some(Gateway::Octo);
        }
        None
    }

    pub fn resolve(
        &self,
        gateway_hint: Option<&str>,
        headers: &SignatureHeaders,
        payload: &[u8],
    ) -> BillingResult<Gateway> {
        match gateway_hint {
            Some(name) => {
                Gateway::from_str(name).map_err(|_| BillingError::UnknownGateway(name.to_string()))
            }
            None => Self::detect_gateway(headers, payload)
                .ok_or_else(|| BillingError::UnknownGateway("unidentified sender".to_string())),
        }
    }

    /// Verifies, parses and applies one callback. Errors are returned only
    /// when the provider should retry or the sender is not trusted.
    pub async fn dispatch(
        &self,
        gateway_hint: Option<&str>,
        payload: &[u8],
        headers: &SignatureHeaders,
    ) -> BillingResult<WebhookOutcome> {
        let gateway = self.resolve(gateway_hint, headers, payload)?;
        let client = self.service.client(gateway)?;

        match parse(gateway, client.as_ref(), payload, headers)? {
            Parsed::Event(event) => self.apply(gateway, event).await,
            Parsed::Ignored(outcome) => Ok(outcome),
        }
    }

    /// Like [`WebhookDispatcher::dispatch`], but also answers read-only
    /// queries and renders the reply in the provider's own protocol where it
    /// has one. Failures the protocol can express become replies too.
    pub async fn respond(
        &self,
        gateway_hint: Option<&str>,
        payload: &[u8],
        headers: &SignatureHeaders,
    ) -> BillingResult<WebhookResponse> {
        let gateway = self.resolve(gateway_hint, headers, payload)?;
        let client = self.service.client(gateway)?;
        let client = client.as_ref();

        let query = match client.parse_query(payload, headers) {
            Ok(query) => query,
            Err(e) => {
                let result = rejected(gateway, e, payload);
                return finish(client, payload, refused(&result, None), result);
            }
        };
        if let Some(query) = query {
            let answered = self.service.answer_query(gateway, &query).await;
            debug!(gateway = %gateway, query = ?query, answered = answered.is_ok(), "Webhook query answered");
            let verdict = match &answered {
                Ok(transactions) => WebhookVerdict::Answered {
                    query: &query,
                    transactions,
                },
                Err(e) => WebhookVerdict::Refused {
                    refusal: e.webhook_refusal(),
                    transaction: None,
                },
            };
            if let Some(body) = client.webhook_reply(payload, &verdict) {
                return Ok(WebhookResponse::Reply(body));
            }
            return Err(match answered {
                Err(e) => e,
                Ok(_) => BillingError::Unsupported {
                    gateway,
                    reason: "queries need a protocol reply".to_string(),
                },
            });
        }

        let (result, lookup) = match parse(gateway, client, payload, headers) {
            Ok(Parsed::Event(event)) => {
                let lookup = event.lookup.clone();
                (self.apply(gateway, event).await, Some(lookup))
            }
            Ok(Parsed::Ignored(outcome)) => (Ok(outcome), None),
            Err(e) => (Err(e), None),
        };

        // Replies describe the stored state, which may be newer than this event.
        let transaction = match lookup {
            Some(lookup) => self.service.find_for_provider(gateway, &lookup).await.ok(),
            None => None,
        };
        let verdict = match (&result, &transaction) {
            (Ok(WebhookOutcome::Applied { .. } | WebhookOutcome::Duplicate { .. }), Some(tx)) => {
                WebhookVerdict::Accepted { transaction: tx }
            }
            _ => refused(&result, transaction.as_ref()),
        };
        finish(client, payload, verdict, result)
    }

    async fn apply(&self, gateway: Gateway, event: NormalizedEvent) -> BillingResult<WebhookOutcome> {
        let outcome = self.service.apply_webhook(gateway, event).await?;
        info!(gateway = %gateway, outcome = ?outcome, "Webhook processed");
        Ok(outcome)
    }
}

/// How a processed callback is answered.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookResponse {
    /// Body in the provider's callback protocol.
    Reply(Value),
    /// Providers without a reply protocol get the generic acknowledgement.
    Outcome(WebhookOutcome),
}

enum Parsed {
    Event(NormalizedEvent),
    Ignored(WebhookOutcome),
}

fn refused<'a>(
    result: &BillingResult<WebhookOutcome>,
    transaction: Option<&'a Transaction>,
) -> WebhookVerdict<'a> {
    let refusal = match result {
        Ok(WebhookOutcome::Ignored { refusal, .. }) => *refusal,
        // Applied, yet the transaction could not be read back.
        Ok(_) => WebhookRefusal::Internal,
        Err(e) => e.webhook_refusal(),
    };
    WebhookVerdict::Refused {
        refusal,
        transaction,
    }
}

fn finish(
    client: &dyn GatewayClient,
    payload: &[u8],
    verdict: WebhookVerdict<'_>,
    result: BillingResult<WebhookOutcome>,
) -> BillingResult<WebhookResponse> {
    match client.webhook_reply(payload, &verdict) {
        Some(body) => Ok(WebhookResponse::Reply(body)),
        None => result.map(WebhookResponse::Outcome),
    }
}

fn parse(
    gateway: Gateway,
    client: &dyn GatewayClient,
    payload: &[u8],
    headers: &SignatureHeaders,
) -> BillingResult<Parsed> {
    match client.parse_webhook(payload, headers) {
        Ok(event) => Ok(Parsed::Event(event)),
        Err(e) => rejected(gateway, e, payload).map(Parsed::Ignored),
    }
}

/// Unrecognized callbacks are ignored; every other parse failure is an error.
fn rejected(gateway: Gateway, err: GatewayError, payload: &[u8]) -> BillingResult<WebhookOutcome> {
    match err {
        GatewayError::InvalidSignature(reason) => {
            warn!(security_event = true, gateway = %gateway, reason = %reason, "Rejected webhook with invalid signature");
            Err(BillingError::InvalidSignature { gateway, reason })
        }
        GatewayError::UnrecognizedEventKind(reason) => {
            info!(gateway = %gateway, reason = %reason, "Ignoring unrecognized webhook");
            Ok(WebhookOutcome::Ignored {
                reason,
                refusal: WebhookRefusal::Unsupported,
            })
        }
        GatewayError::Unsupported(reason) => Err(BillingError::Unsupported { gateway, reason }),
        e => {
            warn!(gateway = %gateway, error = %e, "Malformed webhook payload");
            debug!(gateway = %gateway, payload = %sanitize_payload(payload), "Rejected webhook payload");
            Err(BillingError::Malformed {
                gateway,
                reason: e.to_string(),
            })
        }
    }
}
