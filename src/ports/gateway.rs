use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Currency, Details, DetailsFieldFilter, Gateway, NormalizedEvent, Outcome, ProviderRef,
    Transaction,
};

/// Adapter failure taxonomy. Messages never carry credentials.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    #[error("refund exceeds captured amount: {0}")]
    RefundExceedsCaptured(String),

    #[error("payment already captured: {0}")]
    AlreadyCaptured(String),

    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("unrecognized event kind: {0}")]
    UnrecognizedEventKind(String),

    #[error("malformed provider payload: {0}")]
    Malformed(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),
}

impl GatewayError {
    /// Only transient faults are worth another attempt with the same idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Webhook headers with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureHeaders(BTreeMap<String, String>);

impl SignatureHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for SignatureHeaders {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = SignatureHeaders::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

#[derive(Debug, Clone)]
pub struct PrepareRequest {
    pub transaction_id: Uuid,
    pub idempotency_key: String,
    pub amount: i64,
    pub currency: Currency,
    pub details: Details,
}

#[derive(Debug, Clone)]
pub struct Prepared {
    pub provider_ref: Option<ProviderRef>,
    pub outcome: Outcome,
    /// Details enriched with whatever the provider handed back (links, session ids...).
    pub details: Details,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub transaction_id: Uuid,
    pub idempotency_key: String,
    pub amount: i64,
    /// Amount originally captured, in minor units.
    pub captured: i64,
    /// What is still refundable before this request.
    pub refundable: i64,
    pub currency: Currency,
    pub details: Details,
}

/// Read-only provider callbacks, answered from stored state and never applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookQuery {
    /// May the payment matching `lookup` go ahead for `amount`?
    CanPerform {
        lookup: DetailsFieldFilter,
        amount: Option<i64>,
    },
    /// Current state of the transaction matching `lookup`.
    Status { lookup: DetailsFieldFilter },
    /// Every transaction matching `lookup`, typically a time window.
    Statement { lookup: DetailsFieldFilter },
}

/// Why a callback was not accepted, in terms a provider reply can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookRefusal {
    Unauthorized,
    Malformed,
    /// Method or action the adapter does not handle.
    Unsupported,
    UnknownTransaction,
    AmountMismatch,
    /// The transaction is in a state the callback cannot move it from.
    InvalidState,
    /// Storage or other transient trouble; the provider should retry.
    Internal,
}

/// What became of a callback, handed back to its adapter to encode the reply.
#[derive(Debug)]
pub enum WebhookVerdict<'a> {
    /// Applied now or earlier; `transaction` is the stored state.
    Accepted { transaction: &'a Transaction },
    Answered {
        query: &'a WebhookQuery,
        transactions: &'a [Transaction],
    },
    Refused {
        refusal: WebhookRefusal,
        transaction: Option<&'a Transaction>,
    },
}

/// One implementation per payment processor, selected by [`Gateway`].
///
/// Calls that reach the provider receive the stored [`Details`], which carry
/// the provider reference and every id the processor needs.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    fn gateway(&self) -> Gateway;

    async fn prepare(&self, request: PrepareRequest) -> GatewayResult<Prepared>;

    async fn confirm(&self, details: &Details, idempotency_key: &str) -> GatewayResult<Outcome>;

    async fn refund(&self, request: RefundRequest) -> GatewayResult<Outcome>;

    async fn cancel(&self, details: &Details, idempotency_key: &str) -> GatewayResult<()>;

    /// Verifies authenticity, then maps the provider payload onto a [`NormalizedEvent`].
    fn parse_webhook(
        &self,
        payload: &[u8],
        headers: &SignatureHeaders,
    ) -> GatewayResult<NormalizedEvent>;

    /// Recognizes read-only callbacks after verifying the sender. Anything
    /// else yields `Ok(None)` and goes through [`GatewayClient::parse_webhook`].
    fn parse_query(
        &self,
        _payload: &[u8],
        _headers: &SignatureHeaders,
    ) -> GatewayResult<Option<WebhookQuery>> {
        Ok(None)
    }

    /// Body the provider's callback protocol expects, sent with 200 OK.
    /// `None` leaves the reply to the generic acknowledgement.
    fn webhook_reply(&self, _payload: &[u8], _verdict: &WebhookVerdict<'_>) -> Option<Value> {
        None
    }

    /// Authoritative status from the provider, for reconciliation.
    async fn fetch_status(&self, _details: &Details) -> GatewayResult<Option<Outcome>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let headers: SignatureHeaders = [("Stripe-Signature", "t=1,v1=abc")].into_iter().collect();
        assert_eq!(headers.get("stripe-signature"), Some("t=1,v1=abc"));
        assert!(headers.contains("STRIPE-SIGNATURE"));
        assert_eq!(headers.get("authorization"), None);
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(GatewayError::Unavailable("timeout".into()).is_retryable());
        assert!(!GatewayError::Rejected("declined".into()).is_retryable());
        assert!(!GatewayError::InvalidSignature("bad".into()).is_retryable());
    }
}
