//! Provider-independent view of what a gateway reported.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::details::DetailsFieldFilter;

/// The gateway's own identifier for a payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderRef(pub String);

impl ProviderRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed,
    Pending,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
            Outcome::Pending => "pending",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The provider acknowledged the payment attempt; money has not moved yet.
    Prepared,
    Confirmed,
    Failed,
    Canceled,
    /// Carries the provider's cumulative refunded amount.
    Refunded,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Prepared => "prepared",
            EventKind::Confirmed => "confirmed",
            EventKind::Failed => "failed",
            EventKind::Canceled => "canceled",
            EventKind::Refunded => "refunded",
        })
    }
}

/// A webhook (or reconciliation status lookup) mapped out of the provider's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub provider_ref: ProviderRef,
    pub kind: EventKind,
    pub outcome: Outcome,
    pub raw_status: String,
    /// Where to find the owning transaction in its stored details.
    pub lookup: DetailsFieldFilter,
    /// Paid amount for confirmations, cumulative refunded amount for refunds (minor units).
    pub amount: Option<i64>,
    /// Provider fields worth keeping on the transaction details (ids, card metadata, times).
    pub attributes: BTreeMap<String, String>,
}

impl NormalizedEvent {
    pub fn new(
        provider_ref: ProviderRef,
        kind: EventKind,
        outcome: Outcome,
        raw_status: impl Into<String>,
        lookup: DetailsFieldFilter,
    ) -> Self {
        Self {
            provider_ref,
            kind,
            outcome,
            raw_status: raw_status.into(),
            lookup,
            amount: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.attributes.insert(key.to_string(), value);
        }
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Same provider ref + kind + outcome means the same notification delivered again.
    pub fn dedupe_key(&self) -> String {
        match (self.kind, self.amount) {
            (EventKind::Refunded, Some(amount)) => {
                format!("{}:{}:{}:{}", self.provider_ref, self.kind, self.outcome, amount)
            }
            _ => format!("{}:{}:{}", self.provider_ref, self.kind, self.outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_key_ignores_raw_status() {
        let lookup = DetailsFieldFilter::equals(["merchant_trans_id"], "abc");
        let first = NormalizedEvent::new(
            ProviderRef::new("abc"),
            EventKind::Confirmed,
            Outcome::Completed,
            "1",
            lookup.clone(),
        );
        let mut second = first.clone();
        second.raw_status = "complete".to_string();

        assert_eq!(first.dedupe_key(), second.dedupe_key());
    }

    #[test]
    fn refund_keys_differ_by_cumulative_amount() {
        let lookup = DetailsFieldFilter::equals(["payment_intent_id"], "pi_1");
        let base = NormalizedEvent::new(
            ProviderRef::new("pi_1"),
            EventKind::Refunded,
            Outcome::Completed,
            "refunded",
            lookup,
        );

        assert_ne!(
            base.clone().with_amount(400).dedupe_key(),
            base.with_amount(1000).dedupe_key()
        );
    }
}
