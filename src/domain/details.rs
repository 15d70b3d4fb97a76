//! Gateway-specific transaction details and their JSON codec.
//!
//! Each gateway owns one variant of [`Details`]. The stored blob is the bare
//! variant struct (the `gateway` column selects the schema), so decoding is
//! strict: unknown fields or a missing identifier are a `SchemaMismatch`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::gateway::Gateway;
use super::provider::{EventKind, NormalizedEvent, ProviderRef};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetailsError {
    #[error("details do not match the {gateway} schema: {reason}")]
    SchemaMismatch { gateway: Gateway, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClickDetails {
    pub merchant_trans_id: String,
    #[serde(default)]
    pub service_id: i64,
    #[serde(default)]
    pub merchant_id: i64,
    #[serde(default)]
    pub merchant_user_id: i64,
    #[serde(default)]
    pub merchant_prepare_id: i64,
    #[serde(default)]
    pub merchant_confirm_id: i64,
    #[serde(default)]
    pub pay_doc_id: i64,
    #[serde(default)]
    pub payment_id: i64,
    #[serde(default)]
    pub payment_status: i32,
    #[serde(default)]
    pub sign_time: String,
    #[serde(default)]
    pub sign_string: String,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_note: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ClickDetails {
    pub fn new(merchant_trans_id: impl Into<String>) -> Self {
        Self {
            merchant_trans_id: merchant_trans_id.into(),
            service_id: 0,
            merchant_id: 0,
            merchant_user_id: 0,
            merchant_prepare_id: 0,
            merchant_confirm_id: 0,
            pay_doc_id: 0,
            payment_id: 0,
            payment_status: 0,
            sign_time: String::new(),
            sign_string: String::new(),
            error_code: 0,
            error_note: String::new(),
            link: String::new(),
            params: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymeReceiver {
    pub id: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymeDetails {
    /// Merchant-side order reference, echoed back by Payme in `account.order_id`.
    pub transaction: String,
    #[serde(default)]
    pub merchant_id: String,
    /// Payme's own transaction id, known after `CreateTransaction`.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub state: i32,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub created_time: i64,
    #[serde(default)]
    pub perform_time: i64,
    #[serde(default)]
    pub cancel_time: i64,
    #[serde(default)]
    pub account: Map<String, Value>,
    #[serde(default)]
    pub receivers: Vec<PaymeReceiver>,
    #[serde(default)]
    pub additional: Map<String, Value>,
    #[serde(default)]
    pub reason: i32,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

pub const PAYME_STATE_CREATED: i32 = 1;
pub const PAYME_STATE_COMPLETED: i32 = 2;
pub const PAYME_STATE_CANCELLED: i32 = -1;
pub const PAYME_STATE_CANCELLED_AFTER_COMPLETE: i32 = -2;

impl PaymeDetails {
    pub fn new(transaction: impl Into<String>) -> Self {
        let transaction = transaction.into();
        let mut account = Map::new();
        account.insert("order_id".to_string(), Value::String(transaction.clone()));
        Self {
            transaction,
            merchant_id: String::new(),
            id: String::new(),
            state: 0,
            time: 0,
            created_time: 0,
            perform_time: 0,
            cancel_time: 0,
            account,
            receivers: Vec::new(),
            additional: Map::new(),
            reason: 0,
            error_code: 0,
            link: String::new(),
            params: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OctoDetails {
    pub shop_transaction_id: String,
    #[serde(default)]
    pub octo_shop_id: i32,
    #[serde(default)]
    pub octo_payment_uuid: String,
    #[serde(default)]
    pub init_time: String,
    #[serde(default = "default_true")]
    pub auto_capture: bool,
    #[serde(default)]
    pub test: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub card_type: String,
    #[serde(default)]
    pub card_country: String,
    #[serde(default)]
    pub card_is_physical: bool,
    #[serde(default)]
    pub card_masked_pan: String,
    #[serde(default)]
    pub rrn: String,
    #[serde(default)]
    pub risk_level: i32,
    #[serde(default)]
    pub refunded_sum: i64,
    #[serde(default)]
    pub transfer_sum: i64,
    #[serde(default)]
    pub return_url: String,
    #[serde(default)]
    pub notify_url: String,
    #[serde(default)]
    pub octo_pay_url: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub hash_key: String,
    #[serde(default)]
    pub payed_time: String,
    #[serde(default)]
    pub error: i32,
    #[serde(default)]
    pub err_message: String,
}

fn default_true() -> bool {
    true
}

impl OctoDetails {
    pub fn new(shop_transaction_id: impl Into<String>) -> Self {
        Self {
            shop_transaction_id: shop_transaction_id.into(),
            octo_shop_id: 0,
            octo_payment_uuid: String::new(),
            init_time: String::new(),
            auto_capture: true,
            test: false,
            status: String::new(),
            description: String::new(),
            card_type: String::new(),
            card_country: String::new(),
            card_is_physical: false,
            card_masked_pan: String::new(),
            rrn: String::new(),
            risk_level: 0,
            refunded_sum: 0,
            transfer_sum: 0,
            return_url: String::new(),
            notify_url: String::new(),
            octo_pay_url: String::new(),
            signature: String::new(),
            hash_key: String::new(),
            payed_time: String::new(),
            error: 0,
            err_message: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StripeItem {
    pub price_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StripeDetails {
    pub client_reference_id: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub billing_reason: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub payment_intent_id: String,
    #[serde(default)]
    pub invoice_id: String,
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub success_url: String,
    #[serde(default)]
    pub cancel_url: String,
    #[serde(default)]
    pub items: Vec<StripeItem>,
    #[serde(default)]
    pub status: String,
}

impl StripeDetails {
    pub fn new(client_reference_id: impl Into<String>) -> Self {
        Self {
            client_reference_id: client_reference_id.into(),
            mode: "payment".to_string(),
            billing_reason: String::new(),
            session_id: String::new(),
            payment_intent_id: String::new(),
            invoice_id: String::new(),
            subscription_id: String::new(),
            customer_id: String::new(),
            url: String::new(),
            success_url: String::new(),
            cancel_url: String::new(),
            items: Vec::new(),
            status: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CashDetails {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_note: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntegratorDetails {
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_note: String,
}

impl IntegratorDetails {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            ..Self::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Closed set of per-gateway payloads; the variant always matches the transaction's gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum Details {
    Click(ClickDetails),
    Payme(PaymeDetails),
    Octo(OctoDetails),
    Stripe(StripeDetails),
    Cash(CashDetails),
    Integrator(IntegratorDetails),
}

impl Details {
    /// Fresh details for a gateway, keyed by the merchant-side reference sent to the provider.
    pub fn default_for(gateway: Gateway, merchant_ref: &str) -> Self {
        match gateway {
            Gateway::Click => Details::Click(ClickDetails::new(merchant_ref)),
            Gateway::Payme => Details::Payme(PaymeDetails::new(merchant_ref)),
            Gateway::Octo => Details::Octo(OctoDetails::new(merchant_ref)),
            Gateway::Stripe => Details::Stripe(StripeDetails::new(merchant_ref)),
            Gateway::Cash => Details::Cash(CashDetails::default()),
            Gateway::Integrator => Details::Integrator(IntegratorDetails::new(merchant_ref)),
        }
    }

    pub fn gateway(&self) -> Gateway {
        match self {
            Details::Click(_) => Gateway::Click,
            Details::Payme(_) => Gateway::Payme,
            Details::Octo(_) => Gateway::Octo,
            Details::Stripe(_) => Gateway::Stripe,
            Details::Cash(_) => Gateway::Cash,
            Details::Integrator(_) => Gateway::Integrator,
        }
    }

    pub fn decode(gateway: Gateway, blob: Value) -> Result<Details, DetailsError> {
        let mismatch = |e: serde_json::Error| DetailsError::SchemaMismatch {
            gateway,
            reason: e.to_string(),
        };
        let details = match gateway {
            Gateway::Click => Details::Click(serde_json::from_value(blob).map_err(mismatch)?),
            Gateway::Payme => Details::Payme(serde_json::from_value(blob).map_err(mismatch)?),
            Gateway::Octo => Details::Octo(serde_json::from_value(blob).map_err(mismatch)?),
            Gateway::Stripe => Details::Stripe(serde_json::from_value(blob).map_err(mismatch)?),
            Gateway::Cash => Details::Cash(serde_json::from_value(blob).map_err(mismatch)?),
            Gateway::Integrator => {
                Details::Integrator(serde_json::from_value(blob).map_err(mismatch)?)
            }
        };
        Ok(details)
    }

    pub fn encode(&self) -> Value {
        let encoded = match self {
            Details::Click(d) => serde_json::to_value(d),
            Details::Payme(d) => serde_json::to_value(d),
            Details::Octo(d) => serde_json::to_value(d),
            Details::Stripe(d) => serde_json::to_value(d),
            Details::Cash(d) => serde_json::to_value(d),
            Details::Integrator(d) => serde_json::to_value(d),
        };
        // String-keyed structs only; serialization cannot fail.
        encoded.unwrap_or_default()
    }

    /// Reference we handed to the provider (order id, shop transaction id...).
    pub fn merchant_ref(&self) -> &str {
        match self {
            Details::Click(d) => &d.merchant_trans_id,
            Details::Payme(d) => &d.transaction,
            Details::Octo(d) => &d.shop_transaction_id,
            Details::Stripe(d) => &d.client_reference_id,
            Details::Cash(_) => "",
            Details::Integrator(d) => &d.reference,
        }
    }

    /// Filter locating this transaction by its merchant reference. Cash has none.
    pub fn reference_filter(&self) -> Option<DetailsFieldFilter> {
        let field = match self {
            Details::Click(_) => "merchant_trans_id",
            Details::Payme(_) => "transaction",
            Details::Octo(_) => "shop_transaction_id",
            Details::Stripe(_) => "client_reference_id",
            Details::Integrator(_) => "reference",
            Details::Cash(_) => return None,
        };
        Some(DetailsFieldFilter::equals([field], self.merchant_ref()))
    }

    /// The processor's identifier for the captured payment, once known.
    pub fn provider_ref(&self) -> Option<ProviderRef> {
        let value = match self {
            Details::Click(d) if d.payment_id > 0 => d.payment_id.to_string(),
            Details::Click(d) => d.merchant_trans_id.clone(),
            Details::Payme(d) if !d.id.is_empty() => d.id.clone(),
            Details::Payme(d) => d.transaction.clone(),
            Details::Octo(d) if !d.octo_payment_uuid.is_empty() => d.octo_payment_uuid.clone(),
            Details::Octo(d) => d.shop_transaction_id.clone(),
            Details::Stripe(d) if !d.payment_intent_id.is_empty() => d.payment_intent_id.clone(),
            Details::Stripe(d) => d.session_id.clone(),
            Details::Cash(_) => String::new(),
            Details::Integrator(d) => d.reference.clone(),
        };
        if value.is_empty() {
            None
        } else {
            Some(ProviderRef(value))
        }
    }

    /// Human-diagnosable provider status string.
    pub fn raw_status(&self) -> String {
        match self {
            Details::Click(d) => format!("action={} error={}", d.payment_status, d.error_code),
            Details::Payme(d) => format!("state={}", d.state),
            Details::Octo(d) => d.status.clone(),
            Details::Stripe(d) => d.status.clone(),
            Details::Cash(d) => format!("error={}", d.error_code),
            Details::Integrator(d) => d.status.clone(),
        }
    }

    /// Folds a provider notification into the stored provider fields.
    pub fn record_event(&mut self, event: &NormalizedEvent) {
        let attr_i64 = |key: &str| event.attribute(key).and_then(|v| v.parse::<i64>().ok());
        let attr = |key: &str| event.attribute(key).map(str::to_string);
        match self {
            Details::Click(d) => {
                if let Ok(payment_id) = event.provider_ref.as_str().parse::<i64>() {
                    d.payment_id = payment_id;
                }
                if let Some(action) = attr_i64("action") {
                    d.payment_status = action as i32;
                }
                if let Some(pay_doc_id) = attr_i64("click_paydoc_id") {
                    d.pay_doc_id = pay_doc_id;
                }
                if let Some(error) = attr_i64("error") {
                    d.error_code = error as i32;
                }
                if let Some(note) = attr("error_note") {
                    d.error_note = note;
                }
                if let Some(sign_time) = attr("sign_time") {
                    d.sign_time = sign_time;
                }
                if let Some(sign_string) = attr("sign_string") {
                    d.sign_string = sign_string;
                }
                let now = Utc::now().timestamp();
                match event.kind {
                    EventKind::Prepared if d.merchant_prepare_id == 0 => d.merchant_prepare_id = now,
                    EventKind::Confirmed if d.merchant_confirm_id == 0 => d.merchant_confirm_id = now,
                    _ => {}
                }
            }
            Details::Payme(d) => {
                let now = Utc::now().timestamp_millis();
                if event.kind != EventKind::Prepared || d.id.is_empty() {
                    d.id = event.provider_ref.0.clone();
                }
                if let Some(time) = attr_i64("time") {
                    d.time = time;
                }
                if let Some(reason) = attr_i64("reason") {
                    d.reason = reason as i32;
                }
                match event.kind {
                    EventKind::Prepared => {
                        d.state = PAYME_STATE_CREATED;
                        if d.created_time == 0 {
                            d.created_time = now;
                        }
                    }
                    EventKind::Confirmed => {
                        d.state = PAYME_STATE_COMPLETED;
                        if d.perform_time == 0 {
                            d.perform_time = now;
                        }
                    }
                    EventKind::Canceled | EventKind::Refunded | EventKind::Failed => {
                        d.state = if d.perform_time > 0 {
                            PAYME_STATE_CANCELLED_AFTER_COMPLETE
                        } else {
                            PAYME_STATE_CANCELLED
                        };
                        if d.cancel_time == 0 {
                            d.cancel_time = now;
                        }
                    }
                }
            }
            Details::Octo(d) => {
                d.octo_payment_uuid = event.provider_ref.0.clone();
                d.status = event.raw_status.clone();
                if let Some(v) = attr("card_type") {
                    d.card_type = v;
                }
                if let Some(v) = attr("card_country") {
                    d.card_country = v;
                }
                if let Some(v) = attr("masked_pan") {
                    d.card_masked_pan = v;
                }
                if let Some(v) = attr("is_physical_card") {
                    d.card_is_physical = v == "true";
                }
                if let Some(v) = attr("rrn") {
                    d.rrn = v;
                }
                if let Some(v) = attr_i64("risk_level") {
                    d.risk_level = v as i32;
                }
                if let Some(v) = attr("payed_time") {
                    d.payed_time = v;
                }
                if let Some(v) = attr_i64("refunded_sum") {
                    d.refunded_sum = v;
                }
                if let Some(v) = attr_i64("transfer_sum") {
                    d.transfer_sum = v;
                }
                if let Some(v) = attr("signature") {
                    d.signature = v;
                }
                if let Some(v) = attr("hash_key") {
                    d.hash_key = v;
                }
            }
            Details::Stripe(d) => {
                d.status = event.raw_status.clone();
                if let Some(v) = attr("session_id") {
                    d.session_id = v;
                }
                if let Some(v) = attr("payment_intent_id") {
                    d.payment_intent_id = v;
                }
                if let Some(v) = attr("customer_id") {
                    d.customer_id = v;
                }
                if let Some(v) = attr("subscription_id") {
                    d.subscription_id = v;
                }
                if let Some(v) = attr("invoice_id") {
                    d.invoice_id = v;
                }
                if let Some(v) = attr("billing_reason") {
                    d.billing_reason = v;
                }
            }
            Details::Cash(d) => {
                if let Some(v) = attr_i64("error_code") {
                    d.error_code = v as i32;
                }
            }
            Details::Integrator(d) => {
                d.status = event.raw_status.clone();
                if let Some(v) = attr_i64("error_code") {
                    d.error_code = v as i32;
                }
                if let Some(v) = attr("error_note") {
                    d.error_note = v;
                }
                for (key, value) in &event.attributes {
                    if let Some(field) = key.strip_prefix("data.") {
                        d.data
                            .insert(field.to_string(), Value::String(value.clone()));
                    }
                }
            }
        }
    }
}

/// Comparison applied to a single JSON path inside stored details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op", content = "value")]
pub enum FieldCondition {
    Equals(String),
    GreaterThan(i64),
    LessThan(i64),
    GreaterOrEqual(i64),
    LessOrEqual(i64),
    Between(i64, i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsFieldFilter {
    pub path: Vec<String>,
    pub condition: FieldCondition,
}

impl DetailsFieldFilter {
    pub fn new<I, S>(path: I, condition: FieldCondition) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            condition,
        }
    }

    pub fn equals<I, S>(path: I, value: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(path, FieldCondition::Equals(value.into()))
    }

    /// Evaluates the filter against an encoded details blob.
    pub fn matches(&self, blob: &Value) -> bool {
        let Some(field) = self
            .path
            .iter()
            .try_fold(blob, |node, segment| node.get(segment.as_str()))
        else {
            return false;
        };

        let text = match field {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return false,
        };

        if let FieldCondition::Equals(expected) = &self.condition {
            return &text == expected;
        }

        let Ok(number) = text.parse::<i64>() else {
            return false;
        };
        match self.condition {
            FieldCondition::GreaterThan(v) => number > v,
            FieldCondition::LessThan(v) => number < v,
            FieldCondition::GreaterOrEqual(v) => number >= v,
            FieldCondition::LessOrEqual(v) => number <= v,
            FieldCondition::Between(lo, hi) => number >= lo && number <= hi,
            FieldCondition::Equals(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::Outcome;
    use serde_json::json;

    #[test]
    fn encodes_and_decodes_click_details() {
        let mut click = ClickDetails::new("order-1");
        click.service_id = 100;
        click.sign_string = "signed".to_string();
        click.params.insert("key".to_string(), json!("value"));
        let details = Details::Click(click);

        let blob = details.encode();
        assert_eq!(blob["merchant_trans_id"], "order-1");
        assert_eq!(blob["service_id"], 100);

        let decoded = Details::decode(Gateway::Click, blob).unwrap();
        assert_eq!(decoded, details);
    }

    #[test]
    fn decoding_under_the_wrong_gateway_is_a_schema_mismatch() {
        let blob = Details::Click(ClickDetails::new("order-1")).encode();

        let err = Details::decode(Gateway::Payme, blob.clone()).unwrap_err();
        assert!(matches!(err, DetailsError::SchemaMismatch { gateway: Gateway::Payme, .. }));
        assert!(Details::decode(Gateway::Cash, blob).is_err());
    }

    #[test]
    fn decoding_requires_the_identifier_field() {
        let err = Details::decode(Gateway::Octo, json!({ "status": "created" })).unwrap_err();
        assert!(matches!(err, DetailsError::SchemaMismatch { gateway: Gateway::Octo, .. }));
    }

    #[test]
    fn cash_and_integrator_decode_from_empty_objects() {
        assert_eq!(
            Details::decode(Gateway::Cash, json!({})).unwrap(),
            Details::Cash(CashDetails::default())
        );
        assert!(Details::decode(Gateway::Integrator, json!({ "reference": "r-1" })).is_ok());
    }

    #[test]
    fn octo_auto_capture_defaults_to_true() {
        let decoded = Details::decode(Gateway::Octo, json!({ "shop_transaction_id": "s-1" })).unwrap();
        match decoded {
            Details::Octo(octo) => assert!(octo.auto_capture),
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn provider_ref_prefers_processor_ids() {
        let mut stripe = StripeDetails::new("tx-1");
        assert_eq!(Details::Stripe(stripe.clone()).provider_ref(), None);
        stripe.session_id = "cs_1".to_string();
        assert_eq!(
            Details::Stripe(stripe.clone()).provider_ref(),
            Some(ProviderRef::new("cs_1"))
        );
        stripe.payment_intent_id = "pi_1".to_string();
        assert_eq!(
            Details::Stripe(stripe).provider_ref(),
            Some(ProviderRef::new("pi_1"))
        );
        assert_eq!(Details::Cash(CashDetails::default()).provider_ref(), None);
    }

    #[test]
    fn records_payme_lifecycle_states() {
        let mut details = Details::Payme(PaymeDetails::new("order-7"));
        let lookup = DetailsFieldFilter::equals(["account", "order_id"], "order-7");

        let created = NormalizedEvent::new(
            ProviderRef::new("payme-1"),
            EventKind::Prepared,
            Outcome::Pending,
            "CreateTransaction",
            lookup.clone(),
        )
        .with_attribute("time", "1747834339199");
        details.record_event(&created);

        let performed = NormalizedEvent::new(
            ProviderRef::new("payme-1"),
            EventKind::Confirmed,
            Outcome::Completed,
            "PerformTransaction",
            lookup,
        );
        details.record_event(&performed);

        match details {
            Details::Payme(payme) => {
                assert_eq!(payme.id, "payme-1");
                assert_eq!(payme.time, 1747834339199);
                assert_eq!(payme.state, PAYME_STATE_COMPLETED);
                assert!(payme.created_time > 0);
                assert!(payme.perform_time > 0);
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn filters_match_nested_paths() {
        let blob = Details::Payme(PaymeDetails::new("order-9")).encode();

        assert!(DetailsFieldFilter::equals(["account", "order_id"], "order-9").matches(&blob));
        assert!(!DetailsFieldFilter::equals(["account", "order_id"], "order-1").matches(&blob));
        assert!(!DetailsFieldFilter::equals(["missing"], "order-9").matches(&blob));
    }

    #[test]
    fn numeric_filters_compare_as_integers() {
        let mut payme = PaymeDetails::new("order-9");
        payme.time = 1_500;
        let blob = Details::Payme(payme).encode();

        assert!(DetailsFieldFilter::new(["time"], FieldCondition::Between(1_000, 2_000)).matches(&blob));
        assert!(DetailsFieldFilter::new(["time"], FieldCondition::GreaterThan(999)).matches(&blob));
        assert!(!DetailsFieldFilter::new(["time"], FieldCondition::LessThan(1_500)).matches(&blob));
        assert!(DetailsFieldFilter::new(["time"], FieldCondition::LessOrEqual(1_500)).matches(&blob));
    }
}
