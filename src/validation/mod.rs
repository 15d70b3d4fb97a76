use thiserror::Error;
use uuid::Uuid;

pub const CURRENCY_CODE_LEN: usize = 3;
pub const MERCHANT_REF_MAX_LEN: usize = 255;

/// Bad command input. Raised before any gateway is contacted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub type ValidationResult = Result<(), ValidationError>;

/// Tenant ids scope every read and write, so the nil UUID is never accepted.
pub fn validate_tenant_id(tenant_id: Uuid) -> ValidationResult {
    if tenant_id.is_nil() {
        return Err(ValidationError::new("tenant_id", "must not be empty"));
    }

    Ok(())
}

pub fn validate_positive_amount(field: &'static str, amount: i64) -> ValidationResult {
    if amount <= 0 {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_currency_code(code: &str, supported: &[&str]) -> ValidationResult {
    let code = code.trim();
    if code.is_empty() {
        return Err(ValidationError::new("currency", "must not be empty"));
    }

    if code.len() != CURRENCY_CODE_LEN || !code.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ValidationError::new(
            "currency",
            "must be a three-letter ISO 4217 code",
        ));
    }

    if !supported.contains(&code) {
        return Err(ValidationError::new(
            "currency",
            format!("unsupported, expected one of: {}", supported.join(", ")),
        ));
    }

    Ok(())
}

/// Merchant references are sent to providers and echoed back in callbacks,
/// where they are matched byte for byte.
pub fn validate_merchant_ref(value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new("merchant_ref", "must not be empty"));
    }

    if value.len() > MERCHANT_REF_MAX_LEN {
        return Err(ValidationError::new(
            "merchant_ref",
            format!("must be at most {} characters", MERCHANT_REF_MAX_LEN),
        ));
    }

    if value.chars().any(|ch| ch.is_control()) || value != value.trim() {
        return Err(ValidationError::new(
            "merchant_ref",
            "must not contain control characters or surrounding whitespace",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nil_tenant() {
        assert!(validate_tenant_id(Uuid::nil()).is_err());
        assert!(validate_tenant_id(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn validates_positive_amount() {
        assert!(validate_positive_amount("quantity", 1).is_ok());
        assert!(validate_positive_amount("quantity", 0).is_err());
        assert!(validate_positive_amount("quantity", -100).is_err());
    }

    #[test]
    fn validates_currency_code() {
        let supported = ["USD", "UZS"];
        assert!(validate_currency_code("USD", &supported).is_ok());
        assert!(validate_currency_code(" UZS ", &supported).is_ok());
        assert!(validate_currency_code("usd", &supported).is_err());
        assert!(validate_currency_code("EUR", &supported).is_err());
        assert!(validate_currency_code("USDT", &supported).is_err());
        assert!(validate_currency_code("", &supported).is_err());
    }

    #[test]
    fn validates_merchant_ref() {
        assert!(validate_merchant_ref("order-42").is_ok());
        assert!(validate_merchant_ref("   ").is_err());
        assert!(validate_merchant_ref(" order-42").is_err());
        assert!(validate_merchant_ref("order\n42").is_err());
        assert!(validate_merchant_ref(&"x".repeat(MERCHANT_REF_MAX_LEN)).is_ok());
        assert!(validate_merchant_ref(&"x".repeat(MERCHANT_REF_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn error_names_the_field() {
        let err = ValidationError::new("amount", "must be greater than zero");
        assert_eq!(err.to_string(), "amount: must be greater than zero");
    }
}
