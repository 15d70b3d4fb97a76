//! ISO 4217 currencies accepted by the billing engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::validation::{validate_currency_code, ValidationError};

pub const SUPPORTED_CURRENCIES: &[&str] = &["UZS", "USD", "EUR", "RUB", "KZT", "GBP"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Uzs,
    Usd,
    Eur,
    Rub,
    Kzt,
    Gbp,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Uzs => "UZS",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Rub => "RUB",
            Currency::Kzt => "KZT",
            Currency::Gbp => "GBP",
        }
    }

    /// Number of minor-unit digits (tiyin, cents, kopeks...).
    pub fn exponent(&self) -> u32 {
        2
    }

    /// Formats a minor-unit quantity as a major-unit decimal string, e.g. `1050 -> "10.50"`.
    pub fn format_major(&self, minor: i64) -> String {
        format_scaled(minor, self.exponent())
    }

    /// Parses a provider-reported major-unit amount (`"1000"`, `"1000.5"`, `"1000.50"`)
    /// into minor units without going through floating point.
    pub fn parse_major(&self, raw: &str) -> Option<i64> {
        let raw = raw.trim();
        let (whole, frac) = match raw.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (raw, ""),
        };
        let exponent = self.exponent() as usize;
        if whole.is_empty() || frac.len() > exponent {
            return None;
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let whole: i64 = whole.parse().ok()?;
        let frac: i64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<width$}", frac, width = exponent).parse().ok()?
        };
        whole
            .checked_mul(10_i64.pow(self.exponent()))?
            .checked_add(frac)
    }
}

/// `minor` rendered with `exponent` fraction digits. No fraction at exponent 0.
fn format_scaled(minor: i64, exponent: u32) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    if exponent == 0 {
        return format!("{}{}", sign, abs);
    }
    let scale = 10_u64.pow(exponent);
    format!(
        "{}{}.{:0width$}",
        sign,
        abs / scale,
        abs % scale,
        width = exponent as usize
    )
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_currency_code(s, SUPPORTED_CURRENCIES)?;
        match s.trim() {
            "UZS" => Ok(Currency::Uzs),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "RUB" => Ok(Currency::Rub),
            "KZT" => Ok(Currency::Kzt),
            "GBP" => Ok(Currency::Gbp),
            other => Err(ValidationError::new(
                "currency",
                format!("unsupported currency {}", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_codes() {
        assert_eq!("USD".parse::<Currency>().unwrap(), Currency::Usd);
        assert_eq!("UZS".parse::<Currency>().unwrap(), Currency::Uzs);
        assert!("XXX".parse::<Currency>().is_err());
        assert!("usd".parse::<Currency>().is_err());
    }

    #[test]
    fn formats_major_units() {
        assert_eq!(Currency::Usd.format_major(1050), "10.50");
        assert_eq!(Currency::Uzs.format_major(5), "0.05");
        assert_eq!(Currency::Usd.format_major(-250), "-2.50");
    }

    #[test]
    fn zero_exponent_has_no_fraction() {
        assert_eq!(format_scaled(100, 0), "100");
        assert_eq!(format_scaled(-7, 0), "-7");
        assert_eq!(format_scaled(5, 3), "0.005");
    }

    #[test]
    fn parses_major_units_without_floats() {
        assert_eq!(Currency::Uzs.parse_major("1000"), Some(100_000));
        assert_eq!(Currency::Uzs.parse_major("1000.5"), Some(100_050));
        assert_eq!(Currency::Uzs.parse_major("1000.05"), Some(100_005));
        assert_eq!(Currency::Uzs.parse_major("10.005"), None);
        assert_eq!(Currency::Uzs.parse_major("-1"), None);
        assert_eq!(Currency::Uzs.parse_major("abc"), None);
    }
}
