use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::validation::ValidationError;

/// External payment processor (or internal pseudo-processor) fulfilling a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    Stripe,
    Click,
    Payme,
    Octo,
    Cash,
    Integrator,
}

impl Gateway {
    pub const ALL: [Gateway; 6] = [
        Gateway::Stripe,
        Gateway::Click,
        Gateway::Payme,
        Gateway::Octo,
        Gateway::Cash,
        Gateway::Integrator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gateway::Stripe => "stripe",
            Gateway::Click => "click",
            Gateway::Payme => "payme",
            Gateway::Octo => "octo",
            Gateway::Cash => "cash",
            Gateway::Integrator => "integrator",
        }
    }
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gateway {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Gateway::ALL
            .into_iter()
            .find(|gateway| gateway.as_str() == normalized)
            .ok_or_else(|| ValidationError::new("gateway", format!("unknown gateway {}", s)))
    }
}
