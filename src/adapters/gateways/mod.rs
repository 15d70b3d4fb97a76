//! Payment processor adapters and the registry that selects one per [`Gateway`].

pub mod cash;
pub mod click;
pub mod http;
pub mod integrator;
pub mod octo;
pub mod payme;
pub mod signature;
pub mod stripe;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::GatewaySettings;
use crate::domain::Gateway;
use crate::ports::GatewayClient;

pub use cash::CashGateway;
pub use click::ClickGateway;
pub use http::GatewayHttp;
pub use integrator::IntegratorGateway;
pub use octo::OctoGateway;
pub use payme::PaymeGateway;
pub use stripe::StripeGateway;

const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
const CIRCUIT_RESET_SECS: u64 = 30;

/// Configured adapters keyed by gateway. Cash is always available.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    clients: HashMap<Gateway, Arc<dyn GatewayClient>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default().with(Arc::new(CashGateway::new()))
    }

    pub fn from_settings(settings: &GatewaySettings, timeout: Duration) -> Self {
        let http = |gateway: Gateway, base_url: &str| {
            GatewayHttp::with_circuit_breaker(
                gateway,
                base_url,
                timeout,
                CIRCUIT_FAILURE_THRESHOLD,
                CIRCUIT_RESET_SECS,
            )
        };

        let mut registry = Self::new();
        if let Some(click) = &settings.click {
            let client = http(Gateway::Click, &click.base_url);
            registry = registry.with(Arc::new(ClickGateway::new(click.clone(), client)));
        }
        if let Some(payme) = &settings.payme {
            registry = registry.with(Arc::new(PaymeGateway::new(payme.clone())));
        }
        if let Some(octo) = &settings.octo {
            let client = http(Gateway::Octo, &octo.base_url);
            registry = registry.with(Arc::new(OctoGateway::new(octo.clone(), client)));
        }
        if let Some(stripe) = &settings.stripe {
            let client = http(Gateway::Stripe, &stripe.base_url);
            registry = registry.with(Arc::new(StripeGateway::new(stripe.clone(), client)));
        }
        if let Some(integrator) = &settings.integrator {
            registry = registry.with(Arc::new(IntegratorGateway::new(integrator.clone())));
        }

        info!(gateways = ?registry.configured(), "Gateway adapters registered");
        registry
    }

    /// Registers (or replaces) the adapter for `client.gateway()`.
    pub fn with(mut self, client: Arc<dyn GatewayClient>) -> Self {
        self.clients.insert(client.gateway(), client);
        self
    }

    pub fn get(&self, gateway: Gateway) -> Option<Arc<dyn GatewayClient>> {
        self.clients.get(&gateway).cloned()
    }

    pub fn configured(&self) -> Vec<Gateway> {
        let mut gateways: Vec<Gateway> = self.clients.keys().copied().collect();
        gateways.sort_by_key(|gateway| gateway.as_str());
        gateways
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cash_is_always_registered() {
        let registry = GatewayRegistry::from_settings(&GatewaySettings::default(), Duration::from_secs(5));
        assert_eq!(registry.configured(), vec![Gateway::Cash]);
        assert!(registry.get(Gateway::Stripe).is_none());
    }
}
