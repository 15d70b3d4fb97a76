//! Cash desk: no processor behind it, every call settles immediately.

use async_trait::async_trait;

use crate::domain::{Details, Gateway, NormalizedEvent, Outcome};
use crate::ports::{
    GatewayClient, GatewayError, GatewayResult, PrepareRequest, Prepared, RefundRequest,
    SignatureHeaders,
};

#[derive(Debug, Clone, Default)]
pub struct CashGateway;

impl CashGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GatewayClient for CashGateway {
    fn gateway(&self) -> Gateway {
        Gateway::Cash
    }

    async fn prepare(&self, request: PrepareRequest) -> GatewayResult<Prepared> {
        Ok(Prepared {
            provider_ref: None,
            outcome: Outcome::Completed,
            details: request.details,
        })
    }

    async fn confirm(&self, _details: &Details, _idempotency_key: &str) -> GatewayResult<Outcome> {
        Ok(Outcome::Completed)
    }

    async fn refund(&self, _request: RefundRequest) -> GatewayResult<Outcome> {
        Ok(Outcome::Completed)
    }

    async fn cancel(&self, _details: &Details, _idempotency_key: &str) -> GatewayResult<()> {
        Ok(())
    }

    fn parse_webhook(
        &self,
        _payload: &[u8],
        _headers: &SignatureHeaders,
    ) -> GatewayResult<NormalizedEvent> {
        Err(GatewayError::Unsupported(
            "cash transactions have no webhooks".to_string(),
        ))
    }
}
