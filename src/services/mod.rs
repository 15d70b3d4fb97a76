pub mod billing_service;
pub mod error;
pub mod outbox_dispatcher;
pub mod reconciliation;
pub mod retry;
pub mod webhook_dispatcher;

pub use billing_service::{BillingService, CreateTransaction, WebhookOutcome};
pub use error::{BillingError, BillingResult};
pub use outbox_dispatcher::OutboxDispatcher;
pub use reconciliation::ReconcileReport;
pub use retry::RetryPolicy;
pub use webhook_dispatcher::{WebhookDispatcher, WebhookResponse};
