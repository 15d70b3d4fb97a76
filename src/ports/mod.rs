//! Contracts the billing services depend on. Adapters implement them.

pub mod events;
pub mod gateway;
pub mod repository;

pub use events::{EventOutbox, EventPublisher, PublishError};
pub use gateway::{
    GatewayClient, GatewayError, GatewayResult, PrepareRequest, Prepared, RefundRequest,
    SignatureHeaders, WebhookQuery, WebhookRefusal, WebhookVerdict,
};
pub use repository::{
    FindParams, RepositoryError, RepositoryResult, SortOrder, TransactionRepository,
};
