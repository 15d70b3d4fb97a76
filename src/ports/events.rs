use async_trait::async_trait;
use thiserror::Error;

use super::repository::RepositoryResult;
use crate::domain::DomainEvent;

#[derive(Error, Debug)]
#[error("failed to publish {event}: {reason}")]
pub struct PublishError {
    pub event: &'static str,
    pub reason: String,
}

/// Delivers committed domain events to the outside world.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}

/// Read side of the transactional outbox.
#[async_trait]
pub trait EventOutbox: Send + Sync {
    /// Publishes up to `limit` unpublished events in insertion order and marks
    /// them published. Stops at the first publisher failure; returns how many
    /// were published.
    async fn publish_pending(
        &self,
        limit: i64,
        publisher: &dyn EventPublisher,
    ) -> RepositoryResult<usize>;
}
