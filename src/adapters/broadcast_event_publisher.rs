//! Default event publisher: logs each event and fans it out to in-process subscribers.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

use crate::domain::DomainEvent;
use crate::ports::{EventPublisher, PublishError};

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        info!(
            event = event.name(),
            transaction_id = %event.transaction_id(),
            "Domain event published"
        );
        // No subscribers is not an error; the event is still logged.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}
