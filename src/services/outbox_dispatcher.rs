use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::OutboxSettings;
use crate::ports::{EventOutbox, EventPublisher, RepositoryResult};

/// Drains committed domain events from the outbox to the publisher.
#[derive(Clone)]
pub struct OutboxDispatcher {
    outbox: Arc<dyn EventOutbox>,
    publisher: Arc<dyn EventPublisher>,
    settings: OutboxSettings,
}

impl OutboxDispatcher {
    pub fn new(
        outbox: Arc<dyn EventOutbox>,
        publisher: Arc<dyn EventPublisher>,
        settings: OutboxSettings,
    ) -> Self {
        Self {
            outbox,
            publisher,
            settings,
        }
    }

    /// Publishes one batch, returning how many events went out.
    pub async fn run_once(&self) -> RepositoryResult<usize> {
        let published = self
            .outbox
            .publish_pending(self.settings.batch_size, self.publisher.as_ref())
            .await?;
        if published > 0 {
            debug!(published, "Outbox batch published");
        }
        Ok(published)
    }

    pub async fn run(self) {
        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            batch_size = self.settings.batch_size,
            "Outbox dispatcher started"
        );

        loop {
            match self.run_once().await {
                // A full batch means there is probably more waiting.
                Ok(published) if published as i64 >= self.settings.batch_size => continue,
                Ok(_) => {}
                Err(e) => error!("Outbox batch error: {}", e),
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{BroadcastEventPublisher, InMemoryTransactionRepository};
    use crate::domain::{Currency, Details, DomainEvent, Gateway, Transaction};
    use crate::ports::{EventPublisher, PublishError, TransactionRepository};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    /// Accepts `remaining` events, then fails.
    struct FlakyPublisher {
        remaining: AtomicUsize,
    }

    #[async_trait]
    impl EventPublisher for FlakyPublisher {
        async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
            let left = self.remaining.load(Ordering::SeqCst);
            if left == 0 {
                return Err(PublishError {
                    event: event.name(),
                    reason: "broker down".to_string(),
                });
            }
            self.remaining.store(left - 1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn seeded_outbox(events: usize) -> Arc<InMemoryTransactionRepository> {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        for _ in 0..events {
            let tx = Transaction::new(
                Uuid::new_v4(),
                Uuid::new_v4(),
                100,
                Currency::Usd,
                Gateway::Cash,
                Details::default_for(Gateway::Cash, "till-1"),
            )
            .unwrap();
            repo.create(&tx, &[DomainEvent::TransactionCreated { id: tx.id() }])
                .await
                .unwrap();
        }
        repo
    }

    fn settings(batch_size: i64) -> OutboxSettings {
        OutboxSettings {
            poll_interval: Duration::from_millis(10),
            batch_size,
        }
    }

    #[tokio::test]
    async fn publishes_in_batches() {
        let repo = seeded_outbox(3).await;
        let publisher = Arc::new(BroadcastEventPublisher::default());
        let mut rx = publisher.subscribe();
        let dispatcher = OutboxDispatcher::new(repo.clone(), publisher, settings(2));

        assert_eq!(dispatcher.run_once().await.unwrap(), 2);
        assert_eq!(dispatcher.run_once().await.unwrap(), 1);
        assert_eq!(dispatcher.run_once().await.unwrap(), 0);
        assert_eq!(repo.unpublished_count().await, 0);

        let first = rx.recv().await.unwrap();
        assert_eq!(first, repo.outbox_events().await[0]);
    }

    #[tokio::test]
    async fn publisher_failure_keeps_the_rest_pending() {
        let repo = seeded_outbox(3).await;
        let publisher = Arc::new(FlakyPublisher {
            remaining: AtomicUsize::new(1),
        });
        let dispatcher = OutboxDispatcher::new(repo.clone(), publisher, settings(10));

        assert_eq!(dispatcher.run_once().await.unwrap(), 1);
        assert_eq!(repo.unpublished_count().await, 2);
    }
}
