pub mod broadcast_event_publisher;
pub mod gateways;
pub mod in_memory_transaction_repository;
pub mod postgres_transaction_repository;

pub use broadcast_event_publisher::BroadcastEventPublisher;
pub use gateways::GatewayRegistry;
pub use in_memory_transaction_repository::InMemoryTransactionRepository;
pub use postgres_transaction_repository::PostgresTransactionRepository;
