//! Provider-independent billing domain.

pub mod currency;
pub mod details;
pub mod error;
pub mod events;
pub mod gateway;
pub mod provider;
pub mod transaction;

pub use currency::Currency;
pub use details::{Details, DetailsError, DetailsFieldFilter, FieldCondition};
pub use error::DomainError;
pub use events::DomainEvent;
pub use gateway::Gateway;
pub use provider::{EventKind, NormalizedEvent, Outcome, ProviderRef};
pub use transaction::{
    AppliedEvent, EventApplication, Origin, Refund, Transaction, TransactionParts,
    TransactionStatus, Transition,
};
