pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod record;
pub mod store;

pub use error::{OrderStoreError, Result};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use query::{MAX_PAGE_SIZE, OrderQuery, Page};
pub use record::{
    AddressSnapshot, AuditFields, Auditable, Order, OrderChanges, PaymentIntent, StatusUpdate,
    TransitionEvent, UpdateOutcome,
};
pub use store::{OrderStore, OrderStoreExt, OrderTransaction};
