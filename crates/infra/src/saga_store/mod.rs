//! Saga instance store boundary.
//!
//! Defines the persistence contract the engine consumes (create-if-absent,
//! load, compare-and-swap, archive) without making storage assumptions.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemorySagaStore;
pub use r#trait::{CasOutcome, CreateOutcome, SagaRecord, SagaStore, SagaStoreError};
