//! Infrastructure layer: saga store, dispatch engine, configuration.

pub mod config;
pub mod saga;
pub mod saga_store;


pub use config::EngineConfig;
pub use saga::{
    CompletionPolicy, DispatchResult, DispatchStatus, EngineError, IgnoreReason, SagaEngine,
};
pub use saga_store::{InMemorySagaStore, SagaRecord, SagaStore, SagaStoreError};
