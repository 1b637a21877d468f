//! Saga runtime: dispatch engine, completion policy and the saga definitions
//! this service runs.

pub mod completion;
pub mod engine;
pub mod order;

pub use completion::CompletionPolicy;
pub use engine::{DispatchResult, DispatchStatus, EngineError, IgnoreReason, SagaEngine};
