//! `sagaflow-core`: saga domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod instance;

pub use error::{DomainError, DomainResult};
pub use id::{CorrelationId, EventId};
pub use instance::{SagaInstance, SagaState, SagaStatus};
