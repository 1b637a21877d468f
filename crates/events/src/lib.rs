//! `sagaflow-events`: event envelopes and saga state machine definitions.
//!
//! Everything here is deterministic and storage-agnostic; running a definition
//! against a store is the job of `sagaflow-infra`.

pub mod envelope;
pub mod event;
pub mod saga;

pub use envelope::EventEnvelope;
pub use event::Event;
pub use saga::{
    Action, DefinitionError, Lookup, RuleScope, StateMachine, StateMachineBuilder,
    TransitionRule, TransitionSummary, When, when,
};
