//! Saga dispatch pipeline.
//!
//! For every incoming envelope the engine:
//!
//! ```text
//! EventEnvelope
//!   ↓
//! 1. Resolve correlation id (envelope, else payload field)
//!   ↓
//! 2. Load instance from the store
//!   ↓
//! 3a. Absent  → initial rule? create-if-absent : ignore
//! 3b. Present → terminal? ignore : lookup (state, kind) → action → CAS
//!   ↓
//! 4. Terminal state reached → completion policy
//! ```
//!
//! The engine holds no mutable state of its own. Concurrent deliveries for
//! the same correlation id are serialized by the store's create-if-absent and
//! compare-and-swap operations, with a bounded number of reload-and-retry
//! rounds on conflict.

use std::sync::Arc;

use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use sagaflow_core::{CorrelationId, DomainError, SagaInstance, SagaState};
use sagaflow_events::{EventEnvelope, Lookup, StateMachine};

use crate::config::EngineConfig;
use crate::saga_store::{CasOutcome, CreateOutcome, SagaRecord, SagaStore, SagaStoreError};

/// Why an event was absorbed without changing anything.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No instance exists and the event kind does not start one.
    UnknownInstance,
    /// The current state declares nothing for this event kind.
    NoRule,
    /// The current state explicitly ignores this event kind.
    ExplicitIgnore,
    /// The instance is terminal (or completed) and accepts nothing.
    Terminal,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    /// A new instance was created.
    Created,
    /// An existing instance moved to a non-terminal state.
    Transitioned,
    /// The instance reached a terminal state.
    Completed,
    /// Nothing changed.
    Ignored(IgnoreReason),
}

impl DispatchStatus {
    pub fn is_ignored(&self) -> bool {
        matches!(self, DispatchStatus::Ignored(_))
    }
}

/// Outcome of handling one envelope.
///
/// Callers use it to decide on follow-up messages; the engine itself never
/// talks to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult<S, D> {
    pub status: DispatchStatus,
    pub correlation_id: CorrelationId,
    /// State before this dispatch (`None` if the instance did not exist).
    pub previous_state: Option<S>,
    /// Instance snapshot after this dispatch (`None` if none exists).
    pub instance: Option<SagaInstance<S, D>>,
}

impl<S: SagaState, D> DispatchResult<S, D> {
    fn ignored(
        correlation_id: CorrelationId,
        reason: IgnoreReason,
        instance: Option<SagaInstance<S, D>>,
    ) -> Self {
        Self {
            status: DispatchStatus::Ignored(reason),
            correlation_id,
            previous_state: instance.as_ref().map(|i| i.current_state),
            instance,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// The event cannot be routed or its payload does not fit the rule.
    /// Not retryable; redelivery fails the same way.
    #[error("malformed '{event_kind}' event: {reason}")]
    MalformedEvent { event_kind: String, reason: String },

    /// Compare-and-swap kept failing after the configured retries.
    #[error("saga {correlation_id} modified concurrently after {attempts} attempts")]
    ConcurrentModification {
        correlation_id: CorrelationId,
        attempts: u32,
    },

    /// The store could not be reached. Propagated as-is, never retried here.
    #[error(transparent)]
    StoreUnavailable(SagaStoreError),

    /// The store rejected an operation or returned an unreadable record.
    #[error("saga store error: {0}")]
    Store(SagaStoreError),
}

impl From<SagaStoreError> for EngineError {
    fn from(value: SagaStoreError) -> Self {
        match value {
            SagaStoreError::Unavailable(_) => EngineError::StoreUnavailable(value),
            _ => EngineError::Store(value),
        }
    }
}

fn malformed(envelope: &EventEnvelope, err: DomainError) -> EngineError {
    warn!(
        event_kind = %envelope.event_kind(),
        event_id = %envelope.event_id(),
        error = %err,
        "rejecting malformed event"
    );
    EngineError::MalformedEvent {
        event_kind: envelope.event_kind().to_string(),
        reason: err.to_string(),
    }
}

/// One pass over load → decide → write.
enum Step<S, D> {
    Done(DispatchResult<S, D>),
    /// `try_create` lost a race; the instance now exists.
    CreateRace,
    /// `compare_and_swap` found a newer version.
    VersionConflict { expected: u64, actual: u64 },
}

/// Runs one saga definition against a saga store.
///
/// ## Generic Parameters
///
/// - `S`: state enum of the saga type
/// - `D`: instance data (serde, so it can live in the type-erased store)
/// - `St`: store implementation (`InMemorySagaStore` in tests, a database
///   adapter in production)
///
/// The engine is `Send + Sync` when `St` is; share it behind `Arc` and call
/// `handle` from as many threads as the transport delivers on.
pub struct SagaEngine<S, D, St> {
    machine: Arc<StateMachine<S, D>>,
    store: St,
    config: EngineConfig,
}

impl<S, D, St> SagaEngine<S, D, St> {
    pub fn new(machine: Arc<StateMachine<S, D>>, store: St, config: EngineConfig) -> Self {
        Self {
            machine,
            store,
            config,
        }
    }

    pub fn machine(&self) -> &StateMachine<S, D> {
        &self.machine
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl<S: SagaState, D, St: core::fmt::Debug> core::fmt::Debug for SagaEngine<S, D, St> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SagaEngine")
            .field("machine", &self.machine)
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}

impl<S, D, St> SagaEngine<S, D, St>
where
    S: SagaState,
    D: Default + Serialize + DeserializeOwned + 'static,
    St: SagaStore,
{
    /// Handle one delivered event.
    ///
    /// Duplicate, late and out-of-order events are absorbed as
    /// [`DispatchStatus::Ignored`]; only malformed input, persistent
    /// contention and store failures are errors.
    #[instrument(
        skip(self, envelope),
        fields(
            saga_type = %self.machine.saga_type(),
            event_kind = %envelope.event_kind(),
            event_id = %envelope.event_id(),
        )
    )]
    pub fn handle(&self, envelope: &EventEnvelope) -> Result<DispatchResult<S, D>, EngineError> {
        let Some(correlation_id) = self.machine.correlate(envelope) else {
            return Err(malformed(
                envelope,
                DomainError::validation("event carries no correlation id"),
            ));
        };

        let mut conflicts = 0u32;
        let mut create_races = 0u32;

        loop {
            let step = match self.store.load(correlation_id)? {
                None => self.create(correlation_id, envelope)?,
                Some(record) => self.transition(record, envelope)?,
            };

            match step {
                Step::Done(result) => return Ok(result),
                Step::CreateRace => {
                    create_races += 1;
                    debug!(%correlation_id, "instance created concurrently; reloading");
                    // A second lost race means the record vanished in between.
                    if create_races > 1 {
                        return Err(EngineError::ConcurrentModification {
                            correlation_id,
                            attempts: conflicts + create_races,
                        });
                    }
                }
                Step::VersionConflict { expected, actual } => {
                    conflicts += 1;
                    if conflicts > self.config.cas_retries {
                        warn!(
                            %correlation_id,
                            expected,
                            actual,
                            attempts = conflicts,
                            "giving up after repeated version conflicts"
                        );
                        return Err(EngineError::ConcurrentModification {
                            correlation_id,
                            attempts: conflicts,
                        });
                    }
                    debug!(%correlation_id, expected, actual, "version conflict; reloading");
                }
            }
        }
    }

    /// Read-only query of the current instance (active or completed).
    pub fn get_state(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<SagaInstance<S, D>>, EngineError> {
        self.store
            .load(correlation_id)?
            .map(|record| record.to_instance(self.machine.saga_type()))
            .transpose()
            .map_err(EngineError::from)
    }

    fn create(
        &self,
        correlation_id: CorrelationId,
        envelope: &EventEnvelope,
    ) -> Result<Step<S, D>, EngineError> {
        let Some(rule) = self.machine.initial_rule(envelope.event_kind()) else {
            debug!(%correlation_id, "no instance and event does not start one; ignoring");
            return Ok(Step::Done(DispatchResult::ignored(
                correlation_id,
                IgnoreReason::UnknownInstance,
                None,
            )));
        };

        let now = Utc::now();
        let mut data = D::default();
        rule.apply(&mut data, envelope)
            .map_err(|e| malformed(envelope, e))?;

        let mut instance = SagaInstance::new(correlation_id, rule.target(), data, now);
        let record = SagaRecord::from_instance(self.machine.saga_type(), &instance)?;

        if self.store.try_create(record)? == CreateOutcome::AlreadyExists {
            return Ok(Step::CreateRace);
        }

        info!(%correlation_id, state = instance.current_state.name(), "saga created");

        let status = if self.machine.is_terminal(instance.current_state) {
            self.complete(&mut instance)?;
            DispatchStatus::Completed
        } else {
            DispatchStatus::Created
        };

        Ok(Step::Done(DispatchResult {
            status,
            correlation_id,
            previous_state: None,
            instance: Some(instance),
        }))
    }

    fn transition(
        &self,
        record: SagaRecord,
        envelope: &EventEnvelope,
    ) -> Result<Step<S, D>, EngineError> {
        let mut instance: SagaInstance<S, D> = record.to_instance(self.machine.saga_type())?;
        let correlation_id = instance.correlation_id;
        let from = instance.current_state;

        if instance.is_completed() || self.machine.is_terminal(from) {
            // Repair a terminal instance whose archive step failed earlier.
            if !instance.is_completed() {
                self.complete(&mut instance)?;
            }
            debug!(%correlation_id, state = from.name(), "saga is terminal; ignoring");
            return Ok(Step::Done(DispatchResult::ignored(
                correlation_id,
                IgnoreReason::Terminal,
                Some(instance),
            )));
        }

        let rule = match self.machine.lookup(from, envelope.event_kind()) {
            Lookup::Transition(rule) => rule,
            Lookup::Terminal => {
                return Ok(Step::Done(DispatchResult::ignored(
                    correlation_id,
                    IgnoreReason::Terminal,
                    Some(instance),
                )));
            }
            Lookup::Ignore => {
                debug!(%correlation_id, state = from.name(), "event explicitly ignored");
                return Ok(Step::Done(DispatchResult::ignored(
                    correlation_id,
                    IgnoreReason::ExplicitIgnore,
                    Some(instance),
                )));
            }
            Lookup::Unmatched => {
                debug!(%correlation_id, state = from.name(), "no rule for event; ignoring");
                return Ok(Step::Done(DispatchResult::ignored(
                    correlation_id,
                    IgnoreReason::NoRule,
                    Some(instance),
                )));
            }
        };

        let expected = instance.version;
        let now = Utc::now();
        rule.apply(&mut instance.data, envelope)
            .map_err(|e| malformed(envelope, e))?;
        instance.advance(rule.target(), now);

        let record = SagaRecord::from_instance(self.machine.saga_type(), &instance)?;
        if let CasOutcome::VersionMismatch { actual } =
            self.store.compare_and_swap(correlation_id, expected, record)?
        {
            return Ok(Step::VersionConflict { expected, actual });
        }

        let status = if self.machine.is_terminal(instance.current_state) {
            info!(%correlation_id, from = from.name(), to = instance.current_state.name(), "saga finished");
            self.complete(&mut instance)?;
            DispatchStatus::Completed
        } else {
            debug!(%correlation_id, from = from.name(), to = instance.current_state.name(), "saga transitioned");
            DispatchStatus::Transitioned
        };

        Ok(Step::Done(DispatchResult {
            status,
            correlation_id,
            previous_state: Some(from),
            instance: Some(instance),
        }))
    }

    fn complete(&self, instance: &mut SagaInstance<S, D>) -> Result<(), EngineError> {
        let archived = self
            .config
            .completion
            .complete(&self.store, instance, Utc::now())?;
        if archived {
            info!(correlation_id = %instance.correlation_id, "saga archived");
        }
        Ok(())
    }
}
