use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;
use thiserror::Error;

use sagaflow_core::{CorrelationId, SagaInstance, SagaState, SagaStatus};
use std::sync::Arc;

/// A persisted saga instance (type-erased).
///
/// The store never interprets `current_state` or `data`; the engine converts
/// records to and from typed [`SagaInstance`]s with serde.
///
/// ## Versions
///
/// `version` is the optimistic concurrency token:
/// - `1` when the record is created
/// - `+1` for every transition written through `compare_and_swap`
/// - unchanged by `archive` (terminal records are never swapped again)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub correlation_id: CorrelationId,
    pub saga_type: String,

    pub current_state: String,
    pub version: u64,
    pub status: SagaStatus,

    pub data: JsonValue,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SagaRecord {
    /// Erase a typed instance into a storable record.
    pub fn from_instance<S, D>(
        saga_type: impl Into<String>,
        instance: &SagaInstance<S, D>,
    ) -> Result<Self, SagaStoreError>
    where
        S: SagaState,
        D: Serialize,
    {
        let data = serde_json::to_value(&instance.data).map_err(|e| {
            SagaStoreError::InvalidRecord(format!("saga data serialization failed: {e}"))
        })?;

        Ok(Self {
            correlation_id: instance.correlation_id,
            saga_type: saga_type.into(),
            current_state: instance.current_state.name().to_string(),
            version: instance.version,
            status: instance.status,
            data,
            created_at: instance.created_at,
            updated_at: instance.updated_at,
            completed_at: instance.completed_at,
        })
    }

    /// Rebuild the typed instance, checking it belongs to `saga_type`.
    pub fn to_instance<S, D>(&self, saga_type: &str) -> Result<SagaInstance<S, D>, SagaStoreError>
    where
        S: SagaState,
        D: DeserializeOwned,
    {
        if self.saga_type != saga_type {
            return Err(SagaStoreError::SagaTypeMismatch(format!(
                "record {} is '{}', expected '{}'",
                self.correlation_id, self.saga_type, saga_type
            )));
        }

        let current_state = S::from_name(&self.current_state).ok_or_else(|| {
            SagaStoreError::InvalidRecord(format!(
                "unknown state '{}' for saga type '{}'",
                self.current_state, saga_type
            ))
        })?;
        let data = serde_json::from_value(self.data.clone()).map_err(|e| {
            SagaStoreError::InvalidRecord(format!("saga data deserialization failed: {e}"))
        })?;

        Ok(SagaInstance {
            correlation_id: self.correlation_id,
            current_state,
            version: self.version,
            status: self.status,
            data,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

/// Outcome of `try_create`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Another dispatch created the instance first; nothing was written.
    AlreadyExists,
}

/// Outcome of `compare_and_swap`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    /// The stored version moved on (or the record vanished, `actual == 0`).
    VersionMismatch { actual: u64 },
}

/// Saga store operation error.
///
/// These are **infrastructure errors**. Version conflicts are not errors;
/// they are reported through [`CasOutcome::VersionMismatch`].
#[derive(Debug, Error)]
pub enum SagaStoreError {
    /// The backend could not be reached or failed internally.
    #[error("saga store unavailable: {0}")]
    Unavailable(String),

    #[error("saga type mismatch: {0}")]
    SagaTypeMismatch(String),

    #[error("invalid saga record: {0}")]
    InvalidRecord(String),

    #[error("saga {0} not found")]
    NotFound(CorrelationId),
}

/// Correlation-keyed saga instance store.
///
/// ## Contract
///
/// - `try_create`: insert only if no record exists for the correlation id;
///   must be atomic so concurrent first events create at most one instance
/// - `load`: current record (active or completed), `None` if never created
/// - `compare_and_swap`: replace the record only if its stored version equals
///   `expected_version`
/// - `archive`: mark the record completed; idempotent, record stays loadable
///
/// Per-correlation-id serialization comes entirely from these operations;
/// callers hold no locks. Timeouts and retries of the backend calls are the
/// implementation's concern.
pub trait SagaStore: Send + Sync {
    fn try_create(&self, record: SagaRecord) -> Result<CreateOutcome, SagaStoreError>;

    fn load(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>, SagaStoreError>;

    fn compare_and_swap(
        &self,
        correlation_id: CorrelationId,
        expected_version: u64,
        record: SagaRecord,
    ) -> Result<CasOutcome, SagaStoreError>;

    fn archive(
        &self,
        correlation_id: CorrelationId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError>;
}

impl<S> SagaStore for Arc<S>
where
    S: SagaStore + ?Sized,
{
    fn try_create(&self, record: SagaRecord) -> Result<CreateOutcome, SagaStoreError> {
        (**self).try_create(record)
    }

    fn load(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>, SagaStoreError> {
        (**self).load(correlation_id)
    }

    fn compare_and_swap(
        &self,
        correlation_id: CorrelationId,
        expected_version: u64,
        record: SagaRecord,
    ) -> Result<CasOutcome, SagaStoreError> {
        (**self).compare_and_swap(correlation_id, expected_version, record)
    }

    fn archive(
        &self,
        correlation_id: CorrelationId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError> {
        (**self).archive(correlation_id, completed_at)
    }
}
