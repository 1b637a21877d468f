use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use sagaflow_core::{CorrelationId, SagaStatus};

use super::r#trait::{CasOutcome, CreateOutcome, SagaRecord, SagaStore, SagaStoreError};

/// In-memory saga store.
///
/// Intended for tests/dev. Every operation takes the map lock once, which
/// makes create-if-absent and compare-and-swap atomic.
#[derive(Debug, Default)]
pub struct InMemorySagaStore {
    records: RwLock<HashMap<CorrelationId, SagaRecord>>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored instances (active and completed).
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> SagaStoreError {
        SagaStoreError::Unavailable("lock poisoned".to_string())
    }
}

impl SagaStore for InMemorySagaStore {
    fn try_create(&self, record: SagaRecord) -> Result<CreateOutcome, SagaStoreError> {
        if record.version != 1 {
            return Err(SagaStoreError::InvalidRecord(format!(
                "new saga {} must start at version 1, got {}",
                record.correlation_id, record.version
            )));
        }

        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        if records.contains_key(&record.correlation_id) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        records.insert(record.correlation_id, record);
        Ok(CreateOutcome::Created)
    }

    fn load(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>, SagaStoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.get(&correlation_id).cloned())
    }

    fn compare_and_swap(
        &self,
        correlation_id: CorrelationId,
        expected_version: u64,
        record: SagaRecord,
    ) -> Result<CasOutcome, SagaStoreError> {
        if record.correlation_id != correlation_id {
            return Err(SagaStoreError::InvalidRecord(format!(
                "record for {} written under key {}",
                record.correlation_id, correlation_id
            )));
        }

        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        let Some(current) = records.get_mut(&correlation_id) else {
            return Ok(CasOutcome::VersionMismatch { actual: 0 });
        };

        if current.version != expected_version {
            return Ok(CasOutcome::VersionMismatch {
                actual: current.version,
            });
        }

        // Saga type stability and frozen history.
        if current.saga_type != record.saga_type {
            return Err(SagaStoreError::SagaTypeMismatch(format!(
                "saga {} is '{}', attempted write with '{}'",
                correlation_id, current.saga_type, record.saga_type
            )));
        }
        if current.status == SagaStatus::Completed {
            return Err(SagaStoreError::InvalidRecord(format!(
                "saga {correlation_id} is completed and cannot change"
            )));
        }

        *current = record;
        Ok(CasOutcome::Applied)
    }

    fn archive(
        &self,
        correlation_id: CorrelationId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), SagaStoreError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        let current = records
            .get_mut(&correlation_id)
            .ok_or(SagaStoreError::NotFound(correlation_id))?;

        if current.status != SagaStatus::Completed {
            current.status = SagaStatus::Completed;
            current.completed_at = Some(completed_at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: CorrelationId, state: &str, version: u64) -> SagaRecord {
        let now = Utc::now();
        SagaRecord {
            correlation_id: id,
            saga_type: "saga.test".to_string(),
            current_state: state.to_string(),
            version,
            status: SagaStatus::Active,
            data: json!({}),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn try_create_is_create_if_absent() {
        let store = InMemorySagaStore::new();
        let id = CorrelationId::new();

        assert_eq!(store.try_create(record(id, "a", 1)).unwrap(), CreateOutcome::Created);
        assert_eq!(
            store.try_create(record(id, "b", 1)).unwrap(),
            CreateOutcome::AlreadyExists
        );

        // The first write wins.
        assert_eq!(store.load(id).unwrap().unwrap().current_state, "a");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn try_create_rejects_non_initial_versions() {
        let store = InMemorySagaStore::new();
        let err = store.try_create(record(CorrelationId::new(), "a", 3)).unwrap_err();
        assert!(matches!(err, SagaStoreError::InvalidRecord(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn load_unknown_returns_none() {
        let store = InMemorySagaStore::new();
        assert!(store.load(CorrelationId::new()).unwrap().is_none());
    }

    #[test]
    fn compare_and_swap_checks_version() {
        let store = InMemorySagaStore::new();
        let id = CorrelationId::new();
        store.try_create(record(id, "a", 1)).unwrap();

        assert_eq!(
            store.compare_and_swap(id, 1, record(id, "b", 2)).unwrap(),
            CasOutcome::Applied
        );
        // Stale writer still thinks version is 1.
        assert_eq!(
            store.compare_and_swap(id, 1, record(id, "c", 2)).unwrap(),
            CasOutcome::VersionMismatch { actual: 2 }
        );
        assert_eq!(store.load(id).unwrap().unwrap().current_state, "b");
    }

    #[test]
    fn compare_and_swap_on_missing_record_reports_version_zero() {
        let store = InMemorySagaStore::new();
        let id = CorrelationId::new();
        assert_eq!(
            store.compare_and_swap(id, 1, record(id, "b", 2)).unwrap(),
            CasOutcome::VersionMismatch { actual: 0 }
        );
    }

    #[test]
    fn compare_and_swap_rejects_key_and_type_mismatch() {
        let store = InMemorySagaStore::new();
        let id = CorrelationId::new();
        store.try_create(record(id, "a", 1)).unwrap();

        let err = store
            .compare_and_swap(id, 1, record(CorrelationId::new(), "b", 2))
            .unwrap_err();
        assert!(matches!(err, SagaStoreError::InvalidRecord(_)));

        let mut other = record(id, "b", 2);
        other.saga_type = "saga.other".to_string();
        let err = store.compare_and_swap(id, 1, other).unwrap_err();
        assert!(matches!(err, SagaStoreError::SagaTypeMismatch(_)));
    }

    #[test]
    fn archive_is_idempotent_and_keeps_record_queryable() {
        let store = InMemorySagaStore::new();
        let id = CorrelationId::new();
        store.try_create(record(id, "done", 1)).unwrap();

        let first = Utc::now();
        store.archive(id, first).unwrap();
        store.archive(id, first + chrono::Duration::seconds(5)).unwrap();

        let stored = store.load(id).unwrap().unwrap();
        assert_eq!(stored.status, SagaStatus::Completed);
        assert_eq!(stored.completed_at, Some(first));
        assert_eq!(stored.version, 1);

        // Completed records are frozen.
        let err = store.compare_and_swap(id, 1, record(id, "again", 2)).unwrap_err();
        assert!(matches!(err, SagaStoreError::InvalidRecord(_)));
    }

    #[test]
    fn archive_unknown_is_not_found() {
        let store = InMemorySagaStore::new();
        let id = CorrelationId::new();
        assert!(matches!(
            store.archive(id, Utc::now()).unwrap_err(),
            SagaStoreError::NotFound(found) if found == id
        ));
    }
}
