//! What happens to a saga instance once it reaches a terminal state.

use chrono::{DateTime, Utc};

use sagaflow_core::{SagaInstance, SagaStatus};

use crate::saga_store::{SagaStore, SagaStoreError};

/// Completion policy for terminal saga instances.
///
/// Terminal instances never transition again regardless of policy; the policy
/// only decides when the store marks them completed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// Archive right after the terminal transition. The record stays loadable
    /// for history/audit until an external retention process removes it.
    #[default]
    ArchiveImmediately,
    /// Leave the record active in its terminal state; an external retention
    /// process archives it later.
    Retain,
}

impl CompletionPolicy {
    /// Parse the configuration form (`archive` / `retain`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "archive" | "archive_immediately" => Some(Self::ArchiveImmediately),
            "retain" => Some(Self::Retain),
            _ => None,
        }
    }

    /// Apply the policy to a terminal instance, updating the snapshot to match
    /// the store. Returns `true` if the instance was archived.
    ///
    /// Archiving is idempotent, so this is also safe to re-run for a terminal
    /// instance whose earlier archive failed.
    pub fn complete<St, S, D>(
        &self,
        store: &St,
        instance: &mut SagaInstance<S, D>,
        now: DateTime<Utc>,
    ) -> Result<bool, SagaStoreError>
    where
        St: SagaStore + ?Sized,
    {
        match self {
            CompletionPolicy::Retain => Ok(false),
            CompletionPolicy::ArchiveImmediately => {
                store.archive(instance.correlation_id, now)?;
                if instance.status != SagaStatus::Completed {
                    instance.status = SagaStatus::Completed;
                    instance.completed_at = Some(now);
                }
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_names() {
        assert_eq!(
            CompletionPolicy::from_name("archive"),
            Some(CompletionPolicy::ArchiveImmediately)
        );
        assert_eq!(
            CompletionPolicy::from_name(" RETAIN "),
            Some(CompletionPolicy::Retain)
        );
        assert_eq!(CompletionPolicy::from_name("forever"), None);
    }

    #[test]
    fn default_archives_immediately() {
        assert_eq!(CompletionPolicy::default(), CompletionPolicy::ArchiveImmediately);
    }
}
