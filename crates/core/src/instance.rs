//! Saga instance model: the correlated, versioned state of one running saga.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::CorrelationId;

/// Closed set of named states for one saga type.
///
/// Implemented by plain `Copy` enums. `name()` is the stable persisted form,
/// so renaming a variant's name is a storage migration.
pub trait SagaState: Copy + Eq + core::hash::Hash + core::fmt::Debug + Send + Sync + 'static {
    /// Every state of the saga type.
    fn all() -> &'static [Self];

    /// Stable state name (e.g. "submitted").
    fn name(&self) -> &'static str;

    /// Reverse of [`SagaState::name`].
    fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|s| s.name() == name)
    }
}

/// Lifecycle status of a stored saga instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    /// Accepting events.
    #[default]
    Active,
    /// Reached a terminal state and was archived; kept for history/audit only.
    Completed,
}

/// A typed snapshot of a saga instance.
///
/// `version` is the optimistic-concurrency sequence number: `1` right after
/// creation and `+1` for every applied transition.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaInstance<S, D> {
    pub correlation_id: CorrelationId,
    pub current_state: S,
    pub version: u64,
    pub status: SagaStatus,
    pub data: D,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl<S: SagaState, D> SagaInstance<S, D> {
    /// A freshly created instance at version 1.
    pub fn new(correlation_id: CorrelationId, state: S, data: D, now: DateTime<Utc>) -> Self {
        Self {
            correlation_id,
            current_state: state,
            version: 1,
            status: SagaStatus::Active,
            data,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SagaStatus::Completed
    }

    /// Move to `next`, bumping the version.
    pub fn advance(&mut self, next: S, now: DateTime<Utc>) {
        self.current_state = next;
        self.version += 1;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    enum Light {
        Red,
        Green,
    }

    impl SagaState for Light {
        fn all() -> &'static [Self] {
            &[Light::Red, Light::Green]
        }

        fn name(&self) -> &'static str {
            match self {
                Light::Red => "red",
                Light::Green => "green",
            }
        }
    }

    #[test]
    fn state_names_round_trip() {
        for s in Light::all() {
            assert_eq!(Light::from_name(s.name()), Some(*s));
        }
        assert_eq!(Light::from_name("amber"), None);
    }

    #[test]
    fn advance_bumps_version_by_one() {
        let t0 = Utc::now();
        let mut inst = SagaInstance::new(CorrelationId::new(), Light::Red, (), t0);
        assert_eq!(inst.version, 1);
        assert_eq!(inst.status, SagaStatus::Active);

        inst.advance(Light::Green, t0);
        assert_eq!(inst.current_state, Light::Green);
        assert_eq!(inst.version, 2);
        assert!(!inst.is_completed());
    }
}
