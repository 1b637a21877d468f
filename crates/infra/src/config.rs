//! Engine configuration.
//!
//! Defaults are production-safe; `from_env` lets deployments override them.

use tracing::warn;

use crate::saga::CompletionPolicy;

/// Env var: CAS retries after the first version conflict (default 1).
pub const CAS_RETRIES_ENV: &str = "SAGA_CAS_RETRIES";
/// Env var: `archive` (default) or `retain`.
pub const COMPLETION_POLICY_ENV: &str = "SAGA_COMPLETION_POLICY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How many times a transition is reloaded and retried after a
    /// compare-and-swap conflict before `ConcurrentModification` surfaces.
    pub cas_retries: u32,
    pub completion: CompletionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cas_retries: 1,
            completion: CompletionPolicy::ArchiveImmediately,
        }
    }
}

impl EngineConfig {
    pub fn with_cas_retries(mut self, cas_retries: u32) -> Self {
        self.cas_retries = cas_retries;
        self
    }

    pub fn with_completion(mut self, completion: CompletionPolicy) -> Self {
        self.completion = completion;
        self
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; unset or invalid values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(CAS_RETRIES_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(n) => config.cas_retries = n,
                Err(_) => warn!(
                    value = %raw,
                    "{CAS_RETRIES_ENV} is not a non-negative integer; using {}",
                    config.cas_retries
                ),
            }
        }

        if let Some(raw) = lookup(COMPLETION_POLICY_ENV) {
            match CompletionPolicy::from_name(&raw) {
                Some(policy) => config.completion = policy,
                None => warn!(
                    value = %raw,
                    "{COMPLETION_POLICY_ENV} must be 'archive' or 'retain'; using {:?}",
                    config.completion
                ),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(EngineConfig::from_lookup(|_| None), EngineConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (CAS_RETRIES_ENV, "3"),
            (COMPLETION_POLICY_ENV, "retain"),
        ]));
        assert_eq!(config.cas_retries, 3);
        assert_eq!(config.completion, CompletionPolicy::Retain);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (CAS_RETRIES_ENV, "-1"),
            (COMPLETION_POLICY_ENV, "sometimes"),
        ]));
        assert_eq!(config, EngineConfig::default());
    }
}
