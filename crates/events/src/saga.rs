//! Saga state machine definitions (mechanics only, no business rules).
//!
//! - One immutable transition table per saga type, built once at startup
//! - Keyed by `(state, event kind)`; "ignore" is a first-class entry
//! - Initial transitions are the only way an instance comes into existence
//! - Actions are synchronous closures over the instance's own data (no IO)
//!
//! Infra is responsible for loading instances, running the table against
//! incoming envelopes and persisting the result.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

use sagaflow_core::{CorrelationId, DomainResult, SagaState};

use crate::EventEnvelope;

/// Transition action: mutates the instance data from the incoming envelope.
///
/// Errors are reserved for malformed input (e.g. an undecodable payload).
/// Business conditions like "already accepted" must be handled as no-ops.
pub type Action<D> = Arc<dyn Fn(&mut D, &EventEnvelope) -> DomainResult<()> + Send + Sync>;

/// Start describing the rule for one event kind.
pub fn when<S, D>(event_kind: impl Into<String>) -> When<S, D> {
    When {
        event_kind: event_kind.into(),
        actions: Vec::new(),
        _state: core::marker::PhantomData,
    }
}

/// Rule under construction: event kind plus zero or more actions.
pub struct When<S, D> {
    event_kind: String,
    actions: Vec<Action<D>>,
    _state: core::marker::PhantomData<fn() -> S>,
}

impl<S, D> When<S, D>
where
    S: SagaState,
    D: 'static,
{
    /// Run `action` with the raw envelope. Actions run in declaration order.
    pub fn then<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut D, &EventEnvelope) -> DomainResult<()> + Send + Sync + 'static,
    {
        self.actions.push(Arc::new(action));
        self
    }

    /// Decode the payload as `T` and run `action` with it.
    ///
    /// A payload that does not decode fails the dispatch as malformed.
    pub fn then_typed<T, F>(self, action: F) -> Self
    where
        T: DeserializeOwned + 'static,
        F: Fn(&mut D, T) + Send + Sync + 'static,
    {
        self.then(move |data, envelope| {
            let message = envelope.decode::<T>()?;
            action(data, message);
            Ok(())
        })
    }

    /// Finish the rule with its target state.
    pub fn transition_to(self, target: S) -> TransitionRule<S, D> {
        TransitionRule {
            event_kind: self.event_kind,
            target,
            actions: self.actions,
        }
    }
}

/// The (actions, next-state) pair for one event kind.
pub struct TransitionRule<S, D> {
    event_kind: String,
    target: S,
    actions: Vec<Action<D>>,
}

impl<S: SagaState, D> TransitionRule<S, D> {
    pub fn event_kind(&self) -> &str {
        &self.event_kind
    }

    pub fn target(&self) -> S {
        self.target
    }

    pub fn has_action(&self) -> bool {
        !self.actions.is_empty()
    }

    /// Run all actions against `data`, stopping at the first error.
    pub fn apply(&self, data: &mut D, envelope: &EventEnvelope) -> DomainResult<()> {
        for action in &self.actions {
            action(data, envelope)?;
        }
        Ok(())
    }
}

impl<S: SagaState, D> core::fmt::Debug for TransitionRule<S, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransitionRule")
            .field("event_kind", &self.event_kind)
            .field("target", &self.target)
            .field("actions", &self.actions.len())
            .finish()
    }
}

enum Entry<S, D> {
    Transition(TransitionRule<S, D>),
    Ignore,
}

/// Result of looking up `(state, event kind)` in a definition.
#[derive(Debug)]
pub enum Lookup<'a, S: SagaState, D> {
    /// Run this rule.
    Transition(&'a TransitionRule<S, D>),
    /// The definition explicitly ignores this event kind in this state.
    Ignore,
    /// Nothing is declared for this event kind in this state.
    Unmatched,
    /// The state is terminal; it accepts no transitions at all.
    Terminal,
}

/// Where a rule applies.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RuleScope<S> {
    /// Creates a new instance.
    Initially,
    /// Applies in one specific state.
    During(S),
    /// Applies in every non-terminal state lacking a specific entry.
    DuringAny,
}

/// One row of the transition table, as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionSummary<S> {
    pub scope: RuleScope<S>,
    pub event_kind: String,
    /// `None` for an explicit ignore.
    pub target: Option<S>,
    pub has_action: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("saga type must not be empty")]
    EmptySagaType,

    #[error("event kind must not be empty")]
    EmptyEventKind,

    #[error("no initial transitions declared; instances could never be created")]
    NoInitialTransitions,

    #[error("event kind '{0}' declared twice in Initially")]
    DuplicateInitial(String),

    #[error("event kind '{event_kind}' declared twice for state '{state}'")]
    DuplicateRule { state: &'static str, event_kind: String },

    #[error("event kind '{0}' declared twice in DuringAny")]
    DuplicateDuringAny(String),

    #[error("terminal state '{state}' cannot handle '{event_kind}'")]
    RuleOnTerminalState { state: &'static str, event_kind: String },

    #[error("correlation declared for unknown event kind '{0}'")]
    UnknownEventKind(String),
}

/// Immutable transition table for a single saga type.
///
/// `S` is the closed state set, `D` the instance's domain data. Shared
/// read-only (behind `Arc`) by every dispatch.
pub struct StateMachine<S, D> {
    saga_type: String,
    initially: HashMap<String, TransitionRule<S, D>>,
    during: HashMap<S, HashMap<String, Entry<S, D>>>,
    during_any: HashMap<String, Entry<S, D>>,
    terminal: HashSet<S>,
    correlations: HashMap<String, String>,
}

impl<S, D> StateMachine<S, D>
where
    S: SagaState,
    D: 'static,
{
    pub fn builder(saga_type: impl Into<String>) -> StateMachineBuilder<S, D> {
        StateMachineBuilder {
            saga_type: saga_type.into(),
            initially: Vec::new(),
            during: Vec::new(),
            during_any: Vec::new(),
            terminal: Vec::new(),
            correlations: Vec::new(),
        }
    }

    /// Stable saga type identifier (e.g. "saga.order").
    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    /// The rule that creates an instance on `event_kind`, if any.
    pub fn initial_rule(&self, event_kind: &str) -> Option<&TransitionRule<S, D>> {
        self.initially.get(event_kind)
    }

    pub fn is_terminal(&self, state: S) -> bool {
        self.terminal.contains(&state)
    }

    /// Pure lookup of what `event_kind` does in `state`.
    pub fn lookup(&self, state: S, event_kind: &str) -> Lookup<'_, S, D> {
        if self.is_terminal(state) {
            return Lookup::Terminal;
        }

        let entry = self
            .during
            .get(&state)
            .and_then(|rules| rules.get(event_kind))
            .or_else(|| self.during_any.get(event_kind));

        match entry {
            Some(Entry::Transition(rule)) => Lookup::Transition(rule),
            Some(Entry::Ignore) => Lookup::Ignore,
            None => Lookup::Unmatched,
        }
    }

    /// Resolve the target instance of an envelope.
    ///
    /// The envelope's own correlation id wins; otherwise the payload field
    /// registered for the event kind is used.
    pub fn correlate(&self, envelope: &EventEnvelope) -> Option<CorrelationId> {
        envelope.correlation_id().or_else(|| {
            self.correlations
                .get(envelope.event_kind())
                .and_then(|field| envelope.payload_correlation(field))
        })
    }

    /// The table as data, sorted by scope then event kind.
    pub fn describe(&self) -> Vec<TransitionSummary<S>> {
        fn summary<S: SagaState, D>(
            scope: RuleScope<S>,
            event_kind: &str,
            entry: &Entry<S, D>,
        ) -> TransitionSummary<S> {
            match entry {
                Entry::Transition(rule) => TransitionSummary {
                    scope,
                    event_kind: event_kind.to_string(),
                    target: Some(rule.target),
                    has_action: rule.has_action(),
                },
                Entry::Ignore => TransitionSummary {
                    scope,
                    event_kind: event_kind.to_string(),
                    target: None,
                    has_action: false,
                },
            }
        }

        let mut rows: Vec<TransitionSummary<S>> = self
            .initially
            .values()
            .map(|rule| TransitionSummary {
                scope: RuleScope::Initially,
                event_kind: rule.event_kind.clone(),
                target: Some(rule.target),
                has_action: rule.has_action(),
            })
            .collect();

        for (state, rules) in &self.during {
            for (kind, entry) in rules {
                rows.push(summary(RuleScope::During(*state), kind, entry));
            }
        }
        for (kind, entry) in &self.during_any {
            rows.push(summary(RuleScope::DuringAny, kind, entry));
        }

        rows.sort_by(|a, b| {
            scope_key(a.scope)
                .cmp(&scope_key(b.scope))
                .then_with(|| a.event_kind.cmp(&b.event_kind))
        });
        rows
    }
}

fn scope_key<S: SagaState>(scope: RuleScope<S>) -> (u8, &'static str) {
    match scope {
        RuleScope::Initially => (0, ""),
        RuleScope::During(s) => (1, s.name()),
        RuleScope::DuringAny => (2, ""),
    }
}

impl<S: SagaState, D> core::fmt::Debug for StateMachine<S, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StateMachine")
            .field("saga_type", &self.saga_type)
            .field("initially", &self.initially.len())
            .field("during", &self.during.values().map(HashMap::len).sum::<usize>())
            .field("during_any", &self.during_any.len())
            .field("terminal", &self.terminal)
            .finish()
    }
}

/// Collects rules; `build()` validates them into a [`StateMachine`].
pub struct StateMachineBuilder<S, D> {
    saga_type: String,
    initially: Vec<TransitionRule<S, D>>,
    during: Vec<(S, Entry<S, D>, String)>,
    during_any: Vec<(Entry<S, D>, String)>,
    terminal: Vec<S>,
    correlations: Vec<(String, String)>,
}

impl<S, D> StateMachineBuilder<S, D>
where
    S: SagaState,
    D: 'static,
{
    /// Rule that creates a new instance.
    pub fn initially(mut self, rule: TransitionRule<S, D>) -> Self {
        self.initially.push(rule);
        self
    }

    /// Rule applied while an instance is in `state`.
    pub fn during(mut self, state: S, rule: TransitionRule<S, D>) -> Self {
        let kind = rule.event_kind.clone();
        self.during.push((state, Entry::Transition(rule), kind));
        self
    }

    /// Explicitly ignore `event_kind` while in `state`.
    pub fn ignore(mut self, state: S, event_kind: impl Into<String>) -> Self {
        self.during.push((state, Entry::Ignore, event_kind.into()));
        self
    }

    /// Rule applied in every non-terminal state without a specific entry.
    pub fn during_any(mut self, rule: TransitionRule<S, D>) -> Self {
        let kind = rule.event_kind.clone();
        self.during_any.push((Entry::Transition(rule), kind));
        self
    }

    /// Explicitly ignore `event_kind` in every non-terminal state without a
    /// specific entry.
    pub fn ignore_any(mut self, event_kind: impl Into<String>) -> Self {
        self.during_any.push((Entry::Ignore, event_kind.into()));
        self
    }

    /// Mark `state` terminal: it accepts no transitions.
    pub fn terminal(mut self, state: S) -> Self {
        self.terminal.push(state);
        self
    }

    /// Correlate `event_kind` by a UUID payload field when the envelope has
    /// no correlation id.
    pub fn correlate_by(mut self, event_kind: impl Into<String>, field: impl Into<String>) -> Self {
        self.correlations.push((event_kind.into(), field.into()));
        self
    }

    pub fn build(self) -> Result<StateMachine<S, D>, DefinitionError> {
        if self.saga_type.trim().is_empty() {
            return Err(DefinitionError::EmptySagaType);
        }
        if self.initially.is_empty() {
            return Err(DefinitionError::NoInitialTransitions);
        }

        let terminal: HashSet<S> = self.terminal.into_iter().collect();
        let mut known_kinds: HashSet<String> = HashSet::new();

        let mut initially = HashMap::with_capacity(self.initially.len());
        for rule in self.initially {
            check_kind(&rule.event_kind)?;
            known_kinds.insert(rule.event_kind.clone());
            if initially.contains_key(&rule.event_kind) {
                return Err(DefinitionError::DuplicateInitial(rule.event_kind));
            }
            initially.insert(rule.event_kind.clone(), rule);
        }

        let mut during: HashMap<S, HashMap<String, Entry<S, D>>> = HashMap::new();
        for (state, entry, kind) in self.during {
            check_kind(&kind)?;
            if terminal.contains(&state) {
                return Err(DefinitionError::RuleOnTerminalState {
                    state: state.name(),
                    event_kind: kind,
                });
            }
            known_kinds.insert(kind.clone());
            let rules = during.entry(state).or_default();
            if rules.contains_key(&kind) {
                return Err(DefinitionError::DuplicateRule {
                    state: state.name(),
                    event_kind: kind,
                });
            }
            rules.insert(kind, entry);
        }

        let mut during_any = HashMap::new();
        for (entry, kind) in self.during_any {
            check_kind(&kind)?;
            known_kinds.insert(kind.clone());
            if during_any.contains_key(&kind) {
                return Err(DefinitionError::DuplicateDuringAny(kind));
            }
            during_any.insert(kind, entry);
        }

        let mut correlations = HashMap::new();
        for (kind, field) in self.correlations {
            if !known_kinds.contains(&kind) {
                return Err(DefinitionError::UnknownEventKind(kind));
            }
            correlations.insert(kind, field);
        }

        Ok(StateMachine {
            saga_type: self.saga_type,
            initially,
            during,
            during_any,
            terminal,
            correlations,
        })
    }
}

fn check_kind(kind: &str) -> Result<(), DefinitionError> {
    if kind.trim().is_empty() {
        Err(DefinitionError::EmptyEventKind)
    } else {
        Ok(())
    }
}
