//! Order saga.
//!
//! Tracks an order from submission to finalization:
//! 1. `order.submit` → Submitted (creates the instance)
//! 2. `order.accept` while Submitted → Accepted, records the accept date once
//! 3. `order.finalize` while Accepted → Final (terminal), records the final date
//!
//! Duplicate submits and accepts are expected replays and are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sagaflow_core::{CorrelationId, SagaState};
use sagaflow_events::{DefinitionError, Event, StateMachine, when};

pub const ORDER_SAGA_TYPE: &str = "saga.order";

pub const SUBMIT_ORDER: &str = "order.submit";
pub const ACCEPT_ORDER: &str = "order.accept";
pub const FINALIZE_ORDER: &str = "order.finalize";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Submitted,
    Accepted,
    Final,
}

impl SagaState for OrderState {
    fn all() -> &'static [Self] {
        &[OrderState::Submitted, OrderState::Accepted, OrderState::Final]
    }

    fn name(&self) -> &'static str {
        match self {
            OrderState::Submitted => "submitted",
            OrderState::Accepted => "accepted",
            OrderState::Final => "final",
        }
    }
}

/// Domain fields of an order saga instance. Each is written at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSagaData {
    pub date_accepted: Option<DateTime<Utc>>,
    pub date_finalized: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOrder {
    pub order_id: CorrelationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptOrder {
    pub order_id: CorrelationId,
    pub date_accepted: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeOrder {
    pub order_id: CorrelationId,
    pub date_accepted: DateTime<Utc>,
    pub date_finalized: DateTime<Utc>,
}

impl Event for SubmitOrder {
    fn event_kind(&self) -> &'static str {
        SUBMIT_ORDER
    }

    fn correlation_id(&self) -> CorrelationId {
        self.order_id
    }
}

impl Event for AcceptOrder {
    fn event_kind(&self) -> &'static str {
        ACCEPT_ORDER
    }

    fn correlation_id(&self) -> CorrelationId {
        self.order_id
    }

    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        Some(self.date_accepted)
    }
}

impl Event for FinalizeOrder {
    fn event_kind(&self) -> &'static str {
        FINALIZE_ORDER
    }

    fn correlation_id(&self) -> CorrelationId {
        self.order_id
    }

    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        Some(self.date_finalized)
    }
}

/// Build the order saga definition.
pub fn order_state_machine() -> Result<StateMachine<OrderState, OrderSagaData>, DefinitionError> {
    StateMachine::builder(ORDER_SAGA_TYPE)
        .initially(when(SUBMIT_ORDER).transition_to(OrderState::Submitted))
        .during(
            OrderState::Submitted,
            when(ACCEPT_ORDER)
                .then_typed(|data: &mut OrderSagaData, msg: AcceptOrder| {
                    if data.date_accepted.is_none() {
                        data.date_accepted = Some(msg.date_accepted);
                    }
                })
                .transition_to(OrderState::Accepted),
        )
        .ignore(OrderState::Accepted, ACCEPT_ORDER)
        .during(
            OrderState::Accepted,
            when(FINALIZE_ORDER)
                .then_typed(|data: &mut OrderSagaData, msg: FinalizeOrder| {
                    if data.date_finalized.is_none() {
                        data.date_finalized = Some(msg.date_finalized);
                    }
                })
                .transition_to(OrderState::Final),
        )
        .ignore_any(SUBMIT_ORDER)
        .terminal(OrderState::Final)
        .correlate_by(SUBMIT_ORDER, "order_id")
        .correlate_by(ACCEPT_ORDER, "order_id")
        .correlate_by(FINALIZE_ORDER, "order_id")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sagaflow_events::{EventEnvelope, Lookup, RuleScope};

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn order_table_matches_lifecycle() {
        let machine = order_state_machine().unwrap();
        let rows: Vec<(RuleScope<OrderState>, String, Option<OrderState>)> = machine
            .describe()
            .into_iter()
            .map(|r| (r.scope, r.event_kind, r.target))
            .collect();

        assert_eq!(
            rows,
            vec![
                (RuleScope::Initially, SUBMIT_ORDER.to_string(), Some(OrderState::Submitted)),
                (RuleScope::During(OrderState::Accepted), ACCEPT_ORDER.to_string(), None),
                (
                    RuleScope::During(OrderState::Accepted),
                    FINALIZE_ORDER.to_string(),
                    Some(OrderState::Final)
                ),
                (
                    RuleScope::During(OrderState::Submitted),
                    ACCEPT_ORDER.to_string(),
                    Some(OrderState::Accepted)
                ),
                (RuleScope::DuringAny, SUBMIT_ORDER.to_string(), None),
            ]
        );
        assert!(machine.is_terminal(OrderState::Final));
        assert!(!machine.is_terminal(OrderState::Accepted));
    }

    #[test]
    fn finalize_before_accept_has_no_rule() {
        let machine = order_state_machine().unwrap();
        assert!(matches!(
            machine.lookup(OrderState::Submitted, FINALIZE_ORDER),
            Lookup::Unmatched
        ));
    }

    #[test]
    fn accept_action_is_write_once() {
        let machine = order_state_machine().unwrap();
        let Lookup::Transition(rule) = machine.lookup(OrderState::Submitted, ACCEPT_ORDER) else {
            panic!("accept rule missing");
        };
        let order_id = CorrelationId::new();
        let mut data = OrderSagaData::default();

        for d in [date(2012, 12, 25), date(2013, 1, 1)] {
            let env = EventEnvelope::from_typed(&AcceptOrder {
                order_id,
                date_accepted: d,
            })
            .unwrap();
            rule.apply(&mut data, &env).unwrap();
        }

        assert_eq!(data.date_accepted, Some(date(2012, 12, 25)));
        assert_eq!(data.date_finalized, None);
    }

    #[test]
    fn messages_correlate_by_order_id() {
        let machine = order_state_machine().unwrap();
        let order_id = CorrelationId::new();
        let typed = EventEnvelope::from_typed(&SubmitOrder { order_id }).unwrap();

        // Same payload without the envelope-level id still routes.
        let bare = EventEnvelope::new(SUBMIT_ORDER, None, typed.payload().clone());
        assert_eq!(machine.correlate(&typed), Some(order_id));
        assert_eq!(machine.correlate(&bare), Some(order_id));
    }

    #[test]
    fn state_names_are_stable() {
        let names: Vec<&str> = OrderState::all().iter().map(|s| s.name()).collect();
        assert_eq!(names, ["submitted", "accepted", "final"]);
    }
}
