use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;

use sagaflow_core::{CorrelationId, DomainError, DomainResult, EventId};

use crate::Event;

/// Envelope for an event as delivered by the transport (already decoded).
///
/// Notes:
/// - `event_kind` discriminates the payload (e.g. "order.accept").
/// - `correlation_id` may be absent; the state machine can then fall back to a
///   payload field (see `StateMachineBuilder::correlate_by`).
/// - `payload` is the domain-agnostic event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    event_id: EventId,
    event_kind: String,
    #[serde(default)]
    correlation_id: Option<CorrelationId>,
    occurred_at: DateTime<Utc>,
    payload: JsonValue,
}

impl EventEnvelope {
    pub fn new(
        event_kind: impl Into<String>,
        correlation_id: Option<CorrelationId>,
        payload: JsonValue,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_kind: event_kind.into(),
            correlation_id,
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Wrap a typed event, serializing it as the payload.
    pub fn from_typed<E>(event: &E) -> DomainResult<Self>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| DomainError::validation(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id: EventId::new(),
            event_kind: event.event_kind().to_string(),
            correlation_id: Some(event.correlation_id()),
            occurred_at: event.occurred_at().unwrap_or_else(Utc::now),
            payload,
        })
    }

    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn event_kind(&self) -> &str {
        &self.event_kind
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// Deserialize the payload into a typed message.
    pub fn decode<T: DeserializeOwned>(&self) -> DomainResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            DomainError::validation(format!("cannot decode '{}' payload: {e}", self.event_kind))
        })
    }

    /// Read a UUID-valued top-level payload field as a correlation id.
    pub fn payload_correlation(&self, field: &str) -> Option<CorrelationId> {
        self.payload
            .as_object()?
            .get(field)?
            .as_str()?
            .parse()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_correlation_reads_uuid_fields_only() {
        let id = CorrelationId::new();
        let env = EventEnvelope::new(
            "order.submit",
            None,
            json!({ "order_id": id.to_string(), "count": 3, "name": "x" }),
        );

        assert_eq!(env.payload_correlation("order_id"), Some(id));
        assert_eq!(env.payload_correlation("count"), None);
        assert_eq!(env.payload_correlation("name"), None);
        assert_eq!(env.payload_correlation("missing"), None);
    }

    #[test]
    fn decode_reports_event_kind_on_failure() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            amount: i64,
        }

        let env = EventEnvelope::new("ledger.post", None, json!({ "amount": "lots" }));
        let err = env.decode::<Needs>().unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.contains("ledger.post")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn envelope_survives_json_transport() {
        let env = EventEnvelope::new("order.submit", Some(CorrelationId::new()), json!({}));
        let wire = serde_json::to_string(&env).unwrap();
        let back: EventEnvelope = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn missing_correlation_id_deserializes_as_none() {
        let raw = json!({
            "event_id": EventId::new(),
            "event_kind": "order.submit",
            "occurred_at": "2012-12-25T00:00:00Z",
            "payload": {}
        });
        let env: EventEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(env.correlation_id(), None);
    }
}
