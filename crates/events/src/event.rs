use chrono::{DateTime, Utc};

use sagaflow_core::CorrelationId;

/// A typed saga message.
///
/// Events are:
/// - **immutable** (treat them as facts, not requests)
/// - **correlated** (each one names the saga instance it belongs to)
/// - safe to deliver more than once
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event kind identifier (e.g. "order.accept").
    fn event_kind(&self) -> &'static str;

    /// The saga instance this event targets.
    fn correlation_id(&self) -> CorrelationId;

    /// When the event occurred (business time), if the message carries it.
    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}
