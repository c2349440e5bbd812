//! The log sink capability.

use crate::event::CallEvent;

/// Receiver for endpoint call events.
///
/// A sink is handed to the endpoint at construction. Implementations must
/// return promptly: when the consumer is slow or gone, drop the event
/// instead of waiting. Nothing a sink does can change a call's result.
pub trait LogSink: Send + Sync {
    fn emit(&self, event: &CallEvent);
}
