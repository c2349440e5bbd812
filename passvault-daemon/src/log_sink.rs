//! Log sinks for endpoint call events.

use std::sync::atomic::{AtomicU64, Ordering};

use passvault_core::{CallEvent, LogSink};
use tokio::sync::mpsc;

/// Default capacity of the console viewer's queue.
pub const DEFAULT_VIEWER_CAPACITY: usize = 1024;

/// Forwards events to a bounded channel.
///
/// Never waits: when the queue is full or the receiver is gone the event is
/// dropped and counted.
#[derive(Debug)]
pub struct ChannelLogSink {
    sender: mpsc::Sender<CallEvent>,
    dropped: AtomicU64,
}

impl ChannelLogSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CallEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let sink = Self {
            sender,
            dropped: AtomicU64::new(0),
        };
        (sink, receiver)
    }

    /// Number of events dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl LogSink for ChannelLogSink {
    fn emit(&self, event: &CallEvent) {
        if self.sender.try_send(event.clone()).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped.is_power_of_two() {
                tracing::warn!(dropped, "Log viewer is behind, dropping call events");
            }
        }
    }
}

/// Writes each event as a tracing event under the `passvault::calls` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn emit(&self, event: &CallEvent) {
        tracing::info!(
            target: "passvault::calls",
            op = %event.operation,
            user = %event.username,
            service = event.service.as_deref().unwrap_or(""),
            applied = event.outcome.is_applied(),
            "{event}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passvault_core::{Operation, Outcome};

    fn event(user: &str) -> CallEvent {
        CallEvent::new(Operation::Register, user, Outcome::Applied)
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut receiver) = ChannelLogSink::new(8);

        sink.emit(&event("alice"));
        sink.emit(&event("bob"));

        assert_eq!(receiver.recv().await.unwrap().username, "alice");
        assert_eq!(receiver.recv().await.unwrap().username, "bob");
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_waiting() {
        let (sink, mut receiver) = ChannelLogSink::new(2);

        for i in 0..5 {
            sink.emit(&event(&format!("user{i}")));
        }

        assert_eq!(sink.dropped(), 3);
        assert_eq!(receiver.recv().await.unwrap().username, "user0");
        assert_eq!(receiver.recv().await.unwrap().username, "user1");
    }

    #[test]
    fn test_closed_channel_drops() {
        let (sink, receiver) = ChannelLogSink::new(2);
        drop(receiver);

        sink.emit(&event("alice"));
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_tracing_sink_without_subscriber() {
        TracingLogSink.emit(&event("alice"));
    }
}
