//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, Level};

/// Trait for receivers of chain lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "job.finished")
    /// * `data` - Optional event data
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Emits an event without blocking.
    ///
    /// Called from inside the scheduler, so it must never panic and must
    /// return promptly. Errors are logged and suppressed.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// An event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// An event sink that writes events to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at the given level. Levels other than
    /// `DEBUG` log at `INFO`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&Value>) {
        if self.level == Level::DEBUG {
            debug!(event_type, event_data = ?data, "Event: {}", event_type);
        } else {
            info!(event_type, event_data = ?data, "Event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// An event sink that keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the payloads of every event of exactly this type.
    #[must_use]
    pub fn data_of(&self, event_type: &str) -> Vec<Value> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t == event_type)
            .map(|(_, d)| d.clone().unwrap_or(Value::Null))
            .collect()
    }

    /// Returns how many events of exactly this type were collected.
    #[must_use]
    pub fn count_of(&self, event_type: &str) -> usize {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t == event_type)
            .count()
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.try_emit(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{JOB_ENQUEUED, JOB_FINISHED, SEQUENCE_RETRY};
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit(JOB_ENQUEUED, None).await;
        NoOpEventSink.try_emit(JOB_FINISHED, Some(json!({"state": "SUCCESS"})));

        let sink = LoggingEventSink::debug();
        sink.emit(JOB_FINISHED, Some(json!({"state": "FAIL"}))).await;
        sink.try_emit(SEQUENCE_RETRY, None);
    }

    #[tokio::test]
    async fn test_collecting_sink_by_type() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(JOB_ENQUEUED, Some(json!({"job_id": "a"}))).await;
        sink.try_emit(JOB_FINISHED, Some(json!({"job_id": "a"})));
        sink.try_emit(JOB_ENQUEUED, Some(json!({"job_id": "b"})));
        sink.try_emit(SEQUENCE_RETRY, None);

        assert_eq!(sink.len(), 4);
        assert_eq!(sink.count_of(JOB_ENQUEUED), 2);
        assert_eq!(sink.data_of(JOB_ENQUEUED)[1]["job_id"], "b");
        assert_eq!(sink.data_of(SEQUENCE_RETRY), vec![Value::Null]);
        assert_eq!(sink.events_of_type("job.").len(), 3);
        assert_eq!(sink.events()[0].0, JOB_ENQUEUED);
    }
}
