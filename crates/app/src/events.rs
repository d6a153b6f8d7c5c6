use async_trait::async_trait;
use engine::{EventSink, SinkError, TransactionEvent};

/// Writes every transaction event as one JSON line to the log.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn send(&self, event: &TransactionEvent) -> Result<(), SinkError> {
        let line = serde_json::to_string(event).map_err(|err| SinkError(err.to_string()))?;
        tracing::info!(target: "railbook::events", "{line}");
        Ok(())
    }
}
