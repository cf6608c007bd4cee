// Event sinks that ship with the binary.

use crate::core::moderation::{EventSink, ResourceEvent};
use anyhow::Result;
use async_trait::async_trait;

/// Writes every event to the tracing output. Downstream consumers that tail
/// the logs (or a log shipper) pick them up from there.
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: &ResourceEvent) -> Result<()> {
        let payload = serde_json::to_string(&event.payload)?;
        tracing::info!(
            action = ?event.action,
            record_type = %event.record_type,
            record_id = event.record_id,
            payload = %payload,
            "Resource event"
        );
        Ok(())
    }
}
