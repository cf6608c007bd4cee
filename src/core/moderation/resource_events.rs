// Event emitter - publishes ResourceEvents after a restore commits.
//
// Delivery is best-effort: a failing sink is logged and skipped, it never
// undoes a committed restore.

use super::moderation_models::ResourceEvent;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Outbound subscriber (notifications, search indexing, ...).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &ResourceEvent) -> Result<()>;
}

/// Fans each event out to every registered sink.
#[derive(Clone, Default)]
pub struct EventEmitter {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Returns how many sinks accepted the event.
    pub async fn publish(&self, event: &ResourceEvent) -> usize {
        let mut delivered = 0;
        for sink in &self.sinks {
            match sink.publish(event).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    record_type = %event.record_type,
                    record_id = event.record_id,
                    "Failed to publish resource event: {}",
                    e
                ),
            }
        }
        delivered
    }
}
