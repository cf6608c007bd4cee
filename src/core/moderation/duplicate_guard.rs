// Duplicate guard - finds a live record equivalent to a log entry's snapshot.
//
// This is what keeps restore idempotent across separate log entries that
// describe the same content (two independent flags on one comment, say).

use super::moderation_models::RecordData;
use super::moderation_service::ModerationError;
use super::record_types::RecordHandler;

/// Stateless wrapper over each type's declared natural key.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuplicateGuard;

impl DuplicateGuard {
    pub fn new() -> Self {
        Self
    }

    /// Existing live record id matching the snapshot's natural key, if any.
    ///
    /// Types without a natural key (registrations) never match.
    pub async fn check<Tx: Send>(
        &self,
        handler: &dyn RecordHandler<Tx>,
        tx: &mut Tx,
        data: &RecordData,
    ) -> Result<Option<i64>, ModerationError> {
        let Some(key) = handler.natural_key(data) else {
            return Ok(None);
        };

        let existing = handler.find_existing(tx, &key).await?;
        if let Some(record_id) = existing {
            tracing::debug!(
                record_type = handler.record_type(),
                record_id,
                "Snapshot matches an existing live record"
            );
        }
        Ok(existing)
    }
}
