// Moderation log service - the append-only quarantine queue.
//
// This service handles:
// - Inserting log entries (rejecting unregistered record types)
// - Grouping repeated flags on the same live record
// - Filtered listing and counting
// - Discarding entries without restoring them
//
// NO database dependencies here - storage goes through the LogStore port.

use super::moderation_models::{
    LogEntry, LogFilter, LogOperation, NewLogEntry, Pagination, RecordData, RestoreFailureReason,
};
use super::record_types::{PermissionChecker, RecordTypeRegistry};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("Unsupported record type: {0}")]
    UnsupportedRecordType(String),

    #[error("Log entry {0} not found")]
    NotFound(i64),

    #[error("User {user_id} is not allowed to restore {record_type} records")]
    PermissionDenied { user_id: i64, record_type: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("No {entity} found for ID: {id}")]
    InvalidForeignKey { entity: &'static str, id: i64 },

    #[error("Log entry {0} is already being restored")]
    Conflict(i64),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl ModerationError {
    /// Reason tag reported for a failed id in a restore batch.
    pub fn reason(&self) -> RestoreFailureReason {
        match self {
            ModerationError::UnsupportedRecordType(_) => RestoreFailureReason::UnsupportedRecordType,
            ModerationError::NotFound(_) => RestoreFailureReason::NotFound,
            ModerationError::PermissionDenied { .. } => RestoreFailureReason::PermissionDenied,
            ModerationError::MissingField(_) | ModerationError::ValidationFailed(_) => {
                RestoreFailureReason::ValidationFailed
            }
            ModerationError::InvalidForeignKey { .. } => RestoreFailureReason::InvalidForeignKey,
            ModerationError::Conflict(_) => RestoreFailureReason::Conflict,
            ModerationError::InvalidFilter(_) | ModerationError::StorageError(_) => {
                RestoreFailureReason::StorageError
            }
        }
    }
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Trait for persisting log entries.
///
/// `Tx` is the storage transaction a restore runs in. Record handlers receive
/// the same transaction, so creating the live record and deleting the log
/// entry commit as one unit. Dropping a `Tx` without committing rolls it back.
#[async_trait]
pub trait LogStore: Send + Sync {
    type Tx: Send;

    /// Append an entry. Ids are strictly increasing and never reused.
    async fn insert(&self, entry: NewLogEntry) -> Result<i64, ModerationError>;

    /// Append an entry, or merge it into an existing entry with the same
    /// operation, record type and record id. Returns the surviving id.
    async fn insert_grouped(&self, entry: NewLogEntry) -> Result<i64, ModerationError>;

    async fn get(&self, id: i64) -> Result<Option<LogEntry>, ModerationError>;

    /// Matching entries in insertion (id) order.
    async fn list(
        &self,
        filter: &LogFilter,
        page: Pagination,
    ) -> Result<Vec<LogEntry>, ModerationError>;

    async fn count(&self, filter: &LogFilter) -> Result<u64, ModerationError>;

    /// Remove an entry. Returns false if it was already gone.
    async fn delete(&self, id: i64) -> Result<bool, ModerationError>;

    async fn begin(&self) -> Result<Self::Tx, ModerationError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), ModerationError>;

    async fn load_in(&self, tx: &mut Self::Tx, id: i64)
        -> Result<Option<LogEntry>, ModerationError>;

    async fn attach_record_id_in(
        &self,
        tx: &mut Self::Tx,
        id: i64,
        record_id: i64,
    ) -> Result<(), ModerationError>;

    async fn delete_in(&self, tx: &mut Self::Tx, id: i64) -> Result<(), ModerationError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// Insert/list/count/delete over the quarantine queue.
pub struct LogService<S: LogStore> {
    store: Arc<S>,
    registry: Arc<RecordTypeRegistry<S::Tx>>,
}

impl<S: LogStore> LogService<S> {
    pub fn new(store: Arc<S>, registry: Arc<RecordTypeRegistry<S::Tx>>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<RecordTypeRegistry<S::Tx>> {
        &self.registry
    }

    /// Quarantine a record snapshot.
    ///
    /// Fails with `UnsupportedRecordType` if nothing is registered for
    /// `record_type`; nothing is written in that case.
    pub async fn insert(
        &self,
        operation: LogOperation,
        record_type: &str,
        data: RecordData,
        insert_user_id: i64,
    ) -> Result<i64, ModerationError> {
        let entry = self.prepare(operation, record_type, data, insert_user_id)?;
        let canonical = entry.record_type.clone();
        let id = self.store.insert(entry).await?;

        tracing::info!(
            log_id = id,
            record_type = %canonical,
            operation = %operation,
            user_id = insert_user_id,
            "Quarantined record"
        );
        Ok(id)
    }

    /// Like `insert`, but a repeated flag on an already quarantined live
    /// record bumps that entry's count instead of adding a second entry.
    pub async fn insert_grouped(
        &self,
        operation: LogOperation,
        record_type: &str,
        data: RecordData,
        insert_user_id: i64,
    ) -> Result<i64, ModerationError> {
        let entry = self.prepare(operation, record_type, data, insert_user_id)?;
        if entry.record_id.is_none() {
            return self.store.insert(entry).await;
        }

        let canonical = entry.record_type.clone();
        let id = self.store.insert_grouped(entry).await?;
        tracing::info!(
            log_id = id,
            record_type = %canonical,
            operation = %operation,
            "Quarantined record (grouped)"
        );
        Ok(id)
    }

    fn prepare(
        &self,
        operation: LogOperation,
        record_type: &str,
        data: RecordData,
        insert_user_id: i64,
    ) -> Result<NewLogEntry, ModerationError> {
        let handler = self.registry.resolve(record_type)?;
        Ok(NewLogEntry {
            operation,
            record_type: handler.record_type().to_string(),
            record_id: handler.record_id(&data),
            data,
            insert_user_id,
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<LogEntry>, ModerationError> {
        self.store.get(id).await
    }

    pub async fn list(
        &self,
        filter: &LogFilter,
        page: Pagination,
    ) -> Result<Vec<LogEntry>, ModerationError> {
        let filter = self.canonicalize(filter);
        self.store.list(&filter, page).await
    }

    pub async fn count(&self, filter: &LogFilter) -> Result<u64, ModerationError> {
        let filter = self.canonicalize(filter);
        self.store.count(&filter).await
    }

    /// Idempotent: deleting a missing id is not an error.
    pub async fn delete(&self, id: i64) -> Result<(), ModerationError> {
        if !self.store.delete(id).await? {
            tracing::debug!(log_id = id, "Delete of absent log entry ignored");
        }
        Ok(())
    }

    /// Permanently drop entries without restoring them. Returns how many
    /// entries were actually removed.
    pub async fn discard(&self, ids: &[i64]) -> Result<u64, ModerationError> {
        let mut removed = 0;
        for &id in ids {
            if self.store.delete(id).await? {
                removed += 1;
            }
        }
        tracing::info!(requested = ids.len(), removed, "Discarded log entries");
        Ok(removed)
    }

    /// Log entries for one record type (optionally one live record).
    ///
    /// Privileged record types are only visible to actors the permission
    /// collaborator approves.
    pub async fn entries_for_record(
        &self,
        record_type: &str,
        record_id: Option<i64>,
        acting_user_id: i64,
        permissions: &dyn PermissionChecker,
    ) -> Result<Vec<LogEntry>, ModerationError> {
        let handler = self.registry.resolve(record_type)?;
        let canonical = handler.record_type();

        if handler.requires_privilege()
            && !permissions.can_restore(acting_user_id, canonical).await
        {
            return Err(ModerationError::PermissionDenied {
                user_id: acting_user_id,
                record_type: canonical.to_string(),
            });
        }

        let mut filter = LogFilter::new().record_type(canonical);
        filter.record_id = record_id;
        self.store.list(&filter, Pagination::all()).await
    }

    // Record type filters accept any casing; storage only knows canonical tags.
    fn canonicalize(&self, filter: &LogFilter) -> LogFilter {
        let mut filter = filter.clone();
        if let Some(tag) = filter.record_type.as_deref() {
            if let Some(canonical) = self.registry.canonical_name(tag) {
                filter.record_type = Some(canonical.to_string());
            }
        }
        filter
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::LogFilter;
    use crate::infra::moderation::test_support::TestHarness;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> RecordData {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_rejects_unregistered_type() {
        let harness = TestHarness::new().await;

        let err = harness
            .log
            .insert(LogOperation::Spam, "Poll", snapshot(json!({"Name": "x"})), 1)
            .await
            .unwrap_err();

        assert!(matches!(err, ModerationError::UnsupportedRecordType(ref t) if t == "Poll"));
        assert_eq!(harness.log.count(&LogFilter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ids_strictly_increase_and_are_never_reused() {
        let harness = TestHarness::new().await;
        let data = snapshot(json!({"Body": "a", "DiscussionID": 1, "InsertUserID": 1}));

        let first = harness
            .log
            .insert(LogOperation::Spam, "Comment", data.clone(), 1)
            .await
            .unwrap();
        let second = harness
            .log
            .insert(LogOperation::Spam, "Comment", data.clone(), 1)
            .await
            .unwrap();
        assert!(second > first);

        harness.log.delete(second).await.unwrap();
        let third = harness
            .log
            .insert(LogOperation::Spam, "Comment", data, 1)
            .await
            .unwrap();
        assert!(third > second);
    }

    #[tokio::test]
    async fn test_record_type_tag_is_canonicalized() {
        let harness = TestHarness::new().await;

        let id = harness
            .log
            .insert(
                LogOperation::Delete,
                "discussion",
                snapshot(json!({"DiscussionID": 7, "Name": "n"})),
                1,
            )
            .await
            .unwrap();

        let entry = harness.log.get(id).await.unwrap().unwrap();
        assert_eq!(entry.record_type, "Discussion");
        assert_eq!(entry.record_id, Some(7));

        let count = harness
            .log
            .count(&LogFilter::new().record_type("DISCUSSION"))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_list_preserves_insertion_order_and_paginates() {
        let harness = TestHarness::new().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let id = harness
                .log
                .insert(
                    LogOperation::Pending,
                    "Comment",
                    snapshot(json!({"Body": format!("c{}", i), "DiscussionID": 1, "InsertUserID": 1})),
                    1,
                )
                .await
                .unwrap();
            ids.push(id);
        }

        let all = harness
            .log
            .list(&LogFilter::new(), Pagination::all())
            .await
            .unwrap();
        let listed: Vec<i64> = all.iter().map(|e| e.id).collect();
        assert_eq!(listed, ids);

        let page = harness
            .log
            .list(&LogFilter::new(), Pagination::new(1, 2))
            .await
            .unwrap();
        let paged: Vec<i64> = page.iter().map(|e| e.id).collect();
        assert_eq!(paged, ids[1..3].to_vec());
    }

    #[tokio::test]
    async fn test_filter_by_snapshot_field() {
        let harness = TestHarness::new().await;
        for discussion_id in [1, 2, 2] {
            harness
                .log
                .insert(
                    LogOperation::Spam,
                    "Comment",
                    snapshot(json!({"Body": "b", "DiscussionID": discussion_id, "InsertUserID": 1})),
                    1,
                )
                .await
                .unwrap();
        }

        let filter = LogFilter::new().field("DiscussionID", 2);
        assert_eq!(harness.log.count(&filter).await.unwrap(), 2);

        let filter = LogFilter::new().field("Body", "b").field("DiscussionID", 1);
        assert_eq!(harness.log.count(&filter).await.unwrap(), 1);

        let bad = LogFilter::new().field("Bo\"dy", "b");
        assert!(matches!(
            harness.log.count(&bad).await,
            Err(ModerationError::InvalidFilter(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let harness = TestHarness::new().await;
        let id = harness
            .log
            .insert(
                LogOperation::Spam,
                "Registration",
                snapshot(json!({"Name": "n", "Email": "n@example.com"})),
                1,
            )
            .await
            .unwrap();

        harness.log.delete(id).await.unwrap();
        harness.log.delete(id).await.unwrap();
        harness.log.delete(999_999).await.unwrap();
        assert!(harness.log.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_grouped_insert_merges_flags_on_same_record() {
        let harness = TestHarness::new().await;
        let data = snapshot(json!({"CommentID": 40, "Body": "buy now", "DiscussionID": 1, "InsertUserID": 1}));

        let first = harness
            .log
            .insert_grouped(LogOperation::Spam, "Comment", data.clone(), 1)
            .await
            .unwrap();
        let second = harness
            .log
            .insert_grouped(LogOperation::Spam, "Comment", data.clone(), 2)
            .await
            .unwrap();
        assert_eq!(first, second);

        let entry = harness.log.get(first).await.unwrap().unwrap();
        assert_eq!(entry.count_group, 2);

        // A different operation is a separate entry
        let other = harness
            .log
            .insert_grouped(LogOperation::Pending, "Comment", data, 1)
            .await
            .unwrap();
        assert_ne!(other, first);
        assert_eq!(harness.log.count(&LogFilter::new()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_discard_counts_only_removed_entries() {
        let harness = TestHarness::new().await;
        let id = harness
            .log
            .insert(
                LogOperation::Spam,
                "Comment",
                snapshot(json!({"Body": "x", "DiscussionID": 1, "InsertUserID": 1})),
                1,
            )
            .await
            .unwrap();

        assert_eq!(harness.log.discard(&[id, id + 100]).await.unwrap(), 1);
        assert_eq!(harness.log.discard(&[id]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entries_for_privileged_type_require_system_user() {
        let harness = TestHarness::new().await;
        let id = harness
            .log
            .insert(
                LogOperation::Edit,
                "Configuration",
                snapshot(json!({"Garden.Title": "Forum"})),
                1,
            )
            .await
            .unwrap();

        let denied = harness
            .log
            .entries_for_record("configuration", None, 42, harness.permissions.as_ref())
            .await;
        assert!(matches!(denied, Err(ModerationError::PermissionDenied { user_id: 42, .. })));

        let entries = harness
            .log
            .entries_for_record("configuration", None, 1, harness.permissions.as_ref())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
    }

    #[tokio::test]
    async fn test_entries_for_record_by_record_id() {
        let harness = TestHarness::new().await;
        let id = harness
            .log
            .insert(
                LogOperation::Delete,
                "Discussion",
                snapshot(json!({"DiscussionID": 12, "Name": "deleted"})),
                1,
            )
            .await
            .unwrap();
        harness
            .log
            .insert(
                LogOperation::Delete,
                "Discussion",
                snapshot(json!({"DiscussionID": 13, "Name": "other"})),
                1,
            )
            .await
            .unwrap();

        let entries = harness
            .log
            .entries_for_record("discussion", Some(12), 5, harness.permissions.as_ref())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
    }
}
