// Moderation log domain models - data structures for the quarantine queue.
//
// These are pure domain types with no storage dependencies.
// The infra layer converts them to and from database rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::time::Duration;

/// Ordered snapshot of a record: field name -> value.
///
/// `serde_json` is built with `preserve_order`, so field order survives
/// storage and comes back exactly as it was inserted.
pub type RecordData = Map<String, Value>;

/// The moderation decision that quarantined a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogOperation {
    Spam,
    Pending,
    Delete,
    Edit,
    Moderate,
}

impl LogOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogOperation::Spam => "Spam",
            LogOperation::Pending => "Pending",
            LogOperation::Delete => "Delete",
            LogOperation::Edit => "Edit",
            LogOperation::Moderate => "Moderate",
        }
    }
}

impl std::fmt::Display for LogOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spam" => Ok(LogOperation::Spam),
            "pending" => Ok(LogOperation::Pending),
            "delete" => Ok(LogOperation::Delete),
            "edit" => Ok(LogOperation::Edit),
            "moderate" => Ok(LogOperation::Moderate),
            other => Err(format!("unknown log operation '{}'", other)),
        }
    }
}

/// A quarantined record waiting for an administrator decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub operation: LogOperation,
    /// Canonical tag of a registered record type (e.g. "Discussion")
    pub record_type: String,
    /// Live record id, once one is known
    pub record_id: Option<i64>,
    /// Full snapshot, enough to recreate the record
    pub data: RecordData,
    pub insert_user_id: i64,
    pub inserted_at: DateTime<Utc>,
    /// How many moderation flags were merged into this entry
    pub count_group: u32,
}

/// Input for inserting a new log entry.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub operation: LogOperation,
    pub record_type: String,
    pub record_id: Option<i64>,
    pub data: RecordData,
    pub insert_user_id: i64,
}

/// Which log entries a list/count call should see.
///
/// Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub ids: Vec<i64>,
    pub record_type: Option<String>,
    pub record_id: Option<i64>,
    pub operation: Option<LogOperation>,
    /// Snapshot field equality, matched against the stored JSON
    pub fields: Vec<(String, Value)>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: i64) -> Self {
        self.ids.push(id);
        self
    }

    pub fn record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    pub fn record_id(mut self, record_id: i64) -> Self {
        self.record_id = Some(record_id);
        self
    }

    pub fn operation(mut self, operation: LogOperation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

/// Offset/limit window over a filtered, id-ordered result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }

    /// Everything, in one page.
    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: u32::MAX,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// What happened to a live record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceAction {
    Created,
    #[allow(dead_code)]
    Updated,
}

/// Notification for downstream consumers (search index, notifications).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub action: ResourceAction,
    pub record_type: String,
    pub record_id: i64,
    pub payload: RecordData,
}

impl ResourceEvent {
    pub fn created(record_type: impl Into<String>, record_id: i64, payload: RecordData) -> Self {
        Self {
            action: ResourceAction::Created,
            record_type: record_type.into(),
            record_id,
            payload,
        }
    }
}

/// Reason tag attached to each failed id in a restore batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreFailureReason {
    NotFound,
    UnsupportedRecordType,
    PermissionDenied,
    ValidationFailed,
    InvalidForeignKey,
    Conflict,
    StorageError,
}

/// One failed id, with a message fit for an administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreFailure {
    pub id: i64,
    pub reason: RestoreFailureReason,
    pub message: String,
}

/// Structured partial-success result of a restore batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreReport {
    pub restored: Vec<i64>,
    pub failed: Vec<RestoreFailure>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    #[allow(dead_code)]
    pub fn failure(&self, id: i64) -> Option<&RestoreFailure> {
        self.failed.iter().find(|f| f.id == id)
    }
}

/// What a single successful restore did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub record_id: i64,
    /// False when an equivalent live record already existed
    pub created: bool,
}

/// Runtime settings for the restore engine.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// How long a restore waits for another restore of the same id
    pub claim_timeout: Duration,
    /// Actor allowed to restore privileged record types
    pub system_user_id: i64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            claim_timeout: Duration::from_millis(250),
            system_user_id: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_parse_is_case_insensitive() {
        assert_eq!("spam".parse::<LogOperation>().unwrap(), LogOperation::Spam);
        assert_eq!(
            "PENDING".parse::<LogOperation>().unwrap(),
            LogOperation::Pending
        );
        assert!("banish".parse::<LogOperation>().is_err());
    }

    #[test]
    fn test_record_data_keeps_field_order() {
        let raw = r#"{"Zeta":1,"Alpha":2,"Mid":3}"#;
        let data: RecordData = serde_json::from_str(raw).unwrap();
        let keys: Vec<&str> = data.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["Zeta", "Alpha", "Mid"]);
        assert_eq!(serde_json::to_string(&data).unwrap(), raw);
    }

    #[test]
    fn test_filter_builder() {
        let filter = LogFilter::new()
            .id(3)
            .record_type("Comment")
            .field("DiscussionID", json!(20));
        assert_eq!(filter.ids, vec![3]);
        assert_eq!(filter.record_type.as_deref(), Some("Comment"));
        assert_eq!(filter.fields.len(), 1);
    }
}
