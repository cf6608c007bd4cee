// Record type resolver - typed registry of per-content-type capabilities.
//
// Each record type (Discussion, Comment, Registration, ...) implements
// RecordHandler once. The registry is populated at startup and looked up by
// tag when a log entry is inserted or restored.

use super::moderation_models::RecordData;
use super::moderation_service::ModerationError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// NATURAL KEYS
// ============================================================================

/// The field combination that identifies a live record equivalent to a
/// snapshot. Values are copied out of the snapshot in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct NaturalKey {
    pub fields: Vec<(&'static str, Value)>,
}

impl NaturalKey {
    /// Build a key from snapshot fields. `None` if any field is missing or null.
    pub fn from_fields(data: &RecordData, names: &[&'static str]) -> Option<Self> {
        let mut fields = Vec::with_capacity(names.len());
        for &name in names {
            match data.get(name) {
                Some(Value::Null) | None => return None,
                Some(value) => fields.push((name, value.clone())),
            }
        }
        Some(Self { fields })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, ModerationError> {
        self.get(name)
            .and_then(as_i64)
            .ok_or_else(|| ModerationError::MissingField(name.to_string()))
    }

    pub fn get_str(&self, name: &str) -> Result<&str, ModerationError> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| ModerationError::MissingField(name.to_string()))
    }
}

// ============================================================================
// CAPABILITY TRAIT (PORT)
// ============================================================================

/// Everything the restore engine needs to know about one content type.
///
/// `Tx` is the log store's transaction type: `find_existing`, `create` and
/// `touch_parent_aggregate` run inside the same unit that deletes the log
/// entry.
#[async_trait]
pub trait RecordHandler<Tx: Send>: Send + Sync {
    /// Canonical tag, e.g. "Discussion".
    fn record_type(&self) -> &'static str;

    /// Restores of this type must be approved by the permission collaborator.
    fn requires_privilege(&self) -> bool {
        false
    }

    /// Live primary key carried by a snapshot, if the type has one.
    fn record_id(&self, _data: &RecordData) -> Option<i64> {
        None
    }

    fn validate(&self, data: &RecordData) -> Result<(), ModerationError>;

    /// Declared natural key. `None` means the type never suppresses
    /// duplicates and every restore creates a record.
    fn natural_key(&self, data: &RecordData) -> Option<NaturalKey>;

    async fn find_existing(
        &self,
        tx: &mut Tx,
        key: &NaturalKey,
    ) -> Result<Option<i64>, ModerationError>;

    /// Recreate the live record. Must fail with `InvalidForeignKey` rather
    /// than write anything when a referenced record is missing.
    async fn create(&self, tx: &mut Tx, data: &RecordData) -> Result<i64, ModerationError>;

    async fn touch_parent_aggregate(
        &self,
        _tx: &mut Tx,
        _record_id: i64,
    ) -> Result<(), ModerationError> {
        Ok(())
    }

    /// Payload for the `Created` event.
    fn event_payload(&self, _record_id: i64, data: &RecordData) -> RecordData {
        data.clone()
    }
}

/// Permission collaborator consulted for privileged record types.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn can_restore(&self, acting_user_id: i64, record_type: &str) -> bool;
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Record type tag -> capability implementation.
///
/// Lookups are case-insensitive; entries always carry the canonical tag.
pub struct RecordTypeRegistry<Tx: Send> {
    handlers: HashMap<String, Arc<dyn RecordHandler<Tx>>>,
}

impl<Tx: Send> RecordTypeRegistry<Tx> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its canonical tag. A later registration for
    /// the same tag replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn RecordHandler<Tx>>) -> &mut Self {
        let key = handler.record_type().to_ascii_lowercase();
        self.handlers.insert(key, handler);
        self
    }

    pub fn with(mut self, handler: Arc<dyn RecordHandler<Tx>>) -> Self {
        self.register(handler);
        self
    }

    pub fn resolve(&self, record_type: &str) -> Result<&Arc<dyn RecordHandler<Tx>>, ModerationError> {
        self.handlers
            .get(&record_type.to_ascii_lowercase())
            .ok_or_else(|| ModerationError::UnsupportedRecordType(record_type.to_string()))
    }

    pub fn canonical_name(&self, record_type: &str) -> Option<&'static str> {
        self.resolve(record_type).ok().map(|h| h.record_type())
    }

    pub fn record_types(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.values().map(|h| h.record_type()).collect();
        names.sort_unstable();
        names
    }
}

impl<Tx: Send> Default for RecordTypeRegistry<Tx> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SNAPSHOT FIELD HELPERS
// ============================================================================

// Snapshots come from several producers; numeric ids sometimes arrive as strings.
fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn optional_i64(data: &RecordData, field: &str) -> Option<i64> {
    data.get(field).and_then(as_i64)
}

pub fn require_i64(data: &RecordData, field: &str) -> Result<i64, ModerationError> {
    match data.get(field) {
        None | Some(Value::Null) => Err(ModerationError::MissingField(field.to_string())),
        Some(value) => as_i64(value).ok_or_else(|| {
            ModerationError::ValidationFailed(format!("{} must be an integer id", field))
        }),
    }
}

pub fn optional_str<'a>(data: &'a RecordData, field: &str) -> Option<&'a str> {
    data.get(field).and_then(Value::as_str)
}

pub fn require_str<'a>(data: &'a RecordData, field: &str) -> Result<&'a str, ModerationError> {
    match data.get(field) {
        None | Some(Value::Null) => Err(ModerationError::MissingField(field.to_string())),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(ModerationError::ValidationFailed(format!("{} is empty", field)))
        }
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ModerationError::ValidationFailed(format!(
            "{} must be a string",
            field
        ))),
    }
}

// ============================================================================
// TESTS
// ============================================================================
