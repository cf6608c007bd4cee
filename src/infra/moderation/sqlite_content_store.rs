// SQLite-backed live content and the record handlers that restore into it.
//
// Tables:
// - users: registered members
// - categories: discussion containers, with a discussion count
// - discussions: threads, with last-activity aggregates
// - comments: replies inside a discussion
// - config_settings / config_revisions: site configuration and its history
//
// Each handler runs inside the restore transaction handed to it by the
// coordinator, so a failed foreign-key check writes nothing.

use super::sqlite_log_store::{storage_error, SqliteTx};
use crate::core::moderation::{
    optional_i64, optional_str, require_i64, require_str, ModerationError, NaturalKey,
    RecordData, RecordHandler, RecordTypeRegistry,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::{Pool, Row, Sqlite};
use std::sync::Arc;

const DEFAULT_FORMAT: &str = "Text";

pub struct SqliteContentStore {
    pool: Pool<Sqlite>,
}

impl SqliteContentStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT,
                date_inserted TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                category_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                count_discussions INTEGER NOT NULL DEFAULT 0,
                last_discussion_id INTEGER,
                last_date_inserted TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS discussions (
                discussion_id INTEGER PRIMARY KEY AUTOINCREMENT,
                category_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                body TEXT NOT NULL,
                format TEXT NOT NULL DEFAULT 'Text',
                insert_user_id INTEGER NOT NULL,
                date_inserted TEXT NOT NULL,
                date_last_comment TEXT,
                last_comment_id INTEGER,
                count_comments INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_discussions_natural_key
                ON discussions(name, category_id, insert_user_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                comment_id INTEGER PRIMARY KEY AUTOINCREMENT,
                discussion_id INTEGER NOT NULL,
                body TEXT NOT NULL,
                format TEXT NOT NULL DEFAULT 'Text',
                insert_user_id INTEGER NOT NULL,
                date_inserted TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_comments_natural_key
                ON comments(discussion_id, insert_user_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config_settings (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS config_revisions (
                revision_id INTEGER PRIMARY KEY AUTOINCREMENT,
                data TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }
}

/// Every record type the content tables can restore into.
pub fn content_registry() -> RecordTypeRegistry<SqliteTx> {
    RecordTypeRegistry::new()
        .with(Arc::new(DiscussionRecords))
        .with(Arc::new(CommentRecords))
        .with(Arc::new(RegistrationRecords))
        .with(Arc::new(ConfigurationRecords))
}

// ============================================================================
// SHARED HELPERS
// ============================================================================

// Snapshots carry either RFC 3339 or the "YYYY-MM-DD HH:MM:SS" (UTC) form.
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc()))
        .ok()
}

fn validate_date(data: &RecordData) -> Result<(), ModerationError> {
    match optional_str(data, "DateInserted") {
        Some(raw) if parse_date(raw).is_none() => Err(ModerationError::ValidationFailed(format!(
            "DateInserted '{}' is not a valid date",
            raw
        ))),
        _ => Ok(()),
    }
}

fn date_inserted(data: &RecordData) -> String {
    optional_str(data, "DateInserted")
        .and_then(parse_date)
        .unwrap_or_else(Utc::now)
        .to_rfc3339()
}

async fn ensure_user(tx: &mut SqliteTx, user_id: i64) -> Result<(), ModerationError> {
    let row = sqlx::query("SELECT 1 FROM users WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage_error)?;

    match row {
        Some(_) => Ok(()),
        None => Err(ModerationError::InvalidForeignKey {
            entity: "user",
            id: user_id,
        }),
    }
}

async fn ensure_category(tx: &mut SqliteTx, category_id: i64) -> Result<(), ModerationError> {
    let row = sqlx::query("SELECT 1 FROM categories WHERE category_id = ?")
        .bind(category_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage_error)?;

    match row {
        Some(_) => Ok(()),
        None => Err(ModerationError::InvalidForeignKey {
            entity: "category",
            id: category_id,
        }),
    }
}

async fn ensure_discussion(tx: &mut SqliteTx, discussion_id: i64) -> Result<(), ModerationError> {
    let row = sqlx::query("SELECT 1 FROM discussions WHERE discussion_id = ?")
        .bind(discussion_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage_error)?;

    match row {
        Some(_) => Ok(()),
        None => Err(ModerationError::InvalidForeignKey {
            entity: "discussion",
            id: discussion_id,
        }),
    }
}

/// The snapshot's own primary key, if that id is still free in `table`.
/// `None` lets SQLite assign a fresh one.
async fn reusable_id(
    tx: &mut SqliteTx,
    table: &str,
    column: &str,
    wanted: Option<i64>,
) -> Result<Option<i64>, ModerationError> {
    let Some(id) = wanted else {
        return Ok(None);
    };

    let taken = sqlx::query(&format!("SELECT 1 FROM {} WHERE {} = ?", table, column))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage_error)?;

    Ok(if taken.is_some() { None } else { Some(id) })
}

fn with_id(data: &RecordData, field: &str, record_id: i64) -> RecordData {
    let mut payload = data.clone();
    payload.insert(field.to_string(), Value::from(record_id));
    payload
}

// ============================================================================
// DISCUSSIONS
// ============================================================================

/// Natural key: Name + CategoryID + InsertUserID.
pub struct DiscussionRecords;

#[async_trait]
impl RecordHandler<SqliteTx> for DiscussionRecords {
    fn record_type(&self) -> &'static str {
        "Discussion"
    }

    fn record_id(&self, data: &RecordData) -> Option<i64> {
        optional_i64(data, "DiscussionID")
    }

    fn validate(&self, data: &RecordData) -> Result<(), ModerationError> {
        require_str(data, "Name")?;
        require_str(data, "Body")?;
        require_i64(data, "CategoryID")?;
        require_i64(data, "InsertUserID")?;
        validate_date(data)
    }

    fn natural_key(&self, data: &RecordData) -> Option<NaturalKey> {
        NaturalKey::from_fields(data, &["Name", "CategoryID", "InsertUserID"])
    }

    async fn find_existing(
        &self,
        tx: &mut SqliteTx,
        key: &NaturalKey,
    ) -> Result<Option<i64>, ModerationError> {
        let row = sqlx::query(
            r#"
            SELECT discussion_id FROM discussions
            WHERE name = ? AND category_id = ? AND insert_user_id = ?
            ORDER BY discussion_id
            LIMIT 1
            "#,
        )
        .bind(key.get_str("Name")?)
        .bind(key.get_i64("CategoryID")?)
        .bind(key.get_i64("InsertUserID")?)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage_error)?;

        Ok(row.map(|r| r.get::<i64, _>("discussion_id")))
    }

    async fn create(&self, tx: &mut SqliteTx, data: &RecordData) -> Result<i64, ModerationError> {
        let user_id = require_i64(data, "InsertUserID")?;
        let category_id = require_i64(data, "CategoryID")?;
        ensure_user(tx, user_id).await?;
        ensure_category(tx, category_id).await?;

        let id = reusable_id(tx, "discussions", "discussion_id", self.record_id(data)).await?;
        let inserted = date_inserted(data);

        let result = sqlx::query(
            r#"
            INSERT INTO discussions (
                discussion_id, category_id, name, body, format,
                insert_user_id, date_inserted, date_last_comment
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(category_id)
        .bind(require_str(data, "Name")?)
        .bind(require_str(data, "Body")?)
        .bind(optional_str(data, "Format").unwrap_or(DEFAULT_FORMAT))
        .bind(user_id)
        .bind(&inserted)
        .bind(&inserted)
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;

        Ok(result.last_insert_rowid())
    }

    async fn touch_parent_aggregate(
        &self,
        tx: &mut SqliteTx,
        record_id: i64,
    ) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            UPDATE categories
            SET count_discussions = (
                    SELECT COUNT(*) FROM discussions
                    WHERE discussions.category_id = categories.category_id
                ),
                last_discussion_id = ?,
                last_date_inserted = (
                    SELECT date_inserted FROM discussions WHERE discussion_id = ?
                )
            WHERE category_id = (SELECT category_id FROM discussions WHERE discussion_id = ?)
            "#,
        )
        .bind(record_id)
        .bind(record_id)
        .bind(record_id)
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    fn event_payload(&self, record_id: i64, data: &RecordData) -> RecordData {
        with_id(data, "DiscussionID", record_id)
    }
}

// ============================================================================
// COMMENTS
// ============================================================================

/// Natural key: DiscussionID + Body + InsertUserID.
pub struct CommentRecords;

#[async_trait]
impl RecordHandler<SqliteTx> for CommentRecords {
    fn record_type(&self) -> &'static str {
        "Comment"
    }

    fn record_id(&self, data: &RecordData) -> Option<i64> {
        optional_i64(data, "CommentID")
    }

    fn validate(&self, data: &RecordData) -> Result<(), ModerationError> {
        require_str(data, "Body")?;
        require_i64(data, "DiscussionID")?;
        require_i64(data, "InsertUserID")?;
        validate_date(data)
    }

    fn natural_key(&self, data: &RecordData) -> Option<NaturalKey> {
        NaturalKey::from_fields(data, &["DiscussionID", "Body", "InsertUserID"])
    }

    async fn find_existing(
        &self,
        tx: &mut SqliteTx,
        key: &NaturalKey,
    ) -> Result<Option<i64>, ModerationError> {
        let row = sqlx::query(
            r#"
            SELECT comment_id FROM comments
            WHERE discussion_id = ? AND body = ? AND insert_user_id = ?
            ORDER BY comment_id
            LIMIT 1
            "#,
        )
        .bind(key.get_i64("DiscussionID")?)
        .bind(key.get_str("Body")?)
        .bind(key.get_i64("InsertUserID")?)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage_error)?;

        Ok(row.map(|r| r.get::<i64, _>("comment_id")))
    }

    async fn create(&self, tx: &mut SqliteTx, data: &RecordData) -> Result<i64, ModerationError> {
        let discussion_id = require_i64(data, "DiscussionID")?;
        let user_id = require_i64(data, "InsertUserID")?;
        ensure_discussion(tx, discussion_id).await?;
        ensure_user(tx, user_id).await?;

        let id = reusable_id(tx, "comments", "comment_id", self.record_id(data)).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO comments (comment_id, discussion_id, body, format, insert_user_id, date_inserted)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(discussion_id)
        .bind(require_str(data, "Body")?)
        .bind(optional_str(data, "Format").unwrap_or(DEFAULT_FORMAT))
        .bind(user_id)
        .bind(date_inserted(data))
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;

        Ok(result.last_insert_rowid())
    }

    async fn touch_parent_aggregate(
        &self,
        tx: &mut SqliteTx,
        record_id: i64,
    ) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            UPDATE discussions
            SET count_comments = (
                    SELECT COUNT(*) FROM comments
                    WHERE comments.discussion_id = discussions.discussion_id
                ),
                last_comment_id = (
                    SELECT comment_id FROM comments
                    WHERE comments.discussion_id = discussions.discussion_id
                    ORDER BY date_inserted DESC, comment_id DESC
                    LIMIT 1
                ),
                date_last_comment = (
                    SELECT date_inserted FROM comments
                    WHERE comments.discussion_id = discussions.discussion_id
                    ORDER BY date_inserted DESC, comment_id DESC
                    LIMIT 1
                )
            WHERE discussion_id = (SELECT discussion_id FROM comments WHERE comment_id = ?)
            "#,
        )
        .bind(record_id)
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    fn event_payload(&self, record_id: i64, data: &RecordData) -> RecordData {
        with_id(data, "CommentID", record_id)
    }
}

// ============================================================================
// REGISTRATIONS
// ============================================================================

/// No natural key: every restored registration becomes a new user.
pub struct RegistrationRecords;

#[async_trait]
impl RecordHandler<SqliteTx> for RegistrationRecords {
    fn record_type(&self) -> &'static str {
        "Registration"
    }

    fn validate(&self, data: &RecordData) -> Result<(), ModerationError> {
        require_str(data, "Name")?;
        let email = require_str(data, "Email")?;
        if !email.contains('@') {
            return Err(ModerationError::ValidationFailed(format!(
                "Email '{}' is not a valid address",
                email
            )));
        }
        Ok(())
    }

    fn natural_key(&self, _data: &RecordData) -> Option<NaturalKey> {
        None
    }

    async fn find_existing(
        &self,
        _tx: &mut SqliteTx,
        _key: &NaturalKey,
    ) -> Result<Option<i64>, ModerationError> {
        Ok(None)
    }

    async fn create(&self, tx: &mut SqliteTx, data: &RecordData) -> Result<i64, ModerationError> {
        let result = sqlx::query("INSERT INTO users (name, email, date_inserted) VALUES (?, ?, ?)")
            .bind(require_str(data, "Name")?)
            .bind(require_str(data, "Email")?)
            .bind(date_inserted(data))
            .execute(&mut **tx)
            .await
            .map_err(storage_error)?;

        Ok(result.last_insert_rowid())
    }

    fn event_payload(&self, record_id: i64, data: &RecordData) -> RecordData {
        let mut payload = with_id(data, "UserID", record_id);
        payload.remove("Password");
        payload
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Privileged. Settings are upserted, so re-applying a snapshot is harmless;
/// every restore records a new revision.
pub struct ConfigurationRecords;

#[async_trait]
impl RecordHandler<SqliteTx> for ConfigurationRecords {
    fn record_type(&self) -> &'static str {
        "Configuration"
    }

    fn requires_privilege(&self) -> bool {
        true
    }

    fn validate(&self, data: &RecordData) -> Result<(), ModerationError> {
        if data.is_empty() {
            return Err(ModerationError::ValidationFailed(
                "Configuration snapshot is empty".to_string(),
            ));
        }
        Ok(())
    }

    fn natural_key(&self, _data: &RecordData) -> Option<NaturalKey> {
        None
    }

    async fn find_existing(
        &self,
        _tx: &mut SqliteTx,
        _key: &NaturalKey,
    ) -> Result<Option<i64>, ModerationError> {
        Ok(None)
    }

    async fn create(&self, tx: &mut SqliteTx, data: &RecordData) -> Result<i64, ModerationError> {
        for (name, value) in data {
            sqlx::query(
                r#"
                INSERT INTO config_settings (name, value) VALUES (?, ?)
                ON CONFLICT(name) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(name)
            .bind(value.to_string())
            .execute(&mut **tx)
            .await
            .map_err(storage_error)?;
        }

        let snapshot = serde_json::to_string(data)
            .map_err(|e| ModerationError::StorageError(e.to_string()))?;
        let result = sqlx::query("INSERT INTO config_revisions (data, applied_at) VALUES (?, ?)")
            .bind(snapshot)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut **tx)
            .await
            .map_err(storage_error)?;

        Ok(result.last_insert_rowid())
    }
}
