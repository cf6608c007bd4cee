// SQLite-backed moderation log store.
//
// Tables:
// - moderation_log: the quarantine queue, one row per log entry
//
// `id` is INTEGER PRIMARY KEY AUTOINCREMENT, so SQLite never hands out an id
// twice, even after the newest rows are deleted.

use crate::core::moderation::{
    LogEntry, LogFilter, LogStore, ModerationError, NewLogEntry, Pagination, RecordData,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, QueryBuilder, Row, Sqlite, Transaction};

/// Transaction a restore unit runs in.
pub type SqliteTx = Transaction<'static, Sqlite>;

pub(super) fn storage_error(e: sqlx::Error) -> ModerationError {
    ModerationError::StorageError(e.to_string())
}

pub struct SqliteLogStore {
    pool: Pool<Sqlite>,
}

impl SqliteLogStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moderation_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                operation TEXT NOT NULL,
                record_type TEXT NOT NULL,
                record_id INTEGER,
                data TEXT NOT NULL,
                insert_user_id INTEGER NOT NULL,
                inserted_at TEXT NOT NULL,
                count_group INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_moderation_log_record
                ON moderation_log(record_type, record_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<LogEntry, ModerationError> {
    let operation: String = row.get("operation");
    let operation = operation.parse().map_err(ModerationError::StorageError)?;

    let data: String = row.get("data");
    let data: RecordData = serde_json::from_str(&data)
        .map_err(|e| ModerationError::StorageError(format!("corrupt snapshot: {}", e)))?;

    let inserted_at: String = row.get("inserted_at");
    let inserted_at = DateTime::parse_from_rfc3339(&inserted_at)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(LogEntry {
        id: row.get("id"),
        operation,
        record_type: row.get("record_type"),
        record_id: row.get("record_id"),
        data,
        insert_user_id: row.get("insert_user_id"),
        inserted_at,
        count_group: row.get::<i64, _>("count_group") as u32,
    })
}

fn snapshot_json(data: &RecordData) -> Result<String, ModerationError> {
    serde_json::to_string(data).map_err(|e| ModerationError::StorageError(e.to_string()))
}

// Appends `WHERE ...` for the filter. Snapshot fields are compared through
// json_extract, so `{"DiscussionID": 20}` matches the number 20, not "20".
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &LogFilter) -> Result<(), ModerationError> {
    qb.push(" WHERE 1 = 1");

    if !filter.ids.is_empty() {
        qb.push(" AND id IN (");
        let mut ids = qb.separated(", ");
        for id in &filter.ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");
    }
    if let Some(record_type) = &filter.record_type {
        qb.push(" AND record_type = ").push_bind(record_type.clone());
    }
    if let Some(record_id) = filter.record_id {
        qb.push(" AND record_id = ").push_bind(record_id);
    }
    if let Some(operation) = filter.operation {
        qb.push(" AND operation = ").push_bind(operation.as_str());
    }
    for (field, value) in &filter.fields {
        if field.is_empty() || field.contains('"') || field.contains('\\') {
            return Err(ModerationError::InvalidFilter(format!(
                "unsupported field name '{}'",
                field
            )));
        }
        qb.push(" AND json_extract(data, ")
            .push_bind(format!("$.\"{}\"", field))
            .push(") IS json_extract(")
            .push_bind(value.to_string())
            .push(", '$')");
    }

    Ok(())
}

#[async_trait]
impl LogStore for SqliteLogStore {
    type Tx = SqliteTx;

    async fn insert(&self, entry: NewLogEntry) -> Result<i64, ModerationError> {
        let data = snapshot_json(&entry.data)?;
        let result = sqlx::query(
            r#"
            INSERT INTO moderation_log
                (operation, record_type, record_id, data, insert_user_id, inserted_at, count_group)
            VALUES (?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(entry.operation.as_str())
        .bind(&entry.record_type)
        .bind(entry.record_id)
        .bind(data)
        .bind(entry.insert_user_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.last_insert_rowid())
    }

    async fn insert_grouped(&self, entry: NewLogEntry) -> Result<i64, ModerationError> {
        let data = snapshot_json(&entry.data)?;
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let existing = sqlx::query(
            r#"
            SELECT id FROM moderation_log
            WHERE operation = ? AND record_type = ? AND record_id = ?
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(entry.operation.as_str())
        .bind(&entry.record_type)
        .bind(entry.record_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?;

        let id = if let Some(row) = existing {
            let id: i64 = row.get("id");
            sqlx::query(
                "UPDATE moderation_log SET count_group = count_group + 1, data = ? WHERE id = ?",
            )
            .bind(data)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
            id
        } else {
            sqlx::query(
                r#"
                INSERT INTO moderation_log
                    (operation, record_type, record_id, data, insert_user_id, inserted_at, count_group)
                VALUES (?, ?, ?, ?, ?, ?, 1)
                "#,
            )
            .bind(entry.operation.as_str())
            .bind(&entry.record_type)
            .bind(entry.record_id)
            .bind(data)
            .bind(entry.insert_user_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?
            .last_insert_rowid()
        };

        tx.commit().await.map_err(storage_error)?;
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<LogEntry>, ModerationError> {
        let row = sqlx::query("SELECT * FROM moderation_log WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn list(
        &self,
        filter: &LogFilter,
        page: Pagination,
    ) -> Result<Vec<LogEntry>, ModerationError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM moderation_log");
        push_filter(&mut qb, filter)?;
        qb.push(" ORDER BY id ASC LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(page.offset));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn count(&self, filter: &LogFilter) -> Result<u64, ModerationError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM moderation_log");
        push_filter(&mut qb, filter)?;

        let row = qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn delete(&self, id: i64) -> Result<bool, ModerationError> {
        let result = sqlx::query("DELETE FROM moderation_log WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn begin(&self) -> Result<SqliteTx, ModerationError> {
        self.pool.begin().await.map_err(storage_error)
    }

    async fn commit(&self, tx: SqliteTx) -> Result<(), ModerationError> {
        tx.commit().await.map_err(storage_error)
    }

    async fn load_in(
        &self,
        tx: &mut SqliteTx,
        id: i64,
    ) -> Result<Option<LogEntry>, ModerationError> {
        let row = sqlx::query("SELECT * FROM moderation_log WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(storage_error)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn attach_record_id_in(
        &self,
        tx: &mut SqliteTx,
        id: i64,
        record_id: i64,
    ) -> Result<(), ModerationError> {
        sqlx::query("UPDATE moderation_log SET record_id = ? WHERE id = ?")
            .bind(record_id)
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn delete_in(&self, tx: &mut SqliteTx, id: i64) -> Result<(), ModerationError> {
        sqlx::query("DELETE FROM moderation_log WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}
