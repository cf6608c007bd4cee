// Shared fixtures for storage-backed tests: a temporary SQLite database with
// every service wired the way the binary wires them, plus an event spy.

use super::sqlite_log_store::SqliteTx;
use super::{content_registry, SqliteContentStore, SqliteLogStore, SystemUserPermissions};
use crate::core::moderation::{
    EventEmitter, EventSink, LogService, ModerationConfig, ModerationState, PermissionChecker,
    RecordTypeRegistry, ResourceEvent, RestoreCoordinator,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Records every published event.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<ResourceEvent>>,
}

impl MemoryEventSink {
    pub async fn events(&self) -> Vec<ResourceEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, event: &ResourceEvent) -> Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

pub struct DiscussionRow {
    pub discussion_id: i64,
    pub date_last_comment: Option<String>,
    pub last_comment_id: Option<i64>,
    pub count_comments: i64,
}

pub struct CategoryRow {
    pub count_discussions: i64,
    pub last_discussion_id: Option<i64>,
}

/// Read-side queries over the live content tables.
pub struct ContentProbe {
    pool: Pool<Sqlite>,
}

impl ContentProbe {
    fn discussion_from_row(row: &sqlx::sqlite::SqliteRow) -> DiscussionRow {
        DiscussionRow {
            discussion_id: row.get("discussion_id"),
            date_last_comment: row.get("date_last_comment"),
            last_comment_id: row.get("last_comment_id"),
            count_comments: row.get("count_comments"),
        }
    }

    pub async fn discussion(&self, id: i64) -> Result<Option<DiscussionRow>> {
        let row = sqlx::query("SELECT * FROM discussions WHERE discussion_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::discussion_from_row))
    }

    pub async fn discussions_named(&self, name: &str) -> Result<Vec<DiscussionRow>> {
        let rows = sqlx::query("SELECT * FROM discussions WHERE name = ? ORDER BY discussion_id")
            .bind(name)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::discussion_from_row).collect())
    }

    pub async fn category(&self, id: i64) -> Result<Option<CategoryRow>> {
        let row = sqlx::query("SELECT * FROM categories WHERE category_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| CategoryRow {
            count_discussions: r.get("count_discussions"),
            last_discussion_id: r.get("last_discussion_id"),
        }))
    }

    pub async fn count_comments(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM comments")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn count_comments_with_id(&self, comment_id: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM comments WHERE comment_id = ?")
            .bind(comment_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn count_users_with_email(&self, email: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn setting(&self, name: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM config_settings WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(serde_json::from_str(&r.get::<String, _>("value"))?)),
            None => Ok(None),
        }
    }
}

pub struct TestHarness {
    // Keeps the database file alive for the duration of the test
    _dir: TempDir,
    pool: Pool<Sqlite>,
    pub log: Arc<LogService<SqliteLogStore>>,
    pub coordinator: RestoreCoordinator<SqliteLogStore>,
    pub permissions: Arc<dyn PermissionChecker>,
    pub events: Arc<MemoryEventSink>,
    pub state: Arc<ModerationState>,
    pub content: ContentProbe,
    config: ModerationConfig,
}

impl TestHarness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moderation.db");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .unwrap();

        let log_store = SqliteLogStore::new(pool.clone());
        log_store.migrate().await.unwrap();
        SqliteContentStore::new(pool.clone()).migrate().await.unwrap();

        let config = ModerationConfig {
            claim_timeout: Duration::from_millis(30),
            system_user_id: 1,
        };
        let log = Arc::new(LogService::new(
            Arc::new(log_store),
            Arc::new(content_registry()),
        ));
        let events = Arc::new(MemoryEventSink::default());
        let permissions: Arc<dyn PermissionChecker> =
            Arc::new(SystemUserPermissions::new(config.system_user_id));
        let state = Arc::new(ModerationState::new());
        let coordinator = RestoreCoordinator::new(
            Arc::clone(&log),
            EventEmitter::new().with_sink(events.clone()),
            Arc::clone(&permissions),
            Arc::clone(&state),
            config.clone(),
        );

        Self {
            _dir: dir,
            content: ContentProbe { pool: pool.clone() },
            pool,
            log,
            coordinator,
            permissions,
            events,
            state,
            config,
        }
    }

    /// Another coordinator over the same database, with its own registry,
    /// sinks and process state.
    pub fn coordinator_with(
        &self,
        registry: RecordTypeRegistry<SqliteTx>,
        events: EventEmitter,
    ) -> RestoreCoordinator<SqliteLogStore> {
        let log = Arc::new(LogService::new(
            Arc::new(SqliteLogStore::new(self.pool.clone())),
            Arc::new(registry),
        ));
        RestoreCoordinator::new(
            log,
            events,
            Arc::clone(&self.permissions),
            Arc::new(ModerationState::new()),
            self.config.clone(),
        )
    }

    pub async fn seed_user(&self, name: &str) -> i64 {
        sqlx::query("INSERT INTO users (name, email, date_inserted) VALUES (?, ?, ?)")
            .bind(name)
            .bind(format!("{}@example.com", name))
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .unwrap()
            .last_insert_rowid()
    }

    pub async fn seed_user_with_id(&self, id: i64, name: &str) {
        sqlx::query("INSERT INTO users (user_id, name, email, date_inserted) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(format!("{}@example.com", name))
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn seed_category(&self, id: i64) {
        sqlx::query("INSERT OR IGNORE INTO categories (category_id, name) VALUES (?, ?)")
            .bind(id)
            .bind(format!("Category {}", id))
            .execute(&self.pool)
            .await
            .unwrap();
    }

    /// Seeds the category too, if it is not there yet.
    pub async fn seed_discussion(&self, name: &str, category_id: i64, user_id: i64) -> i64 {
        self.seed_category(category_id).await;
        sqlx::query(
            r#"
            INSERT INTO discussions (category_id, name, body, insert_user_id, date_inserted)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(category_id)
        .bind(name)
        .bind(format!("{} body", name))
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    pub async fn seed_discussion_with_id(&self, id: i64, name: &str, category_id: i64, user_id: i64) {
        self.seed_category(category_id).await;
        sqlx::query(
            r#"
            INSERT INTO discussions (discussion_id, category_id, name, body, insert_user_id, date_inserted)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(category_id)
        .bind(name)
        .bind(format!("{} body", name))
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .unwrap();
    }
}
