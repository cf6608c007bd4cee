// This is the entry point of the moderation log tool.
//
// **Architecture Overview:**
// - `core/` = Business logic (storage-agnostic)
// - `infra/` = Implementations of core traits (SQLite stores, event sinks)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Parse the command line and run one administrator action

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::moderation::{
    EventEmitter, LogFilter, LogOperation, LogService, ModerationConfig, ModerationState,
    Pagination, RecordData, RestoreCoordinator,
};
use crate::infra::moderation::{
    content_registry, SqliteContentStore, SqliteLogStore, SystemUserPermissions, TracingEventSink,
};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_DATABASE_PATH: &str = "data/moderation.db";

#[derive(Parser)]
#[command(name = "moderation_restore", version, about = "Quarantine log and restore tool")]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "MODERATION_DATABASE_URL", default_value = DEFAULT_DATABASE_PATH)]
    database: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Quarantine a record snapshot
    Insert {
        /// Spam, Pending, Delete, Edit or Moderate
        operation: LogOperation,
        record_type: String,
        /// Snapshot as a JSON object
        data: String,
        #[arg(long)]
        user: i64,
        /// Merge into an existing entry for the same live record
        #[arg(long)]
        grouped: bool,
    },
    /// Show one log entry
    Show { id: i64 },
    /// List log entries, oldest first
    List {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Count log entries
    Count {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Restore log entries back into live records
    Restore {
        #[arg(long)]
        user: i64,
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Drop a single log entry
    Delete { id: i64 },
    /// Drop log entries without restoring them
    Discard {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Log entries for one record type, optionally one live record
    Record {
        record_type: String,
        #[arg(long)]
        record_id: Option<i64>,
        #[arg(long)]
        user: i64,
    },
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long = "id")]
    ids: Vec<i64>,
    #[arg(long)]
    record_type: Option<String>,
    #[arg(long)]
    record_id: Option<i64>,
    #[arg(long)]
    operation: Option<LogOperation>,
    /// Snapshot field match, NAME=VALUE (VALUE parsed as JSON when possible)
    #[arg(long = "field", value_parser = parse_field)]
    fields: Vec<(String, Value)>,
}

impl FilterArgs {
    fn into_filter(self) -> LogFilter {
        let mut filter = LogFilter::new();
        for id in self.ids {
            filter = filter.id(id);
        }
        if let Some(record_type) = self.record_type {
            filter = filter.record_type(record_type);
        }
        if let Some(record_id) = self.record_id {
            filter = filter.record_id(record_id);
        }
        if let Some(operation) = self.operation {
            filter = filter.operation(operation);
        }
        for (name, value) in self.fields {
            filter = filter.field(name, value);
        }
        filter
    }
}

fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

/// Read engine settings from the environment, falling back to defaults.
fn load_config() -> anyhow::Result<ModerationConfig> {
    let mut config = ModerationConfig::default();

    if let Ok(raw) = std::env::var("MODERATION_CLAIM_TIMEOUT_MS") {
        let ms: u64 = raw
            .parse()
            .with_context(|| format!("MODERATION_CLAIM_TIMEOUT_MS is not a number: {}", raw))?;
        config.claim_timeout = Duration::from_millis(ms);
    }
    if let Ok(raw) = std::env::var("MODERATION_SYSTEM_USER_ID") {
        config.system_user_id = raw
            .parse()
            .with_context(|| format!("MODERATION_SYSTEM_USER_ID is not a number: {}", raw))?;
    }

    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config()?;

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    if let Some(dir) = Path::new(&cli.database).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        }
    }

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite://{}?mode=rwc", cli.database))
        .await
        .context("Failed to connect to moderation DB")?;

    let log_store = SqliteLogStore::new(pool.clone());
    log_store
        .migrate()
        .await
        .context("Failed to migrate moderation log")?;
    SqliteContentStore::new(pool)
        .migrate()
        .await
        .context("Failed to migrate content tables")?;

    let registry = content_registry();
    tracing::debug!(record_types = ?registry.record_types(), "Registered record types");

    let log_service = Arc::new(LogService::new(Arc::new(log_store), Arc::new(registry)));
    let permissions = Arc::new(SystemUserPermissions::new(config.system_user_id));
    let state = Arc::new(ModerationState::new());
    let events = EventEmitter::new().with_sink(Arc::new(TracingEventSink));
    let coordinator = RestoreCoordinator::new(
        Arc::clone(&log_service),
        events,
        permissions.clone(),
        Arc::clone(&state),
        config,
    );

    match cli.command {
        Command::Insert {
            operation,
            record_type,
            data,
            user,
            grouped,
        } => {
            let data: RecordData =
                serde_json::from_str(&data).context("Snapshot must be a JSON object")?;
            let id = if grouped {
                log_service
                    .insert_grouped(operation, &record_type, data, user)
                    .await?
            } else {
                log_service.insert(operation, &record_type, data, user).await?
            };
            print_json(&json!({ "id": id }))?;
        }
        Command::Show { id } => match log_service.get(id).await? {
            Some(entry) => print_json(&entry)?,
            None => bail!("No log entry found for ID: {}", id),
        },
        Command::List {
            filter,
            offset,
            limit,
        } => {
            let entries = log_service
                .list(&filter.into_filter(), Pagination::new(offset, limit))
                .await?;
            print_json(&entries)?;
        }
        Command::Count { filter } => {
            let count = log_service.count(&filter.into_filter()).await?;
            print_json(&json!({ "count": count }))?;
        }
        Command::Restore { user, ids } => {
            let report = coordinator.restore(&ids, user).await;
            tracing::info!(
                restored = state.stats.restored(),
                failed = state.stats.failed(),
                "Restore batch finished"
            );
            print_json(&report)?;
            if !report.is_complete() {
                std::process::exit(1);
            }
        }
        Command::Delete { id } => {
            log_service.delete(id).await?;
            print_json(&json!({ "deleted": id }))?;
        }
        Command::Discard { ids } => {
            let removed = log_service.discard(&ids).await?;
            print_json(&json!({ "removed": removed }))?;
        }
        Command::Record {
            record_type,
            record_id,
            user,
        } => {
            let entries = log_service
                .entries_for_record(&record_type, record_id, user, permissions.as_ref())
                .await?;
            print_json(&entries)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_reads_json_values() {
        assert_eq!(
            parse_field("DiscussionID=20").unwrap(),
            ("DiscussionID".to_string(), json!(20))
        );
        assert_eq!(
            parse_field("Name=hello").unwrap(),
            ("Name".to_string(), json!("hello"))
        );
        assert!(parse_field("missing").is_err());
    }

    #[test]
    fn test_filter_args_build_filter() {
        let args = FilterArgs {
            ids: vec![1, 2],
            record_type: Some("comment".to_string()),
            record_id: None,
            operation: Some(LogOperation::Spam),
            fields: vec![("Body".to_string(), json!("x"))],
        };
        let filter = args.into_filter();
        assert_eq!(filter.ids, vec![1, 2]);
        assert_eq!(filter.record_type.as_deref(), Some("comment"));
        assert_eq!(filter.operation, Some(LogOperation::Spam));
        assert_eq!(filter.fields.len(), 1);
    }
}
