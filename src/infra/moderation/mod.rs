// Moderation infrastructure - SQLite storage, content handlers, collaborators.

pub mod event_sinks;
pub mod permissions;
pub mod sqlite_content_store;
pub mod sqlite_log_store;

#[cfg(test)]
pub mod test_support;

pub use event_sinks::TracingEventSink;
pub use permissions::SystemUserPermissions;
pub use sqlite_content_store::{content_registry, SqliteContentStore};
pub use sqlite_log_store::SqliteLogStore;
