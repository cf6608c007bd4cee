// Core moderation module - the quarantine log and the restore engine.
// Following the same pattern as the other core modules: models, ports, services.

pub mod duplicate_guard;
pub mod moderation_models;
pub mod moderation_service;
pub mod record_types;
pub mod resource_events;
pub mod restore_claims;
pub mod restore_service;

pub use moderation_models::*;
pub use moderation_service::*;
pub use record_types::*;
pub use resource_events::*;
pub use restore_claims::*;
pub use restore_service::*;
