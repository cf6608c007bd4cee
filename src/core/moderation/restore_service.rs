// Restore coordinator - turns quarantined log entries back into live records.
//
// Per id, as one independent unit:
//   claim -> load -> permission -> validate -> find-or-create
//   -> attach record id -> parent aggregate -> delete entry -> commit -> event
//
// A failure anywhere before commit drops the transaction, so the log entry
// stays exactly as it was and no partial record is left behind.

use super::duplicate_guard::DuplicateGuard;
use super::moderation_models::{
    ModerationConfig, ResourceEvent, RestoreFailure, RestoreOutcome, RestoreReport,
};
use super::moderation_service::{LogService, LogStore, ModerationError};
use super::record_types::PermissionChecker;
use super::resource_events::EventEmitter;
use super::restore_claims::ModerationState;
use std::collections::HashSet;
use std::sync::Arc;

pub struct RestoreCoordinator<S: LogStore> {
    log: Arc<LogService<S>>,
    guard: DuplicateGuard,
    events: EventEmitter,
    permissions: Arc<dyn PermissionChecker>,
    state: Arc<ModerationState>,
    config: ModerationConfig,
}

impl<S: LogStore> RestoreCoordinator<S> {
    pub fn new(
        log: Arc<LogService<S>>,
        events: EventEmitter,
        permissions: Arc<dyn PermissionChecker>,
        state: Arc<ModerationState>,
        config: ModerationConfig,
    ) -> Self {
        Self {
            log,
            guard: DuplicateGuard::new(),
            events,
            permissions,
            state,
            config,
        }
    }

    /// Restore a batch of log entries on behalf of `acting_user_id`.
    ///
    /// Ids are processed one at a time, in the order given (repeats are
    /// ignored). A failing id is reported and the batch moves on.
    pub async fn restore(&self, ids: &[i64], acting_user_id: i64) -> RestoreReport {
        let mut report = RestoreReport::default();
        let mut seen = HashSet::new();

        for &id in ids {
            if !seen.insert(id) {
                continue;
            }

            match self.restore_one(id, acting_user_id).await {
                Ok(outcome) => {
                    self.state.stats.record_restored();
                    tracing::info!(
                        log_id = id,
                        record_id = outcome.record_id,
                        created = outcome.created,
                        user_id = acting_user_id,
                        "Restored log entry"
                    );
                    report.restored.push(id);
                }
                Err(e) => {
                    self.state.stats.record_failed();
                    tracing::warn!(log_id = id, user_id = acting_user_id, "Restore failed: {}", e);
                    report.failed.push(RestoreFailure {
                        id,
                        reason: e.reason(),
                        message: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Restore a single log entry.
    pub async fn restore_one(
        &self,
        id: i64,
        acting_user_id: i64,
    ) -> Result<RestoreOutcome, ModerationError> {
        let _claim = self.state.claims.claim(id, self.config.claim_timeout).await?;

        let store = self.log.store();
        let mut tx = store.begin().await?;

        let entry = store
            .load_in(&mut tx, id)
            .await?
            .ok_or(ModerationError::NotFound(id))?;

        let handler = self.log.registry().resolve(&entry.record_type)?;

        if handler.requires_privilege()
            && !self
                .permissions
                .can_restore(acting_user_id, handler.record_type())
                .await
        {
            return Err(ModerationError::PermissionDenied {
                user_id: acting_user_id,
                record_type: handler.record_type().to_string(),
            });
        }

        handler.validate(&entry.data)?;

        let (record_id, created) = match self
            .guard
            .check(handler.as_ref(), &mut tx, &entry.data)
            .await?
        {
            Some(existing) => (existing, false),
            None => (handler.create(&mut tx, &entry.data).await?, true),
        };

        store.attach_record_id_in(&mut tx, id, record_id).await?;
        handler.touch_parent_aggregate(&mut tx, record_id).await?;
        store.delete_in(&mut tx, id).await?;
        store.commit(tx).await?;

        if created {
            let payload = handler.event_payload(record_id, &entry.data);
            let event = ResourceEvent::created(handler.record_type(), record_id, payload);
            self.events.publish(&event).await;
        }

        Ok(RestoreOutcome {
            record_id,
            created,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
