// Permission collaborator: only the configured system user may restore
// privileged record types.

use crate::core::moderation::PermissionChecker;
use async_trait::async_trait;

pub struct SystemUserPermissions {
    system_user_id: i64,
}

impl SystemUserPermissions {
    pub fn new(system_user_id: i64) -> Self {
        Self { system_user_id }
    }
}

#[async_trait]
impl PermissionChecker for SystemUserPermissions {
    async fn can_restore(&self, acting_user_id: i64, record_type: &str) -> bool {
        let allowed = acting_user_id == self.system_user_id;
        if !allowed {
            tracing::debug!(
                user_id = acting_user_id,
                record_type,
                "Privileged restore denied"
            );
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_system_user_is_allowed() {
        let permissions = SystemUserPermissions::new(1);
        assert!(permissions.can_restore(1, "Configuration").await);
        assert!(!permissions.can_restore(2, "Configuration").await);
    }
}
