use std::fmt;

use ulid::Ulid;

use crate::notify::DispatchError;

/// Things the engine records in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    BookingCreated,
    BookingRejected,
    BookingRescheduled,
    StatusChanged,
    ResourceCreated,
    ResourceUpdated,
    ResourceDeleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::BookingCreated => "booking_created",
            AuditAction::BookingRejected => "booking_rejected",
            AuditAction::BookingRescheduled => "booking_rescheduled",
            AuditAction::StatusChanged => "status_changed",
            AuditAction::ResourceCreated => "resource_created",
            AuditAction::ResourceUpdated => "resource_updated",
            AuditAction::ResourceDeleted => "resource_deleted",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    /// Acting user. `None` for administrative calls made without a user context.
    pub user_id: Option<Ulid>,
    pub action: AuditAction,
    pub object_type: &'static str,
    pub object_id: Ulid,
    pub detail: String,
}

/// Append-only audit trail. Best-effort, like [`crate::notify::Notifier`].
pub trait AuditLog: Send + Sync {
    fn log_action(&self, entry: AuditEntry) -> Result<(), DispatchError>;
}

/// Writes audit entries as structured `tracing` events on target `audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn log_action(&self, entry: AuditEntry) -> Result<(), DispatchError> {
        let user = entry
            .user_id
            .map_or_else(|| "-".to_string(), |u| u.to_string());
        tracing::info!(
            target: "audit",
            user = %user,
            action = %entry.action,
            object_type = entry.object_type,
            object_id = %entry.object_id,
            "{}",
            entry.detail
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_labels() {
        assert_eq!(AuditAction::BookingCreated.to_string(), "booking_created");
        assert_eq!(AuditAction::BookingRejected.as_str(), "booking_rejected");
        assert_eq!(AuditAction::ResourceDeleted.as_str(), "resource_deleted");
    }

    #[test]
    fn tracing_audit_never_fails() {
        let log = TracingAuditLog;
        let entry = AuditEntry {
            user_id: None,
            action: AuditAction::ResourceCreated,
            object_type: "resource",
            object_id: Ulid::new(),
            detail: "Room A".into(),
        };
        assert!(log.log_action(entry).is_ok());
    }
}
