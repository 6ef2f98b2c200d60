use std::fmt;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{ConflictInfo, Reservation};

const CHANNEL_CAPACITY: usize = 256;

/// A notification or audit sink refused or failed to take a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError(pub String);

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dispatch failed: {}", self.0)
    }
}

impl std::error::Error for DispatchError {}

/// Outbound booking messages. Delivery is best-effort: the engine logs and
/// counts failures but never undoes a booking because of them.
pub trait Notifier: Send + Sync {
    fn notify_confirmation(&self, reservation: &Reservation) -> Result<(), DispatchError>;

    /// `reservation` is the proposed booking that was turned down.
    fn notify_conflict(
        &self,
        reservation: &Reservation,
        conflicts: &[ConflictInfo],
    ) -> Result<(), DispatchError>;

    fn notify_status_change(&self, _reservation: &Reservation) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// Payload delivered to `LISTEN resource_<id>` subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Confirmation {
        reservation: Reservation,
    },
    ConflictWarning {
        reservation: Reservation,
        conflicting: Vec<Ulid>,
    },
    StatusChanged {
        reservation: Reservation,
    },
}

impl Notification {
    pub fn resource_id(&self) -> Ulid {
        match self {
            Notification::Confirmation { reservation }
            | Notification::ConflictWarning { reservation, .. }
            | Notification::StatusChanged { reservation } => reservation.resource_id,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Broadcast hub for LISTEN/NOTIFY per resource.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, notification: Notification) {
        if let Some(sender) = self.channels.get(&notification.resource_id()) {
            let _ = sender.send(notification);
        }
    }

    /// Drop a resource's channel (e.g. when the resource is deleted).
    pub fn remove(&self, resource_id: &Ulid) {
        self.channels.remove(resource_id);
    }
}

impl Notifier for NotifyHub {
    fn notify_confirmation(&self, reservation: &Reservation) -> Result<(), DispatchError> {
        self.send(Notification::Confirmation {
            reservation: reservation.clone(),
        });
        Ok(())
    }

    fn notify_conflict(
        &self,
        reservation: &Reservation,
        conflicts: &[ConflictInfo],
    ) -> Result<(), DispatchError> {
        self.send(Notification::ConflictWarning {
            reservation: reservation.clone(),
            conflicting: conflicts.iter().map(|c| c.reservation.id).collect(),
        });
        Ok(())
    }

    fn notify_status_change(&self, reservation: &Reservation) -> Result<(), DispatchError> {
        self.send(Notification::StatusChanged {
            reservation: reservation.clone(),
        });
        Ok(())
    }
}
