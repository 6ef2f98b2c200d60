use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::audit::{AuditAction, AuditEntry};
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

fn validate_fields(
    name: Option<&str>,
    location: Option<&str>,
    attributes: Option<&BTreeMap<String, String>>,
) -> Result<(), EngineError> {
    if name.is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    if location.is_some_and(|l| l.len() > MAX_LOCATION_LEN) {
        return Err(EngineError::LimitExceeded("resource location too long"));
    }
    if let Some(attributes) = attributes {
        if attributes.len() > MAX_ATTRIBUTES {
            return Err(EngineError::LimitExceeded("too many attributes"));
        }
        if attributes
            .iter()
            .any(|(k, v)| k.len() > MAX_ATTRIBUTE_LEN || v.len() > MAX_ATTRIBUTE_LEN)
        {
            return Err(EngineError::LimitExceeded("attribute too long"));
        }
    }
    Ok(())
}

impl Engine {
    pub async fn create_resource(&self, new: NewResource) -> Result<Resource, EngineError> {
        validate_fields(
            Some(&new.name),
            new.location.as_deref(),
            Some(&new.attributes),
        )?;
        let _gate = self.commit_gate.read().await;
        if self.state.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }

        let resource = Resource {
            id: new.id,
            name: new.name,
            category: new.category,
            capacity: new.capacity,
            location: new.location,
            status: new.status,
            attributes: new.attributes,
            created_at: self.next_stamp(),
        };
        let shared = Arc::new(RwLock::new(ResourceState::new(resource.clone())));
        // Held until the record is durable: bookings on the new id wait here
        // and observe the removal if the append fails.
        let guard = shared.clone().write_owned().await;
        match self.state.entry(resource.id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(resource.id)),
            Entry::Vacant(slot) => {
                slot.insert(shared.clone());
            }
        }

        let event = Event::ResourceCreated {
            resource: resource.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.state
                .remove_if(&resource.id, |_, current| Arc::ptr_eq(current, &shared));
            return Err(e);
        }
        drop(guard);

        tracing::info!(
            "resource {} created: {} ({})",
            resource.id,
            resource.name,
            resource.category
        );
        self.audit(AuditEntry {
            user_id: None,
            action: AuditAction::ResourceCreated,
            object_type: "resource",
            object_id: resource.id,
            detail: format!("{} {}", resource.category, resource.name),
        });
        Ok(resource)
    }

    /// Apply a partial update. An empty patch returns the resource unchanged
    /// without writing anything.
    pub async fn update_resource(
        &self,
        id: Ulid,
        patch: ResourcePatch,
    ) -> Result<Resource, EngineError> {
        validate_fields(
            patch.name.as_deref(),
            patch.location.as_ref().and_then(|l| l.as_deref()),
            patch.attributes.as_ref(),
        )?;
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_resource(id).await?;
        if patch.is_empty() {
            return Ok(guard.resource.clone());
        }

        let mut resource = guard.resource.clone();
        patch.apply(&mut resource);
        let event = Event::ResourceUpdated {
            resource: resource.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        tracing::info!("resource {id} updated, status {}", resource.status);
        self.audit(AuditEntry {
            user_id: None,
            action: AuditAction::ResourceUpdated,
            object_type: "resource",
            object_id: id,
            detail: format!("{} {}", resource.name, resource.status),
        });
        Ok(resource)
    }

    /// Remove a resource that no longer holds any PENDING or CONFIRMED booking.
    pub async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let guard = self.lock_resource(id).await?;
        if guard.blocking_count() > 0 {
            return Err(EngineError::HasActiveReservations(id));
        }

        let event = Event::ResourceDeleted { id };
        self.wal_append(&event).await?;
        // Still holding the write lock: waiters re-check the map and see it gone.
        self.state.remove(&id);
        for r in &guard.reservations {
            self.reservation_to_resource.remove(&r.id);
        }
        drop(guard);
        self.notify.remove(&id);

        tracing::info!("resource {id} deleted");
        self.audit(AuditEntry {
            user_id: None,
            action: AuditAction::ResourceDeleted,
            object_type: "resource",
            object_id: id,
            detail: String::new(),
        });
        Ok(())
    }
}
