use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_resource(&self, id: Ulid) -> Option<Resource> {
        let rs = self.resource_state(&id)?;
        let guard = rs.read().await;
        Some(guard.resource.clone())
    }

    /// Every resource matching the optional filters, oldest first.
    pub async fn list_resources(
        &self,
        category: Option<ResourceCategory>,
        status: Option<ResourceStatus>,
    ) -> Vec<Resource> {
        let mut out = Vec::new();
        for rs in self.all_resource_states() {
            let guard = rs.read().await;
            let r = &guard.resource;
            if category.is_none_or(|c| c == r.category) && status.is_none_or(|s| s == r.status) {
                out.push(r.clone());
            }
        }
        out.sort_by_key(|r| (r.created_at, r.id));
        out
    }

    /// All reservations on a resource, cancelled ones included, by start.
    pub async fn list_reservations(
        &self,
        resource_id: Ulid,
    ) -> Result<Vec<Reservation>, EngineError> {
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard.reservations.clone())
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let resource_id = *self.reservation_to_resource.get(&id)?.value();
        let rs = self.resource_state(&resource_id)?;
        let guard = rs.read().await;
        guard.reservation(id).cloned()
    }

    /// A user's reservations across every resource, by start then id.
    pub async fn list_user_reservations(&self, user_id: Ulid) -> Vec<Reservation> {
        let mut out = Vec::new();
        for rs in self.all_resource_states() {
            let guard = rs.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.user_id == user_id)
                    .cloned(),
            );
        }
        out.sort_by_key(|r| (r.span.start, r.id));
        out
    }
}
