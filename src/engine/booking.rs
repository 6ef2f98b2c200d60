use dashmap::mapref::entry::Entry;

use crate::audit::{AuditAction, AuditEntry};
use crate::limits::MAX_RESERVATIONS_PER_RESOURCE;
use crate::model::*;
use crate::observability;

use super::conflict::{conflicts_in, validate_span};
use super::{Engine, EngineError, now_ms};

impl Engine {
    /// Book a resource, or explain why not.
    ///
    /// The conflict check and the write happen under the resource's write
    /// lock, so of several overlapping requests racing for one resource at
    /// most one is confirmed. The reservation id is claimed in the global
    /// index first, so an id is confirmed at most once across all resources. A conflict is answered with the clashing
    /// reservations and up to five conflict-free substitutes; nothing is
    /// written in that case.
    pub async fn book(&self, request: BookingRequest) -> Result<BookingOutcome, EngineError> {
        let span = validate_span(request.span.start, request.span.end)?;
        let initial = request.initiator.initial_status();

        let gate = self.commit_gate.read().await;
        let mut guard = self.lock_resource(request.resource_id).await?;
        if guard.resource.status != ResourceStatus::Available {
            return Err(EngineError::ResourceUnavailable {
                id: request.resource_id,
                status: guard.resource.status,
            });
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }
        // Ids are global: claim this one before any other resource can.
        match self.reservation_to_resource.entry(request.id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(request.id)),
            Entry::Vacant(slot) => {
                slot.insert(request.resource_id);
            }
        }

        let conflicts = conflicts_in(&guard, &span, None);
        if !conflicts.is_empty() {
            self.reservation_to_resource.remove(&request.id);
            let category = guard.resource.category;
            drop(guard);
            drop(gate);
            return Ok(self.reject(request, initial, conflicts, category).await);
        }

        let reservation = match self.create_reservation(&mut guard, &request, initial).await {
            Ok(reservation) => reservation,
            Err(e) => {
                self.reservation_to_resource.remove(&request.id);
                return Err(e);
            }
        };
        drop(guard);
        drop(gate);

        metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => "confirmed").increment(1);
        tracing::info!(
            "reservation {} on {} [{}, {}) {}",
            reservation.id,
            reservation.resource_id,
            span.start,
            span.end,
            reservation.status
        );
        self.dispatched("notifier", self.notifier.notify_confirmation(&reservation));
        self.audit(AuditEntry {
            user_id: Some(reservation.user_id),
            action: AuditAction::BookingCreated,
            object_type: "reservation",
            object_id: reservation.id,
            detail: format!(
                "resource {} [{}, {}) {}",
                reservation.resource_id, span.start, span.end, reservation.status
            ),
        });
        Ok(BookingOutcome::Confirmed(reservation))
    }

    /// Conflict path of `book`: runs with no locks held.
    async fn reject(
        &self,
        request: BookingRequest,
        initial: ReservationStatus,
        conflicts: Vec<ConflictInfo>,
        category: ResourceCategory,
    ) -> BookingOutcome {
        let alternatives = self
            .alternatives_for(request.resource_id, category, &request.span)
            .await;

        // Never stored; only describes what was asked for.
        let proposed = Reservation {
            id: request.id,
            event_id: request.event_id,
            resource_id: request.resource_id,
            user_id: request.user_id,
            span: request.span,
            status: initial,
            created_at: now_ms(),
        };

        metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => "conflict").increment(1);
        tracing::info!(
            "booking {} on {} rejected: {} conflict(s), {} alternative(s)",
            proposed.id,
            proposed.resource_id,
            conflicts.len(),
            alternatives.len()
        );
        self.dispatched("notifier", self.notifier.notify_conflict(&proposed, &conflicts));
        self.audit(AuditEntry {
            user_id: Some(proposed.user_id),
            action: AuditAction::BookingRejected,
            object_type: "reservation",
            object_id: proposed.id,
            detail: format!(
                "resource {} [{}, {}) conflicts with {} reservation(s)",
                proposed.resource_id,
                proposed.span.start,
                proposed.span.end,
                conflicts.len()
            ),
        });

        BookingOutcome::Conflict {
            conflicts,
            alternatives,
        }
    }
}
