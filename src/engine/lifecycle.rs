use ulid::Ulid;

use crate::audit::{AuditAction, AuditEntry};
use crate::model::*;
use crate::observability;

use super::conflict::{conflicts_in, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Persist a new reservation on the locked resource. The caller has
    /// already run the conflict check under the same lock.
    pub(super) async fn create_reservation(
        &self,
        rs: &mut ResourceState,
        request: &BookingRequest,
        initial: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        if !initial.is_blocking() {
            return Err(EngineError::InvalidInitialStatus(initial));
        }
        let reservation = Reservation {
            id: request.id,
            event_id: request.event_id,
            resource_id: request.resource_id,
            user_id: request.user_id,
            span: request.span,
            status: initial,
            created_at: self.next_stamp(),
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(rs, &event).await?;
        Ok(reservation)
    }

    /// Move a reservation along the lifecycle table.
    pub async fn transition(
        &self,
        id: Ulid,
        to: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let gate = self.commit_gate.read().await;
        let mut guard = self.lock_reservation(id).await?;
        let current = guard
            .reservation(id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))?;
        let from = current.status;
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition { id, from, to });
        }

        let event = Event::ReservationStatusChanged {
            id,
            resource_id: current.resource_id,
            status: to,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);
        drop(gate);

        let updated = Reservation { status: to, ..current };
        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        tracing::info!("reservation {id}: {from} -> {to}");
        self.dispatched("notifier", self.notifier.notify_status_change(&updated));
        self.audit(AuditEntry {
            user_id: None,
            action: AuditAction::StatusChanged,
            object_type: "reservation",
            object_id: id,
            detail: format!("{from} -> {to}"),
        });
        Ok(updated)
    }

    /// Cancel a reservation; its interval is free for the next booking at once.
    pub async fn cancel(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.transition(id, ReservationStatus::Cancelled).await
    }

    /// Move a live reservation to `[start, end)`, checked against every other
    /// blocking reservation on its resource.
    pub async fn reschedule(
        &self,
        id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<BookingOutcome, EngineError> {
        let span = validate_span(start, end)?;
        let gate = self.commit_gate.read().await;
        let mut guard = self.lock_reservation(id).await?;
        let current = guard
            .reservation(id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))?;
        if !current.is_blocking() {
            return Err(EngineError::ReservationCancelled(id));
        }
        if guard.resource.status != ResourceStatus::Available {
            return Err(EngineError::ResourceUnavailable {
                id: current.resource_id,
                status: guard.resource.status,
            });
        }

        let proposed = Reservation { span, ..current };
        let conflicts = conflicts_in(&guard, &span, Some(id));
        if !conflicts.is_empty() {
            let category = guard.resource.category;
            drop(guard);
            drop(gate);
            let alternatives = self
                .alternatives_for(proposed.resource_id, category, &span)
                .await;
            metrics::counter!(observability::RESCHEDULES_TOTAL, "outcome" => "conflict")
                .increment(1);
            tracing::info!(
                "reschedule of {id} rejected: {} conflict(s), {} alternative(s)",
                conflicts.len(),
                alternatives.len()
            );
            self.dispatched("notifier", self.notifier.notify_conflict(&proposed, &conflicts));
            self.audit(AuditEntry {
                user_id: Some(proposed.user_id),
                action: AuditAction::BookingRejected,
                object_type: "reservation",
                object_id: id,
                detail: format!(
                    "reschedule to [{start}, {end}) conflicts with {} reservation(s)",
                    conflicts.len()
                ),
            });
            return Ok(BookingOutcome::Conflict {
                conflicts,
                alternatives,
            });
        }

        let event = Event::ReservationRescheduled {
            id,
            resource_id: proposed.resource_id,
            span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);
        drop(gate);

        metrics::counter!(observability::RESCHEDULES_TOTAL, "outcome" => "confirmed").increment(1);
        tracing::info!("reservation {id} moved to [{start}, {end})");
        self.dispatched("notifier", self.notifier.notify_confirmation(&proposed));
        self.audit(AuditEntry {
            user_id: Some(proposed.user_id),
            action: AuditAction::BookingRescheduled,
            object_type: "reservation",
            object_id: id,
            detail: format!("[{start}, {end})"),
        });
        Ok(BookingOutcome::Confirmed(proposed))
    }
}
