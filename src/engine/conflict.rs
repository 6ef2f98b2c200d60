use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Turn an untrusted `(start, end)` pair into a bookable span.
///
/// Ordering is checked first so that `start >= end` is always reported as
/// `InvalidInterval`, whatever the magnitudes involved.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = Span::checked(start, end).ok_or(EngineError::InvalidInterval { start, end })?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// Blocking reservations on `rs` that conflict with `span`, ordered by start.
/// `exclude` skips one reservation, used when an existing booking is moved.
pub fn conflicts_in(rs: &ResourceState, span: &Span, exclude: Option<Ulid>) -> Vec<ConflictInfo> {
    rs.conflicting(span)
        .filter(|r| Some(r.id) != exclude)
        .map(|r| ConflictInfo {
            reservation: r.clone(),
            resource_name: rs.resource.name.clone(),
            user_id: r.user_id,
        })
        .collect()
}

/// How many blocking reservations on `rs` conflict with `span`.
pub fn conflict_count(rs: &ResourceState, span: &Span) -> usize {
    rs.conflicting(span).count()
}

impl Engine {
    /// Read-only conflict scan. Same reservation set in, same answer out.
    pub async fn detect_conflicts(
        &self,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<Vec<ConflictInfo>, EngineError> {
        let span = validate_span(start, end)?;
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(conflicts_in(&guard, &span, exclude))
    }
}
