use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// A reservation's occupied time, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span from untrusted input. `None` unless `start < end`.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Booking conflict rule between a requested span (`self`) and an existing one.
    ///
    /// Three clauses, any of which is a conflict:
    /// - the spans genuinely overlap,
    /// - the existing start falls inside `[start, end]`,
    /// - the existing end falls inside `[start, end]`.
    ///
    /// Spans that merely touch (`existing.end == start` or `existing.start == end`)
    /// are conflicts. Do not reduce this to the half-open two-clause test.
    pub fn conflicts_with(&self, existing: &Span) -> bool {
        let overlap = existing.start < self.end && existing.end > self.start;
        let start_inside = self.start <= existing.start && existing.start <= self.end;
        let end_inside = self.start <= existing.end && existing.end <= self.end;
        overlap || start_inside || end_inside
    }
}

// ── Resources ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceCategory {
    Room,
    Equipment,
    Vehicle,
}

impl ResourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCategory::Room => "ROOM",
            ResourceCategory::Equipment => "EQUIPMENT",
            ResourceCategory::Vehicle => "VEHICLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Available,
    Unavailable,
    Maintenance,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Available => "AVAILABLE",
            ResourceStatus::Unavailable => "UNAVAILABLE",
            ResourceStatus::Maintenance => "MAINTENANCE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: String,
    pub category: ResourceCategory,
    pub capacity: u32,
    pub location: Option<String>,
    pub status: ResourceStatus,
    pub attributes: BTreeMap<String, String>,
    pub created_at: Ms,
}

/// Input for creating a resource. `created_at` is stamped by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResource {
    pub id: Ulid,
    pub name: String,
    pub category: ResourceCategory,
    pub capacity: u32,
    pub location: Option<String>,
    pub status: ResourceStatus,
    pub attributes: BTreeMap<String, String>,
}

impl NewResource {
    pub fn new(id: Ulid, name: impl Into<String>, category: ResourceCategory) -> Self {
        Self {
            id,
            name: name.into(),
            category,
            capacity: 1,
            location: None,
            status: ResourceStatus::Available,
            attributes: BTreeMap::new(),
        }
    }
}

/// Partial update of a resource. Category is deliberately absent: it never changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePatch {
    pub name: Option<String>,
    pub capacity: Option<u32>,
    pub location: Option<Option<String>>,
    pub status: Option<ResourceStatus>,
    pub attributes: Option<BTreeMap<String, String>>,
}

impl ResourcePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.capacity.is_none()
            && self.location.is_none()
            && self.status.is_none()
            && self.attributes.is_none()
    }

    pub fn apply(&self, resource: &mut Resource) {
        if let Some(name) = &self.name {
            resource.name = name.clone();
        }
        if let Some(capacity) = self.capacity {
            resource.capacity = capacity;
        }
        if let Some(location) = &self.location {
            resource.location = location.clone();
        }
        if let Some(status) = self.status {
            resource.status = status;
        }
        if let Some(attributes) = &self.attributes {
            resource.attributes = attributes.clone();
        }
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 3] = [
        ReservationStatus::Pending,
        ReservationStatus::Confirmed,
        ReservationStatus::Cancelled,
    ];

    /// Allowed lifecycle edges. CANCELLED is terminal; self-edges are not transitions.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }

    /// Pending and confirmed reservations hold their interval; cancelled ones never do.
    pub fn is_blocking(self) -> bool {
        !matches!(self, ReservationStatus::Cancelled)
    }

    pub fn is_terminal(self) -> bool {
        ReservationStatus::ALL
            .iter()
            .all(|next| !self.can_transition_to(*next))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Who asked for a booking. Decides the initial lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Initiator {
    /// Self-service booking; starts out PENDING.
    #[default]
    Client,
    /// Booked on someone's behalf by a manager; starts out CONFIRMED.
    Manager,
}

impl Initiator {
    pub fn initial_status(self) -> ReservationStatus {
        match self {
            Initiator::Client => ReservationStatus::Pending,
            Initiator::Manager => ReservationStatus::Confirmed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub event_id: Option<Ulid>,
    pub resource_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
    pub created_at: Ms,
}

impl Reservation {
    pub fn is_blocking(&self) -> bool {
        self.status.is_blocking()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub event_id: Option<Ulid>,
    pub initiator: Initiator,
}

impl BookingRequest {
    pub fn new(id: Ulid, resource_id: Ulid, user_id: Ulid, span: Span) -> Self {
        Self {
            id,
            resource_id,
            user_id,
            span,
            event_id: None,
            initiator: Initiator::Client,
        }
    }

    pub fn with_event(mut self, event_id: Ulid) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn by_manager(mut self) -> Self {
        self.initiator = Initiator::Manager;
        self
    }
}

/// An existing reservation standing in the way of a request, with enough
/// context to report it back to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictInfo {
    pub reservation: Reservation,
    pub resource_name: String,
    pub user_id: Ulid,
}

/// Result of a booking attempt. A conflict is a normal answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Confirmed(Reservation),
    Conflict {
        conflicts: Vec<ConflictInfo>,
        alternatives: Vec<Resource>,
    },
}

impl BookingOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, BookingOutcome::Confirmed(_))
    }

    pub fn reservation(&self) -> Option<&Reservation> {
        match self {
            BookingOutcome::Confirmed(r) => Some(r),
            BookingOutcome::Conflict { .. } => None,
        }
    }
}

// ── Per-resource state ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: Resource,
    /// Every reservation ever made on this resource, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl ResourceState {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn set_status(&mut self, id: Ulid, status: ReservationStatus) -> bool {
        match self.reservations.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                r.status = status;
                true
            }
            None => false,
        }
    }

    pub fn blocking_count(&self) -> usize {
        self.reservations.iter().filter(|r| r.is_blocking()).count()
    }

    /// Blocking reservations that conflict with `query` under [`Span::conflicts_with`].
    ///
    /// Binary search skips everything starting after `query.end`; the closed
    /// bound matches the boundary-touch rule.
    pub fn conflicting<'a>(&'a self, query: &'a Span) -> impl Iterator<Item = &'a Reservation> + 'a {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start <= query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.is_blocking() && query.conflicts_with(&r.span))
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        resource: Resource,
    },
    ResourceUpdated {
        resource: Resource,
    },
    ResourceDeleted {
        id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: Ulid,
        resource_id: Ulid,
        status: ReservationStatus,
    },
    ReservationRescheduled {
        id: Ulid,
        resource_id: Ulid,
        span: Span,
    },
}

// ── Parsing ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for ResourceCategory {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ROOM" => Ok(ResourceCategory::Room),
            "EQUIPMENT" => Ok(ResourceCategory::Equipment),
            "VEHICLE" => Ok(ResourceCategory::Vehicle),
            _ => Err(UnknownVariant { kind: "category", value: s.to_string() }),
        }
    }
}

impl FromStr for ResourceStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AVAILABLE" => Ok(ResourceStatus::Available),
            "UNAVAILABLE" => Ok(ResourceStatus::Unavailable),
            "MAINTENANCE" => Ok(ResourceStatus::Maintenance),
            _ => Err(UnknownVariant { kind: "resource status", value: s.to_string() }),
        }
    }
}

impl FromStr for ReservationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ReservationStatus::Pending),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            _ => Err(UnknownVariant { kind: "reservation status", value: s.to_string() }),
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
