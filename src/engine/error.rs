use ulid::Ulid;

use crate::model::{Ms, ReservationStatus, ResourceStatus};

#[derive(Debug)]
pub enum EngineError {
    InvalidInterval {
        start: Ms,
        end: Ms,
    },
    ResourceNotFound(Ulid),
    ReservationNotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidTransition {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    InvalidInitialStatus(ReservationStatus),
    ReservationCancelled(Ulid),
    ResourceUnavailable {
        id: Ulid,
        status: ResourceStatus,
    },
    HasActiveReservations(Ulid),
    LimitExceeded(&'static str),
    Persistence(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): start must be before end")
            }
            EngineError::ResourceNotFound(id) => write!(f, "resource not found: {id}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "reservation {id}: cannot move from {from} to {to}")
            }
            EngineError::InvalidInitialStatus(status) => {
                write!(f, "reservations cannot be created as {status}")
            }
            EngineError::ReservationCancelled(id) => {
                write!(f, "reservation {id} is cancelled")
            }
            EngineError::ResourceUnavailable { id, status } => {
                write!(f, "resource {id} is not bookable: {status}")
            }
            EngineError::HasActiveReservations(id) => {
                write!(f, "cannot delete resource {id}: has active reservations")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Persistence(e) => write!(f, "persistence failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
