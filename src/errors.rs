use thiserror::Error;
use uuid::Uuid;

use crate::trip::TripPhase;

/// Enumerates high-level errors returned by this library.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Represents an SQL error.
    #[error("SQLx error")]
    Sqlx { source: sqlx::Error },

    /// Represents an operation on a trip that does not exist.
    #[error("trip {0} does not exist")]
    NonExistentTrip(Uuid),

    /// Represents an attempt to accept a trip another driver already holds.
    #[error("trip {0} is already claimed by another driver")]
    AlreadyClaimed(Uuid),

    /// Represents an operation by a driver the trip is not assigned to.
    #[error("trip {0} is not assigned to this driver")]
    NotAssigned(Uuid),

    /// Represents a start attempt on a trip that is not in a startable state.
    #[error("trip {0} cannot be started")]
    NotStartable(Uuid),

    /// Represents a phase transition whose guard no longer holds.
    #[error("trip {trip} is not in the {expected} phase")]
    PhaseConflict { trip: Uuid, expected: TripPhase },

    /// Represents a second operation on a trip while one is still awaited.
    #[error("another operation is already in flight for trip {0}")]
    OperationInFlight(Uuid),

    /// Represents a change feed that ended or could not be established.
    #[error("change feed closed")]
    FeedClosed,

    /// Represents an inbound change payload that could not be decoded.
    #[error("unable to decode change payload")]
    MalformedChange { source: serde_json::Error },

    /// Represents a stored value that could not be interpreted.
    #[error("unable to interpret stored value {value:?} for {column}")]
    MalformedRecord { column: &'static str, value: String },

    /// Represents a local flag store that could not be read or written.
    #[error("local flag store is unavailable")]
    FlagUnavailable,
}
