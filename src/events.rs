use serde::Serialize;

/// A domain event produced by a successful phase transition. Persistence
/// emits these; notification fan-out consumes them. Keeping the two apart
/// means a failed send can never roll back a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEvent {
    Accepted,
    Rejected,
    Started,
    ArrivedAtPickup,
    RideStarted,
    Completed,
}

impl PhaseEvent {
    /// The wire name used for the notification `kind` column.
    pub fn kind(self) -> &'static str {
        match self {
            PhaseEvent::Accepted => "trip_accepted",
            PhaseEvent::Rejected => "trip_rejected",
            PhaseEvent::Started => "trip_started",
            PhaseEvent::ArrivedAtPickup => "trip_arrived_at_pickup",
            PhaseEvent::RideStarted => "trip_ride_started",
            PhaseEvent::Completed => "trip_completed",
        }
    }

    /// The human-readable headline for the notification.
    pub fn title(self) -> &'static str {
        match self {
            PhaseEvent::Accepted => "Trip accepted",
            PhaseEvent::Rejected => "Trip declined",
            PhaseEvent::Started => "Driver en route",
            PhaseEvent::ArrivedAtPickup => "Driver arrived at pickup",
            PhaseEvent::RideStarted => "Ride started",
            PhaseEvent::Completed => "Trip completed",
        }
    }
}
