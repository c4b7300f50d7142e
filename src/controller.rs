use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use slog::{debug, Logger};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::TripDb;
use crate::errors::CoreError;
use crate::events::PhaseEvent;
use crate::trip::{AcceptanceStatus, Trip, TripPhase, TripStatus};

/// The result of a transition: the refreshed record and the event it
/// produced. `event` is `None` when the call was an idempotent no-op.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub trip: Trip,
    pub event: Option<PhaseEvent>,
}

/// Validates and executes the driver-visible trip lifecycle, one forward
/// step per call.
///
/// Every operation is single-flight per trip: a second call for the same
/// trip while one is still awaited fails with [`CoreError::OperationInFlight`]
/// instead of racing it. The store write itself restates the precondition as
/// a guard, so even a write that slips past a stale read cannot move a trip
/// backward. Failures leave local state untouched; the follow-up read or the
/// change feed supplies ground truth.
pub struct TripPhaseController {
    logger: Arc<Logger>,
    db: Arc<dyn TripDb + Send + Sync>,
    driver_id: Uuid,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl TripPhaseController {
    pub fn new(logger: Arc<Logger>, db: Arc<dyn TripDb + Send + Sync>, driver_id: Uuid) -> Self {
        TripPhaseController {
            logger,
            db,
            driver_id,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn driver_id(&self) -> &Uuid {
        &self.driver_id
    }

    /// Claims an assignment for this driver.
    ///
    /// Calling it again once the record already shows this driver accepted
    /// is a clean no-op; an assignment held by anyone else is
    /// [`CoreError::AlreadyClaimed`].
    pub async fn accept(&self, trip_id: &Uuid) -> Result<Outcome, CoreError> {
        let _flight = self.begin_flight(trip_id)?;
        let trip = self.load(trip_id).await?;

        match trip.driver_id {
            Some(driver) if driver == self.driver_id => {
                debug!(self.logger, "accept is a no-op, trip already held";
                       "trip" => trip_id.to_string());

                return Ok(Outcome { trip, event: None });
            }
            Some(_) => return Err(CoreError::AlreadyClaimed(*trip_id)),
            None => {}
        }

        if trip.assigned_driver_id != Some(self.driver_id)
            || trip.acceptance != AcceptanceStatus::AssignedWaiting
        {
            return Err(CoreError::NotAssigned(*trip_id));
        }

        let claimed = self.db.claim(trip_id, &self.driver_id).await?;

        self.conclude(trip_id, claimed, PhaseEvent::Accepted)
            .ok_or(CoreError::AlreadyClaimed(*trip_id))
    }

    /// Declines an assignment this driver has not yet accepted.
    pub async fn reject(&self, trip_id: &Uuid) -> Result<Outcome, CoreError> {
        let _flight = self.begin_flight(trip_id)?;
        let trip = self.load(trip_id).await?;

        if trip.acceptance == AcceptanceStatus::Rejected && trip.assigned_driver_id.is_none() {
            return Ok(Outcome { trip, event: None });
        }

        if trip.driver_id.is_some() || trip.assigned_driver_id != Some(self.driver_id) {
            return Err(CoreError::NotAssigned(*trip_id));
        }

        let declined = self.db.decline(trip_id, &self.driver_id).await?;

        self.conclude(trip_id, declined, PhaseEvent::Rejected)
            .ok_or(CoreError::NotAssigned(*trip_id))
    }

    /// Starts an accepted trip: in progress, en route to pickup.
    pub async fn start(&self, trip_id: &Uuid) -> Result<Outcome, CoreError> {
        let _flight = self.begin_flight(trip_id)?;
        let trip = self.load(trip_id).await?;

        if !trip.is_held_by(&self.driver_id) {
            return Err(CoreError::NotAssigned(*trip_id));
        }

        if trip.status.is_terminal()
            || trip.status == TripStatus::InProgress
            || trip.phase != TripPhase::Waiting
        {
            return Err(CoreError::NotStartable(*trip_id));
        }

        let started = self.db.begin(trip_id, &self.driver_id).await?;

        self.conclude(trip_id, started, PhaseEvent::Started)
            .ok_or(CoreError::NotStartable(*trip_id))
    }

    /// Marks arrival at the pickup point and stamps `pickup_arrival_time`.
    pub async fn arrived_at_pickup(&self, trip_id: &Uuid) -> Result<Outcome, CoreError> {
        self.advance(trip_id, Step::Arrive).await
    }

    /// Marks the rider on board and stamps `ride_start_time`.
    pub async fn start_ride(&self, trip_id: &Uuid) -> Result<Outcome, CoreError> {
        self.advance(trip_id, Step::Ride).await
    }

    /// Completes the trip and stamps `completed_at`.
    pub async fn complete(&self, trip_id: &Uuid) -> Result<Outcome, CoreError> {
        self.advance(trip_id, Step::Finish).await
    }

    /// Shared shape of the three timestamped mid-trip transitions.
    async fn advance(&self, trip_id: &Uuid, step: Step) -> Result<Outcome, CoreError> {
        let expected = step.expected_phase();
        let _flight = self.begin_flight(trip_id)?;
        let trip = self.load(trip_id).await?;

        if trip.status != TripStatus::InProgress
            || !trip.is_held_by(&self.driver_id)
            || trip.phase != expected
        {
            return Err(CoreError::PhaseConflict {
                trip: *trip_id,
                expected,
            });
        }

        let at = OffsetDateTime::now_utc();
        let advanced = match step {
            Step::Arrive => self.db.mark_arrived(trip_id, at).await?,
            Step::Ride => self.db.begin_ride(trip_id, at).await?,
            Step::Finish => self.db.finish(trip_id, at).await?,
        };

        self.conclude(trip_id, advanced, step.event())
            .ok_or(CoreError::PhaseConflict {
                trip: *trip_id,
                expected,
            })
    }

    async fn load(&self, trip_id: &Uuid) -> Result<Trip, CoreError> {
        self.db
            .retrieve(trip_id)
            .await?
            .ok_or(CoreError::NonExistentTrip(*trip_id))
    }

    fn conclude(&self, trip_id: &Uuid, written: Option<Trip>, event: PhaseEvent) -> Option<Outcome> {
        let trip = written?;

        debug!(self.logger, "trip transition committed";
               "trip" => trip_id.to_string(),
               "event" => event.kind(),
               "phase" => trip.phase.as_str());

        Some(Outcome {
            trip,
            event: Some(event),
        })
    }

    fn begin_flight(&self, trip_id: &Uuid) -> Result<Flight, CoreError> {
        let mut in_flight = self.in_flight.lock().expect("lock in-flight set");

        if !in_flight.insert(*trip_id) {
            return Err(CoreError::OperationInFlight(*trip_id));
        }

        Ok(Flight {
            set: &self.in_flight,
            trip_id: *trip_id,
        })
    }
}

/// The three timestamped mid-trip transitions.
#[derive(Clone, Copy, Debug)]
enum Step {
    Arrive,
    Ride,
    Finish,
}

impl Step {
    fn expected_phase(self) -> TripPhase {
        match self {
            Step::Arrive => TripPhase::EnRouteToPickup,
            Step::Ride => TripPhase::ArrivedAtPickup,
            Step::Finish => TripPhase::EnRouteToDestination,
        }
    }

    fn event(self) -> PhaseEvent {
        match self {
            Step::Arrive => PhaseEvent::ArrivedAtPickup,
            Step::Ride => PhaseEvent::RideStarted,
            Step::Finish => PhaseEvent::Completed,
        }
    }
}

/// Releases the in-flight slot when the operation resolves, on every path.
struct Flight<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    trip_id: Uuid,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("lock in-flight set")
            .remove(&self.trip_id);
    }
}
