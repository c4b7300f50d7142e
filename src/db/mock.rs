use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::location::LocationSample;
use crate::trip::{AcceptanceStatus, Trip, TripPhase, TripStatus};

/// An in-memory stand-in for the external store with the same guard
/// semantics as the Postgres implementation. `latency` holds each mutating
/// call open so tests can race operations against one another.
#[derive(Default)]
pub(crate) struct MockTripDb {
    pub(crate) trips: RwLock<HashMap<Uuid, Trip>>,
    pub(crate) samples: RwLock<Vec<LocationSample>>,
    pub(crate) finish_writes: RwLock<u32>,
    pub(crate) latency: Option<Duration>,
}

impl MockTripDb {
    pub(crate) fn with_trip(trip: Trip) -> Self {
        let db = MockTripDb::default();
        db.trips.write().unwrap().insert(trip.id, trip);
        db
    }

    pub(crate) fn trip(&self, id: &Uuid) -> Option<Trip> {
        self.trips.read().unwrap().get(id).cloned()
    }

    async fn settle(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn mutate<F>(&self, id: &Uuid, guard_and_write: F) -> Option<Trip>
    where
        F: FnOnce(&mut Trip) -> bool,
    {
        let mut trips = self.trips.write().unwrap();
        let trip = trips.get_mut(id)?;

        if guard_and_write(trip) {
            Some(trip.clone())
        } else {
            None
        }
    }
}

impl super::TripDb for MockTripDb {
    fn retrieve(&self, id: &Uuid) -> BoxFuture<Result<Option<Trip>, CoreError>> {
        let id = *id;

        async move { Ok(self.trip(&id)) }.boxed()
    }

    fn claim(&self, id: &Uuid, driver_id: &Uuid) -> BoxFuture<Result<Option<Trip>, CoreError>> {
        let id = *id;
        let driver_id = *driver_id;

        async move {
            self.settle().await;

            Ok(self.mutate(&id, |trip| {
                let open = trip.driver_id.is_none()
                    && trip.assigned_driver_id == Some(driver_id)
                    && trip.acceptance == AcceptanceStatus::AssignedWaiting;

                if open {
                    trip.driver_id = Some(driver_id);
                    trip.acceptance = AcceptanceStatus::Accepted;
                }

                open
            }))
        }
        .boxed()
    }

    fn decline(&self, id: &Uuid, driver_id: &Uuid) -> BoxFuture<Result<Option<Trip>, CoreError>> {
        let id = *id;
        let driver_id = *driver_id;

        async move {
            self.settle().await;

            Ok(self.mutate(&id, |trip| {
                let open = trip.driver_id.is_none()
                    && trip.assigned_driver_id == Some(driver_id)
                    && trip.acceptance == AcceptanceStatus::AssignedWaiting;

                if open {
                    trip.assigned_driver_id = None;
                    trip.acceptance = AcceptanceStatus::Rejected;
                }

                open
            }))
        }
        .boxed()
    }

    fn begin(&self, id: &Uuid, driver_id: &Uuid) -> BoxFuture<Result<Option<Trip>, CoreError>> {
        let id = *id;
        let driver_id = *driver_id;

        async move {
            self.settle().await;

            Ok(self.mutate(&id, |trip| {
                let ready = trip.driver_id == Some(driver_id)
                    && matches!(trip.status, TripStatus::Upcoming | TripStatus::Assigned)
                    && trip.phase == TripPhase::Waiting;

                if ready {
                    trip.status = TripStatus::InProgress;
                    trip.acceptance = AcceptanceStatus::Started;
                    trip.phase = TripPhase::EnRouteToPickup;
                }

                ready
            }))
        }
        .boxed()
    }

    fn mark_arrived(
        &self,
        id: &Uuid,
        at: OffsetDateTime,
    ) -> BoxFuture<Result<Option<Trip>, CoreError>> {
        let id = *id;

        async move {
            self.settle().await;

            Ok(self.mutate(&id, |trip| {
                let due = trip.status == TripStatus::InProgress
                    && trip.phase == TripPhase::EnRouteToPickup
                    && trip.pickup_arrival_time.is_none();

                if due {
                    trip.phase = TripPhase::ArrivedAtPickup;
                    trip.pickup_arrival_time = Some(at);
                }

                due
            }))
        }
        .boxed()
    }

    fn begin_ride(
        &self,
        id: &Uuid,
        at: OffsetDateTime,
    ) -> BoxFuture<Result<Option<Trip>, CoreError>> {
        let id = *id;

        async move {
            self.settle().await;

            Ok(self.mutate(&id, |trip| {
                let due = trip.status == TripStatus::InProgress
                    && trip.phase == TripPhase::ArrivedAtPickup
                    && trip.ride_start_time.is_none();

                if due {
                    trip.phase = TripPhase::EnRouteToDestination;
                    trip.ride_start_time = Some(at);
                }

                due
            }))
        }
        .boxed()
    }

    fn finish(
        &self,
        id: &Uuid,
        at: OffsetDateTime,
    ) -> BoxFuture<Result<Option<Trip>, CoreError>> {
        let id = *id;

        async move {
            self.settle().await;

            let finished = self.mutate(&id, |trip| {
                let due = trip.status == TripStatus::InProgress
                    && trip.phase == TripPhase::EnRouteToDestination
                    && trip.completed_at.is_none();

                if due {
                    trip.status = TripStatus::Completed;
                    trip.acceptance = AcceptanceStatus::Completed;
                    trip.phase = TripPhase::Completed;
                    trip.completed_at = Some(at);
                }

                due
            });

            if finished.is_some() {
                *self.finish_writes.write().unwrap() += 1;
            }

            Ok(finished)
        }
        .boxed()
    }

    fn append_location(&self, sample: LocationSample) -> BoxFuture<Result<(), CoreError>> {
        async move {
            self.samples.write().unwrap().push(sample);

            Ok(())
        }
        .boxed()
    }
}
