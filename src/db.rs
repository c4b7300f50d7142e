use futures::future::BoxFuture;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::location::LocationSample;
use crate::trip::Trip;

#[cfg(test)]
pub(crate) mod mock;

/// The external record store, reduced to the operations the core needs.
///
/// Every mutating method is a guarded write: the `WHERE` clause restates the
/// precondition, and a `None` result means the guard no longer held when the
/// write landed because somebody else got there first. Callers translate that
/// into a domain error; nothing is retried.
pub trait TripDb {
    fn retrieve(&self, id: &Uuid) -> BoxFuture<Result<Option<Trip>, CoreError>>;

    /// Sets the driver on an unclaimed assignment.
    fn claim(&self, id: &Uuid, driver_id: &Uuid) -> BoxFuture<Result<Option<Trip>, CoreError>>;

    /// Clears an assignment the driver has declined.
    fn decline(&self, id: &Uuid, driver_id: &Uuid) -> BoxFuture<Result<Option<Trip>, CoreError>>;

    /// Moves an accepted trip into progress, en route to pickup.
    fn begin(&self, id: &Uuid, driver_id: &Uuid) -> BoxFuture<Result<Option<Trip>, CoreError>>;

    /// Records arrival at the pickup point.
    fn mark_arrived(
        &self,
        id: &Uuid,
        at: OffsetDateTime,
    ) -> BoxFuture<Result<Option<Trip>, CoreError>>;

    /// Records the rider on board and en route to the destination.
    fn begin_ride(
        &self,
        id: &Uuid,
        at: OffsetDateTime,
    ) -> BoxFuture<Result<Option<Trip>, CoreError>>;

    /// Closes the trip out.
    fn finish(&self, id: &Uuid, at: OffsetDateTime)
        -> BoxFuture<Result<Option<Trip>, CoreError>>;

    /// Appends one sample to the location log.
    fn append_location(&self, sample: LocationSample) -> BoxFuture<Result<(), CoreError>>;
}

pub use self::postgres::*;

mod postgres {
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use sqlx::postgres::{PgPool, PgRow};
    use time::OffsetDateTime;
    use uuid::Uuid;

    use crate::errors::CoreError;
    use crate::location::LocationSample;
    use crate::trip::{AcceptanceStatus, Trip, TripPhase, TripStatus};

    pub struct PgTripDb {
        pool: PgPool,
    }

    impl PgTripDb {
        pub fn new(pool: PgPool) -> Self {
            PgTripDb { pool }
        }
    }

    // these can be simplified once async functions in traits are stabilized
    impl super::TripDb for PgTripDb {
        fn retrieve(&self, id: &Uuid) -> BoxFuture<Result<Option<Trip>, CoreError>> {
            let id = *id;

            async move {
                let trip = sqlx::query(include_str!("queries/retrieve_trip.sql"))
                    .bind(id)
                    .try_map(trip_from_row)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(trip)
            }
            .boxed()
        }

        fn claim(&self, id: &Uuid, driver_id: &Uuid) -> BoxFuture<Result<Option<Trip>, CoreError>> {
            self.guarded(include_str!("queries/claim_trip.sql"), *id, *driver_id)
        }

        fn decline(
            &self,
            id: &Uuid,
            driver_id: &Uuid,
        ) -> BoxFuture<Result<Option<Trip>, CoreError>> {
            self.guarded(include_str!("queries/decline_trip.sql"), *id, *driver_id)
        }

        fn begin(&self, id: &Uuid, driver_id: &Uuid) -> BoxFuture<Result<Option<Trip>, CoreError>> {
            self.guarded(include_str!("queries/begin_trip.sql"), *id, *driver_id)
        }

        fn mark_arrived(
            &self,
            id: &Uuid,
            at: OffsetDateTime,
        ) -> BoxFuture<Result<Option<Trip>, CoreError>> {
            self.stamped(include_str!("queries/arrive_pickup.sql"), *id, at)
        }

        fn begin_ride(
            &self,
            id: &Uuid,
            at: OffsetDateTime,
        ) -> BoxFuture<Result<Option<Trip>, CoreError>> {
            self.stamped(include_str!("queries/begin_ride.sql"), *id, at)
        }

        fn finish(
            &self,
            id: &Uuid,
            at: OffsetDateTime,
        ) -> BoxFuture<Result<Option<Trip>, CoreError>> {
            self.stamped(include_str!("queries/finish_trip.sql"), *id, at)
        }

        fn append_location(&self, sample: LocationSample) -> BoxFuture<Result<(), CoreError>> {
            async move {
                sqlx::query(include_str!("queries/append_location.sql"))
                    .bind(sample.trip_id)
                    .bind(sample.driver_id)
                    .bind(sample.latitude)
                    .bind(sample.longitude)
                    .bind(sample.heading)
                    .bind(sample.speed)
                    .bind(sample.recorded_at)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(())
            }
            .boxed()
        }
    }

    impl PgTripDb {
        /// Runs a guarded update binding (id, driver) and returns the row the
        /// guard let through, if any.
        fn guarded(
            &self,
            sql: &'static str,
            id: Uuid,
            driver_id: Uuid,
        ) -> BoxFuture<Result<Option<Trip>, CoreError>> {
            async move {
                let trip = sqlx::query(sql)
                    .bind(id)
                    .bind(driver_id)
                    .try_map(trip_from_row)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(trip)
            }
            .boxed()
        }

        /// Runs a guarded update binding (id, timestamp).
        fn stamped(
            &self,
            sql: &'static str,
            id: Uuid,
            at: OffsetDateTime,
        ) -> BoxFuture<Result<Option<Trip>, CoreError>> {
            async move {
                let trip = sqlx::query(sql)
                    .bind(id)
                    .bind(at)
                    .try_map(trip_from_row)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(trip)
            }
            .boxed()
        }
    }

    fn trip_from_row(row: PgRow) -> Result<Trip, sqlx::Error> {
        let status = parse_column(&row, "status", TripStatus::parse)?;
        let acceptance =
            parse_column(&row, "driver_acceptance_status", AcceptanceStatus::parse)?;
        let phase = parse_column(&row, "trip_phase", TripPhase::parse)?;

        Ok(Trip {
            id: try_get(&row, "id")?,
            status,
            driver_id: try_get(&row, "driver_id")?,
            assigned_driver_id: try_get(&row, "assigned_driver_id")?,
            acceptance,
            phase,
            pickup_arrival_time: try_get(&row, "pickup_arrival_time")?,
            ride_start_time: try_get(&row, "ride_start_time")?,
            completed_at: try_get(&row, "completed_at")?,
            pickup_address: try_get(&row, "pickup_address")?,
            destination_address: try_get(&row, "destination_address")?,
            dispatcher_id: try_get(&row, "dispatcher_id")?,
            facility_contact_id: try_get(&row, "facility_contact_id")?,
            rider_id: try_get(&row, "rider_id")?,
        })
    }

    fn parse_column<T>(
        row: &PgRow,
        column: &'static str,
        parse: fn(&str) -> Option<T>,
    ) -> Result<T, sqlx::Error> {
        let value: String = try_get(row, column)?;

        // the store holds loose text; an unknown value is a decode error,
        // not a silent default
        parse(&value).ok_or_else(|| {
            sqlx::Error::Decode(Box::new(CoreError::MalformedRecord { column, value }))
        })
    }

    fn try_get<'a, T: sqlx::Type<sqlx::Postgres> + sqlx::decode::Decode<'a, sqlx::Postgres>>(
        row: &'a PgRow,
        column: &str,
    ) -> Result<T, sqlx::Error> {
        use sqlx::Row;

        row.try_get(column)
    }

    fn map_sqlx_error(error: sqlx::Error) -> CoreError {
        CoreError::Sqlx { source: error }
    }
}
