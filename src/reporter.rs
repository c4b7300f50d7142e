use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use slog::{debug, error, Logger};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::db::TripDb;
use crate::geo::{Locator, WatchOptions};
use crate::location::{distance_meters, LocationSample, Position};
use crate::trip::Trip;

/// Sampling cadence: a new sample is persisted on the earlier of the
/// interval elapsing or the device moving by the displacement threshold.
#[derive(Clone, Copy, Debug)]
pub struct ReporterConfig {
    pub min_interval: Duration,
    pub min_displacement_meters: f64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        ReporterConfig {
            min_interval: Duration::from_secs(5),
            min_displacement_meters: 10.0,
        }
    }
}

/// Samples device location while a trip is active for this driver and
/// appends each sample to the external location log.
///
/// Enablement is re-evaluated against the live trip view before every
/// write and on every view change; the moment the trip stops being in
/// progress under this driver (completed, cancelled, reassigned) the
/// task winds down. A failed append is logged and dropped; the next
/// sample supersedes it.
pub struct LocationReporter {
    logger: Arc<Logger>,
    db: Arc<dyn TripDb + Send + Sync>,
    locator: Arc<dyn Locator>,
    config: ReporterConfig,
}

impl LocationReporter {
    pub fn new(
        logger: Arc<Logger>,
        db: Arc<dyn TripDb + Send + Sync>,
        locator: Arc<dyn Locator>,
        config: ReporterConfig,
    ) -> Self {
        LocationReporter {
            logger,
            db,
            locator,
            config,
        }
    }

    /// Starts sampling against the given live trip view. The returned
    /// handle stops the task; so does dropping it, so an unmounted screen
    /// cannot leak a running watch.
    pub fn enable(
        &self,
        trips: watch::Receiver<Option<Trip>>,
        driver_id: Uuid,
    ) -> ReporterHandle {
        let (stop_sender, stop_receiver) = oneshot::channel();
        let task = tokio::spawn(run(
            self.logger.clone(),
            self.db.clone(),
            self.locator.clone(),
            self.config,
            trips,
            driver_id,
            stop_receiver,
        ));

        ReporterHandle {
            stop: Some(stop_sender),
            task,
        }
    }
}

/// Teardown handle for a running reporter.
pub struct ReporterHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReporterHandle {
    /// Stops sampling and waits for the task to wind down.
    pub async fn disable(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        let _ = (&mut self.task).await;
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

fn active_trip(view: &watch::Receiver<Option<Trip>>, driver_id: &Uuid) -> Option<Uuid> {
    view.borrow()
        .as_ref()
        .filter(|trip| trip.is_active_for(driver_id))
        .map(|trip| trip.id)
}

async fn run(
    logger: Arc<Logger>,
    db: Arc<dyn TripDb + Send + Sync>,
    locator: Arc<dyn Locator>,
    config: ReporterConfig,
    mut trips: watch::Receiver<Option<Trip>>,
    driver_id: Uuid,
    mut stop: oneshot::Receiver<()>,
) {
    if active_trip(&trips, &driver_id).is_none() {
        debug!(logger, "trip not active, reporter never starts");

        return;
    }

    let mut positions = locator.watch(WatchOptions {
        interval: config.min_interval,
        displacement_meters: config.min_displacement_meters,
    });
    let mut last_written: Option<Position> = None;

    // one immediate fix so the dispatcher sees the driver as soon as the
    // trip starts moving
    if let Some(position) = locator.current().await {
        write_sample(
            &logger,
            db.as_ref(),
            &trips,
            &driver_id,
            position,
            &mut last_written,
            &config,
        )
        .await;
    }

    loop {
        tokio::select! {
            _ = &mut stop => break,
            changed = trips.changed() => {
                if changed.is_err() || active_trip(&trips, &driver_id).is_none() {
                    debug!(logger, "trip no longer active, reporter stopping");

                    break;
                }
            }
            position = positions.next() => {
                let position = match position {
                    Some(position) => position,
                    None => {
                        debug!(logger, "position watch ended, reporter stopping");

                        break;
                    }
                };

                if active_trip(&trips, &driver_id).is_none() {
                    break;
                }

                write_sample(
                    &logger,
                    db.as_ref(),
                    &trips,
                    &driver_id,
                    position,
                    &mut last_written,
                    &config,
                )
                .await;
            }
        }
    }
}

async fn write_sample(
    logger: &Logger,
    db: &(dyn TripDb + Send + Sync),
    trips: &watch::Receiver<Option<Trip>>,
    driver_id: &Uuid,
    position: Position,
    last_written: &mut Option<Position>,
    config: &ReporterConfig,
) {
    // a single missed sample is immaterial; bad fixes are dropped quietly
    if !position.is_plausible() {
        debug!(logger, "dropping implausible position fix";
               "latitude" => position.latitude,
               "longitude" => position.longitude);

        return;
    }

    if !due(last_written.as_ref(), &position, config) {
        return;
    }

    let trip_id = match active_trip(trips, driver_id) {
        Some(trip_id) => trip_id,
        None => return,
    };

    let sample = LocationSample::new(trip_id, *driver_id, &position);

    match db.append_location(sample).await {
        Ok(()) => *last_written = Some(position),
        Err(e) => {
            // no retry queue; the next sample supersedes this one
            error!(logger, "failed to append location sample";
                   "trip" => trip_id.to_string(),
                   "error" => format!("{:?}", e));
        }
    }
}

fn due(last: Option<&Position>, position: &Position, config: &ReporterConfig) -> bool {
    let last = match last {
        Some(last) => last,
        None => return true,
    };

    let elapsed = position.recorded_at - last.recorded_at;

    if elapsed.as_seconds_f64() >= config.min_interval.as_secs_f64() {
        return true;
    }

    distance_meters(
        (last.latitude, last.longitude),
        (position.latitude, position.longitude),
    ) >= config.min_displacement_meters
}
