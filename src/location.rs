use time::OffsetDateTime;
use uuid::Uuid;

/// A device position as delivered by the geolocation provider. Heading and
/// speed stay optional end to end; an absent reading is null, never a zero
/// sentinel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub recorded_at: OffsetDateTime,
}

impl Position {
    /// Whether the coordinates are usable. Providers occasionally emit NaN
    /// or out-of-range fixes during a cold start; those are dropped, not
    /// surfaced.
    pub fn is_plausible(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// One append-only row in the external location log.
#[derive(Clone, Debug, PartialEq)]
pub struct LocationSample {
    pub trip_id: Uuid,
    pub driver_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub recorded_at: OffsetDateTime,
}

impl LocationSample {
    pub fn new(trip_id: Uuid, driver_id: Uuid, position: &Position) -> Self {
        LocationSample {
            trip_id,
            driver_id,
            latitude: position.latitude,
            longitude: position.longitude,
            heading: position.heading,
            speed: position.speed,
            recorded_at: position.recorded_at,
        }
    }
}

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates, in meters. Haversine is
/// accurate to well under the displacement thresholds used here.
pub fn distance_meters(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lng1) = from;
    let (lat2, lng2) = to;

    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lng2 - lng1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_METERS * a.sqrt().atan2((1.0 - a).sqrt())
}
