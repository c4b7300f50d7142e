use std::fmt;

use serde::{Deserialize, Deserializer};
use time::OffsetDateTime;
use uuid::Uuid;

/// The authoritative lifecycle flag of a trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Upcoming,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TripStatus::Upcoming => "upcoming",
            TripStatus::Assigned => "assigned",
            TripStatus::InProgress => "in_progress",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "upcoming" => Some(TripStatus::Upcoming),
            "assigned" => Some(TripStatus::Assigned),
            "in_progress" => Some(TripStatus::InProgress),
            "completed" => Some(TripStatus::Completed),
            "cancelled" => Some(TripStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether the trip can still change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The driver's acknowledgment of an assignment, tracked independently of
/// [`TripStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceStatus {
    AssignedWaiting,
    Accepted,
    Rejected,
    Started,
    Completed,
}

impl AcceptanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AcceptanceStatus::AssignedWaiting => "assigned_waiting",
            AcceptanceStatus::Accepted => "accepted",
            AcceptanceStatus::Rejected => "rejected",
            AcceptanceStatus::Started => "started",
            AcceptanceStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "assigned_waiting" => Some(AcceptanceStatus::AssignedWaiting),
            "accepted" => Some(AcceptanceStatus::Accepted),
            "rejected" => Some(AcceptanceStatus::Rejected),
            "started" => Some(AcceptanceStatus::Started),
            "completed" => Some(AcceptanceStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for AcceptanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fine-grained position of a driver within an active trip. The
/// declaration order is the lifecycle order; the derived `Ord` reflects it,
/// and the only legal transition is to the immediate successor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TripPhase {
    Waiting,
    EnRouteToPickup,
    ArrivedAtPickup,
    EnRouteToDestination,
    Completed,
}

impl TripPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            TripPhase::Waiting => "waiting",
            TripPhase::EnRouteToPickup => "en_route_to_pickup",
            TripPhase::ArrivedAtPickup => "arrived_at_pickup",
            TripPhase::EnRouteToDestination => "en_route_to_destination",
            TripPhase::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(TripPhase::Waiting),
            "en_route_to_pickup" => Some(TripPhase::EnRouteToPickup),
            "arrived_at_pickup" => Some(TripPhase::ArrivedAtPickup),
            "en_route_to_destination" => Some(TripPhase::EnRouteToDestination),
            "completed" => Some(TripPhase::Completed),
            _ => None,
        }
    }

    /// The phase that follows this one, if any.
    pub fn next(self) -> Option<TripPhase> {
        match self {
            TripPhase::Waiting => Some(TripPhase::EnRouteToPickup),
            TripPhase::EnRouteToPickup => Some(TripPhase::ArrivedAtPickup),
            TripPhase::ArrivedAtPickup => Some(TripPhase::EnRouteToDestination),
            TripPhase::EnRouteToDestination => Some(TripPhase::Completed),
            TripPhase::Completed => None,
        }
    }

    /// Whether advancing to `to` is a legal forward step.
    pub fn can_advance_to(self, to: TripPhase) -> bool {
        self.next() == Some(to)
    }
}

impl fmt::Display for TripPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single trip record, as leased from the external store. The store holds
/// loose text for the enumerated columns; this struct is the typed view the
/// rest of the core works with.
#[derive(Clone, Debug, PartialEq)]
pub struct Trip {
    pub id: Uuid,
    pub status: TripStatus,
    pub driver_id: Option<Uuid>,
    pub assigned_driver_id: Option<Uuid>,
    pub acceptance: AcceptanceStatus,
    pub phase: TripPhase,
    pub pickup_arrival_time: Option<OffsetDateTime>,
    pub ride_start_time: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub pickup_address: String,
    pub destination_address: String,
    pub dispatcher_id: Option<Uuid>,
    pub facility_contact_id: Option<Uuid>,
    pub rider_id: Option<Uuid>,
}

impl Trip {
    /// Whether location sampling is permitted: the trip is in progress and
    /// held by the given driver.
    pub fn is_active_for(&self, driver_id: &Uuid) -> bool {
        self.status == TripStatus::InProgress && self.driver_id.as_ref() == Some(driver_id)
    }

    /// Whether the given driver has accepted (or is already working) this trip.
    pub fn is_held_by(&self, driver_id: &Uuid) -> bool {
        self.driver_id.as_ref() == Some(driver_id)
    }
}

/// A partial trip snapshot delivered by the change feed. Nullable columns
/// are double-wrapped so an absent key and an explicit null stay distinct;
/// timestamps arrive as seconds since the Unix epoch.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TripPatch {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<TripStatus>,
    #[serde(default, deserialize_with = "nullable")]
    pub driver_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub assigned_driver_id: Option<Option<Uuid>>,
    #[serde(default, rename = "driver_acceptance_status")]
    pub acceptance: Option<AcceptanceStatus>,
    #[serde(default, rename = "trip_phase")]
    pub phase: Option<TripPhase>,
    #[serde(default, deserialize_with = "nullable_epoch")]
    pub pickup_arrival_time: Option<Option<OffsetDateTime>>,
    #[serde(default, deserialize_with = "nullable_epoch")]
    pub ride_start_time: Option<Option<OffsetDateTime>>,
    #[serde(default, deserialize_with = "nullable_epoch")]
    pub completed_at: Option<Option<OffsetDateTime>>,
    #[serde(default)]
    pub pickup_address: Option<String>,
    #[serde(default)]
    pub destination_address: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub dispatcher_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub facility_contact_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub rider_id: Option<Option<Uuid>>,
}

impl TripPatch {
    /// Folds this patch into an existing record: a shallow merge where every
    /// present field overwrites, with the phase applied last so a phase
    /// carried by the event always wins.
    pub fn apply(&self, trip: &mut Trip) {
        if let Some(status) = self.status {
            trip.status = status;
        }
        if let Some(ref driver_id) = self.driver_id {
            trip.driver_id = *driver_id;
        }
        if let Some(ref assigned) = self.assigned_driver_id {
            trip.assigned_driver_id = *assigned;
        }
        if let Some(acceptance) = self.acceptance {
            trip.acceptance = acceptance;
        }
        if let Some(ref at) = self.pickup_arrival_time {
            trip.pickup_arrival_time = *at;
        }
        if let Some(ref at) = self.ride_start_time {
            trip.ride_start_time = *at;
        }
        if let Some(ref at) = self.completed_at {
            trip.completed_at = *at;
        }
        if let Some(ref address) = self.pickup_address {
            trip.pickup_address = address.clone();
        }
        if let Some(ref address) = self.destination_address {
            trip.destination_address = address.clone();
        }
        if let Some(ref dispatcher) = self.dispatcher_id {
            trip.dispatcher_id = *dispatcher;
        }
        if let Some(ref facility) = self.facility_contact_id {
            trip.facility_contact_id = *facility;
        }
        if let Some(ref rider) = self.rider_id {
            trip.rider_id = *rider;
        }
        if let Some(phase) = self.phase {
            trip.phase = phase;
        }
    }
}

fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

fn nullable_epoch<'de, D>(deserializer: D) -> Result<Option<Option<OffsetDateTime>>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds: Option<f64> = Deserialize::deserialize(deserializer)?;
    Ok(Some(seconds.map(from_epoch_seconds)))
}

fn from_epoch_seconds(seconds: f64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos((seconds * 1e9) as i128)
}


#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;
    use uuid::Uuid;

    use super::testing::sample_trip;
    use super::{AcceptanceStatus, TripPatch, TripPhase, TripStatus};

    #[test]
    fn phases_advance_through_the_chain_in_order() {
        let mut phase = TripPhase::Waiting;
        let mut visited = vec![phase];

        while let Some(next) = phase.next() {
            assert!(phase.can_advance_to(next));
            assert!(next > phase);
            phase = next;
            visited.push(phase);
        }

        assert_eq!(
            visited,
            vec![
                TripPhase::Waiting,
                TripPhase::EnRouteToPickup,
                TripPhase::ArrivedAtPickup,
                TripPhase::EnRouteToDestination,
                TripPhase::Completed,
            ]
        );
    }

    #[test]
    fn no_backward_or_skipping_transition_is_legal() {
        let all = [
            TripPhase::Waiting,
            TripPhase::EnRouteToPickup,
            TripPhase::ArrivedAtPickup,
            TripPhase::EnRouteToDestination,
            TripPhase::Completed,
        ];

        for &from in &all {
            for &to in &all {
                let legal = from.can_advance_to(to);

                if to <= from {
                    assert!(!legal, "{} -> {} must be rejected", from, to);
                }

                assert_eq!(legal, from.next() == Some(to));
            }
        }
    }

    fn arbitrary_phase() -> impl Strategy<Value = TripPhase> {
        prop_oneof![
            Just(TripPhase::Waiting),
            Just(TripPhase::EnRouteToPickup),
            Just(TripPhase::ArrivedAtPickup),
            Just(TripPhase::EnRouteToDestination),
            Just(TripPhase::Completed),
        ]
    }

    proptest! {
        #[test]
        fn accepted_transitions_never_move_backward(attempts in proptest::collection::vec(arbitrary_phase(), 0..64)) {
            let mut phase = TripPhase::Waiting;

            for attempt in attempts {
                let before = phase;

                if phase.can_advance_to(attempt) {
                    phase = attempt;
                }

                prop_assert!(phase >= before);
            }
        }
    }

    #[test]
    fn enumerations_round_trip_through_their_text_form() {
        for status in &["upcoming", "assigned", "in_progress", "completed", "cancelled"] {
            assert_eq!(TripStatus::parse(status).unwrap().as_str(), *status);
        }

        assert_eq!(TripStatus::parse("teleporting"), None);
        assert_eq!(TripPhase::parse("waiting").unwrap().as_str(), "waiting");
        assert_eq!(AcceptanceStatus::parse("accepted").unwrap().as_str(), "accepted");
    }

    #[test]
    fn patch_application_is_a_shallow_merge() {
        let driver = Uuid::new_v4();
        let mut trip = sample_trip(Uuid::new_v4());

        let patch: TripPatch = serde_json::from_value(json!({
            "status": "in_progress",
            "driver_id": driver,
            "trip_phase": "en_route_to_pickup",
        }))
        .expect("decode patch");

        patch.apply(&mut trip);

        assert_eq!(trip.status, TripStatus::InProgress);
        assert_eq!(trip.driver_id, Some(driver));
        assert_eq!(trip.phase, TripPhase::EnRouteToPickup);
        // untouched fields survive the merge
        assert_eq!(trip.acceptance, AcceptanceStatus::AssignedWaiting);
        assert_eq!(trip.pickup_address, "12 Harbor Way");
    }

    #[test]
    fn patch_distinguishes_absent_from_null() {
        let mut trip = sample_trip(Uuid::new_v4());
        trip.driver_id = Some(Uuid::new_v4());
        trip.assigned_driver_id = trip.driver_id;

        // `driver_id` explicitly null, `assigned_driver_id` absent
        let patch: TripPatch =
            serde_json::from_value(json!({ "driver_id": null })).expect("decode patch");

        assert_eq!(patch.driver_id, Some(None));
        assert_eq!(patch.assigned_driver_id, None);

        patch.apply(&mut trip);

        assert_eq!(trip.driver_id, None);
        assert!(trip.assigned_driver_id.is_some());
    }

    #[test]
    fn patch_timestamps_decode_from_epoch_seconds() {
        let patch: TripPatch = serde_json::from_value(json!({
            "pickup_arrival_time": 1_700_000_000.5,
            "completed_at": null,
        }))
        .expect("decode patch");

        let arrival = patch.pickup_arrival_time.expect("present").expect("non-null");
        assert_eq!(arrival.unix_timestamp(), 1_700_000_000);
        assert_eq!(patch.completed_at, Some(None));
        assert_eq!(patch.ride_start_time, None);
    }
}
