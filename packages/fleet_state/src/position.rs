//! Position Tracker
//!
//! Keeps a bounded buffer of recent position samples per vehicle, classifies
//! each vehicle's liveness from the age of its latest sample, and counts how
//! many samples arrived across the fleet in the trailing second.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use push_channel::{MessageKind, PushMessage};
use serde::Serialize;
use tracing::debug;

use crate::error::DecodeError;
use crate::payload::Payload;
use crate::processor::StreamProcessor;

pub const DEFAULT_MAX_BUFFER_SIZE: usize = 100;

const RATE_WINDOW_MS: i64 = 1000;
const EARTH_RADIUS_KM: f64 = 6371.0;
/// Below this speed a vehicle counts as stopped
const STOP_SPEED_KMH: f64 = 5.0;
/// A slow segment no longer than this is traffic, not a stop
const STOP_MIN_GAP_SECS: i64 = 120;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PositionSample {
    pub entity_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: Option<f64>,
    pub heading: Option<f64>,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub address: Option<String>,
    pub shipment_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    /// Decode a `gps_location_update` message.
    pub fn from_message(message: &PushMessage) -> Result<Self, DecodeError> {
        let p = Payload::of(message)?;

        let shipment_id = p.text(&["shipment_id"]);
        let entity_id = p
            .text(&["vehicle_id"])
            .or_else(|| shipment_id.clone())
            .ok_or(DecodeError::MissingField("vehicle_id"))?;

        let latitude = p.require_number("latitude")?;
        let longitude = p.require_number("longitude")?;
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(DecodeError::invalid("latitude", latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(DecodeError::invalid("longitude", longitude));
        }

        Ok(Self {
            entity_id,
            latitude,
            longitude,
            speed_kmh: p.number("speed")?,
            heading: p.number("heading")?,
            altitude: p.number("altitude")?,
            accuracy: p.number("accuracy")?,
            address: p.text(&["address"]),
            shipment_id,
            timestamp: p.timestamp("timestamp")?.unwrap_or(message.timestamp),
        })
    }

    /// Great-circle distance to `other` in kilometres.
    pub fn distance_km(&self, other: &PositionSample) -> f64 {
        let (lat1, lon1) = (self.latitude.to_radians(), self.longitude.to_radians());
        let (lat2, lon2) = (other.latitude.to_radians(), other.longitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = lon2 - lon1;
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * a.sqrt().asin() * EARTH_RADIUS_KM
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Fresh,
    Warning,
    Stale,
}

impl Liveness {
    /// Classify with the default thresholds.
    pub fn classify(elapsed: TimeDelta) -> Self {
        LivenessThresholds::default().classify(elapsed)
    }
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Liveness::Fresh => write!(f, "fresh"),
            Liveness::Warning => write!(f, "warning"),
            Liveness::Stale => write!(f, "stale"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LivenessThresholds {
    /// Younger than this is fresh
    pub fresh: Duration,
    /// At least this old is stale; in between is warning
    pub stale: Duration,
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            fresh: Duration::from_secs(60),
            stale: Duration::from_secs(120),
        }
    }
}

impl LivenessThresholds {
    /// Pure function of elapsed time. A sample from the future (clock skew)
    /// counts as fresh.
    pub fn classify(&self, elapsed: TimeDelta) -> Liveness {
        let Ok(elapsed) = elapsed.to_std() else {
            return Liveness::Fresh;
        };
        if elapsed < self.fresh {
            Liveness::Fresh
        } else if elapsed < self.stale {
            Liveness::Warning
        } else {
            Liveness::Stale
        }
    }
}

/// Aggregate movement over an entity's buffered samples
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RouteSummary {
    pub distance_km: f64,
    pub duration_minutes: i64,
    pub average_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub stop_count: u32,
    pub stop_minutes: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrackedEntity {
    pub entity_id: String,
    samples: VecDeque<PositionSample>,
    liveness: Liveness,
    /// Wall clock at the last arrival for this entity
    last_update: DateTime<Utc>,
}

impl TrackedEntity {
    fn new(entity_id: String, now: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            samples: VecDeque::new(),
            liveness: Liveness::Fresh,
            last_update: now,
        }
    }

    /// Buffered samples, oldest first.
    pub fn samples(&self) -> impl ExactSizeIterator<Item = &PositionSample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&PositionSample> {
        self.samples.back()
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    fn trim(&mut self, max: usize) {
        while self.samples.len() > max {
            self.samples.pop_front();
        }
    }

    fn classify(&self, thresholds: &LivenessThresholds, now: DateTime<Utc>) -> Liveness {
        match self.samples.back() {
            Some(latest) => thresholds.classify(now - latest.timestamp),
            None => Liveness::Stale,
        }
    }

    pub fn route_summary(&self) -> RouteSummary {
        if self.samples.len() < 2 {
            return RouteSummary::default();
        }

        let mut summary = RouteSummary::default();
        let mut speeds = Vec::new();
        let stop_gap = TimeDelta::seconds(STOP_MIN_GAP_SECS);

        for (prev, curr) in self.samples.iter().zip(self.samples.iter().skip(1)) {
            summary.distance_km += prev.distance_km(curr);

            let Some(speed) = curr.speed_kmh else {
                continue;
            };
            speeds.push(speed);
            summary.max_speed_kmh = summary.max_speed_kmh.max(speed);

            let gap = curr.timestamp - prev.timestamp;
            if speed < STOP_SPEED_KMH && gap > stop_gap {
                summary.stop_count += 1;
                summary.stop_minutes += gap.num_minutes();
            }
        }

        if let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) {
            summary.duration_minutes = (last.timestamp - first.timestamp).num_minutes();
        }
        if !speeds.is_empty() {
            summary.average_speed_kmh = speeds.iter().sum::<f64>() / speeds.len() as f64;
        }
        summary
    }
}

/// A liveness transition found by [`PositionTracker::reclassify`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LivenessChange {
    pub entity_id: String,
    pub from: Liveness,
    pub to: Liveness,
}

pub struct PositionTracker {
    entities: HashMap<String, TrackedEntity>,
    max_buffer_size: usize,
    thresholds: LivenessThresholds,
    /// Arrival times inside the trailing rate window
    recent: VecDeque<DateTime<Utc>>,
    samples_per_second: usize,
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_SIZE)
    }
}

impl PositionTracker {
    /// `max_buffer_size` is clamped to at least one sample.
    pub fn new(max_buffer_size: usize) -> Self {
        Self::with_thresholds(max_buffer_size, LivenessThresholds::default())
    }

    pub fn with_thresholds(max_buffer_size: usize, thresholds: LivenessThresholds) -> Self {
        Self {
            entities: HashMap::new(),
            max_buffer_size: max_buffer_size.max(1),
            thresholds,
            recent: VecDeque::new(),
            samples_per_second: 0,
        }
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Change the buffer bound; existing buffers keep their most recent samples.
    pub fn set_max_buffer_size(&mut self, max: usize) {
        self.max_buffer_size = max.max(1);
        for entity in self.entities.values_mut() {
            entity.trim(self.max_buffer_size);
        }
    }

    /// Record one sample, returning the entity's liveness after it.
    pub fn apply(&mut self, sample: PositionSample, now: DateTime<Utc>) -> Liveness {
        let max = self.max_buffer_size;
        let thresholds = self.thresholds;

        let entity = self
            .entities
            .entry(sample.entity_id.clone())
            .or_insert_with(|| {
                debug!(entity = %sample.entity_id, "tracking new entity");
                TrackedEntity::new(sample.entity_id.clone(), now)
            });

        entity.samples.push_back(sample);
        entity.trim(max);
        entity.last_update = now;
        entity.liveness = entity.classify(&thresholds, now);
        let liveness = entity.liveness;

        let window = TimeDelta::milliseconds(RATE_WINDOW_MS);
        self.recent.push_back(now);
        while self
            .recent
            .front()
            .is_some_and(|t| now - *t >= window)
        {
            self.recent.pop_front();
        }
        self.samples_per_second = self.recent.len();

        liveness
    }

    /// Re-evaluate every entity against the wall clock, whether or not new
    /// samples arrived. Returns the entities whose classification changed.
    pub fn reclassify(&mut self, now: DateTime<Utc>) -> Vec<LivenessChange> {
        let mut changes = Vec::new();
        for entity in self.entities.values_mut() {
            let next = entity.classify(&self.thresholds, now);
            if next != entity.liveness {
                changes.push(LivenessChange {
                    entity_id: entity.entity_id.clone(),
                    from: entity.liveness,
                    to: next,
                });
                entity.liveness = next;
            }
        }
        changes.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        changes
    }

    pub fn entity(&self, entity_id: &str) -> Option<&TrackedEntity> {
        self.entities.get(entity_id)
    }

    /// All tracked entities, ordered by id.
    pub fn entities(&self) -> Vec<&TrackedEntity> {
        let mut all: Vec<_> = self.entities.values().collect();
        all.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        all
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Samples received across all entities in the trailing second, as of the
    /// most recent arrival.
    pub fn samples_per_second(&self) -> usize {
        self.samples_per_second
    }

    pub fn liveness_counts(&self) -> BTreeMap<Liveness, usize> {
        let mut counts = BTreeMap::new();
        for entity in self.entities.values() {
            *counts.entry(entity.liveness).or_insert(0) += 1;
        }
        counts
    }
}

impl StreamProcessor for PositionTracker {
    const KIND: MessageKind = MessageKind::GpsLocationUpdate;

    fn process(&mut self, message: &PushMessage, now: DateTime<Utc>) -> Result<(), DecodeError> {
        let sample = PositionSample::from_message(message)?;
        self.apply(sample, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        "2025-01-27T10:00:00Z".parse().unwrap()
    }

    fn sample(entity: &str, secs: i64) -> PositionSample {
        PositionSample {
            entity_id: entity.to_string(),
            latitude: 31.23,
            longitude: 121.47,
            speed_kmh: None,
            heading: None,
            altitude: None,
            accuracy: None,
            address: None,
            shipment_id: None,
            timestamp: t0() + TimeDelta::seconds(secs),
        }
    }

    fn moving(lat: f64, lon: f64, minutes: i64, speed: Option<f64>) -> PositionSample {
        PositionSample {
            latitude: lat,
            longitude: lon,
            speed_kmh: speed,
            timestamp: t0() + TimeDelta::minutes(minutes),
            ..sample("V1", 0)
        }
    }

    #[test]
    fn classify_thresholds() {
        assert_eq!(Liveness::classify(TimeDelta::seconds(30)), Liveness::Fresh);
        assert_eq!(Liveness::classify(TimeDelta::seconds(59)), Liveness::Fresh);
        assert_eq!(Liveness::classify(TimeDelta::seconds(60)), Liveness::Warning);
        assert_eq!(Liveness::classify(TimeDelta::seconds(90)), Liveness::Warning);
        assert_eq!(Liveness::classify(TimeDelta::seconds(120)), Liveness::Stale);
        assert_eq!(Liveness::classify(TimeDelta::seconds(150)), Liveness::Stale);
        assert_eq!(Liveness::classify(TimeDelta::seconds(-5)), Liveness::Fresh);
    }

    #[test]
    fn buffer_keeps_most_recent_samples() {
        let mut tracker = PositionTracker::new(2);
        for i in 1..=3 {
            tracker.apply(sample("V1", i), t0() + TimeDelta::seconds(i));
        }
        let stamps: Vec<_> = tracker
            .entity("V1")
            .unwrap()
            .samples()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(
            stamps,
            vec![t0() + TimeDelta::seconds(2), t0() + TimeDelta::seconds(3)]
        );
    }

    #[test]
    fn shrinking_the_buffer_trims_existing_entities() {
        let mut tracker = PositionTracker::new(10);
        for i in 0..6 {
            tracker.apply(sample("V1", i), t0());
        }
        tracker.set_max_buffer_size(3);
        let entity = tracker.entity("V1").unwrap();
        assert_eq!(entity.samples().len(), 3);
        assert_eq!(entity.latest().unwrap().timestamp, t0() + TimeDelta::seconds(5));

        tracker.set_max_buffer_size(0);
        assert_eq!(tracker.max_buffer_size(), 1);
    }

    #[test]
    fn silent_entity_goes_stale_on_reclassify() {
        let mut tracker = PositionTracker::default();
        tracker.apply(sample("V1", 0), t0());
        tracker.apply(sample("V2", 0), t0());
        assert!(tracker.reclassify(t0() + TimeDelta::seconds(30)).is_empty());

        tracker.apply(sample("V2", 80), t0() + TimeDelta::seconds(80));
        let changes = tracker.reclassify(t0() + TimeDelta::seconds(90));
        assert_eq!(
            changes,
            vec![LivenessChange {
                entity_id: "V1".into(),
                from: Liveness::Fresh,
                to: Liveness::Warning,
            }]
        );

        tracker.reclassify(t0() + TimeDelta::seconds(150));
        assert_eq!(tracker.entity("V1").unwrap().liveness(), Liveness::Stale);
        assert_eq!(tracker.entity("V2").unwrap().liveness(), Liveness::Warning);

        let counts = tracker.liveness_counts();
        assert_eq!(counts.get(&Liveness::Stale), Some(&1));
        assert_eq!(counts.get(&Liveness::Warning), Some(&1));
        assert_eq!(counts.get(&Liveness::Fresh), None);
    }

    #[test]
    fn late_sample_is_classified_by_its_own_timestamp() {
        let mut tracker = PositionTracker::default();
        let liveness = tracker.apply(sample("V1", 0), t0() + TimeDelta::seconds(95));
        assert_eq!(liveness, Liveness::Warning);
        assert_eq!(
            tracker.entity("V1").unwrap().last_update(),
            t0() + TimeDelta::seconds(95)
        );
    }

    #[test]
    fn sample_rate_counts_trailing_second() {
        let mut tracker = PositionTracker::default();
        let ms = TimeDelta::milliseconds;
        tracker.apply(sample("V1", 0), t0());
        tracker.apply(sample("V2", 0), t0() + ms(300));
        tracker.apply(sample("V1", 0), t0() + ms(900));
        assert_eq!(tracker.samples_per_second(), 3);

        tracker.apply(sample("V3", 0), t0() + ms(1000));
        assert_eq!(tracker.samples_per_second(), 3);

        tracker.apply(sample("V3", 0), t0() + ms(2500));
        assert_eq!(tracker.samples_per_second(), 1);
    }

    #[test]
    fn decodes_gps_payload() {
        let msg = PushMessage::new(
            "gps_location_update",
            json!({
                "vehicle_id": "V7",
                "shipment_id": "S1",
                "latitude": "31.2304",
                "longitude": 121.4737,
                "speed": 42.5,
                "heading": 90,
                "address": "Pudong",
                "timestamp": "2025-01-27T10:30:00"
            }),
            t0(),
        );
        let s = PositionSample::from_message(&msg).unwrap();
        assert_eq!(s.entity_id, "V7");
        assert_eq!(s.shipment_id.as_deref(), Some("S1"));
        assert_eq!(s.latitude, 31.2304);
        assert_eq!(s.speed_kmh, Some(42.5));
        assert_eq!(s.heading, Some(90.0));
        assert_eq!(s.timestamp, t0() + TimeDelta::minutes(30));
    }

    #[test]
    fn shipment_id_stands_in_for_missing_vehicle() {
        let msg = PushMessage::new(
            "gps_location_update",
            json!({"shipment_id": "S9", "latitude": 1.0, "longitude": 2.0}),
            t0(),
        );
        let s = PositionSample::from_message(&msg).unwrap();
        assert_eq!(s.entity_id, "S9");
        assert_eq!(s.timestamp, t0());
    }

    #[test]
    fn rejects_bad_payloads() {
        for data in [
            json!({"latitude": 1.0, "longitude": 2.0}),
            json!({"vehicle_id": "V1", "longitude": 2.0}),
            json!({"vehicle_id": "V1", "latitude": 91.0, "longitude": 2.0}),
            json!({"vehicle_id": "V1", "latitude": 1.0, "longitude": 2.0, "speed": "fast"}),
            json!("V1"),
        ] {
            let msg = PushMessage::new("gps_location_update", data.clone(), t0());
            assert!(PositionSample::from_message(&msg).is_err(), "{data}");
        }

        let mut tracker = PositionTracker::default();
        let msg = PushMessage::new("gps_location_update", json!({}), t0());
        assert!(tracker.process(&msg, t0()).is_err());
        assert!(tracker.is_empty());
    }

    #[test]
    fn haversine_distance() {
        // Shanghai to Beijing, roughly 1067 km
        let sh = moving(31.2304, 121.4737, 0, None);
        let bj = moving(39.9042, 116.4074, 0, None);
        let d = sh.distance_km(&bj);
        assert!((d - 1067.0).abs() < 5.0, "{d}");
        assert_eq!(sh.distance_km(&sh), 0.0);
    }

    #[test]
    fn route_summary_counts_stops() {
        let mut tracker = PositionTracker::default();
        for s in [
            moving(31.00, 121.00, 0, None),
            moving(31.05, 121.00, 5, Some(60.0)),
            // slow for 10 minutes: a stop
            moving(31.05, 121.00, 15, Some(0.0)),
            // slow but only one minute later: traffic
            moving(31.05, 121.00, 16, Some(3.0)),
            moving(31.10, 121.00, 21, Some(90.0)),
        ] {
            tracker.apply(s, t0());
        }

        let summary = tracker.entity("V1").unwrap().route_summary();
        assert!((summary.distance_km - 11.12).abs() < 0.05, "{}", summary.distance_km);
        assert_eq!(summary.duration_minutes, 21);
        assert_eq!(summary.max_speed_kmh, 90.0);
        assert!((summary.average_speed_kmh - 38.25).abs() < 1e-9);
        assert_eq!(summary.stop_count, 1);
        assert_eq!(summary.stop_minutes, 10);
    }

    #[test]
    fn route_summary_of_single_sample_is_empty() {
        let mut tracker = PositionTracker::default();
        tracker.apply(sample("V1", 0), t0());
        assert_eq!(
            tracker.entity("V1").unwrap().route_summary(),
            RouteSummary::default()
        );
    }
}
