//! Time-series points handed to the record writer.

use crate::decode::DecodedDay;
use crate::events::{BloodOxygenEvent, EventBatch, PaiDay, StressDay};
use crate::{HeartRateSample, SleepSegment, SleepSummary, StepBucket, StepTotals};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

/// Tag carrying the band serial on every point of a run.
pub const SERIAL_TAG: &str = "serial_num";
/// Serial used until a day summary names one.
pub const UNKNOWN_SERIAL: &str = "unknown";

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

/// A store-agnostic point. Tags and fields are kept sorted by key.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
    pub tags: BTreeMap<String, String>,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            timestamp,
            fields: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }
}

/// Destination for points, e.g. a time-series database.
#[async_trait]
pub trait PointWriter: Send + Sync {
    async fn write(
        &self,
        points: &[Point],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Set the serial tag on every point.
pub fn tag_serial(points: &mut [Point], serial: &str) {
    for p in points {
        p.tags.insert(SERIAL_TAG.to_string(), serial.to_string());
    }
}

pub fn step_point(measurement: &str, bucket: &StepBucket) -> Point {
    Point::new(measurement, bucket.timestamp)
        .tag("activity_type", &bucket.activity.label())
        .field("steps", i64::from(bucket.steps))
        .field("distance_m", bucket.distance_m)
        .field("calories", bucket.calories)
        .field("activity_duration_m", bucket.duration_minutes())
}

pub fn step_totals_point(measurement: &str, stamp: DateTime<Utc>, totals: &StepTotals) -> Point {
    Point::new(measurement, stamp)
        .tag("activity_type", "steps")
        .field("total_steps", i64::from(totals.steps))
        .field("distance_m", totals.distance_m)
        .field("calories", totals.calories)
        .field("recorded_activities", totals.activities as i64)
}

pub fn sleep_point(measurement: &str, segment: &SleepSegment) -> Point {
    Point::new(measurement, segment.start)
        .tag("activity_type", "sleep_stage")
        .tag("sleep_type", segment.stage.as_str())
        .field("sleep_stage", segment.stage.as_str())
        .field("duration_min", segment.duration_minutes())
}

pub fn sleep_summary_point(measurement: &str, stamp: DateTime<Utc>, night: &SleepSummary) -> Point {
    let rfc3339 = |t: DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);
    Point::new(measurement, stamp)
        .tag("activity_type", "sleep")
        .field("total_sleep_min", i64::from(night.total_min()))
        .field("deep_sleep_min", i64::from(night.deep_min))
        .field("light_sleep_min", i64::from(night.light_min))
        .field("rem_sleep_min", night.rem_min)
        .field("slept_from", rfc3339(night.slept_from))
        .field("slept_to", rfc3339(night.slept_to))
        .field("recorded_sleep_stages", night.stages as i64)
}

pub fn heart_rate_point(measurement: &str, sample: &HeartRateSample) -> Point {
    Point::new(measurement, sample.timestamp)
        .tag("hr_measure", "periodic")
        .field("heart_rate", i64::from(sample.bpm))
}

/// All points for a decoded day, ordered by timestamp. Day-level counters
/// (totals, goal, sync, sleep summary) are stamped at `stamp`.
pub fn day_points(measurement: &str, day: &DecodedDay, stamp: DateTime<Utc>) -> Vec<Point> {
    let mut points: Vec<Point> = day
        .steps
        .iter()
        .map(|b| step_point(measurement, b))
        .chain(day.sleep.iter().map(|s| sleep_point(measurement, s)))
        .chain(day.heart_rate.iter().map(|h| heart_rate_point(measurement, h)))
        .collect();
    if let Some(totals) = &day.step_totals {
        points.push(step_totals_point(measurement, stamp, totals));
    }
    if let Some(night) = &day.sleep_summary {
        points.push(sleep_summary_point(measurement, stamp, night));
    }
    if let Some(goal) = day.step_goal {
        points.push(Point::new(measurement, stamp).field("step_goal", goal));
    }
    if let Some(sync) = day.last_sync {
        points.push(Point::new(measurement, stamp).field("last_sync", sync));
    }
    points.sort_by_key(|p| p.timestamp);
    points
}

fn stress_points(measurement: &str, day: &StressDay) -> Vec<Point> {
    let daily = Point::new(measurement, day.timestamp)
        .tag("stress", "daily")
        .field("minimum_stress_level", day.min)
        .field("max_stress_level", day.max)
        .field("mean_stress_level", day.mean)
        .field("relaxed_time_perc", day.relaxed_pct)
        .field("normal_stress_time_perc", day.normal_pct)
        .field("medium_stress_time_perc", day.medium_pct)
        .field("high_stress_time_perc", day.high_pct);
    std::iter::once(daily)
        .chain(day.samples.iter().map(|s| {
            Point::new(measurement, s.timestamp)
                .tag("stress", "point_in_time")
                .field("current_stress_level", s.value)
        }))
        .collect()
}

fn blood_oxygen_point(measurement: &str, event: &BloodOxygenEvent) -> Point {
    let p = Point::new(measurement, event.timestamp());
    match event {
        BloodOxygenEvent::Odi { odi, score, .. } => p
            .tag("blood_event", "odi")
            .field("odi_read", *odi)
            .field("score", *score),
        BloodOxygenEvent::Osa { spo2_decrease, .. } => p
            .tag("blood_event", "osa")
            .field("spo2_decrease", *spo2_decrease),
        BloodOxygenEvent::Manual { spo2, .. } => p
            .tag("blood_event", "manual_read")
            .field("spo2_level", *spo2),
    }
}

fn pai_points(measurement: &str, day: &PaiDay) -> Vec<Point> {
    let base = || Point::new(measurement, day.timestamp).tag("PAI_measure", "daily");
    let mut points = vec![
        base()
            .tag("hr_measure", "PAI")
            .tag("hr_state", "max")
            .field("heart_rate", day.max_hr),
        base()
            .tag("hr_measure", "PAI")
            .tag("hr_state", "resting")
            .field("heart_rate", day.rest_hr),
    ];
    points.extend(day.zones.iter().map(|z| {
        base()
            .tag("PAI_bound", z.bound)
            .field("activity_duration_m", z.minutes)
            .field("pai_score_bound", z.lower_limit)
            .field("pai_score", z.pai)
    }));
    points.push(
        base()
            .tag("PAI_bound", "daily")
            .field("scorable_activities", day.scorable_activities as i64)
            .field("pai_score", day.daily_pai)
            .field("total_pai", day.total_pai),
    );
    points
}

/// Points for every fetched health event, ordered by timestamp.
pub fn event_points(measurement: &str, batch: &EventBatch) -> Vec<Point> {
    let mut points: Vec<Point> = batch
        .stress
        .iter()
        .flat_map(|d| stress_points(measurement, d))
        .chain(batch.blood_oxygen.iter().map(|e| blood_oxygen_point(measurement, e)))
        .chain(batch.pai.iter().flat_map(|d| pai_points(measurement, d)))
        .collect();
    points.sort_by_key(|p| p.timestamp);
    points
}
