//! Health events from `/users/{id}/events`: all-day stress, blood oxygen and
//! PAI. These are fetched best-effort; an item that does not parse is
//! dropped on its own.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventSource {
    Stress,
    BloodOxygen,
    Pai,
}

impl EventSource {
    pub const ALL: [EventSource; 3] = [EventSource::Stress, EventSource::BloodOxygen, EventSource::Pai];

    /// `eventType` query value.
    pub fn event_type(self) -> &'static str {
        match self {
            EventSource::Stress => "all_day_stress",
            EventSource::BloodOxygen => "blood_oxygen",
            EventSource::Pai => "PaiHealthInfo",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventSource::Stress => "stress",
            EventSource::BloodOxygen => "blood_oxygen",
            EventSource::Pai => "pai",
        }
    }
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("unexpected event shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("event timestamp {0} ms is out of range")]
    Timestamp(i64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct StressSample {
    pub timestamp: DateTime<Utc>,
    pub value: i64,
}

/// One day of all-day stress, with the point-in-time readings if the vendor
/// sent them.
#[derive(Clone, Debug, PartialEq)]
pub struct StressDay {
    pub timestamp: DateTime<Utc>,
    pub min: i64,
    pub max: i64,
    pub mean: i64,
    pub relaxed_pct: i64,
    pub normal_pct: i64,
    pub medium_pct: i64,
    pub high_pct: i64,
    pub samples: Vec<StressSample>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BloodOxygenEvent {
    /// Oxygen desaturation index reading.
    Odi { timestamp: DateTime<Utc>, odi: f64, score: f64 },
    /// Possible sleep apnea event.
    Osa { timestamp: DateTime<Utc>, spo2_decrease: f64 },
    /// Reading triggered by hand on the band.
    Manual { timestamp: DateTime<Utc>, spo2: f64 },
}

impl BloodOxygenEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            BloodOxygenEvent::Odi { timestamp, .. }
            | BloodOxygenEvent::Osa { timestamp, .. }
            | BloodOxygenEvent::Manual { timestamp, .. } => *timestamp,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PaiZone {
    /// `low`, `medium` or `high`.
    pub bound: &'static str,
    pub minutes: i64,
    pub lower_limit: i64,
    pub pai: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PaiDay {
    pub timestamp: DateTime<Utc>,
    pub max_hr: i64,
    pub rest_hr: i64,
    pub zones: Vec<PaiZone>,
    pub scorable_activities: usize,
    pub daily_pai: f64,
    pub total_pai: f64,
}

/// Everything the event sources returned for the window. Sources that failed
/// are listed in `skipped` and contribute nothing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventBatch {
    pub stress: Vec<StressDay>,
    pub blood_oxygen: Vec<BloodOxygenEvent>,
    pub pai: Vec<PaiDay>,
    pub skipped: Vec<EventSource>,
}

impl EventBatch {
    pub fn is_empty(&self) -> bool {
        self.stress.is_empty() && self.blood_oxygen.is_empty() && self.pai.is_empty()
    }
}

/// The vendor sends numbers both bare and as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Number(f64),
    Text(String),
}

fn number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match Lenient::deserialize(d)? {
        Lenient::Number(n) => Ok(n),
        Lenient::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("not a number: {s:?}"))),
    }
}

fn integer<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    number(d).map(|n| n as i64)
}

fn millis(ms: i64) -> Result<DateTime<Utc>, EventError> {
    DateTime::from_timestamp_millis(ms).ok_or(EventError::Timestamp(ms))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStress {
    #[serde(deserialize_with = "integer")]
    timestamp: i64,
    #[serde(deserialize_with = "integer")]
    min_stress: i64,
    #[serde(deserialize_with = "integer")]
    max_stress: i64,
    #[serde(deserialize_with = "integer")]
    avg_stress: i64,
    #[serde(deserialize_with = "integer")]
    relax_proportion: i64,
    #[serde(deserialize_with = "integer")]
    normal_proportion: i64,
    #[serde(deserialize_with = "integer")]
    medium_proportion: i64,
    #[serde(deserialize_with = "integer")]
    high_proportion: i64,
    /// JSON-encoded list of `{time, value}`.
    #[serde(default)]
    data: Option<String>,
}

#[derive(Deserialize)]
struct RawStressSample {
    #[serde(deserialize_with = "integer")]
    time: i64,
    #[serde(deserialize_with = "integer")]
    value: i64,
}

pub fn parse_stress(item: &Value) -> Result<StressDay, EventError> {
    let raw = RawStress::deserialize(item)?;
    let samples = match raw.data.as_deref().filter(|d| !d.trim().is_empty()) {
        Some(data) => serde_json::from_str::<Vec<RawStressSample>>(data)?
            .into_iter()
            .map(|s| {
                Ok(StressSample {
                    timestamp: millis(s.time)?,
                    value: s.value,
                })
            })
            .collect::<Result<Vec<_>, EventError>>()?,
        None => Vec::new(),
    };
    Ok(StressDay {
        timestamp: millis(raw.timestamp)?,
        min: raw.min_stress,
        max: raw.max_stress,
        mean: raw.avg_stress,
        relaxed_pct: raw.relax_proportion,
        normal_pct: raw.normal_proportion,
        medium_pct: raw.medium_proportion,
        high_pct: raw.high_proportion,
        samples,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBloodOxygen {
    #[serde(deserialize_with = "integer")]
    timestamp: i64,
    sub_type: String,
}

#[derive(Deserialize)]
struct RawOdi {
    #[serde(deserialize_with = "number")]
    odi: f64,
    #[serde(deserialize_with = "number")]
    score: f64,
}

#[derive(Deserialize)]
struct RawExtra {
    extra: String,
}

#[derive(Deserialize)]
struct RawOsa {
    #[serde(deserialize_with = "number")]
    spo2_decrease: f64,
}

#[derive(Deserialize)]
struct RawClick {
    #[serde(deserialize_with = "number")]
    spo2: f64,
}

/// Sub-types other than `odi`, `osa_event` and `click` yield `None`.
pub fn parse_blood_oxygen(item: &Value) -> Result<Option<BloodOxygenEvent>, EventError> {
    let head = RawBloodOxygen::deserialize(item)?;
    let timestamp = millis(head.timestamp)?;
    let event = match head.sub_type.as_str() {
        "odi" => {
            let raw = RawOdi::deserialize(item)?;
            BloodOxygenEvent::Odi {
                timestamp,
                odi: raw.odi,
                score: raw.score,
            }
        }
        "osa_event" => {
            let extra = RawExtra::deserialize(item)?;
            let raw: RawOsa = serde_json::from_str(&extra.extra)?;
            BloodOxygenEvent::Osa {
                timestamp,
                spo2_decrease: raw.spo2_decrease,
            }
        }
        "click" => {
            let extra = RawExtra::deserialize(item)?;
            let raw: RawClick = serde_json::from_str(&extra.extra)?;
            BloodOxygenEvent::Manual {
                timestamp,
                spo2: raw.spo2,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPai {
    #[serde(deserialize_with = "integer")]
    timestamp: i64,
    #[serde(deserialize_with = "integer")]
    max_hr: i64,
    #[serde(deserialize_with = "integer")]
    rest_hr: i64,
    #[serde(deserialize_with = "integer")]
    low_zone_minutes: i64,
    #[serde(deserialize_with = "integer")]
    low_zone_lower_limit: i64,
    #[serde(deserialize_with = "number")]
    low_zone_pai: f64,
    #[serde(deserialize_with = "integer")]
    medium_zone_minutes: i64,
    #[serde(deserialize_with = "integer")]
    medium_zone_lower_limit: i64,
    #[serde(deserialize_with = "number")]
    medium_zone_pai: f64,
    #[serde(deserialize_with = "integer")]
    high_zone_minutes: i64,
    #[serde(deserialize_with = "integer")]
    high_zone_lower_limit: i64,
    #[serde(deserialize_with = "number")]
    high_zone_pai: f64,
    #[serde(default)]
    activity_scores: Vec<Value>,
    #[serde(deserialize_with = "number")]
    daily_pai: f64,
    #[serde(deserialize_with = "number")]
    total_pai: f64,
}

pub fn parse_pai(item: &Value) -> Result<PaiDay, EventError> {
    let raw = RawPai::deserialize(item)?;
    Ok(PaiDay {
        timestamp: millis(raw.timestamp)?,
        max_hr: raw.max_hr,
        rest_hr: raw.rest_hr,
        zones: vec![
            PaiZone {
                bound: "low",
                minutes: raw.low_zone_minutes,
                lower_limit: raw.low_zone_lower_limit,
                pai: raw.low_zone_pai,
            },
            PaiZone {
                bound: "medium",
                minutes: raw.medium_zone_minutes,
                lower_limit: raw.medium_zone_lower_limit,
                pai: raw.medium_zone_pai,
            },
            PaiZone {
                bound: "high",
                minutes: raw.high_zone_minutes,
                lower_limit: raw.high_zone_lower_limit,
                pai: raw.high_zone_pai,
            },
        ],
        scorable_activities: raw.activity_scores.len(),
        daily_pai: raw.daily_pai,
        total_pai: raw.total_pai,
    })
}
