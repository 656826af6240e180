//! Pure decoding of a day's vendor payload.
//!
//! The day summary is base64 of a JSON document. The keys read here are:
//!
//! * `stp`: `ttl`, `dis`, `cal` day totals and a `stage` list of activity
//!   buckets `{start, stop, mode, step, cal, dis}`. Buckets without `dis`
//!   record no distance.
//! * `slp`: `st`/`ed` epoch seconds, `dp`/`lt` deep and light minutes and a
//!   `stage` list of sleep stages `{start, stop, mode}`.
//! * `goal`, `sync` (epoch seconds) and `sn` (device serial).
//!
//! `start`/`stop` are minutes from midnight of the day. Other keys are
//! ignored. A payload whose shape or offsets do not fit is a [`DecodeError`]
//! for that day.
//!
//! The heart-rate blob is base64 with one byte per minute.

use crate::utils::{MINUTES_PER_DAY, day_start};
use crate::{
    ActivityKind, DaySummary, HeartRateSample, SleepSegment, SleepStage, SleepSummary,
    StepBucket, StepTotals,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Heart-rate readings at or above this value mean "no reading".
pub const HEART_RATE_SENTINEL: u8 = 200;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot decode day {date}: {kind}")]
pub struct DecodeError {
    pub date: NaiveDate,
    pub kind: DecodeErrorKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeErrorKind {
    #[error("summary is not valid base64")]
    SummaryEncoding,
    #[error("summary does not match the expected shape: {0}")]
    SummaryShape(String),
    #[error("offset {0} is outside the day")]
    OffsetOutsideDay(u32),
    #[error("stage stops at {stop} before it starts at {start}")]
    StageReversed { start: u32, stop: u32 },
    #[error("stage starting at {start} overlaps the previous one ending at {previous}")]
    StageOutOfOrder { previous: u32, start: u32 },
    #[error("unknown sleep stage code {0}")]
    UnknownStage(u8),
    #[error("epoch timestamp {0} is out of range")]
    InvalidTimestamp(i64),
    #[error("heart-rate blob is not valid base64")]
    HeartRateEncoding,
    #[error("{readings} readings do not fit {capacity} one-minute buckets")]
    ReadingCount { readings: usize, capacity: usize },
}

/// Records decoded from one [`DaySummary`], each list in chronological order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedDay {
    pub steps: Vec<StepBucket>,
    pub sleep: Vec<SleepSegment>,
    pub heart_rate: Vec<HeartRateSample>,
    pub step_totals: Option<StepTotals>,
    pub sleep_summary: Option<SleepSummary>,
    pub step_goal: Option<i64>,
    /// Last band sync, epoch seconds.
    pub last_sync: Option<i64>,
    pub serial: Option<String>,
}

impl DecodedDay {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
            && self.sleep.is_empty()
            && self.heart_rate.is_empty()
            && self.step_totals.is_none()
            && self.sleep_summary.is_none()
            && self.step_goal.is_none()
            && self.last_sync.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    #[serde(default)]
    stp: Option<RawSteps>,
    #[serde(default)]
    slp: Option<RawSleep>,
    #[serde(default)]
    goal: Option<i64>,
    #[serde(default)]
    sync: Option<i64>,
    #[serde(default)]
    sn: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSteps {
    ttl: u32,
    dis: f64,
    cal: f64,
    #[serde(default)]
    stage: Vec<RawActivity>,
}

#[derive(Debug, Deserialize)]
struct RawActivity {
    start: u32,
    stop: u32,
    mode: u8,
    step: u32,
    cal: f64,
    #[serde(default)]
    dis: f64,
}

#[derive(Debug, Deserialize)]
struct RawSleep {
    st: i64,
    ed: i64,
    dp: u32,
    lt: u32,
    #[serde(default)]
    stage: Vec<RawSleepStage>,
}

#[derive(Debug, Deserialize)]
struct RawSleepStage {
    start: u32,
    stop: u32,
    mode: u8,
}

/// Decode a whole day: the summary plus the heart-rate blob if present.
pub fn decode(day: &DaySummary) -> Result<DecodedDay, DecodeError> {
    let mut decoded = decode_summary(day.date, &day.encoded_blob)?;
    if let Some(blob) = day.heart_rate_blob.as_deref() {
        decoded.heart_rate = decode_heart_rate(day.date, blob)?;
    }
    Ok(decoded)
}

/// Decode the base64 JSON summary for `date`. An empty blob yields an empty
/// day.
pub fn decode_summary(date: NaiveDate, blob: &str) -> Result<DecodedDay, DecodeError> {
    let fail = |kind| DecodeError { date, kind };
    let blob = blob.trim();
    if blob.is_empty() {
        return Ok(DecodedDay::default());
    }
    let json = STANDARD
        .decode(blob)
        .map_err(|_| fail(DecodeErrorKind::SummaryEncoding))?;
    let raw: RawSummary = serde_json::from_slice(&json)
        .map_err(|e| fail(DecodeErrorKind::SummaryShape(e.to_string())))?;

    let mut day = DecodedDay {
        step_goal: raw.goal,
        last_sync: raw.sync,
        serial: raw.sn.filter(|s| !s.trim().is_empty()),
        ..DecodedDay::default()
    };
    if let Some(stp) = raw.stp {
        day.steps = decode_steps(date, &stp.stage).map_err(fail)?;
        day.step_totals = Some(StepTotals {
            steps: stp.ttl,
            distance_m: stp.dis,
            calories: stp.cal,
            activities: stp.stage.len(),
        });
    }
    if let Some(slp) = raw.slp {
        day.sleep = decode_sleep(date, &slp.stage).map_err(fail)?;
        day.sleep_summary = Some(summarise_sleep(&slp, &day.sleep).map_err(fail)?);
    }
    Ok(day)
}

/// Check a `[start, stop]` minute span against the day and the span before
/// it.
fn check_span(previous: Option<u32>, start: u32, stop: u32) -> Result<(), DecodeErrorKind> {
    if start >= MINUTES_PER_DAY {
        return Err(DecodeErrorKind::OffsetOutsideDay(start));
    }
    if stop > MINUTES_PER_DAY {
        return Err(DecodeErrorKind::OffsetOutsideDay(stop));
    }
    if stop < start {
        return Err(DecodeErrorKind::StageReversed { start, stop });
    }
    match previous {
        Some(previous) if start < previous => {
            Err(DecodeErrorKind::StageOutOfOrder { previous, start })
        }
        _ => Ok(()),
    }
}

fn at_minute(date: NaiveDate, minutes: u32) -> DateTime<Utc> {
    day_start(date) + Duration::minutes(i64::from(minutes))
}

fn decode_steps(date: NaiveDate, rows: &[RawActivity]) -> Result<Vec<StepBucket>, DecodeErrorKind> {
    let mut previous = None;
    let mut buckets = Vec::with_capacity(rows.len());
    for row in rows {
        check_span(previous, row.start, row.stop)?;
        previous = Some(row.stop);
        buckets.push(StepBucket {
            timestamp: at_minute(date, row.start),
            end: at_minute(date, row.stop),
            steps: row.step,
            distance_m: row.dis,
            calories: row.cal,
            activity: ActivityKind::from_code(row.mode),
        });
    }
    Ok(buckets)
}

fn decode_sleep(
    date: NaiveDate,
    rows: &[RawSleepStage],
) -> Result<Vec<SleepSegment>, DecodeErrorKind> {
    let mut previous = None;
    let mut segments = Vec::with_capacity(rows.len());
    for row in rows {
        check_span(previous, row.start, row.stop)?;
        previous = Some(row.stop);
        let stage = SleepStage::from_code(row.mode).ok_or(DecodeErrorKind::UnknownStage(row.mode))?;
        segments.push(SleepSegment {
            start: at_minute(date, row.start),
            end: at_minute(date, row.stop),
            stage,
        });
    }
    // waking up ends the night; it is not a segment of its own
    while segments.last().is_some_and(|s| s.stage == SleepStage::Awake) {
        segments.pop();
    }
    Ok(segments)
}

fn summarise_sleep(
    slp: &RawSleep,
    segments: &[SleepSegment],
) -> Result<SleepSummary, DecodeErrorKind> {
    let epoch = |secs: i64| {
        DateTime::from_timestamp(secs, 0).ok_or(DecodeErrorKind::InvalidTimestamp(secs))
    };
    Ok(SleepSummary {
        slept_from: epoch(slp.st)?,
        slept_to: epoch(slp.ed)?,
        deep_min: slp.dp,
        light_min: slp.lt,
        rem_min: segments
            .iter()
            .filter(|s| s.stage == SleepStage::Rem)
            .map(SleepSegment::duration_minutes)
            .sum(),
        stages: slp.stage.len(),
    })
}

/// Decode a base64 blob of one-byte per-minute heart-rate readings. Reading
/// `i` is stamped `i + 1` minutes after midnight of `date`; sentinel
/// readings are skipped.
pub fn decode_heart_rate(date: NaiveDate, blob: &str) -> Result<Vec<HeartRateSample>, DecodeError> {
    let fail = |kind| DecodeError { date, kind };
    let blob = blob.trim();
    if blob.is_empty() {
        return Ok(Vec::new());
    }
    let bytes = STANDARD
        .decode(blob)
        .map_err(|_| fail(DecodeErrorKind::HeartRateEncoding))?;
    let capacity = MINUTES_PER_DAY as usize;
    if bytes.len() > capacity {
        return Err(fail(DecodeErrorKind::ReadingCount {
            readings: bytes.len(),
            capacity,
        }));
    }

    let start = day_start(date);
    Ok(bytes
        .iter()
        .enumerate()
        .filter(|(_, bpm)| **bpm < HEART_RATE_SENTINEL)
        .map(|(minute, &bpm)| HeartRateSample {
            timestamp: start + Duration::minutes(minute as i64 + 1),
            bpm,
        })
        .collect())
}
