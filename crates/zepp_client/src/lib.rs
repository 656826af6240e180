//! Client for the Zepp (Mi Fit / Huami) cloud API: authentication, day-summary
//! and health-event retrieval, and decoding of the per-day summaries.

use chrono::{DateTime, NaiveDate, Utc};
use std::borrow::Cow;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

pub mod auth;
pub mod config;
pub mod decode;
pub mod events;
pub mod http_client;
pub mod observability;
pub mod pipeline;
pub mod points;
pub mod utils;

pub use auth::{LoginClient, LoginHop, TokenProvider};
pub use decode::{DecodeError, DecodeErrorKind, DecodedDay};
pub use events::{EventBatch, EventSource};
pub use http_client::{ActivityFetcher, EventFetcher};
pub use points::{FieldValue, Point, PointWriter};

#[derive(Debug, Error)]
pub enum ZeppError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("authentication failed at {hop}: {reason}")]
    AuthenticationFailed {
        hop: LoginHop,
        status: Option<u16>,
        reason: String,
    },
    #[error("session rejected by vendor API (HTTP {status})")]
    SessionExpired { status: u16 },
    #[error("fetch error: {message}")]
    Fetch {
        status: Option<u16>,
        message: String,
    },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("point writer error: {0}")]
    Sink(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ZeppError {
    /// HTTP status attached to the error, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ZeppError::AuthenticationFailed { status, .. } | ZeppError::Fetch { status, .. } => {
                *status
            }
            ZeppError::SessionExpired { status } => Some(*status),
            _ => None,
        }
    }
}

/// An authenticated vendor session. Built once per run and never mutated.
#[derive(Clone, Debug)]
pub struct Session {
    token: SecretString,
    user_id: String,
    expires_hint: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        token: SecretString,
        user_id: impl Into<String>,
        expires_hint: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            token,
            user_id: user_id.into(),
            expires_hint,
        }
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }

    pub(crate) fn token_str(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn expires_hint(&self) -> Option<DateTime<Utc>> {
        self.expires_hint
    }
}

/// One day of raw vendor data, opaque until decoded.
///
/// `encoded_blob` is the vendor's base64 JSON day summary. A day the vendor
/// has no record for carries an empty `encoded_blob`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub encoded_blob: String,
    /// Base64 heart-rate readings, one byte per minute, when the band
    /// recorded any.
    pub heart_rate_blob: Option<String>,
}

impl DaySummary {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            encoded_blob: String::new(),
            heart_rate_blob: None,
        }
    }

    pub fn has_data(&self) -> bool {
        !self.encoded_blob.trim().is_empty()
            || self
                .heart_rate_blob
                .as_deref()
                .is_some_and(|b| !b.trim().is_empty())
    }
}

/// One activity bucket from the day's step summary, covering `timestamp` up
/// to `end`.
#[derive(Clone, Debug, PartialEq)]
pub struct StepBucket {
    pub timestamp: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub steps: u32,
    pub distance_m: f64,
    pub calories: f64,
    pub activity: ActivityKind,
}

impl StepBucket {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.timestamp).num_minutes()
    }
}

/// Vendor activity mode of a step bucket. Unlisted modes are kept as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    SlowWalking,
    FastWalking,
    Running,
    LightActivity,
    Other(u8),
}

impl ActivityKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => ActivityKind::SlowWalking,
            3 => ActivityKind::FastWalking,
            4 => ActivityKind::Running,
            7 => ActivityKind::LightActivity,
            other => ActivityKind::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ActivityKind::SlowWalking => 1,
            ActivityKind::FastWalking => 3,
            ActivityKind::Running => 4,
            ActivityKind::LightActivity => 7,
            ActivityKind::Other(code) => code,
        }
    }

    pub fn label(self) -> Cow<'static, str> {
        match self {
            ActivityKind::SlowWalking => "slow_walking".into(),
            ActivityKind::FastWalking => "fast_walking".into(),
            ActivityKind::Running => "running".into(),
            ActivityKind::LightActivity => "light_activity".into(),
            ActivityKind::Other(code) => format!("unknown_{code}").into(),
        }
    }
}

/// Whole-day step counters.
#[derive(Clone, Debug, PartialEq)]
pub struct StepTotals {
    pub steps: u32,
    pub distance_m: f64,
    pub calories: f64,
    /// Activity buckets recorded for the day.
    pub activities: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SleepStage {
    Deep,
    Light,
    Awake,
    Rem,
}

impl SleepStage {
    /// Map a vendor stage code to a stage.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            4 => Some(SleepStage::Light),
            5 => Some(SleepStage::Deep),
            7 => Some(SleepStage::Awake),
            8 => Some(SleepStage::Rem),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SleepStage::Deep => "deep",
            SleepStage::Light => "light",
            SleepStage::Awake => "awake",
            SleepStage::Rem => "rem",
        }
    }
}

impl std::fmt::Display for SleepStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SleepSegment {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub stage: SleepStage,
}

impl SleepSegment {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// The night as the vendor summarises it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SleepSummary {
    pub slept_from: DateTime<Utc>,
    pub slept_to: DateTime<Utc>,
    pub deep_min: u32,
    pub light_min: u32,
    /// Sum of the REM segments; the vendor does not total it.
    pub rem_min: i64,
    pub stages: usize,
}

impl SleepSummary {
    pub fn total_min(&self) -> u32 {
        self.deep_min.saturating_add(self.light_min)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartRateSample {
    pub timestamp: DateTime<Utc>,
    pub bpm: u8,
}
