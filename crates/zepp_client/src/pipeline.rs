//! One sync run: authenticate, fetch the trailing window, decode each day and
//! hand the resulting points to a [`PointWriter`].

use crate::auth::TokenProvider;
use crate::config::Config;
use crate::decode::{DecodedDay, decode};
use crate::events::EventSource;
use crate::http_client::{ActivityFetcher, EventFetcher, build_http_client};
use crate::observability::{self, DecodeOutcome};
use crate::points::{PointWriter, UNKNOWN_SERIAL, day_points, event_points, tag_serial};
use crate::utils::{day_end, day_stamp, day_start, query_window};
use crate::{Point, ZeppError};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub days_fetched: usize,
    pub days_decoded: usize,
    /// Days dropped because their payload failed to decode.
    pub failed_days: Vec<NaiveDate>,
    /// Event sources that could not be fetched this run.
    pub skipped_event_sources: Vec<EventSource>,
    pub points_written: usize,
}

pub async fn run(config: &Config, writer: &dyn PointWriter) -> Result<SyncReport, ZeppError> {
    run_at(config, writer, Utc::now()).await
}

/// [`run`] with an explicit notion of "now", which bounds the window.
///
/// Authentication and fetch errors abort before anything is written. A day
/// that fails to decode is logged and skipped; the rest of the window is still
/// written, one day at a time in ascending order. Health events follow as one
/// last batch; a source that fails is skipped.
///
/// Every point is tagged with the band serial from the latest day summary
/// that named one.
pub async fn run_at(
    config: &Config,
    writer: &dyn PointWriter,
    now: DateTime<Utc>,
) -> Result<SyncReport, ZeppError> {
    let client = build_http_client(config.http_timeout)?;
    let session = TokenProvider::from_config(config, client.clone())
        .resolve()
        .await?;

    let (start, end) = query_window(now.date_naive(), config.query_duration_days);
    let days = ActivityFetcher::new(config, client.clone())
        .fetch(&session, start, end)
        .await?;

    let lower = day_start(start);
    let mut serial: Option<String> = None;
    let mut report = SyncReport {
        days_fetched: days.len(),
        ..SyncReport::default()
    };

    for day in &days {
        let decoded = match decode(day) {
            Ok(decoded) => {
                observability::record_decode(DecodeOutcome::Ok);
                decoded
            }
            Err(e) => {
                observability::record_decode(DecodeOutcome::Failed);
                warn!(date = %day.date, error = %e, "skipping day that failed to decode");
                report.failed_days.push(day.date);
                continue;
            }
        };
        report.days_decoded += 1;
        if decoded.serial.is_some() {
            serial.clone_from(&decoded.serial);
        }

        let decoded = clamp_to_window(decoded, lower, now);
        let points = day_points(&config.measurement, &decoded, day_stamp(day.date, now));
        report.points_written += write(writer, points, serial.as_deref()).await?;
    }

    let events = EventFetcher::new(config, client)
        .fetch(&session, lower, day_end(end) - Duration::milliseconds(1))
        .await;
    report.skipped_event_sources.clone_from(&events.skipped);
    let points: Vec<Point> = event_points(&config.measurement, &events)
        .into_iter()
        .filter(|p| p.timestamp >= lower && p.timestamp <= now)
        .collect();
    report.points_written += write(writer, points, serial.as_deref()).await?;

    info!(
        days_fetched = report.days_fetched,
        days_decoded = report.days_decoded,
        days_failed = report.failed_days.len(),
        event_sources_skipped = report.skipped_event_sources.len(),
        points_written = report.points_written,
        serial = serial.as_deref().unwrap_or(UNKNOWN_SERIAL),
        "sync complete"
    );
    Ok(report)
}

async fn write(
    writer: &dyn PointWriter,
    mut points: Vec<Point>,
    serial: Option<&str>,
) -> Result<usize, ZeppError> {
    if points.is_empty() {
        return Ok(0);
    }
    tag_serial(&mut points, serial.unwrap_or(UNKNOWN_SERIAL));
    writer.write(&points).await.map_err(ZeppError::Sink)?;
    observability::record_points_written(points.len());
    Ok(points.len())
}

/// Drop records whose timestamp falls outside `[lower, upper]`. Buckets and
/// sleep segments still running at `upper` are cut off there.
pub fn clamp_to_window(
    mut day: DecodedDay,
    lower: DateTime<Utc>,
    upper: DateTime<Utc>,
) -> DecodedDay {
    let inside = |t: DateTime<Utc>| t >= lower && t <= upper;
    day.steps.retain(|b| inside(b.timestamp));
    for bucket in &mut day.steps {
        bucket.end = bucket.end.min(upper);
    }
    day.heart_rate.retain(|h| inside(h.timestamp));
    day.sleep.retain(|s| inside(s.start) && s.start < upper);
    for segment in &mut day.sleep {
        segment.end = segment.end.min(upper);
    }
    day
}
