//! Run counters. Recorded through the `metrics` facade, so they cost nothing
//! unless the host process installs a recorder.

use crate::events::EventSource;

pub const SESSIONS: &str = "zepp_sessions_total";
pub const DAYS_FETCHED: &str = "zepp_days_fetched_total";
pub const DAYS_DECODED: &str = "zepp_days_decoded_total";
pub const POINTS_WRITTEN: &str = "zepp_points_written_total";
pub const EVENT_FETCHES: &str = "zepp_event_fetches_total";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    Ok,
    Failed,
}

impl DecodeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DecodeOutcome::Ok => "ok",
            DecodeOutcome::Failed => "failed",
        }
    }
}

/// `mode` is `token` or `password`.
pub fn record_session(mode: &'static str) {
    metrics::counter!(SESSIONS, "mode" => mode).increment(1);
}

pub fn record_days_fetched(days: usize) {
    metrics::counter!(DAYS_FETCHED).increment(days as u64);
}

pub fn record_decode(outcome: DecodeOutcome) {
    metrics::counter!(DAYS_DECODED, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_points_written(points: usize) {
    metrics::counter!(POINTS_WRITTEN).increment(points as u64);
}

pub fn record_event_fetch(source: EventSource, ok: bool) {
    let outcome = if ok { "ok" } else { "failed" };
    metrics::counter!(EVENT_FETCHES, "source" => source.as_str(), "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(DecodeOutcome::Ok.as_str(), "ok");
        assert_eq!(DecodeOutcome::Failed.as_str(), "failed");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_session("token");
        record_days_fetched(2);
        record_decode(DecodeOutcome::Failed);
        record_points_written(10);
        record_event_fetch(EventSource::Pai, false);
    }
}
