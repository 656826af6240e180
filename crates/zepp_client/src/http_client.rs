//! HTTP plumbing for the Zepp API and the day-summary fetcher.

use crate::config::Config;
use crate::events::{self, EventBatch, EventSource};
use crate::observability;
use crate::utils::{dates_between, format_vendor_date, parse_vendor_date};
use crate::{DaySummary, Session, ZeppError};
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Build the one HTTP client used for a run. Redirects are not followed so
/// the login hop can read the `Location` header itself.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ZeppError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| ZeppError::Configuration(format!("building http client: {e}")))
}

/// First 256 characters of a response body, for error messages.
pub(crate) async fn body_snippet(resp: reqwest::Response) -> String {
    let body = resp.text().await.unwrap_or_default();
    body.chars().take(256).collect()
}

#[derive(Debug, Deserialize)]
struct BandDataResponse {
    #[serde(default)]
    data: Vec<BandDay>,
}

#[derive(Debug, Deserialize)]
struct BandDay {
    date_time: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    data_hr: Option<String>,
}

/// Retrieves day summaries from the band-data endpoint.
#[derive(Clone, Debug)]
pub struct ActivityFetcher {
    base_url: String,
    client: reqwest::Client,
}

impl ActivityFetcher {
    pub fn new(config: &Config, client: reqwest::Client) -> Self {
        Self {
            base_url: config.endpoints.api_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Fetch one [`DaySummary`] per date in `start..=end`, ascending. Dates the
    /// vendor has nothing for come back with an empty blob.
    ///
    /// The range is requested in one call; if the vendor rejects the range
    /// (400 or 422) the dates are requested one at a time instead.
    pub async fn fetch(
        &self,
        session: &Session,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DaySummary>, ZeppError> {
        if end < start {
            return Err(ZeppError::Configuration(format!(
                "fetch range ends ({end}) before it starts ({start})"
            )));
        }
        info!(%start, %end, "fetching day summaries");

        let raw = match self.request(session, start, end).await {
            Ok(days) => days,
            Err(ZeppError::Fetch {
                status: Some(status),
                ..
            }) if start != end && (status == 400 || status == 422) => {
                warn!(status, "vendor rejected date range, fetching one day at a time");
                let mut days = Vec::new();
                for date in dates_between(start, end) {
                    days.extend(self.request(session, date, date).await?);
                }
                days
            }
            Err(e) => return Err(e),
        };

        let summaries = assemble(start, end, raw);
        observability::record_days_fetched(summaries.len());
        Ok(summaries)
    }

    async fn request(
        &self,
        session: &Session,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BandDay>, ZeppError> {
        let url = format!("{}/v1/data/band_data.json", self.base_url);
        let from = format_vendor_date(from);
        let to = format_vendor_date(to);
        let qp = [
            ("query_type", "detail"),
            ("device_type", "android_phone"),
            ("userid", session.user_id()),
            ("from_date", from.as_str()),
            ("to_date", to.as_str()),
        ];
        debug!(%url, from_date = %from, to_date = %to, "GET band data");

        let resp = self
            .client
            .get(&url)
            .header("apptoken", session.token_str())
            .query(&qp)
            .send()
            .await
            .map_err(|e| ZeppError::Fetch {
                status: e.status().map(|s| s.as_u16()),
                message: format!("requesting day summaries: {e}"),
            })?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ZeppError::SessionExpired {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = body_snippet(resp).await;
            return Err(ZeppError::Fetch {
                status: Some(status.as_u16()),
                message: format!("band data request failed with HTTP {status}: {body}"),
            });
        }

        let payload: BandDataResponse = resp.json().await.map_err(|e| ZeppError::Fetch {
            status: Some(status.as_u16()),
            message: format!("decoding band data response: {e}"),
        })?;
        Ok(payload.data)
    }
}

/// Page size for event queries; one window never comes near it.
pub const EVENT_LIMIT: u32 = 1000;
/// Zone the vendor buckets daily events in. Day offsets elsewhere are UTC.
pub const EVENT_TIME_ZONE: &str = "UTC";

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    items: Vec<Value>,
}

/// Retrieves stress, blood-oxygen and PAI events. Every source is optional:
/// a failing source is logged and skipped and never fails the run.
#[derive(Clone, Debug)]
pub struct EventFetcher {
    events_url: String,
    pai_url: String,
    client: reqwest::Client,
}

impl EventFetcher {
    pub fn new(config: &Config, client: reqwest::Client) -> Self {
        Self {
            events_url: config.endpoints.events_url.trim_end_matches('/').to_string(),
            pai_url: config.endpoints.pai_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub async fn fetch(
        &self,
        session: &Session,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EventBatch {
        let mut batch = EventBatch::default();
        for source in EventSource::ALL {
            let items = match self.request(session, source, from, to).await {
                Ok(items) => {
                    observability::record_event_fetch(source, true);
                    items
                }
                Err(e) => {
                    observability::record_event_fetch(source, false);
                    warn!(%source, error = %e, "skipping event source");
                    batch.skipped.push(source);
                    continue;
                }
            };
            let before = batch_len(&batch);
            for item in &items {
                let parsed = match source {
                    EventSource::Stress => events::parse_stress(item).map(|d| batch.stress.push(d)),
                    EventSource::BloodOxygen => events::parse_blood_oxygen(item)
                        .map(|e| batch.blood_oxygen.extend(e)),
                    EventSource::Pai => events::parse_pai(item).map(|d| batch.pai.push(d)),
                };
                if let Err(e) = parsed {
                    warn!(%source, error = %e, "skipping unreadable event");
                }
            }
            debug!(%source, items = items.len(), kept = batch_len(&batch) - before, "events fetched");
        }
        batch
    }

    async fn request(
        &self,
        session: &Session,
        source: EventSource,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Value>, ZeppError> {
        let base = match source {
            EventSource::Pai => &self.pai_url,
            EventSource::Stress | EventSource::BloodOxygen => &self.events_url,
        };
        let mut url = reqwest::Url::parse(base)
            .map_err(|e| ZeppError::Configuration(format!("invalid events url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ZeppError::Configuration("events url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["users", session.user_id(), "events"]);

        let from = from.timestamp_millis().to_string();
        let to = to.timestamp_millis().to_string();
        let limit = EVENT_LIMIT.to_string();
        let qp = [
            ("eventType", source.event_type()),
            ("from", from.as_str()),
            ("to", to.as_str()),
            ("limit", limit.as_str()),
            ("timeZone", EVENT_TIME_ZONE),
        ];
        debug!(%url, %source, "GET events");

        let resp = self
            .client
            .get(url)
            .header("apptoken", session.token_str())
            .query(&qp)
            .send()
            .await
            .map_err(|e| ZeppError::Fetch {
                status: e.status().map(|s| s.as_u16()),
                message: format!("requesting {source} events: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = body_snippet(resp).await;
            return Err(ZeppError::Fetch {
                status: Some(status.as_u16()),
                message: format!("{source} events request failed with HTTP {status}: {body}"),
            });
        }
        let payload: EventsResponse = resp.json().await.map_err(|e| ZeppError::Fetch {
            status: Some(status.as_u16()),
            message: format!("decoding {source} events: {e}"),
        })?;
        Ok(payload.items)
    }
}

fn batch_len(batch: &EventBatch) -> usize {
    batch.stress.len() + batch.blood_oxygen.len() + batch.pai.len()
}

/// One summary per date in the window, ascending; the first non-empty entry
/// for a date wins and dates outside the window are dropped.
fn assemble(start: NaiveDate, end: NaiveDate, raw: Vec<BandDay>) -> Vec<DaySummary> {
    let mut days: BTreeMap<NaiveDate, DaySummary> = dates_between(start, end)
        .into_iter()
        .map(|d| (d, DaySummary::empty(d)))
        .collect();

    for item in raw {
        let Some(date) = parse_vendor_date(&item.date_time) else {
            warn!(date_time = %item.date_time, "skipping day with unparseable date");
            continue;
        };
        let Some(slot) = days.get_mut(&date) else {
            debug!(%date, "vendor returned a day outside the requested window");
            continue;
        };
        if slot.has_data() {
            continue;
        }
        *slot = DaySummary {
            date,
            encoded_blob: item.summary.unwrap_or_default(),
            heart_rate_blob: item.data_hr.filter(|b| !b.trim().is_empty()),
        };
    }
    days.into_values().collect()
}
