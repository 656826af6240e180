//! InfluxDB v2 writer: renders points as line protocol and posts them to the
//! write API.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;
use zepp_client::{FieldValue, Point, PointWriter};

pub const DEFAULT_BUCKET: &str = "telegraf";

#[derive(Clone, Debug)]
pub struct InfluxConfig {
    pub url: String,
    pub token: SecretString,
    pub org: String,
    pub bucket: String,
}

impl InfluxConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    /// Testable helper reading values through `get` instead of the process
    /// environment.
    pub fn from_env_with<F>(mut get: F) -> AppResult<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut read = |k: &str| get(k).filter(|v| !v.trim().is_empty());
        let url = read("INFLUXDB_URL")
            .ok_or_else(|| AppError::Config("INFLUXDB_URL missing".into()))?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            token: SecretString::new(read("INFLUXDB_TOKEN").unwrap_or_default().into()),
            org: read("INFLUXDB_ORG").unwrap_or_default(),
            bucket: read("INFLUXDB_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.into()),
        })
    }
}

#[derive(Clone, Debug)]
pub struct InfluxWriter {
    config: InfluxConfig,
    client: reqwest::Client,
}

impl InfluxWriter {
    pub fn new(config: InfluxConfig, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { config, client })
    }

    pub async fn write_points(&self, points: &[Point]) -> AppResult<()> {
        let body = points
            .iter()
            .filter_map(line_protocol)
            .collect::<Vec<_>>()
            .join("\n");
        if body.is_empty() {
            return Ok(());
        }

        let url = format!("{}/api/v2/write", self.config.url);
        let qp = [
            ("org", self.config.org.as_str()),
            ("bucket", self.config.bucket.as_str()),
            ("precision", "s"),
        ];
        debug!(points = points.len(), bucket = %self.config.bucket, "writing points");
        let resp = self
            .client
            .post(&url)
            .query(&qp)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", self.config.token.expose_secret()),
            )
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Write {
                status: status.as_u16(),
                body: body.chars().take(256).collect(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PointWriter for InfluxWriter {
    async fn write(
        &self,
        points: &[Point],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.write_points(points).await.map_err(Into::into)
    }
}

/// Render one point as a line-protocol line with a seconds timestamp.
/// Points left with no valid field yield `None`.
pub fn line_protocol(point: &Point) -> Option<String> {
    let fields: Vec<String> = point
        .fields
        .iter()
        .filter_map(|(k, v)| {
            let value = match v {
                FieldValue::Int(i) => format!("{i}i"),
                FieldValue::Float(f) if f.is_finite() => format!("{f}"),
                FieldValue::Float(_) => return None,
                FieldValue::Str(s) => format!("\"{}\"", escape_string_field(s)),
            };
            Some(format!("{}={}", escape_key(k), value))
        })
        .collect();
    if fields.is_empty() {
        return None;
    }

    let mut line = escape_measurement(&point.measurement);
    for (k, v) in point.tags.iter().filter(|(_, v)| !v.is_empty()) {
        let _ = write!(line, ",{}={}", escape_key(k), escape_key(v));
    }
    let _ = write!(line, " {} {}", fields.join(","), point.timestamp.timestamp());
    Some(line)
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Tag keys, tag values and field keys.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn escape_string_field(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
