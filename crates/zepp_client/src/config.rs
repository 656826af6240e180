use crate::ZeppError;
use secrecy::SecretString;
use std::time::Duration;

pub const DEFAULT_AUTH_URL: &str = "https://api-user.huami.com";
pub const DEFAULT_ACCOUNT_URL: &str = "https://account.huami.com";
pub const DEFAULT_API_URL: &str = "https://api-mifit.huami.com";
pub const DEFAULT_EVENTS_URL: &str = "https://api-mifit.zepp.com";
pub const DEFAULT_PAI_URL: &str = "https://api-mifit-de2.zepp.com";
pub const DEFAULT_QUERY_DURATION_DAYS: u32 = 2;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MEASUREMENT: &str = "zepp";

/// Whatever credentials were supplied. Either pair may be partial or absent;
/// [`TokenProvider`](crate::TokenProvider) decides which mode applies.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub email: Option<String>,
    pub password: Option<SecretString>,
    pub app_token: Option<SecretString>,
    pub user_id: Option<String>,
}

/// Vendor service base URLs.
#[derive(Clone, Debug)]
pub struct Endpoints {
    pub auth_url: String,
    pub account_url: String,
    pub api_url: String,
    /// Stress and blood-oxygen events.
    pub events_url: String,
    /// PAI events live on a different host.
    pub pai_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.into(),
            account_url: DEFAULT_ACCOUNT_URL.into(),
            api_url: DEFAULT_API_URL.into(),
            events_url: DEFAULT_EVENTS_URL.into(),
            pai_url: DEFAULT_PAI_URL.into(),
        }
    }
}

impl Endpoints {
    /// Point every vendor service at one base URL (mock servers).
    pub fn single(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        Self {
            auth_url: base.clone(),
            account_url: base.clone(),
            api_url: base.clone(),
            events_url: base.clone(),
            pai_url: base,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub credentials: Credentials,
    pub query_duration_days: u32,
    pub endpoints: Endpoints,
    pub http_timeout: Duration,
    pub measurement: String,
}

impl Config {
    pub fn new(credentials: Credentials, endpoints: Endpoints) -> Self {
        Self {
            credentials,
            query_duration_days: DEFAULT_QUERY_DURATION_DAYS,
            endpoints,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            measurement: DEFAULT_MEASUREMENT.into(),
        }
    }

    pub fn from_env() -> Result<Self, ZeppError> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    /// Read configuration through `get` rather than the process environment,
    /// so tests can supply values directly. Empty values count as unset.
    pub fn from_env_with<F>(mut get: F) -> Result<Self, ZeppError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut read = |k: &str| get(k).filter(|v| !v.trim().is_empty());

        let credentials = Credentials {
            email: read("ZEPP_EMAIL"),
            password: read("ZEPP_PASS").map(|p| SecretString::new(p.into())),
            app_token: read("ZEPP_APP_TOKEN").map(|t| SecretString::new(t.into())),
            user_id: read("ZEPP_USER_ID"),
        };

        let query_duration_days = match read("QUERY_DURATION") {
            Some(raw) => parse_query_duration(&raw)?,
            None => DEFAULT_QUERY_DURATION_DAYS,
        };

        let http_timeout = match read("ZEPP_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    ZeppError::Configuration(format!("invalid ZEPP_HTTP_TIMEOUT_SECS: {raw}"))
                })?,
            None => DEFAULT_HTTP_TIMEOUT,
        };

        let endpoints = Endpoints {
            auth_url: read("ZEPP_AUTH_URL").unwrap_or_else(|| DEFAULT_AUTH_URL.into()),
            account_url: read("ZEPP_ACCOUNT_URL").unwrap_or_else(|| DEFAULT_ACCOUNT_URL.into()),
            api_url: read("ZEPP_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            events_url: read("ZEPP_EVENTS_URL").unwrap_or_else(|| DEFAULT_EVENTS_URL.into()),
            pai_url: read("ZEPP_PAI_URL").unwrap_or_else(|| DEFAULT_PAI_URL.into()),
        };

        let measurement = read("INFLUXDB_MEASUREMENT").unwrap_or_else(|| DEFAULT_MEASUREMENT.into());

        Ok(Self {
            credentials,
            query_duration_days,
            endpoints,
            http_timeout,
            measurement,
        })
    }
}

fn parse_query_duration(raw: &str) -> Result<u32, ZeppError> {
    match raw.trim().parse::<u32>() {
        Ok(days) if days >= 1 => Ok(days),
        _ => Err(ZeppError::Configuration(format!(
            "QUERY_DURATION must be an integer >= 1, got {raw:?}"
        ))),
    }
}
