//! Session resolution: a pre-extracted app token, or the vendor's two-hop
//! login handshake.

use crate::config::{Config, Credentials};
use crate::http_client::body_snippet;
use crate::observability;
use crate::{Session, ZeppError};
use chrono::{Duration, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info};
use url::{Url, form_urlencoded};

const CLIENT_ID: &str = "HuaMi";
const REDIRECT_URI: &str = "https://s3-us-west-2.amazonws.com/hm-registration/successsignin.html";
const APP_NAME: &str = "com.xiaomi.hm.health";
const APP_VERSION: &str = "4.0.9";
const DEVICE_ID: &str = "02:00:00:00:00:00";
const DEVICE_MODEL: &str = "android_phone";
const THIRD_NAME: &str = "huami";
const DOMAINS: &str = "account.huami.com,api-user.huami.com,api-watch.huami.com,api-analytics.huami.com,app-analytics.huami.com,api-mifit.huami.com";

/// The hop of the login handshake an error is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginHop {
    RequestingCode,
    ExchangingToken,
}

impl fmt::Display for LoginHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoginHop::RequestingCode => "requesting_code",
            LoginHop::ExchangingToken => "exchanging_token",
        })
    }
}

/// Short-lived code from the identity provider, plus the region it was
/// issued for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessGrant {
    pub code: String,
    pub country_code: String,
}

/// Pull the access code and country code out of the identity provider's
/// redirect URL, from its query or fragment. Both must be present; values
/// come back percent-decoded.
pub fn extract_access_grant(location: &str) -> Option<AccessGrant> {
    // relative redirects resolve against the success page
    let url = Url::parse(REDIRECT_URI).ok()?.join(location.trim()).ok()?;
    let fragment = url.fragment().unwrap_or_default().to_string();

    let mut code = None;
    let mut country_code = None;
    for (key, value) in url
        .query_pairs()
        .chain(form_urlencoded::parse(fragment.as_bytes()))
    {
        let slot = match key.as_ref() {
            "access" => &mut code,
            "country_code" => &mut country_code,
            _ => continue,
        };
        if slot.is_none() && !value.is_empty() {
            *slot = Some(value.into_owned());
        }
    }
    Some(AccessGrant {
        code: code?,
        country_code: country_code?,
    })
}

#[derive(Debug)]
enum LoginState {
    RequestingCode,
    ExchangingToken(AccessGrant),
    Authenticated(Session),
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token_info: Option<TokenInfo>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    app_token: Option<String>,
    user_id: Option<String>,
    app_ttl: Option<i64>,
}

/// Runs the vendor login handshake. No hop is retried; the vendor rate
/// limits this flow heavily.
#[derive(Clone, Debug)]
pub struct LoginClient {
    auth_url: String,
    account_url: String,
    client: reqwest::Client,
}

impl LoginClient {
    pub fn new(config: &Config, client: reqwest::Client) -> Self {
        Self {
            auth_url: config.endpoints.auth_url.trim_end_matches('/').to_string(),
            account_url: config.endpoints.account_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub async fn login(&self, email: &str, password: &SecretString) -> Result<Session, ZeppError> {
        info!(email, "logging in with email and password");
        let mut state = LoginState::RequestingCode;
        loop {
            debug!(?state, "login state");
            state = match state {
                LoginState::RequestingCode => {
                    LoginState::ExchangingToken(self.request_access_code(email, password).await?)
                }
                LoginState::ExchangingToken(grant) => {
                    LoginState::Authenticated(self.exchange_token(&grant).await?)
                }
                LoginState::Authenticated(session) => {
                    info!(user_id = session.user_id(), "login complete");
                    return Ok(session);
                }
            };
        }
    }

    /// Hop one: trade email and password for an access code.
    pub async fn request_access_code(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AccessGrant, ZeppError> {
        let hop = LoginHop::RequestingCode;
        let mut url = Url::parse(&self.auth_url)
            .map_err(|e| ZeppError::Configuration(format!("invalid auth url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ZeppError::Configuration("auth url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["registrations", email, "tokens"]);

        let form = [
            ("state", "REDIRECTION"),
            ("client_id", CLIENT_ID),
            ("redirect_uri", REDIRECT_URI),
            ("token", "access"),
            ("password", password.expose_secret()),
        ];
        let resp = self
            .client
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_failure(hop, e))?;

        let status = resp.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(status_failure(hop, resp).await);
        }
        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        extract_access_grant(location).ok_or_else(|| ZeppError::AuthenticationFailed {
            hop,
            status: Some(status.as_u16()),
            reason: "access code not found in redirect".into(),
        })
    }

    /// Hop two: trade the access code for a platform token and user id.
    pub async fn exchange_token(&self, grant: &AccessGrant) -> Result<Session, ZeppError> {
        let hop = LoginHop::ExchangingToken;
        let url = format!("{}/v2/client/login", self.account_url);
        let form = [
            ("app_name", APP_NAME),
            ("dn", DOMAINS),
            ("device_id", DEVICE_ID),
            ("device_model", DEVICE_MODEL),
            ("app_version", APP_VERSION),
            ("allow_registration", "false"),
            ("third_name", THIRD_NAME),
            ("grant_type", "access_token"),
            ("country_code", grant.country_code.as_str()),
            ("code", grant.code.as_str()),
        ];
        let resp = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_failure(hop, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_failure(hop, resp).await);
        }
        let body: LoginResponse = resp.json().await.map_err(|e| ZeppError::AuthenticationFailed {
            hop,
            status: Some(status.as_u16()),
            reason: format!("unreadable token response: {e}"),
        })?;

        let missing = |what: &str| ZeppError::AuthenticationFailed {
            hop,
            status: Some(status.as_u16()),
            reason: format!("token response has no {what}"),
        };
        let info = body.token_info.ok_or_else(|| missing("token_info"))?;
        let token = info
            .app_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| missing("app_token"))?;
        let user_id = info
            .user_id
            .filter(|u| !u.is_empty())
            .ok_or_else(|| missing("user_id"))?;
        let expires_hint = info
            .app_ttl
            .filter(|ttl| *ttl > 0)
            .and_then(Duration::try_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));

        Ok(Session::new(SecretString::new(token.into()), user_id, expires_hint))
    }
}

fn transport_failure(hop: LoginHop, e: reqwest::Error) -> ZeppError {
    ZeppError::AuthenticationFailed {
        hop,
        status: e.status().map(|s| s.as_u16()),
        reason: format!("request failed: {e}"),
    }
}

async fn status_failure(hop: LoginHop, resp: reqwest::Response) -> ZeppError {
    let status = resp.status();
    let reason = if status == StatusCode::TOO_MANY_REQUESTS {
        "rate limited by vendor (HTTP 429); prefer app token authentication".to_string()
    } else {
        format!("HTTP {status}: {}", body_snippet(resp).await)
    };
    ZeppError::AuthenticationFailed {
        hop,
        status: Some(status.as_u16()),
        reason,
    }
}

/// Resolves the run's [`Session`] from whichever credentials were supplied.
///
/// A complete app token and user id pair is used as-is without touching the
/// network. Otherwise email and password go through [`LoginClient`].
#[derive(Clone, Debug)]
pub struct TokenProvider {
    credentials: Credentials,
    login: LoginClient,
}

impl TokenProvider {
    pub fn new(credentials: Credentials, login: LoginClient) -> Self {
        Self { credentials, login }
    }

    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        Self::new(config.credentials.clone(), LoginClient::new(config, client))
    }

    pub async fn resolve(&self) -> Result<Session, ZeppError> {
        let c = &self.credentials;
        let token = c.app_token.as_ref().filter(|t| !t.expose_secret().trim().is_empty());
        let user_id = c.user_id.as_deref().map(str::trim).filter(|u| !u.is_empty());

        if let (Some(token), Some(user_id)) = (token, user_id) {
            info!(user_id, "using supplied app token");
            observability::record_session("token");
            return Ok(Session::new(token.clone(), user_id, None));
        }

        let email = c.email.as_deref().map(str::trim).filter(|e| !e.is_empty());
        let password = c.password.as_ref().filter(|p| !p.expose_secret().is_empty());
        match (email, password) {
            (Some(email), Some(password)) => {
                let session = self.login.login(email, password).await?;
                observability::record_session("password");
                Ok(session)
            }
            _ => Err(ZeppError::Configuration(
                "no usable credentials: set ZEPP_APP_TOKEN and ZEPP_USER_ID, or ZEPP_EMAIL and ZEPP_PASS"
                    .into(),
            )),
        }
    }
}
