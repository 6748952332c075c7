//! Session state and the OAuth2 client-credentials exchange.
//!
//! A [`Session`] is immutable: a successful login builds a new one and the
//! client swaps it in whole. Nothing here touches the client itself.

use crate::client::endpoint_url;
use crate::credentials::StoredCredentials;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Path of the token endpoint, relative to the API root
pub const TOKEN_PATH: &str = "/v1/oauth/token";

/// Token returned by the client-credentials grant
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct BearerToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl BearerToken {
    pub fn new<S: Into<String>>(access_token: S) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_in: None,
            refresh_token: None,
            scope: None,
        }
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// An authenticated session
#[derive(Debug, Clone)]
pub struct Session {
    token: BearerToken,
    username: String,
    issued_at: DateTime<Utc>,
}

impl Session {
    pub fn new<S: Into<String>>(token: BearerToken, username: S) -> Self {
        Self {
            token,
            username: username.into(),
            issued_at: Utc::now(),
        }
    }

    pub fn token(&self) -> &BearerToken {
        &self.token
    }

    /// Value for the `Authorization` header's bearer credential
    pub fn bearer(&self) -> &str {
        &self.token.access_token
    }

    /// Client id the session was issued to
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Instant after which the platform will reject the token, if it said
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.token
            .expires_in
            .map(|secs| self.issued_at + Duration::seconds(secs))
    }

    /// Sessions without a reported lifetime never expire locally
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map(|at| now >= at).unwrap_or(false)
    }
}

/// Result of a login attempt
#[derive(Debug)]
pub enum LoginOutcome {
    /// Token obtained, session installed on the client
    Authenticated(Arc<Session>),
    /// Username or password was empty, nothing was sent
    InvalidCredentials,
    /// The token exchange failed; any previous session is untouched
    AuthenticationFailed(Error),
}

impl LoginOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, LoginOutcome::Authenticated(_))
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        match self {
            LoginOutcome::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

/// Exchange `credentials` for a bearer token at `{base_url}/v1/oauth/token`.
///
/// Credentials go in HTTP Basic auth, the body carries only the grant type.
/// Every failure is reported as `AuthenticationFailed`.
pub(crate) async fn exchange_client_credentials(
    http: &HttpClient,
    base_url: &Url,
    credentials: &StoredCredentials,
) -> Result<BearerToken> {
    let url = endpoint_url(base_url, TOKEN_PATH)?;

    log::debug!("Requesting token for {} at {}", credentials.username, url);

    let response = http
        .post(url)
        .basic_auth(&credentials.username, Some(&credentials.password))
        .header("Accept", "application/json")
        .form(&[("grant_type", "client_credentials")])
        .send()
        .await
        .map_err(|e| Error::authentication_failed("token endpoint unreachable").with_source(e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::authentication_failed(format!(
            "token endpoint returned {}: {}",
            status.as_u16(),
            body
        )));
    }

    let token: BearerToken = response
        .json()
        .await
        .map_err(|e| Error::authentication_failed("malformed token response").with_source(e))?;

    if token.access_token.is_empty() {
        return Err(Error::authentication_failed("empty access token"));
    }

    Ok(token)
}
