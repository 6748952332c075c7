//! Konker Rust SDK Client
//!
//! This module provides the main client for the Konker platform: configuration,
//! login/session handling and the read-only resource accessors. The
//! time-series fetch lives in [`crate::events`].

use crate::credentials::{CredentialStore, StoredCredentials};
use crate::defaults;
use crate::error::{Error, ErrorKind, Result};
use crate::events::BoundaryPolicy;
use crate::session::{exchange_client_credentials, LoginOutcome, Session};
use crate::types::{Application, Device, DeviceCredentials, Envelope, Location};
use chrono::{FixedOffset, Offset, Utc};
use reqwest::{Client as HttpClient, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Configuration for the Konker client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. `https://api.prod.konkerlabs.net`
    pub base_url: Url,
    /// Application namespace used until `set_application` is called
    pub application: String,
    /// JSON file consulted when logging in by identity
    pub credentials_path: PathBuf,
    /// Request timeout duration
    pub timeout: Duration,
    /// Connect timeout duration
    pub connect_timeout: Duration,
    /// Whether to verify SSL certificates
    pub verify_ssl: bool,
    /// Custom user agent string
    pub user_agent: String,
    /// Zone "today" is computed in when no start date is given
    pub reference_offset: FixedOffset,
    /// Maximum events requested per window
    pub event_limit: usize,
    /// How window boundary duplicates are removed
    pub boundary_policy: BoundaryPolicy,
    /// Windows requested at once; 1 keeps the fetch strictly sequential
    pub max_concurrent_windows: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.parse().expect("default base URL is valid"),
            application: defaults::APPLICATION.to_string(),
            credentials_path: PathBuf::from(defaults::CREDENTIALS_FILE),
            timeout: defaults::TIMEOUT,
            connect_timeout: defaults::CONNECT_TIMEOUT,
            verify_ssl: true,
            user_agent: format!("konker-rust-sdk/{}", crate::VERSION),
            reference_offset: FixedOffset::west_opt(defaults::REFERENCE_OFFSET_WEST_SECS)
                .unwrap_or_else(|| Utc.fix()),
            event_limit: defaults::EVENT_LIMIT,
            boundary_policy: BoundaryPolicy::default(),
            max_concurrent_windows: 1,
        }
    }
}

impl ClientConfig {
    /// Create a new client configuration with the given base URL
    pub fn new<S: AsRef<str>>(base_url: S) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        Ok(Self {
            base_url,
            ..Default::default()
        })
    }

    /// Build a configuration from `KONKER_API_URL`, `KONKER_APPLICATION` and
    /// `KONKER_CREDENTIALS`, falling back to defaults for unset variables
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("KONKER_API_URL") {
            Ok(url) => Self::new(url)?,
            Err(_) => Self::default(),
        };
        if let Ok(application) = std::env::var("KONKER_APPLICATION") {
            config.application = application;
        }
        if let Ok(path) = std::env::var("KONKER_CREDENTIALS") {
            config.credentials_path = PathBuf::from(path);
        }
        Ok(config)
    }

    /// Set the initial application namespace
    pub fn with_application<S: Into<String>>(mut self, application: S) -> Self {
        self.application = application.into();
        self
    }

    /// Set the credential store location
    pub fn with_credentials_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.credentials_path = path.into();
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set SSL verification
    pub fn with_ssl_verification(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    /// Set custom user agent
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the zone "today" is computed in
    pub fn with_reference_offset(mut self, offset: FixedOffset) -> Self {
        self.reference_offset = offset;
        self
    }

    /// Set the maximum events requested per window
    pub fn with_event_limit(mut self, limit: usize) -> Self {
        self.event_limit = limit;
        self
    }

    /// Set how duplicates across window boundaries are removed
    pub fn with_boundary_policy(mut self, policy: BoundaryPolicy) -> Self {
        self.boundary_policy = policy;
        self
    }

    /// Allow up to `n` window requests in flight. Zero is treated as one.
    pub fn with_max_concurrent_windows(mut self, n: usize) -> Self {
        self.max_concurrent_windows = n.max(1);
        self
    }
}

/// Main Konker client
#[derive(Debug)]
pub struct Client {
    pub(crate) config: ClientConfig,
    http_client: HttpClient,
    session: Option<Arc<Session>>,
    application: String,
}

impl Client {
    /// Create a new Konker client with the given configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut builder = HttpClient::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent);

        if !config.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http_client = builder.build()?;
        let application = config.application.clone();

        let client = Self {
            config,
            http_client,
            session: None,
            application,
        };

        log::info!("Initialized Konker client for {}", client.config.base_url);
        Ok(client)
    }

    /// Create a client with default configuration for the given URL
    pub fn from_url<S: AsRef<str>>(url: S) -> Result<Self> {
        let config = ClientConfig::new(url)?;
        Self::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Log in and install a new session.
    ///
    /// With an `identity`, credentials come from the credential store and the
    /// explicit `username`/`password` are only used when the store file is
    /// missing. Without one, both must be non-empty.
    ///
    /// Returns `Err` only when the identity cannot be resolved. A rejected
    /// token exchange is reported as [`LoginOutcome::AuthenticationFailed`]
    /// and leaves the current session, if any, in place.
    pub async fn login(
        &mut self,
        identity: Option<&str>,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome> {
        let credentials = match identity {
            Some(identity) => self.resolve_identity(identity, username, password)?,
            None => StoredCredentials::new(username, password),
        };

        if !credentials.is_complete() {
            log::warn!("{}", Error::invalid_credentials());
            return Ok(LoginOutcome::InvalidCredentials);
        }

        match exchange_client_credentials(&self.http_client, &self.config.base_url, &credentials)
            .await
        {
            Ok(token) => {
                let session = Arc::new(Session::new(token, credentials.username));
                self.session = Some(session.clone());
                log::info!("Connected as {}", session.username());
                Ok(LoginOutcome::Authenticated(session))
            }
            Err(err) => {
                log::warn!("Login failed for {}: {}", credentials.username, err);
                Ok(LoginOutcome::AuthenticationFailed(err))
            }
        }
    }

    /// Log in with an explicit username and password
    pub async fn login_with(&mut self, username: &str, password: &str) -> Result<LoginOutcome> {
        self.login(None, username, password).await
    }

    /// Log in with credentials stored under `identity`
    pub async fn login_as(&mut self, identity: &str) -> Result<LoginOutcome> {
        self.login(Some(identity), "", "").await
    }

    fn resolve_identity(
        &self,
        identity: &str,
        username: &str,
        password: &str,
    ) -> Result<StoredCredentials> {
        match CredentialStore::load(&self.config.credentials_path) {
            Ok(store) => store.require(identity).cloned(),
            Err(err) if matches!(err.kind, ErrorKind::CredentialStoreUnavailable { .. }) => {
                log::warn!("{}; username and password must be given explicitly", err);
                let explicit = StoredCredentials::new(username, password);
                if explicit.is_complete() {
                    Ok(explicit)
                } else {
                    Err(Error::credential_not_found(identity).with_source(err))
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Drop the current session
    pub fn logout(&mut self) {
        self.session = None;
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Fail with `NotConnected` unless a session is active
    pub fn check_connection(&self) -> Result<Arc<Session>> {
        let session = self.session.clone().ok_or_else(Error::not_connected)?;
        if session.is_expired(Utc::now()) {
            log::warn!("Session for {} has expired, login again", session.username());
        }
        Ok(session)
    }

    /// Application namespace used by the scoped accessors
    pub fn application(&self) -> &str {
        &self.application
    }

    /// Switch the application namespace. Not validated against the platform.
    pub fn set_application<S: Into<String>>(&mut self, application: S) {
        self.application = application.into();
    }

    /// Build URL for endpoint
    pub(crate) fn build_url(&self, endpoint: &str) -> Result<Url> {
        endpoint_url(&self.config.base_url, endpoint)
    }

    fn transport_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::timeout(Some(self.config.timeout.as_secs())).with_source(err)
        } else {
            err.into()
        }
    }

    /// Issue an authenticated GET and unwrap the `{code, result}` envelope.
    ///
    /// A non-200 code is returned as a `Remote` error carrying the body;
    /// `Ok(None)` means the envelope succeeded without a result.
    pub(crate) async fn get_enveloped<T: DeserializeOwned>(
        &self,
        session: &Session,
        url: Url,
    ) -> Result<Option<T>> {
        log::debug!("GET {}", url);

        let response = self
            .http_client
            .get(url)
            .bearer_auth(session.bearer())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let body = self.read_body(response).await?;

        let envelope = Envelope::<Value>::deserialize(&body)
            .map_err(|e| Error::serialization(format!("response is not an envelope: {}", e)))?;

        if !envelope.is_success() {
            return Err(Error::remote(envelope.code, body));
        }

        match envelope.result {
            None | Some(Value::Null) => Ok(None),
            Some(result) => Ok(Some(serde_json::from_value(result)?)),
        }
    }

    async fn read_body(&self, response: Response) -> Result<Value> {
        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        match serde_json::from_str::<Value>(&text) {
            Ok(body) => Ok(body),
            Err(_) if !status.is_success() => Err(Error::network(Some(status.as_u16()), Some(text))),
            Err(err) => Err(err.into()),
        }
    }

    /// Run one accessor request, degrading a non-200 envelope to `None`
    async fn get_or_degrade<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        url: Option<Url>,
    ) -> Result<Option<T>> {
        let session = self.check_connection()?;
        let url = match url {
            Some(url) => url,
            None => self.build_url(endpoint)?,
        };

        match self.get_enveloped(&session, url).await {
            Err(err) if err.is_remote() => {
                if let ErrorKind::Remote { code, body } = &err.kind {
                    log::warn!("{} returned code {}: {}", endpoint, code, body);
                }
                Ok(None)
            }
            other => other,
        }
    }

    /// List devices of `application`
    pub async fn devices_for_application(&self, application: &str) -> Result<Option<Vec<Device>>> {
        let endpoint = format!("/v1/{}/devices/", application);
        self.get_or_degrade(&endpoint, None).await
    }

    /// List devices of the current application
    pub async fn devices(&self) -> Result<Option<Vec<Device>>> {
        self.devices_for_application(&self.application).await
    }

    /// List devices attached to the location named `location`
    pub async fn devices_for_location(&self, location: &str) -> Result<Option<Vec<Device>>> {
        let endpoint = format!("/v1/{}/devices/", self.application);
        let mut url = self.build_url(&endpoint)?;
        url.query_pairs_mut().append_pair("locationName", location);
        self.get_or_degrade(&endpoint, Some(url)).await
    }

    /// List locations of `application`
    pub async fn locations_for_application(
        &self,
        application: &str,
    ) -> Result<Option<Vec<Location>>> {
        let endpoint = format!("/v1/{}/locations/", application);
        self.get_or_degrade(&endpoint, None).await
    }

    /// List locations of the current application
    pub async fn locations(&self) -> Result<Option<Vec<Location>>> {
        self.locations_for_application(&self.application).await
    }

    /// Fetch the connection credentials of device `guid`
    pub async fn device_credentials(&self, guid: &str) -> Result<Option<DeviceCredentials>> {
        let endpoint = format!("/v1/{}/deviceCredentials/{}", self.application, guid);
        self.get_or_degrade(&endpoint, None).await
    }

    /// List every application visible to the session, regardless of namespace
    pub async fn applications(&self) -> Result<Option<Vec<Application>>> {
        self.get_or_degrade("/v1/applications/", None).await
    }
}

/// Append `endpoint` to the API root, keeping any path the root already has.
///
/// `https://host/konker` + `/v1/default/devices/` gives
/// `https://host/konker/v1/default/devices/`.
pub(crate) fn endpoint_url(base: &Url, endpoint: &str) -> Result<Url> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| Error::configuration(format!("{} cannot be used as an API root", base)))?
        .pop_if_empty()
        .extend(endpoint.trim_start_matches('/').split('/'));
    Ok(url)
}
