//! # Konker Rust SDK
//!
//! A Rust client library for the Konker IoT device-management platform.
//! It authenticates through the OAuth2 client-credentials flow and exposes the
//! platform's read-only resources plus a windowed time-series fetch.
//!
//! ## Features
//!
//! - **Login** with explicit credentials or an identity from a local
//!   `credentials.json` store
//! - **Resource accessors** for applications, devices, locations and device
//!   credentials, scoped by application namespace
//! - **Event retrieval** split into day windows and assembled into an
//!   [`EventTable`], with per-window outcomes
//! - **CSV export** of fetched events (default `csv` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use konker_sdk::{Client, ReadDataRequest, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     konker_sdk::init_logging();
//!
//!     let mut client = Client::from_url("https://api.prod.konkerlabs.net")?;
//!     let outcome = client.login_with("user@example.com", "secret").await?;
//!     if !outcome.is_authenticated() {
//!         return Ok(());
//!     }
//!
//!     client.set_application("default");
//!     let devices = client.devices().await?.unwrap_or_default();
//!     for device in konker_sdk::lookfor("Pump", &devices) {
//!         if let Some(guid) = &device.guid {
//!             let request = ReadDataRequest::new(guid.as_str()).with_range_days(-4);
//!             let table = client.read_data(&request).await?;
//!             println!("{}: {}", device.name, table);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Only a missing session and an unresolvable identity fail hard. A non-200
//! envelope from an accessor becomes `Ok(None)`; a failed window shows up in
//! [`EventFetch::windows`]:
//!
//! ```rust,no_run
//! # async fn run(client: &konker_sdk::Client) -> konker_sdk::Result<()> {
//! use konker_sdk::ReadDataRequest;
//!
//! let fetch = client.fetch_events(&ReadDataRequest::new("device-guid")).await?;
//! for (window, err) in fetch.failures() {
//!     eprintln!("{} failed: {}", window, err);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod credentials;
pub mod error;
pub mod events;
pub mod lookup;
pub mod session;
pub mod table;
pub mod types;

// Re-export commonly used types
pub use client::{Client, ClientConfig};
pub use credentials::{CredentialStore, StoredCredentials};
pub use error::{Error, ErrorKind, Result};
pub use events::{
    BoundaryPolicy, EventFetch, QueryWindow, ReadDataRequest, WindowOutcome, WindowReport,
};
pub use lookup::{lookfor, Named};
pub use session::{BearerToken, LoginOutcome, Session};
pub use table::{EventRow, EventTable};
pub use types::{Application, Device, DeviceCredentials, Envelope, Location};

/// SDK version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// SDK name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Production API root
    pub const BASE_URL: &str = "https://api.prod.konkerlabs.net";

    /// Namespace used until one is selected
    pub const APPLICATION: &str = "default";

    /// Credential store consulted by identity logins
    pub const CREDENTIALS_FILE: &str = "credentials.json";

    /// Default request timeout
    pub const TIMEOUT: Duration = Duration::from_secs(30);

    /// Default connect timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Events requested per window
    pub const EVENT_LIMIT: usize = 10_000;

    /// UTC-03:00, America/Sao_Paulo without daylight saving
    pub const REFERENCE_OFFSET_WEST_SECS: i32 = 3 * 3600;
}

/// Initialize the SDK with logging
///
/// This function sets up environment-based logging for the SDK.
/// Call this once at the start of your application.
///
/// # Example
///
/// ```rust
/// konker_sdk::init_logging();
/// ```
pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// Get the SDK version
pub fn version() -> &'static str {
    VERSION
}

/// Get the SDK name
pub fn name() -> &'static str {
    NAME
}
