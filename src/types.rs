//! Records and wire types returned by the Konker REST API.
//!
//! Every resource endpoint wraps its payload in an [`Envelope`]. The record
//! types only name the fields this SDK relies on; everything else the platform
//! sends is kept verbatim in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelope code the platform uses for success
pub const SUCCESS_CODE: i64 = 200;

/// The `{code, result}` wrapper around every resource response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Platform status code, mirrors HTTP semantics
    pub code: i64,
    /// Payload, absent on most error responses
    #[serde(default)]
    pub result: Option<T>,
}

impl<T> Envelope<T> {
    /// Check if the envelope carries a success code
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

/// A device registered in an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Platform-wide identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    /// Identifier chosen by the device owner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Location the device is attached to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    /// Remaining fields, untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Device {
    /// Create a device record with only a name
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            guid: None,
            id: None,
            name: name.into(),
            location_name: None,
            extra: Map::new(),
        }
    }

    /// Set the guid
    pub fn with_guid<S: Into<String>>(mut self, guid: S) -> Self {
        self.guid = Some(guid.into());
        self
    }
}

/// A location node of an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An application (namespace) visible to the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Connection credentials issued for a single device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
