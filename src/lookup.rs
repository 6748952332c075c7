//! Substring search over fetched records.

use crate::types::{Application, Device, Location};
use serde_json::Value;

/// Records that carry a display name
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for Device {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Location {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Application {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Raw records without a string `name` never match a non-empty needle
impl Named for Value {
    fn name(&self) -> &str {
        self.get("name").and_then(Value::as_str).unwrap_or("")
    }
}

/// Every record whose name contains `needle`, case-sensitive, in input order.
///
/// ```
/// use konker_sdk::{lookfor, Device};
///
/// let devices = vec![Device::named("Pump 1"), Device::named("Valve"), Device::named("Pump 2")];
/// let pumps = lookfor("Pump", &devices);
/// assert_eq!(pumps.len(), 2);
/// ```
pub fn lookfor<'a, T: Named>(needle: &str, records: &'a [T]) -> Vec<&'a T> {
    records.iter().filter(|r| r.name().contains(needle)).collect()
}
