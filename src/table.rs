//! Tabular view over incoming event records.
//!
//! Each record is flattened into a row (nested objects become dotted column
//! names) and indexed by its `timestamp` field. The column set is the union of
//! every key seen, in first-seen order. Rows keep the order they were added in.

use crate::error::Result;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

/// Field used as the row index
pub const INDEX_FIELD: &str = "timestamp";

/// Column used for records that are not JSON objects
pub const SCALAR_COLUMN: &str = "value";

/// Flatten a JSON record into dotted column names.
///
/// `{"incoming": {"channel": "temp"}}` becomes `{"incoming.channel": "temp"}`.
/// Arrays are kept as values.
pub fn flatten_record(record: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    match record {
        Value::Object(map) => flatten_into(&mut out, None, map),
        other => {
            out.insert(SCALAR_COLUMN.to_string(), other.clone());
        }
    }
    out
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, map: &Map<String, Value>) {
    for (key, value) in map {
        let name = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(out, Some(&name), inner),
            other => {
                out.insert(name, other.clone());
            }
        }
    }
}

/// One event, flattened
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    /// Index value, `None` when the record had no timestamp
    pub timestamp: Option<Value>,
    /// Flattened fields without the index
    pub values: Map<String, Value>,
}

impl EventRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Timestamp rendered as text
    pub fn timestamp_str(&self) -> Option<String> {
        self.timestamp.as_ref().map(render_cell)
    }
}

/// Events fetched from the platform as rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTable {
    columns: Vec<String>,
    rows: Vec<EventRow>,
}

impl EventTable {
    /// An empty table with no schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from raw records, preserving their order
    pub fn from_records(records: &[Value]) -> Self {
        let mut table = Self::new();
        for record in records {
            table.push_record(record);
        }
        table
    }

    /// Flatten and append one record
    pub fn push_record(&mut self, record: &Value) {
        let mut values = flatten_record(record);
        let timestamp = values.remove(INDEX_FIELD);
        self.push_row(EventRow { timestamp, values });
    }

    fn push_row(&mut self, row: EventRow) {
        for key in row.values.keys() {
            if !self.columns.iter().any(|c| c == key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(row);
    }

    /// Append all rows of `other` after the rows of `self`
    pub fn append(&mut self, other: EventTable) {
        for row in other.rows {
            self.push_row(row);
        }
    }

    /// Concatenate tables in order
    pub fn concat<I: IntoIterator<Item = EventTable>>(tables: I) -> Self {
        let mut out = Self::new();
        for table in tables {
            out.append(table);
        }
        out
    }

    /// Remove the first `n` rows. Columns only present in dropped rows remain.
    pub fn drop_leading(&mut self, n: usize) {
        let n = n.min(self.rows.len());
        self.rows.drain(..n);
    }

    /// Drop rows whose key was already seen, recording new keys in `seen`.
    ///
    /// The key is the row timestamp followed by the values of `key_columns`.
    pub fn dedupe_by(&mut self, key_columns: &[String], seen: &mut HashSet<String>) {
        self.rows.retain(|row| {
            let mut key = row.timestamp_str().unwrap_or_default();
            for column in key_columns {
                key.push('\u{1f}');
                if let Some(value) = row.get(column) {
                    key.push_str(&render_cell(value));
                }
            }
            seen.insert(key)
        });
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[EventRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index values in row order
    pub fn timestamps(&self) -> Vec<Option<&Value>> {
        self.rows.iter().map(|r| r.timestamp.as_ref()).collect()
    }

    /// Values of one column in row order, `None` where a row lacks it
    pub fn column(&self, name: &str) -> Vec<Option<&Value>> {
        self.rows.iter().map(|r| r.get(name)).collect()
    }

    /// Rows as JSON objects, index first
    pub fn to_json(&self) -> Result<String> {
        let rows: Vec<Value> = self
            .rows
            .iter()
            .map(|row| {
                let mut obj = Map::new();
                obj.insert(
                    INDEX_FIELD.to_string(),
                    row.timestamp.clone().unwrap_or(Value::Null),
                );
                for (k, v) in &row.values {
                    obj.insert(k.clone(), v.clone());
                }
                Value::Object(obj)
            })
            .collect();
        serde_json::to_string(&rows).map_err(Into::into)
    }

    /// Render as CSV with a `timestamp` column followed by all columns
    #[cfg(feature = "csv")]
    pub fn to_csv(&self) -> Result<String> {
        use crate::error::Error;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(true)
            .from_writer(Vec::new());

        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push(INDEX_FIELD.to_string());
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = Vec::with_capacity(header.len());
            record.push(row.timestamp_str().unwrap_or_default());
            for column in &self.columns {
                record.push(row.get(column).map(render_cell).unwrap_or_default());
            }
            writer.write_record(&record)?;
        }

        let data = writer.into_inner().map_err(|e| Error::internal(e.to_string()))?;
        String::from_utf8(data).map_err(|e| Error::internal(e.to_string()))
    }
}

impl fmt::Display for EventTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventTable(rows={}, columns={})",
            self.rows.len(),
            self.columns.len()
        )
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(ts: &str, channel: &str, temp: f64) -> Value {
        json!({
            "timestamp": ts,
            "incoming": {"deviceGuid": "g-1", "channel": channel},
            "payload": {"temp": temp}
        })
    }

    #[test]
    fn test_flatten_nested() {
        let flat = flatten_record(&json!({"a": {"b": {"c": 1}}, "d": [1, 2], "e": {}}));
        assert_eq!(flat.get("a.b.c"), Some(&json!(1)));
        assert_eq!(flat.get("d"), Some(&json!([1, 2])));
        assert_eq!(flat.get("e"), Some(&json!({})));
    }

    #[test]
    fn test_from_records_indexes_by_timestamp() {
        let table = EventTable::from_records(&[
            event("2024-01-02T10:00:00Z", "temp", 20.5),
            event("2024-01-02T09:00:00Z", "temp", 19.0),
        ]);

        assert_eq!(table.len(), 2);
        assert!(!table.columns().iter().any(|c| c == INDEX_FIELD));
        assert_eq!(
            table.timestamps(),
            vec![Some(&json!("2024-01-02T10:00:00Z")), Some(&json!("2024-01-02T09:00:00Z"))]
        );
        assert_eq!(table.column("payload.temp"), vec![Some(&json!(20.5)), Some(&json!(19.0))]);
    }

    #[test]
    fn test_columns_are_union() {
        let table = EventTable::from_records(&[
            json!({"timestamp": 1, "a": 1}),
            json!({"timestamp": 2, "b": 2}),
        ]);
        assert_eq!(table.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(table.column("b"), vec![None, Some(&json!(2))]);
    }

    #[test]
    fn test_drop_leading() {
        let records: Vec<Value> = (0..4).map(|i| json!({"timestamp": i})).collect();
        let mut table = EventTable::from_records(&records);
        table.drop_leading(3);
        assert_eq!(table.timestamps(), vec![Some(&json!(3))]);

        table.drop_leading(10);
        assert!(table.is_empty());
    }

    #[test]
    fn test_dedupe_across_tables() {
        let keys = vec!["incoming.channel".to_string()];
        let mut seen = HashSet::new();

        let mut first = EventTable::from_records(&[
            event("t2", "temp", 1.0),
            event("t1", "temp", 1.0),
            event("t1", "hum", 1.0),
        ]);
        first.dedupe_by(&keys, &mut seen);
        assert_eq!(first.len(), 3);

        let mut second = EventTable::from_records(&[event("t3", "temp", 1.0), event("t2", "temp", 1.0)]);
        second.dedupe_by(&keys, &mut seen);
        assert_eq!(second.len(), 1);
        assert_eq!(second.rows()[0].timestamp_str().as_deref(), Some("t3"));
    }

    #[test]
    fn test_concat_keeps_append_order() {
        let a = EventTable::from_records(&[json!({"timestamp": 5})]);
        let b = EventTable::from_records(&[json!({"timestamp": 1})]);
        let all = EventTable::concat(vec![a, b]);
        assert_eq!(all.timestamps(), vec![Some(&json!(5)), Some(&json!(1))]);
    }

    #[test]
    fn test_to_json_puts_index_back() {
        let table = EventTable::from_records(&[event("t1", "temp", 2.0)]);
        let rows: Vec<Value> = serde_json::from_str(&table.to_json().unwrap()).unwrap();
        assert_eq!(rows[0]["timestamp"], json!("t1"));
        assert_eq!(rows[0]["payload.temp"], json!(2.0));
    }

    #[cfg(feature = "csv")]
    #[test]
    fn test_to_csv() {
        let table = EventTable::from_records(&[
            json!({"timestamp": "t1", "a": "x", "b": 1}),
            json!({"timestamp": "t2", "a": "y"}),
        ]);
        let csv = table.to_csv().unwrap();
        assert_eq!(csv, "timestamp,a,b\nt1,x,1\nt2,y,\n");
    }
}
