//! Windowed retrieval of incoming events.
//!
//! A requested range of days is walked in fixed-size windows, one
//! `incomingEvents` query per window. Each window's records are flattened into
//! an [`EventTable`], trimmed by the configured [`BoundaryPolicy`] and appended
//! in window order. Empty or failed windows are recorded, never fatal.

use crate::client::Client;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::table::EventTable;
use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, Timelike, Utc};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Default look-back, in days
pub const DEFAULT_RANGE_DAYS: i64 = -10;

/// Rows dropped from the head of every non-empty window by the legacy policy
pub const LEGACY_BOUNDARY_DROP: usize = 3;

/// Window size in days: 2 for ranges longer than a day, otherwise 1
pub fn batch_interval_days(range_days: i64) -> i64 {
    if range_days.abs() > 1 {
        2
    } else {
        1
    }
}

/// Number of windows planned for `range_days`: `ceil(|range| / interval) + 1`
pub fn window_count(range_days: i64) -> usize {
    let span = range_days.unsigned_abs();
    let interval = batch_interval_days(range_days).unsigned_abs();
    ((span + interval - 1) / interval + 1) as usize
}

/// Midnight of `now` in `offset`
pub fn floor_to_day(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<FixedOffset> {
    let local = now.with_timezone(&offset);
    local
        - Duration::seconds(i64::from(local.num_seconds_from_midnight()))
        - Duration::nanoseconds(i64::from(local.nanosecond()))
}

/// One half-open `[start, end)` query interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl fmt::Display for QueryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", iso(&self.start), iso(&self.end))
    }
}

/// Lay out contiguous windows covering `reference + range_days` onwards.
///
/// The range start is the reference shifted by `range_days`; windows walk
/// forward from there in steps of [`batch_interval_days`]. Fails with a
/// configuration error when a window would fall outside the representable
/// date range.
pub fn plan_windows(reference: DateTime<FixedOffset>, range_days: i64) -> Result<Vec<QueryWindow>> {
    let out_of_range = || {
        Error::configuration(format!(
            "range of {} days from {} is out of range",
            range_days,
            iso(&reference)
        ))
    };

    let interval = Duration::try_days(batch_interval_days(range_days)).ok_or_else(out_of_range)?;
    let mut start = Duration::try_days(range_days)
        .and_then(|shift| reference.checked_add_signed(shift))
        .ok_or_else(out_of_range)?;

    let mut windows = Vec::new();
    for _ in 0..window_count(range_days) {
        let end = start.checked_add_signed(interval).ok_or_else(out_of_range)?;
        windows.push(QueryWindow { start, end });
        start = end;
    }
    Ok(windows)
}

fn iso(instant: &DateTime<FixedOffset>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Search expression for one window of one device
#[derive(Debug, Clone, Copy)]
pub struct EventQuery<'a> {
    pub device: &'a str,
    pub channel: Option<&'a str>,
    pub window: &'a QueryWindow,
}

impl fmt::Display for EventQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{} ", self.device)?;
        if let Some(channel) = self.channel {
            write!(f, "channel:{} ", channel)?;
        }
        write!(
            f,
            "timestamp:>{} timestamp:<{}",
            iso(&self.window.start),
            iso(&self.window.end)
        )
    }
}

/// How records duplicated across window boundaries are removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryPolicy {
    /// Drop the first `n` rows of every non-empty window
    DropLeading(usize),
    /// Drop rows whose timestamp plus these columns was already fetched
    DedupeBy(Vec<String>),
    /// Keep everything the platform returns
    KeepAll,
}

impl BoundaryPolicy {
    /// Dedupe on timestamp, device and channel
    pub fn dedupe_by_device_channel() -> Self {
        BoundaryPolicy::DedupeBy(vec![
            "incoming.deviceGuid".to_string(),
            "incoming.channel".to_string(),
        ])
    }

    fn apply(&self, table: &mut EventTable, seen: &mut HashSet<String>) {
        match self {
            BoundaryPolicy::DropLeading(n) => table.drop_leading(*n),
            BoundaryPolicy::DedupeBy(keys) => table.dedupe_by(keys, seen),
            BoundaryPolicy::KeepAll => {}
        }
    }
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        BoundaryPolicy::DropLeading(LEGACY_BOUNDARY_DROP)
    }
}

/// Parameters of a `read_data` call
#[derive(Debug, Clone, PartialEq)]
pub struct ReadDataRequest {
    pub device: String,
    pub channel: Option<String>,
    /// Days to shift the reference by; negative looks backward
    pub range_days: i64,
    /// Reference instant, defaults to today's midnight in the configured zone
    pub start_date: Option<DateTime<FixedOffset>>,
}

impl ReadDataRequest {
    pub fn new<S: Into<String>>(device: S) -> Self {
        Self {
            device: device.into(),
            channel: None,
            range_days: DEFAULT_RANGE_DAYS,
            start_date: None,
        }
    }

    pub fn with_channel<S: Into<String>>(mut self, channel: S) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_range_days(mut self, range_days: i64) -> Self {
        self.range_days = range_days;
        self
    }

    pub fn with_start_date(mut self, start_date: DateTime<FixedOffset>) -> Self {
        self.start_date = Some(start_date);
        self
    }
}

/// What one window produced
#[derive(Debug)]
pub enum WindowOutcome {
    /// Records came back; `kept` is what survived the boundary policy
    Rows { fetched: usize, kept: usize },
    /// The window had no events
    Empty,
    /// The request or the envelope failed
    Failed(Error),
}

#[derive(Debug)]
pub struct WindowReport {
    pub window: QueryWindow,
    pub outcome: WindowOutcome,
}

/// Result of a windowed fetch: the combined table plus a per-window account
#[derive(Debug, Default)]
pub struct EventFetch {
    pub table: EventTable,
    pub windows: Vec<WindowReport>,
}

impl EventFetch {
    pub fn into_table(self) -> EventTable {
        self.table
    }

    pub fn filled_windows(&self) -> usize {
        self.count(|o| matches!(o, WindowOutcome::Rows { .. }))
    }

    pub fn empty_windows(&self) -> usize {
        self.count(|o| matches!(o, WindowOutcome::Empty))
    }

    pub fn failed_windows(&self) -> usize {
        self.count(|o| matches!(o, WindowOutcome::Failed(_)))
    }

    /// Errors of the failed windows, in window order
    pub fn failures(&self) -> impl Iterator<Item = (&QueryWindow, &Error)> {
        self.windows.iter().filter_map(|r| match &r.outcome {
            WindowOutcome::Failed(err) => Some((&r.window, err)),
            _ => None,
        })
    }

    /// One glyph per window: `.` rows, `X` empty, `!` failed
    pub fn progress(&self) -> String {
        self.windows
            .iter()
            .map(|r| match r.outcome {
                WindowOutcome::Rows { .. } => '.',
                WindowOutcome::Empty => 'X',
                WindowOutcome::Failed(_) => '!',
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&WindowOutcome) -> bool) -> usize {
        self.windows.iter().filter(|r| pred(&r.outcome)).count()
    }
}

impl Client {
    /// Read events of a device into a table.
    ///
    /// Fails only when no session is active or the range cannot be laid out
    /// on the calendar. See [`Client::fetch_events`] for a per-window account
    /// of what was fetched.
    pub async fn read_data(&self, request: &ReadDataRequest) -> Result<EventTable> {
        Ok(self.fetch_events(request).await?.into_table())
    }

    /// Walk the requested range window by window.
    ///
    /// With `max_concurrent_windows > 1` several windows are in flight at
    /// once; the table is still assembled in window order.
    pub async fn fetch_events(&self, request: &ReadDataRequest) -> Result<EventFetch> {
        let session = self.check_connection()?;

        let reference = request
            .start_date
            .unwrap_or_else(|| floor_to_day(Utc::now(), self.config.reference_offset));
        let windows = plan_windows(reference, request.range_days)?;

        log::info!(
            "Reading channel({}.{}) from {} in {} windows",
            request.device,
            request.channel.as_deref().unwrap_or("*"),
            windows.first().map(|w| iso(&w.start)).unwrap_or_default(),
            windows.len()
        );

        let client = self;
        let session = &*session;
        let results: Vec<(QueryWindow, Result<Vec<Value>>)> = stream::iter(windows)
            .map(|window| async move {
                let records = client.fetch_window(session, request, &window).await;
                (window, records)
            })
            .buffered(self.config.max_concurrent_windows.max(1))
            .collect()
            .await;

        let mut seen = HashSet::new();
        let mut batches = Vec::new();
        let mut reports = Vec::with_capacity(results.len());

        for (window, records) in results {
            let outcome = match records {
                Ok(records) if records.is_empty() => {
                    log::debug!("No events in {}", window);
                    WindowOutcome::Empty
                }
                Ok(records) => {
                    let mut batch = EventTable::from_records(&records);
                    self.config.boundary_policy.apply(&mut batch, &mut seen);
                    let kept = batch.len();
                    batches.push(batch);
                    WindowOutcome::Rows {
                        fetched: records.len(),
                        kept,
                    }
                }
                Err(err) => {
                    log::warn!("Window {} failed: {}", window, err);
                    WindowOutcome::Failed(err)
                }
            };
            reports.push(WindowReport { window, outcome });
        }

        let fetch = EventFetch {
            table: EventTable::concat(batches),
            windows: reports,
        };

        log::info!(
            "Done {} ({} rows, {} failed windows)",
            fetch.progress(),
            fetch.table.len(),
            fetch.failed_windows()
        );
        Ok(fetch)
    }

    async fn fetch_window(
        &self,
        session: &Session,
        request: &ReadDataRequest,
        window: &QueryWindow,
    ) -> Result<Vec<Value>> {
        let query = EventQuery {
            device: &request.device,
            channel: request.channel.as_deref(),
            window,
        };

        let mut url = self.build_url(&format!("/v1/{}/incomingEvents", self.application()))?;
        url.query_pairs_mut()
            .append_pair("q", &query.to_string())
            .append_pair("sort", "newest")
            .append_pair("limit", &self.config.event_limit.to_string());

        Ok(self
            .get_enveloped::<Vec<Value>>(session, url)
            .await?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::connected_client;
    use crate::client::ClientConfig;
    use crate::error::ErrorKind;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;

    fn brt() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    fn reference() -> DateTime<FixedOffset> {
        brt().with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()
    }

    fn records(n: usize, day: u32) -> Value {
        let rows: Vec<Value> = (0..n)
            .map(|i| {
                json!({
                    "timestamp": format!("2024-03-{:02}T{:02}:00:00Z", day, 23 - i),
                    "incoming": {"deviceGuid": "g-1", "channel": "temp"},
                    "payload": {"value": i}
                })
            })
            .collect();
        json!({"code": 200, "result": rows})
    }

    async fn mock_window(server: &mut ServerGuard, query: &str, body: Value) -> mockito::Mock {
        server
            .mock("GET", "/v1/default/incomingEvents")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), query.into()),
                Matcher::UrlEncoded("sort".into(), "newest".into()),
                Matcher::UrlEncoded("limit".into(), "10000".into()),
            ]))
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await
    }

    #[test]
    fn test_batch_interval() {
        for days in [-1, 0, 1] {
            assert_eq!(batch_interval_days(days), 1);
        }
        for days in [-2, -10, 2, 30] {
            assert_eq!(batch_interval_days(days), 2);
        }
    }

    #[test]
    fn test_window_count() {
        assert_eq!(window_count(-10), 6);
        assert_eq!(window_count(-5), 4);
        assert_eq!(window_count(-1), 2);
        assert_eq!(window_count(0), 1);
        assert_eq!(window_count(3), 3);
    }

    #[test]
    fn test_windows_are_contiguous() {
        for range in [-10, -7, -1, 0, 4] {
            let windows = plan_windows(reference(), range).unwrap();
            assert_eq!(windows.len(), window_count(range));
            assert_eq!(windows[0].start, reference() + Duration::days(range));
            for pair in windows.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
                assert!(pair[0].start < pair[1].start);
            }
            for w in &windows {
                assert_eq!(w.end - w.start, Duration::days(batch_interval_days(range)));
            }
        }
    }

    #[test]
    fn test_unrepresentable_range_is_rejected() {
        for range in [-200_000_000, 200_000_000, i64::MIN, i64::MAX] {
            let err = plan_windows(reference(), range).unwrap_err();
            assert_matches!(err.kind, ErrorKind::Configuration { .. });
        }
    }

    #[tokio::test]
    async fn test_read_data_rejects_unrepresentable_range() {
        let mut server = Server::new_async().await;
        let client = connected_client(&mut server).await;
        let mock = server
            .mock("GET", "/v1/default/incomingEvents")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let request = ReadDataRequest::new("dev1")
            .with_range_days(-200_000_000)
            .with_start_date(reference());
        let err = client.read_data(&request).await.unwrap_err();

        assert_matches!(err.kind, ErrorKind::Configuration { .. });
        mock.assert_async().await;
    }

    #[test]
    fn test_floor_to_day_uses_offset() {
        // 02:30 UTC is still the previous day at UTC-3
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 2, 30, 15).unwrap();
        let floored = floor_to_day(now, brt());
        assert_eq!(floored, brt().with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_query_string() {
        let window = QueryWindow {
            start: reference(),
            end: reference() + Duration::days(2),
        };
        let with_channel = EventQuery {
            device: "dev1",
            channel: Some("temp"),
            window: &window,
        };
        assert_eq!(
            with_channel.to_string(),
            "device:dev1 channel:temp timestamp:>2024-03-10T00:00:00-03:00 timestamp:<2024-03-12T00:00:00-03:00"
        );

        let without = EventQuery {
            channel: None,
            ..with_channel
        };
        assert_eq!(
            without.to_string(),
            "device:dev1 timestamp:>2024-03-10T00:00:00-03:00 timestamp:<2024-03-12T00:00:00-03:00"
        );
    }

    #[test]
    fn test_request_defaults() {
        let request = ReadDataRequest::new("dev1");
        assert_eq!(request.range_days, -10);
        assert!(request.channel.is_none());
        assert!(request.start_date.is_none());
    }

    #[tokio::test]
    async fn test_read_data_requires_session() {
        let client = Client::new(ClientConfig::default()).unwrap();
        let err = client.read_data(&ReadDataRequest::new("dev1")).await.unwrap_err();
        assert_matches!(err.kind, ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_all_windows_empty() {
        let mut server = Server::new_async().await;
        let client = connected_client(&mut server).await;
        let mock = server
            .mock("GET", "/v1/default/incomingEvents")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"code": 200, "result": []}).to_string())
            .expect(6)
            .create_async()
            .await;

        let request = ReadDataRequest::new("dev1").with_start_date(reference());
        let fetch = client.fetch_events(&request).await.unwrap();

        assert!(fetch.table.is_empty());
        assert!(fetch.table.columns().is_empty());
        assert_eq!(fetch.empty_windows(), 6);
        assert_eq!(fetch.progress(), "XXXXXX");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_boundary_drop_per_window() {
        let mut server = Server::new_async().await;
        let client = connected_client(&mut server).await;

        // range -4 at interval 2: windows start on the 6th, 8th and 10th
        let q = |a: u32, b: u32| {
            format!(
                "device:dev1 channel:temp timestamp:>2024-03-{:02}T00:00:00-03:00 timestamp:<2024-03-{:02}T00:00:00-03:00",
                a, b
            )
        };
        let _m = mock_window(&mut server, &q(6, 8), records(3, 7)).await;
        let _m = mock_window(&mut server, &q(8, 10), records(4, 9)).await;
        let _m = mock_window(&mut server, &q(10, 12), records(10, 11)).await;

        let request = ReadDataRequest::new("dev1")
            .with_channel("temp")
            .with_range_days(-4)
            .with_start_date(reference());
        let fetch = client.fetch_events(&request).await.unwrap();

        assert_eq!(fetch.progress(), "...");
        assert_eq!(fetch.table.len(), 8);
        assert_matches!(fetch.windows[0].outcome, WindowOutcome::Rows { fetched: 3, kept: 0 });
        assert_matches!(fetch.windows[1].outcome, WindowOutcome::Rows { fetched: 4, kept: 1 });
        assert_matches!(fetch.windows[2].outcome, WindowOutcome::Rows { fetched: 10, kept: 7 });

        // append order, newest-first inside each window
        let ts = fetch.table.rows()[0].timestamp_str();
        assert_eq!(ts.as_deref(), Some("2024-03-09T20:00:00Z"));
        let ts = fetch.table.rows()[1].timestamp_str();
        assert_eq!(ts.as_deref(), Some("2024-03-11T20:00:00Z"));
    }

    #[tokio::test]
    async fn test_failed_window_does_not_abort() {
        let mut server = Server::new_async().await;
        let client = connected_client(&mut server).await;

        let q = |a: u32, b: u32| {
            format!(
                "device:dev1 timestamp:>2024-03-{:02}T00:00:00-03:00 timestamp:<2024-03-{:02}T00:00:00-03:00",
                a, b
            )
        };
        let _m = mock_window(&mut server, &q(6, 8), json!({"code": 500, "messages": ["boom"]})).await;
        let _m = mock_window(&mut server, &q(8, 10), json!({"code": 200, "result": []})).await;
        let _m = mock_window(&mut server, &q(10, 12), records(5, 11)).await;

        let request = ReadDataRequest::new("dev1")
            .with_range_days(-4)
            .with_start_date(reference());
        let fetch = client.fetch_events(&request).await.unwrap();

        assert_eq!(fetch.progress(), "!X.");
        assert_eq!(fetch.failed_windows(), 1);
        assert_eq!(fetch.table.len(), 2);
        let (window, err) = fetch.failures().next().unwrap();
        assert_eq!(window.start, reference() - Duration::days(4));
        assert!(err.is_remote());
    }

    #[tokio::test]
    async fn test_concurrent_fetch_keeps_window_order() {
        let mut server = Server::new_async().await;
        let mut client = connected_client(&mut server).await;
        client.config = client
            .config
            .clone()
            .with_max_concurrent_windows(3)
            .with_boundary_policy(BoundaryPolicy::KeepAll);

        let q = |a: u32, b: u32| {
            format!(
                "device:dev1 timestamp:>2024-03-{:02}T00:00:00-03:00 timestamp:<2024-03-{:02}T00:00:00-03:00",
                a, b
            )
        };
        let _m = mock_window(&mut server, &q(6, 8), records(1, 7)).await;
        let _m = mock_window(&mut server, &q(8, 10), records(1, 9)).await;
        let _m = mock_window(&mut server, &q(10, 12), records(1, 11)).await;

        let request = ReadDataRequest::new("dev1")
            .with_range_days(-4)
            .with_start_date(reference());
        let table = client.read_data(&request).await.unwrap();

        let days: Vec<String> = table
            .rows()
            .iter()
            .filter_map(|r| r.timestamp_str())
            .map(|ts| ts[..10].to_string())
            .collect();
        assert_eq!(days, vec!["2024-03-07", "2024-03-09", "2024-03-11"]);
    }

    #[tokio::test]
    async fn test_dedupe_policy_removes_repeated_events() {
        let mut server = Server::new_async().await;
        let mut client = connected_client(&mut server).await;
        client.config = client
            .config
            .clone()
            .with_boundary_policy(BoundaryPolicy::dedupe_by_device_channel());

        let q = |a: u32, b: u32| {
            format!(
                "device:dev1 timestamp:>2024-03-{:02}T00:00:00-03:00 timestamp:<2024-03-{:02}T00:00:00-03:00",
                a, b
            )
        };
        // the same event reported by both windows
        let edge = json!({
            "timestamp": "2024-03-08T03:00:00Z",
            "incoming": {"deviceGuid": "g-1", "channel": "temp"}
        });
        let _m = mock_window(&mut server, &q(6, 8), json!({"code": 200, "result": [edge.clone()]})).await;
        let _m = mock_window(&mut server, &q(8, 10), json!({"code": 200, "result": [edge]})).await;
        let _m = mock_window(&mut server, &q(10, 12), json!({"code": 200, "result": []})).await;

        let request = ReadDataRequest::new("dev1")
            .with_range_days(-4)
            .with_start_date(reference());
        let fetch = client.fetch_events(&request).await.unwrap();

        assert_eq!(fetch.table.len(), 1);
        assert_matches!(fetch.windows[1].outcome, WindowOutcome::Rows { fetched: 1, kept: 0 });
    }
}
