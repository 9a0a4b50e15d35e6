//! Metrics emission.
//!
//! Components record through a [`MetricsSink`] handed to them at construction.
//! Recording never fails and never blocks the caller.

use metrics::{counter, histogram};
use std::sync::Mutex;
use std::time::Duration;

/// How a proxied invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The function answered and its body was streamed. Function errors
    /// (4xx, 5xx) land here too; the upstream status is recorded alongside.
    Success,
    /// The per-call deadline elapsed, before or during the response body.
    Timeout,
    /// No healthy instance was found.
    ResolverMiss,
    /// The catalog could not be queried.
    ResolverError,
    /// The instance could not be reached or the exchange broke.
    UpstreamError,
    /// The request was refused before resolution.
    Rejected,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::ResolverMiss => "resolver_miss",
            Self::ResolverError => "resolver_error",
            Self::UpstreamError => "upstream_error",
            Self::Rejected => "rejected",
        }
    }
}

/// One invocation, as handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRecord {
    pub function: String,
    pub outcome: Outcome,
    pub status: u16,
    pub latency: Duration,
}

/// Destination for provider metrics.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    /// Record the single result of a proxied invocation.
    fn record_invocation(&self, record: &InvocationRecord);

    /// Record a request to one of the administrative routes.
    fn record_request(&self, route: &str, method: &str, status: u16, latency: Duration);

    /// Increment a named event counter, optionally scoped to a function.
    fn incr(&self, event: &'static str, function: Option<&str>);
}

/// Sink that forwards to the global `metrics` recorder.
#[derive(Debug, Clone, Default)]
pub struct PrometheusSink;

impl PrometheusSink {
    pub fn new() -> Self {
        Self
    }
}

impl MetricsSink for PrometheusSink {
    fn record_invocation(&self, record: &InvocationRecord) {
        counter!(
            "faas.nomad.invocations",
            "function" => record.function.clone(),
            "outcome" => record.outcome.as_str(),
            "status" => record.status.to_string()
        )
        .increment(1);

        histogram!(
            "faas.nomad.invocation.duration",
            "function" => record.function.clone(),
            "outcome" => record.outcome.as_str()
        )
        .record(record.latency.as_secs_f64());
    }

    fn record_request(&self, route: &str, method: &str, status: u16, latency: Duration) {
        counter!(
            "faas.nomad.api.requests",
            "route" => route.to_owned(),
            "method" => method.to_owned(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            "faas.nomad.api.request.duration",
            "route" => route.to_owned(),
            "method" => method.to_owned()
        )
        .record(latency.as_secs_f64());
    }

    fn incr(&self, event: &'static str, function: Option<&str>) {
        let name = format!("faas.nomad.{event}");
        match function {
            Some(function) => counter!(name, "function" => function.to_owned()).increment(1),
            None => counter!(name).increment(1),
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record_invocation(&self, _record: &InvocationRecord) {}

    fn record_request(&self, _route: &str, _method: &str, _status: u16, _latency: Duration) {}

    fn incr(&self, _event: &'static str, _function: Option<&str>) {}
}

/// Sink that keeps everything in memory for inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    invocations: Mutex<Vec<InvocationRecord>>,
    requests: Mutex<Vec<(String, String, u16)>>,
    events: Mutex<Vec<(&'static str, Option<String>)>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> Vec<InvocationRecord> {
        self.invocations
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Invocations of `function` that ended with `outcome`.
    pub fn count(&self, function: &str, outcome: Outcome) -> usize {
        self.invocations()
            .iter()
            .filter(|r| r.function == function && r.outcome == outcome)
            .count()
    }

    /// `(route, method, status)` of each administrative request.
    pub fn requests(&self) -> Vec<(String, String, u16)> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<(&'static str, Option<String>)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl MetricsSink for RecordingSink {
    fn record_invocation(&self, record: &InvocationRecord) {
        if let Ok(mut records) = self.invocations.lock() {
            records.push(record.clone());
        }
    }

    fn record_request(&self, route: &str, method: &str, status: u16, _latency: Duration) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((route.to_owned(), method.to_owned(), status));
        }
    }

    fn incr(&self, event: &'static str, function: Option<&str>) {
        if let Ok(mut events) = self.events.lock() {
            events.push((event, function.map(ToOwned::to_owned)));
        }
    }
}
