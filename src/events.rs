//! Progress and request-log events emitted by the crawl.
//!
//! The core never buffers or batches: every unit of work produces a
//! synchronous callback into the injected [`CrawlObserver`]. Consumers
//! (UI, logger) decide what to do with the stream.

use std::fmt;
use std::time::{Duration, SystemTime};

use tracing::{debug, trace, warn};

/// Kind of HTTP exchange a log entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// GET returning an HTML body.
    GetHtml,
    /// GET returning a JSON body.
    GetJson,
    /// POST with a form body.
    Post,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequestKind::GetHtml => "GET HTML",
            RequestKind::GetJson => "GET JSON",
            RequestKind::Post => "POST",
        };
        f.write_str(label)
    }
}

/// Outcome of one request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    /// Attempt is about to run.
    Pending,
    /// Waiting out a backoff delay before the next attempt.
    Delaying,
    /// Attempt succeeded.
    Success,
    /// Attempt failed with a classified network error.
    Failed,
    /// Attempt hit the client timeout.
    Timeout,
    /// The caller cancelled the operation.
    Cancelled,
    /// Attempt failed for an unexpected reason.
    Error,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequestStatus::Pending => "Pending",
            RequestStatus::Delaying => "Delaying",
            RequestStatus::Success => "Success",
            RequestStatus::Failed => "Failed",
            RequestStatus::Timeout => "Timeout",
            RequestStatus::Cancelled => "Cancelled",
            RequestStatus::Error => "Error",
        };
        f.write_str(label)
    }
}

/// One log entry per request attempt.
#[derive(Debug, Clone)]
pub struct RequestLogEntry {
    /// Request URL.
    pub url: String,
    /// Request kind.
    pub kind: RequestKind,
    /// Attempt outcome.
    pub status: RequestStatus,
    /// Free-form detail (attempt number, classified kind, delay).
    pub detail: String,
    /// When the attempt started.
    pub timestamp: SystemTime,
    /// Elapsed time since the attempt started.
    pub duration: Duration,
}

/// Aggregate view of pipeline completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub total_cities: usize,
    pub parsed_cities: usize,
    pub total_universities: usize,
    pub parsed_universities: usize,
    pub total_offers: usize,
    pub parsed_offers: usize,
    pub total_applications: usize,
    pub parsed_applications: usize,
    /// Overall completion in percent, 0 when nothing is known yet.
    pub overall_percentage: f64,
    /// Label of the first incomplete stage, or "Completed".
    pub current_stage: String,
}

/// Sink for progress and request-log events.
///
/// Both callbacks are invoked synchronously from the pipeline task.
pub trait CrawlObserver: Send + Sync {
    /// Called after every unit of work with the fresh aggregate state.
    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}

    /// Called once per request attempt.
    fn on_request_log(&self, _entry: &RequestLogEntry) {}
}

/// Observer that drops every event.
pub struct NullObserver;

impl CrawlObserver for NullObserver {}

/// Observer that forwards events to `tracing`.
pub struct TracingObserver;

impl CrawlObserver for TracingObserver {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        debug!(
            stage = %snapshot.current_stage,
            percentage = snapshot.overall_percentage,
            "crawl progress"
        );
    }

    fn on_request_log(&self, entry: &RequestLogEntry) {
        match entry.status {
            RequestStatus::Failed | RequestStatus::Timeout | RequestStatus::Error => {
                warn!(
                    url = %entry.url,
                    kind = %entry.kind,
                    status = %entry.status,
                    duration_ms = entry.duration.as_millis() as u64,
                    "{}",
                    entry.detail
                );
            }
            RequestStatus::Success => {
                debug!(
                    url = %entry.url,
                    kind = %entry.kind,
                    duration_ms = entry.duration.as_millis() as u64,
                    "{}",
                    entry.detail
                );
            }
            _ => {
                trace!(url = %entry.url, kind = %entry.kind, status = %entry.status, "{}", entry.detail);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_request_kind_display() {
        assert_eq!(RequestKind::GetHtml.to_string(), "GET HTML");
        assert_eq!(RequestKind::GetJson.to_string(), "GET JSON");
        assert_eq!(RequestKind::Post.to_string(), "POST");
    }

    #[test]
    fn test_request_status_display() {
        assert_eq!(RequestStatus::Pending.to_string(), "Pending");
        assert_eq!(RequestStatus::Delaying.to_string(), "Delaying");
        assert_eq!(RequestStatus::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn test_progress_snapshot_default() {
        let snapshot = ProgressSnapshot::default();
        assert_eq!(snapshot.overall_percentage, 0.0);
        assert_eq!(snapshot.current_stage, "");
    }

    #[test]
    fn test_observer_default_methods_are_noops() {
        struct Silent;
        impl CrawlObserver for Silent {}

        let observer = Silent;
        observer.on_progress(&ProgressSnapshot::default());
        observer.on_request_log(&RequestLogEntry {
            url: "https://example.com".to_string(),
            kind: RequestKind::Post,
            status: RequestStatus::Success,
            detail: String::new(),
            timestamp: SystemTime::now(),
            duration: Duration::from_millis(5),
        });
    }

    #[test]
    fn test_custom_observer_receives_events() {
        struct Recording {
            entries: Mutex<Vec<RequestStatus>>,
        }
        impl CrawlObserver for Recording {
            fn on_request_log(&self, entry: &RequestLogEntry) {
                self.entries.lock().unwrap().push(entry.status);
            }
        }

        let observer = Recording {
            entries: Mutex::new(Vec::new()),
        };
        observer.on_request_log(&RequestLogEntry {
            url: "u".to_string(),
            kind: RequestKind::GetHtml,
            status: RequestStatus::Failed,
            detail: "boom".to_string(),
            timestamp: SystemTime::now(),
            duration: Duration::ZERO,
        });
        assert_eq!(*observer.entries.lock().unwrap(), vec![RequestStatus::Failed]);
    }
}
