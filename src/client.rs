//! Retry orchestration over the proxy pool.
//!
//! [`RetryClient`] wraps one logical request in a loop over the pool: on
//! failure it classifies the error, deactivates the offending client,
//! waits out a backoff delay and retries on the next client, giving up
//! once the budget (the active count at call start) is exhausted.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::backoff;
use crate::error::{CrawlError, FailureKind, Result};
use crate::events::{CrawlObserver, RequestKind, RequestLogEntry, RequestStatus};
use crate::gateway::{HttpGateway, RawResponse};
use crate::proxy::ProxyPool;
use crate::stealth;

/// Retry-aware HTTP client rotating over the proxy pool.
pub struct RetryClient {
    pool: Arc<ProxyPool>,
    observer: Arc<dyn CrawlObserver>,
    rng: Mutex<StdRng>,
}

impl RetryClient {
    /// Creates a client with an entropy-seeded random source.
    pub fn new(pool: Arc<ProxyPool>, observer: Arc<dyn CrawlObserver>) -> Self {
        Self::with_rng(pool, observer, StdRng::from_entropy())
    }

    /// Creates a client with a caller-supplied random source.
    ///
    /// A seeded generator makes header and jitter choices reproducible.
    pub fn with_rng(pool: Arc<ProxyPool>, observer: Arc<dyn CrawlObserver>, rng: StdRng) -> Self {
        Self {
            pool,
            observer,
            rng: Mutex::new(rng),
        }
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log(
        &self,
        url: &str,
        kind: RequestKind,
        status: RequestStatus,
        detail: String,
        started: Instant,
        timestamp: SystemTime,
    ) {
        self.observer.on_request_log(&RequestLogEntry {
            url: url.to_string(),
            kind,
            status,
            detail,
            timestamp,
            duration: started.elapsed(),
        });
    }

    /// Sleeps for `delay`, aborting immediately on cancellation.
    async fn wait(
        &self,
        delay: Duration,
        url: &str,
        kind: RequestKind,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => {
                self.log(
                    url,
                    kind,
                    RequestStatus::Cancelled,
                    "cancelled while delaying".to_string(),
                    Instant::now(),
                    SystemTime::now(),
                );
                Err(CrawlError::Cancelled)
            }
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Runs `action` with up to `active_count()` clients.
    ///
    /// The budget is read once at call start. Every attempt gets a freshly
    /// composed anti-detection header set. A blocked classification adds a
    /// cool-down on top of the generic backoff; a malformed payload is
    /// surfaced immediately without burning further clients.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        url: &str,
        kind: RequestKind,
        cancel: &CancellationToken,
        action: F,
    ) -> Result<T>
    where
        T: Send,
        F: Fn(Client, HeaderMap) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        let budget = self.pool.active_count();

        for attempt in 0..budget {
            let started = Instant::now();
            let timestamp = SystemTime::now();

            if cancel.is_cancelled() {
                self.log(
                    url,
                    kind,
                    RequestStatus::Cancelled,
                    "caller cancelled".to_string(),
                    started,
                    timestamp,
                );
                return Err(CrawlError::Cancelled);
            }

            if attempt > 0 {
                let delay = {
                    let mut rng = self.rng();
                    backoff::retry_delay(attempt as u32, &mut *rng)
                };
                self.log(
                    url,
                    kind,
                    RequestStatus::Delaying,
                    format!("waiting {}ms before retry {}", delay.as_millis(), attempt + 1),
                    started,
                    timestamp,
                );
                self.wait(delay, url, kind, cancel).await?;
            }

            let handle = self.pool.acquire()?;
            self.log(
                url,
                kind,
                RequestStatus::Pending,
                format!("attempt {}/{} via {}", attempt + 1, budget, handle.proxy),
                started,
                timestamp,
            );

            let headers = {
                let mut rng = self.rng();
                stealth::compose(url, &mut *rng)
            };

            match action(handle.client.clone(), headers).await {
                Ok(value) => {
                    self.log(
                        url,
                        kind,
                        RequestStatus::Success,
                        format!("completed on attempt {}", attempt + 1),
                        started,
                        timestamp,
                    );
                    return Ok(value);
                }
                Err(CrawlError::Cancelled) => {
                    self.log(
                        url,
                        kind,
                        RequestStatus::Cancelled,
                        "caller cancelled".to_string(),
                        started,
                        timestamp,
                    );
                    return Err(CrawlError::Cancelled);
                }
                Err(CrawlError::MalformedPayload(message)) => {
                    return Err(CrawlError::MalformedPayload(message));
                }
                Err(CrawlError::Classified { kind: failure, message }) => {
                    self.pool.deactivate(&handle);
                    self.log(
                        url,
                        kind,
                        RequestStatus::Failed,
                        format!("attempt {}: {} - {}", attempt + 1, failure, message),
                        started,
                        timestamp,
                    );
                    self.cool_down_if_blocked(failure, attempt, budget, url, kind, cancel)
                        .await?;
                }
                Err(CrawlError::Http(e)) if e.is_timeout() => {
                    self.pool.deactivate(&handle);
                    self.log(
                        url,
                        kind,
                        RequestStatus::Timeout,
                        format!("attempt {}: {}", attempt + 1, e),
                        started,
                        timestamp,
                    );
                    if attempt + 1 < budget {
                        let delay = {
                            let mut rng = self.rng();
                            backoff::timeout_delay(attempt as u32, &mut *rng)
                        };
                        self.wait(delay, url, kind, cancel).await?;
                    }
                }
                Err(CrawlError::Http(e)) => {
                    self.pool.deactivate(&handle);
                    let failure = FailureKind::classify(&e.to_string());
                    self.log(
                        url,
                        kind,
                        RequestStatus::Failed,
                        format!("attempt {}: {} - {}", attempt + 1, failure, e),
                        started,
                        timestamp,
                    );
                    self.cool_down_if_blocked(failure, attempt, budget, url, kind, cancel)
                        .await?;
                }
                Err(other) => {
                    self.pool.deactivate(&handle);
                    self.log(
                        url,
                        kind,
                        RequestStatus::Error,
                        format!("attempt {}: unexpected - {}", attempt + 1, other),
                        started,
                        timestamp,
                    );
                }
            }
        }

        self.log(
            url,
            kind,
            RequestStatus::Failed,
            format!("all {} proxies exhausted", budget),
            Instant::now(),
            SystemTime::now(),
        );
        Err(CrawlError::AllProxiesFailed {
            url: url.to_string(),
        })
    }

    async fn cool_down_if_blocked(
        &self,
        failure: FailureKind,
        attempt: usize,
        budget: usize,
        url: &str,
        kind: RequestKind,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if failure == FailureKind::Blocked && attempt + 1 < budget {
            let delay = {
                let mut rng = self.rng();
                backoff::blocked_delay(attempt as u32, &mut *rng)
            };
            self.log(
                url,
                kind,
                RequestStatus::Delaying,
                format!("cooling down {}ms after block", delay.as_millis()),
                Instant::now(),
                SystemTime::now(),
            );
            self.wait(delay, url, kind, cancel).await?;
        }
        Ok(())
    }

    fn gate_check(status: StatusCode) -> Result<()> {
        if let Some(kind) = FailureKind::from_gating_status(status.as_u16()) {
            return Err(CrawlError::Classified {
                kind,
                message: status.to_string(),
            });
        }
        Ok(())
    }

    fn success_check(status: StatusCode) -> Result<()> {
        if !status.is_success() {
            let message = format!("unexpected status {}", status);
            return Err(CrawlError::Classified {
                kind: FailureKind::classify(&message),
                message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HttpGateway for RetryClient {
    async fn fetch_text(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        self.execute_with_retry(url, RequestKind::GetHtml, cancel, |client, headers| {
            let url = url.to_string();
            async move {
                let response = client.get(&url).headers(headers).send().await?;
                Self::gate_check(response.status())?;
                Self::success_check(response.status())?;
                Ok(response.text().await?)
            }
        })
        .await
    }

    async fn fetch_json(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let body = self
            .execute_with_retry(url, RequestKind::GetJson, cancel, |client, mut headers| {
                let url = url.to_string();
                headers.insert(
                    ACCEPT,
                    HeaderValue::from_static("application/json, text/plain, */*"),
                );
                async move {
                    let response = client.get(&url).headers(headers).send().await?;
                    Self::gate_check(response.status())?;
                    Self::success_check(response.status())?;
                    Ok(response.text().await?)
                }
            })
            .await?;

        serde_json::from_str(&body).map_err(|e| CrawlError::MalformedPayload(e.to_string()))
    }

    async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<RawResponse> {
        let form: Vec<(String, String)> = fields
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect();

        self.execute_with_retry(url, RequestKind::Post, cancel, move |client, headers| {
            let url = url.to_string();
            let form = form.clone();
            async move {
                let response = client.post(&url).headers(headers).form(&form).send().await?;
                Self::gate_check(response.status())?;
                let status = response.status().as_u16();
                let body = response.text().await?;
                Ok(RawResponse { status, body })
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::events::ProgressSnapshot;

    struct Recording {
        entries: Mutex<Vec<(RequestStatus, String)>>,
    }

    impl Recording {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entries: Mutex::new(Vec::new()),
            })
        }

        fn statuses(&self) -> Vec<RequestStatus> {
            self.entries.lock().unwrap().iter().map(|(s, _)| *s).collect()
        }
    }

    impl CrawlObserver for Recording {
        fn on_progress(&self, _snapshot: &ProgressSnapshot) {}

        fn on_request_log(&self, entry: &RequestLogEntry) {
            self.entries
                .lock()
                .unwrap()
                .push((entry.status, entry.detail.clone()));
        }
    }

    fn pool_of(n: usize) -> Arc<ProxyPool> {
        let lines: Vec<String> = (0..n).map(|i| format!("10.0.0.{}:8080:u:p", i + 1)).collect();
        let mut rng = StdRng::seed_from_u64(1);
        Arc::new(
            ProxyPool::from_lines(lines.iter().map(String::as_str), &mut rng).unwrap(),
        )
    }

    fn retry_client(pool: Arc<ProxyPool>, observer: Arc<Recording>) -> RetryClient {
        RetryClient::with_rng(pool, observer, StdRng::seed_from_u64(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_budget_and_fails() {
        let pool = pool_of(3);
        let observer = Recording::new();
        let client = retry_client(pool.clone(), observer.clone());
        let cancel = CancellationToken::new();

        let result: Result<()> = client
            .execute_with_retry("https://x.test/", RequestKind::GetHtml, &cancel, |_, _| async {
                Err(CrawlError::Classified {
                    kind: FailureKind::Network,
                    message: "connection refused".to_string(),
                })
            })
            .await;

        assert!(matches!(result, Err(CrawlError::AllProxiesFailed { url }) if url == "https://x.test/"));
        assert_eq!(pool.active_count(), 0);

        let statuses = observer.statuses();
        assert_eq!(
            statuses
                .iter()
                .filter(|s| **s == RequestStatus::Pending)
                .count(),
            3
        );
        assert_eq!(*statuses.last().unwrap(), RequestStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let pool = pool_of(3);
        let observer = Recording::new();
        let client = retry_client(pool.clone(), observer.clone());
        let cancel = CancellationToken::new();

        let result = client
            .execute_with_retry("https://x.test/", RequestKind::GetJson, &cancel, |_, _| async {
                Ok(42)
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(pool.active_count(), 3);
        assert_eq!(
            observer.statuses(),
            vec![RequestStatus::Pending, RequestStatus::Success]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_second_client() {
        let pool = pool_of(3);
        let observer = Recording::new();
        let client = retry_client(pool.clone(), observer.clone());
        let cancel = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let result = client
            .execute_with_retry("https://x.test/", RequestKind::GetHtml, &cancel, |_, _| {
                let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        Err(CrawlError::Classified {
                            kind: FailureKind::ServerError,
                            message: "500".to_string(),
                        })
                    } else {
                        Ok("body".to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "body");
        assert_eq!(pool.active_count(), 2);
        assert_eq!(*observer.statuses().last().unwrap(), RequestStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_adds_cooldown_entry() {
        let pool = pool_of(2);
        let observer = Recording::new();
        let client = retry_client(pool.clone(), observer.clone());
        let cancel = CancellationToken::new();

        let _: Result<()> = client
            .execute_with_retry("https://x.test/", RequestKind::GetHtml, &cancel, |_, _| async {
                Err(CrawlError::Classified {
                    kind: FailureKind::Blocked,
                    message: "403 Forbidden".to_string(),
                })
            })
            .await;

        let cooldowns = observer
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, d)| *s == RequestStatus::Delaying && d.contains("cooling down"))
            .count();
        // Only the first attempt still has budget left for a cool-down.
        assert_eq!(cooldowns, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let pool = pool_of(3);
        let observer = Recording::new();
        let client = retry_client(pool.clone(), observer.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = client
            .execute_with_retry("https://x.test/", RequestKind::GetHtml, &cancel, |_, _| async {
                panic!("action must not run after cancellation")
            })
            .await;

        assert!(matches!(result, Err(CrawlError::Cancelled)));
        assert_eq!(pool.active_count(), 3);
        assert_eq!(observer.statuses(), vec![RequestStatus::Cancelled]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_not_retried() {
        let pool = pool_of(3);
        let observer = Recording::new();
        let client = retry_client(pool.clone(), observer.clone());
        let cancel = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let result: Result<()> = client
            .execute_with_retry("https://x.test/", RequestKind::GetJson, &cancel, |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CrawlError::MalformedPayload("bad shape".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(CrawlError::MalformedPayload(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Shape mismatch is not the proxy's fault.
        assert_eq!(pool.active_count(), 3);
    }

    #[test]
    fn test_gate_check() {
        assert!(RetryClient::gate_check(StatusCode::OK).is_ok());
        assert!(matches!(
            RetryClient::gate_check(StatusCode::FORBIDDEN),
            Err(CrawlError::Classified {
                kind: FailureKind::Blocked,
                ..
            })
        ));
        assert!(matches!(
            RetryClient::gate_check(StatusCode::TOO_MANY_REQUESTS),
            Err(CrawlError::Classified {
                kind: FailureKind::RateLimited,
                ..
            })
        ));
    }

    #[test]
    fn test_success_check_classifies_status() {
        assert!(RetryClient::success_check(StatusCode::OK).is_ok());
        assert!(matches!(
            RetryClient::success_check(StatusCode::NOT_FOUND),
            Err(CrawlError::Classified {
                kind: FailureKind::NotFound,
                ..
            })
        ));
        assert!(matches!(
            RetryClient::success_check(StatusCode::BAD_GATEWAY),
            Err(CrawlError::Classified {
                kind: FailureKind::BadGateway,
                ..
            })
        ));
    }
}
