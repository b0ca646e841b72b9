//! Bounded retry with proxy rotation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::request::FetchRequest;
use super::response::{classify, Classification, FailureKind, FetchOutcome};
use super::transport::{Transport, TransportError};
use crate::proxy::{ProxyManager, RotationStrategy};

/// Knobs for one fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPolicy {
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Give up on the first hard failure instead of retrying.
    pub abort_on_failure: bool,
    pub rotation: RotationStrategy,
    /// Extra pause added before retrying after an anti-bot page.
    pub anti_bot_cooldown: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            max_retries: 5,
            retry_delay: Duration::from_millis(5_000),
            abort_on_failure: false,
            rotation: RotationStrategy::Random,
            anti_bot_cooldown: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url}: giving up after {attempts} attempt(s), last failure: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: FailureKind,
    },

    #[error("{url}: {failure}, aborting")]
    Aborted { url: String, failure: FailureKind },
}

impl FetchError {
    /// The last failure observed.
    pub fn failure(&self) -> &FailureKind {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Aborted { failure, .. } => failure,
        }
    }

    pub fn is_anti_bot(&self) -> bool {
        self.failure().is_anti_bot()
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Exhausted { url, .. } | Self::Aborted { url, .. } => url,
        }
    }
}

/// Executes a request until it succeeds, is found missing (404), or the
/// retry budget runs out. Every retry draws a fresh proxy, since blocks and
/// rate limits are usually tied to the exit address.
pub struct RetryableFetcher {
    transport: Arc<dyn Transport>,
    proxies: Arc<ProxyManager>,
    policy: FetchPolicy,
    /// Proxy pool generation the transport last heard about.
    seen_generation: AtomicU64,
}

impl RetryableFetcher {
    pub fn new(transport: Arc<dyn Transport>, proxies: Arc<ProxyManager>, policy: FetchPolicy) -> Self {
        let seen_generation = AtomicU64::new(proxies.generation());
        Self {
            transport,
            proxies,
            policy,
            seen_generation,
        }
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Tell the transport when the proxy pool was reloaded.
    fn sync_proxies(&self) {
        let generation = self.proxies.generation();
        if self.seen_generation.swap(generation, Ordering::AcqRel) != generation {
            self.transport.proxies_changed(&self.proxies.endpoints());
        }
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, FetchError> {
        self.sync_proxies();
        let max_attempts = self.policy.max_retries + 1;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let proxy = self.proxies.pick(self.policy.rotation);
            debug!(
                "{} {} (attempt {}/{}, proxy: {})",
                request.method,
                request.url,
                attempts,
                max_attempts,
                proxy.as_ref().map(|p| p.redacted()).unwrap_or_else(|| "direct".into())
            );

            let result = self
                .transport
                .execute(request, proxy.as_ref(), self.policy.timeout)
                .await;

            let failure = match result {
                Ok(response) => match classify(&response, request.expect_marker.as_deref()) {
                    Classification::Success => return Ok(FetchOutcome::Success(response)),
                    Classification::NotFound => {
                        debug!("{} not found", request.url);
                        return Ok(FetchOutcome::NotFound(response));
                    }
                    Classification::Failure(kind) => kind,
                },
                Err(TransportError::Timeout) => FailureKind::Timeout,
                Err(TransportError::Refused(_)) => FailureKind::ConnectionRefused,
                Err(TransportError::Network(message)) | Err(TransportError::Client(message)) => {
                    FailureKind::Network(message)
                }
            };

            if self.policy.abort_on_failure {
                return Err(FetchError::Aborted {
                    url: request.url.clone(),
                    failure,
                });
            }
            if attempts >= max_attempts {
                return Err(FetchError::Exhausted {
                    url: request.url.clone(),
                    attempts,
                    last: failure,
                });
            }

            let mut delay = self.policy.retry_delay;
            if failure.is_anti_bot() {
                delay += self.policy.anti_bot_cooldown;
            }
            warn!(
                "{} failed ({}), retry {}/{} in {:?}",
                request.url, failure, attempts, self.policy.max_retries, delay
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::scripted::{Scripted, ScriptedTransport};
    use crate::http_client::{HttpMethod, TransportResponse};
    use crate::proxy::ProxyEndpoint;

    fn policy(max_retries: u32) -> FetchPolicy {
        FetchPolicy {
            max_retries,
            retry_delay: Duration::ZERO,
            anti_bot_cooldown: Duration::ZERO,
            rotation: RotationStrategy::Sequential,
            ..Default::default()
        }
    }

    fn proxies(n: u16) -> Arc<ProxyManager> {
        Arc::new(ProxyManager::from_endpoints(
            (1..=n).map(|i| ProxyEndpoint::new("10.0.0.1", 9000 + i)).collect(),
        ))
    }

    #[tokio::test]
    async fn test_retry_bound_and_fresh_proxy_per_attempt() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on_get("http://x/a", 503, "");
        let fetcher = RetryableFetcher::new(transport.clone(), proxies(5), policy(3));

        let err = fetcher.fetch(&FetchRequest::get("http://x/a")).await.unwrap_err();
        match &err {
            FetchError::Exhausted { attempts, last, .. } => {
                assert_eq!(*attempts, 4);
                assert_eq!(last.status(), Some(503));
            }
            other => panic!("unexpected {:?}", other),
        }

        let used: Vec<Option<String>> = transport.requests().into_iter().map(|r| r.proxy).collect();
        assert_eq!(
            used,
            vec![
                Some("http://10.0.0.1:9001".to_string()),
                Some("http://10.0.0.1:9002".to_string()),
                Some("http://10.0.0.1:9003".to_string()),
                Some("http://10.0.0.1:9004".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        let fetcher = RetryableFetcher::new(transport.clone(), proxies(1), policy(5));

        let outcome = fetcher.fetch(&FetchRequest::get("http://x/missing")).await.unwrap();
        assert!(outcome.is_not_found());
        assert_eq!(transport.hits("http://x/missing"), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.sequence(
            HttpMethod::Get,
            "http://x/a",
            None,
            vec![Scripted::Timeout, Scripted::Refused, Scripted::ok("<html/>")],
        );
        let fetcher = RetryableFetcher::new(transport.clone(), proxies(2), policy(5));

        let body = fetcher
            .fetch(&FetchRequest::get("http://x/a"))
            .await
            .unwrap()
            .into_body();
        assert_eq!(body.as_deref(), Some("<html/>"));
        assert_eq!(transport.hits("http://x/a"), 3);
    }

    #[tokio::test]
    async fn test_abort_on_failure_stops_immediately() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on_get("http://x/a", 500, "");
        let fetcher = RetryableFetcher::new(
            transport.clone(),
            proxies(2),
            FetchPolicy {
                abort_on_failure: true,
                ..policy(5)
            },
        );

        let err = fetcher.fetch(&FetchRequest::get("http://x/a")).await.unwrap_err();
        assert!(matches!(err, FetchError::Aborted { .. }));
        assert_eq!(transport.hits("http://x/a"), 1);
    }

    #[tokio::test]
    async fn test_anti_bot_is_distinguishable() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on_get(
            "http://x/a",
            200,
            "<html><head><title>Połączenie odrzucone</title></head></html>",
        );
        let fetcher = RetryableFetcher::new(transport, Arc::new(ProxyManager::empty()), policy(1));

        let err = fetcher.fetch(&FetchRequest::get("http://x/a")).await.unwrap_err();
        assert!(err.is_anti_bot());
        assert_eq!(err.url(), "http://x/a");
    }

    /// Counts pool changes it is told about.
    #[derive(Default)]
    struct PoolWatcher {
        changes: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl Transport for PoolWatcher {
        async fn execute(
            &self,
            _request: &FetchRequest,
            _proxy: Option<&ProxyEndpoint>,
            _timeout: Duration,
        ) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status: 200,
                body: String::new(),
            })
        }

        fn proxies_changed(&self, current: &[ProxyEndpoint]) {
            self.changes.lock().unwrap().push(current.len());
        }
    }

    #[tokio::test]
    async fn test_transport_hears_about_reloaded_pool() {
        let transport = Arc::new(PoolWatcher::default());
        let pool = proxies(3);
        let fetcher = RetryableFetcher::new(transport.clone(), pool.clone(), policy(0));
        let request = FetchRequest::get("http://x/a");

        fetcher.fetch(&request).await.unwrap();
        assert!(transport.changes.lock().unwrap().is_empty());

        pool.replace(vec![ProxyEndpoint::new("10.0.0.1", 9001)]);
        fetcher.fetch(&request).await.unwrap();
        fetcher.fetch(&request).await.unwrap();
        assert_eq!(*transport.changes.lock().unwrap(), vec![1]);
    }
}
