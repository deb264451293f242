//! Cached Request Executor
//!
//! Front door for application API calls. Each request flows through a
//! single pipeline:
//!
//! ```text
//! request ──► policy lookup ──► cache check (GET only, exactly once)
//!                                   │ miss
//!                                   ▼
//!                       fetch with timeout + retry
//!                       (exponential backoff on transient failures)
//!                                   │ 2xx
//!                                   ▼
//!                      cache per policy / invalidate on mutation
//! ```
//!
//! Transient failures (transport errors and 5xx) are retried with a
//! doubling backoff; permanent failures (4xx) propagate immediately and
//! are never cached. A timed-out request leaves the cache untouched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::manager::CacheManager;
use crate::resolver::{generate_key, EndpointPolicyTable};

/// HTTP-style request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Only GET/HEAD responses are cached; everything else mutates
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One API request as the executor sees it
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    /// Query/body parameters participating in the cache key
    pub params: Value,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            params: Value::Null,
        }
    }

    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Raw response from the transport
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Bytes,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl FetchResponse {
    pub fn ok(body: Bytes) -> Self {
        Self {
            status: 200,
            body,
            etag: None,
            last_modified: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport seam; implementations perform the actual network call
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Execute a request; `Err` means the transport itself failed
    async fn execute(&self, request: &ApiRequest) -> Result<FetchResponse>;
}

/// Retry and timeout configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// First backoff delay; doubles per retry
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Per-attempt deadline
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// Result of one executed request
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorResponse<T> {
    pub value: T,
    /// True when served from cache without touching the network
    pub from_cache: bool,
}

/// Executes API requests through the cache
pub struct RequestExecutor {
    cache: Arc<CacheManager>,
    routes: EndpointPolicyTable,
    fetcher: Arc<dyn Fetcher>,
    retry: RetryConfig,
}

impl RequestExecutor {
    pub fn new(cache: Arc<CacheManager>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            cache,
            routes: EndpointPolicyTable::new(),
            fetcher,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_routes(mut self, routes: EndpointPolicyTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Execute `request`, serving from cache when possible
    ///
    /// GET requests make exactly one cache check before going to the
    /// network; successful GET responses are cached under the resolved
    /// policy. Successful mutations invalidate every cached entry whose
    /// key contains the request URL.
    pub async fn run<T: Serialize + DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<ExecutorResponse<T>> {
        let policy = self.routes.policy_for(&request.url);
        let key = generate_key(request.method.as_str(), &request.url, &request.params);

        if request.method.is_cacheable() {
            if let Some(value) = self.cache.get::<T>(&key, &policy).await? {
                debug!(key = %key, "served from cache");
                return Ok(ExecutorResponse {
                    value,
                    from_cache: true,
                });
            }
        }

        let response = self.fetch_with_retry(request).await?;
        let value: T = serde_json::from_slice(&response.body)?;

        if request.method.is_cacheable() {
            // A failed cache write never fails a request that already
            // has its response.
            if let Err(e) = self.cache.set(&key, &value, &policy).await {
                warn!(key = %key, error = %e, "caching response failed");
            }
        } else {
            // The mutation already succeeded; a failed invalidation costs
            // at most stale reads until expiry, never the response.
            match self.cache.invalidate_by_pattern(&request.url).await {
                Ok(removed) => {
                    debug!(url = %request.url, removed, "mutation invalidated cached entries");
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "invalidation after mutation failed");
                }
            }
        }

        Ok(ExecutorResponse {
            value,
            from_cache: false,
        })
    }

    async fn fetch_with_retry(&self, request: &ApiRequest) -> Result<FetchResponse> {
        let mut attempt = 0;
        loop {
            match self.attempt(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        url = %request.url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<FetchResponse> {
        let response = tokio::time::timeout(self.retry.timeout, self.fetcher.execute(request))
            .await
            .map_err(|_| Error::Timeout(self.retry.timeout))??;

        match response.status {
            s if response.is_ok() => {
                debug!(url = %request.url, status = s, "fetch ok");
                Ok(response)
            }
            s @ 400..=499 => Err(Error::NetworkPermanent {
                status: s,
                reason: String::from_utf8_lossy(&response.body).into_owned(),
            }),
            s => Err(Error::NetworkTransient {
                status: Some(s),
                reason: String::from_utf8_lossy(&response.body).into_owned(),
            }),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fetcher that plays back a fixed script of outcomes per call
    struct ScriptedFetcher {
        script: Mutex<Vec<Result<FetchResponse>>>,
        calls: AtomicU32,
        delay: Option<Duration>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<FetchResponse>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
                delay: None,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(vec![]),
                calls: AtomicU32::new(0),
                delay: Some(delay),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn execute(&self, _request: &ApiRequest) -> Result<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
                return Ok(FetchResponse::ok(Bytes::from_static(b"\"late\"")));
            }
            let mut script = self.script.lock();
            if script.is_empty() {
                Ok(FetchResponse::ok(Bytes::from_static(b"\"default\"")))
            } else {
                script.remove(0)
            }
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            timeout: Duration::from_millis(100),
        }
    }

    fn executor(fetcher: Arc<ScriptedFetcher>) -> RequestExecutor {
        RequestExecutor::new(Arc::new(CacheManager::in_memory()), fetcher)
            .with_retry(fast_retry())
    }

    fn status_response(status: u16) -> Result<FetchResponse> {
        Ok(FetchResponse {
            status,
            body: Bytes::from_static(b"upstream error"),
            etag: None,
            last_modified: None,
        })
    }

    #[test]
    fn test_cacheable_methods() {
        assert!(Method::Get.is_cacheable());
        assert!(Method::Head.is_cacheable());
        for method in [Method::Post, Method::Put, Method::Patch, Method::Delete] {
            assert!(!method.is_cacheable(), "{method} must bypass the cache");
        }
    }

    #[tokio::test]
    async fn test_head_requests_are_cached() {
        let fetcher = ScriptedFetcher::new(vec![Ok(FetchResponse::ok(Bytes::from_static(
            b"null",
        )))]);
        let exec = executor(fetcher.clone());
        let request = ApiRequest::new(Method::Head, "/api/system/status");

        let first: ExecutorResponse<Value> = exec.run(&request).await.unwrap();
        assert!(!first.from_cache);
        let second: ExecutorResponse<Value> = exec.run(&request).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(fetcher.calls(), 1);

        // HEAD and GET keys never collide.
        assert_ne!(
            crate::resolver::generate_key("HEAD", "/api/system/status", &Value::Null),
            crate::resolver::generate_key("GET", "/api/system/status", &Value::Null),
        );
    }

    #[tokio::test]
    async fn test_get_caches_and_reuses() {
        let fetcher = ScriptedFetcher::new(vec![Ok(FetchResponse::ok(Bytes::from_static(
            b"{\"ok\":true}",
        )))]);
        let exec = executor(fetcher.clone());
        let request = ApiRequest::get("/api/system/status");

        let first: ExecutorResponse<Value> = exec.run(&request).await.unwrap();
        assert!(!first.from_cache);

        let second: ExecutorResponse<Value> = exec.run(&request).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.value["ok"], Value::Bool(true));

        // One network call total: the cache was checked exactly once per
        // run and hit the second time.
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let fetcher = ScriptedFetcher::new(vec![
            status_response(503),
            Err(Error::NetworkTransient {
                status: None,
                reason: "connection reset".into(),
            }),
            Ok(FetchResponse::ok(Bytes::from_static(b"42"))),
        ]);
        let exec = executor(fetcher.clone());

        let response: ExecutorResponse<u32> =
            exec.run(&ApiRequest::get("/api/flaky")).await.unwrap();
        assert_eq!(response.value, 42);
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_propagate_transient_error() {
        let fetcher = ScriptedFetcher::new(vec![
            status_response(500),
            status_response(502),
            status_response(503),
            status_response(504),
        ]);
        let exec = executor(fetcher.clone());

        let result = exec.run::<Value>(&ApiRequest::get("/api/down")).await;
        assert_matches!(result, Err(Error::NetworkTransient { .. }));
        // Initial attempt + 3 retries.
        assert_eq!(fetcher.calls(), 4);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried_not_cached() {
        let fetcher = ScriptedFetcher::new(vec![status_response(404)]);
        let cache = Arc::new(CacheManager::in_memory());
        let exec = RequestExecutor::new(cache.clone(), fetcher.clone()).with_retry(fast_retry());

        let result = exec.run::<Value>(&ApiRequest::get("/api/missing")).await;
        assert_matches!(result, Err(Error::NetworkPermanent { status: 404, .. }));
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.stats().await.unwrap().total_entries(), 0);
    }

    #[tokio::test]
    async fn test_timeout_leaves_cache_untouched() {
        let fetcher = ScriptedFetcher::slow(Duration::from_millis(200));
        let cache = Arc::new(CacheManager::in_memory());
        let exec = RequestExecutor::new(cache.clone(), fetcher).with_retry(RetryConfig {
            max_retries: 0,
            timeout: Duration::from_millis(10),
            ..fast_retry()
        });

        let result = exec.run::<Value>(&ApiRequest::get("/api/slow")).await;
        assert_matches!(result, Err(Error::Timeout(_)));
        assert_eq!(cache.stats().await.unwrap().total_entries(), 0);
    }

    #[tokio::test]
    async fn test_mutation_invalidates_matching_entries() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(FetchResponse::ok(Bytes::from_static(b"{\"name\":\"a\"}"))),
            Ok(FetchResponse::ok(Bytes::from_static(b"{}"))),
            Ok(FetchResponse::ok(Bytes::from_static(b"{\"name\":\"b\"}"))),
        ]);
        let exec = executor(fetcher.clone());
        let get = ApiRequest::get("/api/user/profile");

        let _: ExecutorResponse<Value> = exec.run(&get).await.unwrap();

        // A write to the same URL drops the cached GET.
        let post = ApiRequest::new(Method::Post, "/api/user/profile");
        let _: ExecutorResponse<Value> = exec.run(&post).await.unwrap();

        let after: ExecutorResponse<Value> = exec.run(&get).await.unwrap();
        assert!(!after.from_cache);
        assert_eq!(after.value["name"], Value::String("b".into()));
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_mutation_response_survives_invalidation_failure() {
        use crate::agent::{AgentConfig, AgentResponse, NetworkAgent, ResourceFetcher};

        struct NeverFetch;

        #[async_trait]
        impl ResourceFetcher for NeverFetch {
            async fn fetch(&self, url: &str) -> Result<AgentResponse> {
                Err(Error::Offline {
                    url: url.to_string(),
                })
            }
        }

        // An agent that has shut down makes every invalidation attempt
        // fail with AgentUnavailable.
        let agent = NetworkAgent::spawn(AgentConfig::default(), Arc::new(NeverFetch));
        agent.shutdown().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cache = Arc::new(CacheManager::in_memory().with_agent(agent));
        let fetcher = ScriptedFetcher::new(vec![Ok(FetchResponse::ok(Bytes::from_static(
            b"{\"ok\":true}",
        )))]);
        let exec = RequestExecutor::new(cache, fetcher).with_retry(fast_retry());

        let post = ApiRequest::new(Method::Post, "/api/user/profile");
        let response: ExecutorResponse<Value> = exec.run(&post).await.unwrap();
        assert_eq!(response.value["ok"], Value::Bool(true));
        assert!(!response.from_cache);
    }

    #[tokio::test]
    async fn test_distinct_params_get_distinct_entries() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(FetchResponse::ok(Bytes::from_static(b"\"rust\""))),
            Ok(FetchResponse::ok(Bytes::from_static(b"\"cache\""))),
        ]);
        let exec = executor(fetcher.clone());

        let a = ApiRequest::get("/api/search").with_params(serde_json::json!({"q": "rust"}));
        let b = ApiRequest::get("/api/search").with_params(serde_json::json!({"q": "cache"}));

        let ra: ExecutorResponse<String> = exec.run(&a).await.unwrap();
        let rb: ExecutorResponse<String> = exec.run(&b).await.unwrap();
        assert_eq!(ra.value, "rust");
        assert_eq!(rb.value, "cache");
        assert_eq!(fetcher.calls(), 2);

        // Each key hits its own entry afterwards.
        let ra2: ExecutorResponse<String> = exec.run(&a).await.unwrap();
        assert!(ra2.from_cache);
        assert_eq!(ra2.value, "rust");
    }
}
