//! Rescache Integration Tests
//!
//! End-to-end flows across the caching layer:
//! - Tiered cache manager (memory / durable / hybrid)
//! - Request executor with retry and invalidation
//! - Background network agent strategies

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use rescache::durable::InMemoryDurableStore;
use rescache::error::Error;
use rescache::executor::{ExecutorResponse, FetchResponse};
use rescache::{
    generate_key, AgentConfig, AgentResponse, ApiRequest, CacheManager, CachePolicy, CacheTier,
    EndpointPolicyTable, Fetcher, Method, NetworkAgent, RequestExecutor, ResourceFetcher,
    RetryConfig,
};

// =============================================================================
// Shared fixtures
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Status {
    healthy: bool,
    uptime_secs: u64,
}

/// Fetcher serving a fixed table of JSON bodies, with an offline switch
struct TableFetcher {
    responses: parking_lot::RwLock<HashMap<String, Value>>,
    offline: AtomicBool,
    calls: AtomicU32,
}

impl TableFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: parking_lot::RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        })
    }

    fn serve(&self, url: &str, body: Value) {
        self.responses.write().insert(url.to_string(), body);
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for TableFetcher {
    async fn execute(&self, request: &ApiRequest) -> rescache::Result<FetchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::NetworkTransient {
                status: None,
                reason: "offline".into(),
            });
        }
        match self.responses.read().get(&request.url) {
            Some(body) => Ok(FetchResponse::ok(Bytes::from(body.to_string()))),
            None => Ok(FetchResponse {
                status: 404,
                body: Bytes::from_static(b"not found"),
                etag: None,
                last_modified: None,
            }),
        }
    }
}

#[async_trait]
impl ResourceFetcher for TableFetcher {
    async fn fetch(&self, url: &str) -> rescache::Result<AgentResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::NetworkTransient {
                status: None,
                reason: "offline".into(),
            });
        }
        match self.responses.read().get(url) {
            Some(body) => Ok(AgentResponse::new(
                200,
                HashMap::new(),
                Bytes::from(body.to_string()),
            )),
            None => Ok(AgentResponse::new(404, HashMap::new(), Bytes::new())),
        }
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        timeout: Duration::from_millis(200),
    }
}

// =============================================================================
// Cache manager flows
// =============================================================================

mod manager_tests {
    use super::*;

    #[tokio::test]
    async fn test_hybrid_survives_restart_via_shared_store() {
        let store = Arc::new(InMemoryDurableStore::new());
        let policy = CachePolicy::new(CacheTier::Hybrid, Duration::from_secs(600));
        let key = generate_key("GET", "/api/user/profile", &Value::Null);

        {
            let cache = CacheManager::new(store.clone());
            cache
                .set(&key, &json!({"name": "ada"}), &policy)
                .await
                .unwrap();
        }

        // A fresh manager over the same store starts with an empty
        // memory tier but finds the durable record and repopulates.
        let cache = CacheManager::new(store);
        assert_eq!(cache.memory().len(), 0);

        let got: Option<Value> = cache.get(&key, &policy).await.unwrap();
        assert_eq!(got, Some(json!({"name": "ada"})));
        assert!(cache.memory().contains(&key));
    }

    #[tokio::test]
    async fn test_invalidation_is_complete_across_tiers() {
        let cache = CacheManager::in_memory();
        let hybrid = CachePolicy::new(CacheTier::Hybrid, Duration::from_secs(600));
        let memory = CachePolicy::new(CacheTier::Memory, Duration::from_secs(600));

        let keys = [
            (
                generate_key("GET", "/api/user/profile", &Value::Null),
                &hybrid,
            ),
            (
                generate_key("GET", "/api/user/settings", &Value::Null),
                &memory,
            ),
            (
                generate_key("GET", "/api/user/profile", &json!({"full": true})),
                &hybrid,
            ),
        ];
        for (key, policy) in &keys {
            cache.set(key, &json!(1), policy).await.unwrap();
        }

        let removed = cache.invalidate_by_pattern("/api/user").await.unwrap();
        // Two hybrid keys in two tiers each, one memory key.
        assert_eq!(removed, 5);

        for (key, policy) in &keys {
            let got: Option<Value> = cache.get(key, policy).await.unwrap();
            assert_eq!(got, None, "key {key} survived invalidation");
        }
        assert_eq!(cache.stats().await.unwrap().total_entries(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_misses_converge_on_one_value() {
        let fetcher = TableFetcher::new();
        fetcher.serve(
            "/api/system/status",
            json!({"healthy": true, "uptime_secs": 42}),
        );

        let cache = Arc::new(CacheManager::in_memory());
        let exec = Arc::new(
            RequestExecutor::new(cache.clone(), fetcher.clone()).with_retry(fast_retry()),
        );

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let exec = exec.clone();
            tasks.push(tokio::spawn(async move {
                let r: ExecutorResponse<Status> = exec
                    .run(&ApiRequest::get("/api/system/status"))
                    .await
                    .unwrap();
                r.value
            }));
        }

        for task in tasks {
            let status = task.await.unwrap();
            assert_eq!(
                status,
                Status {
                    healthy: true,
                    uptime_secs: 42
                }
            );
        }

        // Concurrent misses may each fetch, but exactly one value ends up
        // cached and later reads never fetch again.
        assert_eq!(cache.memory().len(), 1);
        let calls_before = fetcher.calls();
        let r: ExecutorResponse<Status> = exec
            .run(&ApiRequest::get("/api/system/status"))
            .await
            .unwrap();
        assert!(r.from_cache);
        assert_eq!(fetcher.calls(), calls_before);
    }
}

// =============================================================================
// Executor flows
// =============================================================================

mod executor_tests {
    use super::*;

    #[tokio::test]
    async fn test_system_status_cached_under_expected_key() {
        let fetcher = TableFetcher::new();
        fetcher.serve(
            "/api/system/status",
            json!({"healthy": true, "uptime_secs": 1}),
        );

        let cache = Arc::new(CacheManager::in_memory());
        let exec = RequestExecutor::new(cache.clone(), fetcher)
            .with_routes(EndpointPolicyTable::new())
            .with_retry(fast_retry());

        let _: ExecutorResponse<Status> = exec
            .run(&ApiRequest::get("/api/system/status"))
            .await
            .unwrap();

        // Parameterless GETs use an empty params-hash suffix.
        let key = generate_key("GET", "/api/system/status", &Value::Null);
        assert_eq!(key.as_str(), "GET:/api/system/status:");
        assert!(cache.memory().contains(&key));
    }

    #[tokio::test]
    async fn test_mutation_then_get_refetches() {
        let fetcher = TableFetcher::new();
        fetcher.serve("/api/user/profile", json!({"name": "a"}));

        let cache = Arc::new(CacheManager::in_memory());
        let exec = RequestExecutor::new(cache, fetcher.clone()).with_retry(fast_retry());

        let first: ExecutorResponse<Value> = exec
            .run(&ApiRequest::get("/api/user/profile"))
            .await
            .unwrap();
        assert!(!first.from_cache);

        fetcher.serve("/api/user/profile", json!({"name": "b"}));
        let _: ExecutorResponse<Value> = exec
            .run(&ApiRequest::new(Method::Put, "/api/user/profile"))
            .await
            .unwrap();

        let after: ExecutorResponse<Value> = exec
            .run(&ApiRequest::get("/api/user/profile"))
            .await
            .unwrap();
        assert!(!after.from_cache);
        assert_eq!(after.value, json!({"name": "b"}));
    }

    #[tokio::test]
    async fn test_offline_get_exhausts_retries() {
        let fetcher = TableFetcher::new();
        fetcher.set_offline(true);

        let exec = RequestExecutor::new(Arc::new(CacheManager::in_memory()), fetcher.clone())
            .with_retry(fast_retry());

        let result = exec.run::<Value>(&ApiRequest::get("/api/anything")).await;
        assert!(matches!(result, Err(Error::NetworkTransient { .. })));
        // Initial attempt + 2 retries.
        assert_eq!(fetcher.calls(), 3);
    }
}

// =============================================================================
// Network agent flows
// =============================================================================

mod agent_tests {
    use super::*;
    use rescache::agent::ResponseSource;

    #[tokio::test]
    async fn test_profile_served_stale_when_offline() {
        let fetcher = TableFetcher::new();
        fetcher.serve("/api/user/profile", json!({"name": "ada"}));
        let agent = NetworkAgent::spawn(AgentConfig::default(), fetcher.clone());

        // Online: network-first fetches and caches.
        let online = agent.handle_request("/api/user/profile").await.unwrap();
        assert_eq!(online.source, ResponseSource::Network);

        // Offline: the cached copy comes back instead of an error.
        fetcher.set_offline(true);
        let offline = agent.handle_request("/api/user/profile").await.unwrap();
        assert_eq!(offline.status, 200);
        assert_eq!(
            serde_json::from_slice::<Value>(&offline.body).unwrap(),
            json!({"name": "ada"})
        );
        assert!(matches!(
            offline.source,
            ResponseSource::Cache | ResponseSource::StaleCache
        ));
    }

    #[tokio::test]
    async fn test_uncached_navigation_gets_offline_page() {
        let fetcher = TableFetcher::new();
        fetcher.set_offline(true);
        let agent = NetworkAgent::spawn(AgentConfig::default(), fetcher);

        let response = agent.handle_request("/settings").await.unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.source, ResponseSource::Offline);
        assert_eq!(response.header("content-type"), Some("text/html"));
    }

    #[tokio::test]
    async fn test_manager_delegates_agent_tier_through_channel() {
        let fetcher = TableFetcher::new();
        let agent = NetworkAgent::spawn(AgentConfig::default(), fetcher);
        let cache = CacheManager::in_memory().with_agent(agent.clone());

        let policy = CachePolicy::new(CacheTier::Agent, Duration::from_secs(60));
        let key = generate_key("GET", "/api/search", &json!({"q": "tiered"}));

        cache.set(&key, &json!(["a", "b"]), &policy).await.unwrap();
        assert_eq!(agent.entry_count().await.unwrap(), 1);

        let got: Option<Value> = cache.get(&key, &policy).await.unwrap();
        assert_eq!(got, Some(json!(["a", "b"])));

        // Agent-tier entries participate in pattern invalidation.
        let removed = cache.invalidate_by_pattern("/api/search").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(agent.entry_count().await.unwrap(), 0);
    }
}
