//! Background Network Agent
//!
//! A persistent actor that intercepts outgoing resource requests beneath the
//! application logic and applies a per-resource-class caching strategy:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Network Agent                              │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  static assets   → cache-first                                    │
//! │  images          → stale-while-revalidate                         │
//! │  HTML documents  → network-first + offline fallback page          │
//! │  API endpoints   → network-first, TTL header checked at read      │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  named caches: static / images / documents / api (+ data tier)    │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The agent runs as an independent tokio task reachable only through an
//! async command channel, so it outlives any single request-issuing context.
//! The cache manager's `agent` tier is the `data` cache here, driven by the
//! same channel. Cached responses carry `x-cached-at` / `x-cache-ttl`
//! headers written at cache-write time and checked at read time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::entry::{now_ms, CacheKey};
use crate::error::{Error, Result};

/// Header recording when a response was cached (ms since epoch)
pub const CACHED_AT_HEADER: &str = "x-cached-at";
/// Header recording the response's lifetime (ms)
pub const CACHE_TTL_HEADER: &str = "x-cache-ttl";

/// Offline fallback page served when a document misses network and cache
const OFFLINE_PAGE: &str = "<!doctype html><html><head><title>Offline</title></head>\
<body><h1>You are offline</h1><p>This page is not available without a connection.</p></body></html>";

// =============================================================================
// Resource classification
// =============================================================================

/// Resource classes the agent distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Bundled assets (scripts, styles, fonts)
    Static,
    /// Images
    Image,
    /// HTML documents / navigations
    Document,
    /// API JSON endpoints (default class)
    Api,
}

impl ResourceClass {
    /// Classify a URL by prefix and extension
    pub fn classify(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);

        if path.starts_with("/static/") || path.starts_with("/assets/") {
            return ResourceClass::Static;
        }

        match path.rsplit('.').next().filter(|ext| !ext.contains('/')) {
            Some("png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "ico") => ResourceClass::Image,
            Some("html" | "htm") => ResourceClass::Document,
            Some("js" | "css" | "woff" | "woff2" | "ttf" | "map") => ResourceClass::Static,
            _ if !path.starts_with("/api/") => ResourceClass::Document,
            _ => ResourceClass::Api,
        }
    }

    /// Name of the backing named cache
    pub fn cache_name(&self) -> &'static str {
        match self {
            ResourceClass::Static => "static",
            ResourceClass::Image => "images",
            ResourceClass::Document => "documents",
            ResourceClass::Api => "api",
        }
    }

    /// Strategy applied to this class
    pub fn strategy(&self) -> FetchStrategy {
        match self {
            ResourceClass::Static => FetchStrategy::CacheFirst,
            ResourceClass::Image => FetchStrategy::StaleWhileRevalidate,
            ResourceClass::Document | ResourceClass::Api => FetchStrategy::NetworkFirst,
        }
    }
}

/// Per-resource caching strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Cached copy if present and unexpired, otherwise fetch-cache-return
    CacheFirst,
    /// Fetch first; fall back to any cached copy (even stale), then to a
    /// synthetic offline response
    NetworkFirst,
    /// Cached copy returned immediately while a background fetch refreshes
    StaleWhileRevalidate,
}

// =============================================================================
// Responses and the fetch seam
// =============================================================================

/// Where a response was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// Cached copy past its lifetime, served as an offline fallback
    StaleCache,
    /// Synthetic offline response; nothing cached and no network
    Offline,
}

/// A resource response as the agent sees it
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl AgentResponse {
    /// Build a network response
    pub fn new(status: u16, headers: HashMap<String, String>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            source: ResponseSource::Network,
        }
    }

    /// 2xx check; only ok responses are cached
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Black-box transport the agent observes
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Fetch a resource; `Err` means the transport failed (offline)
    async fn fetch(&self, url: &str) -> Result<AgentResponse>;
}

// =============================================================================
// Agent configuration and internal state
// =============================================================================

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Active cache version; bumping it and calling `skip_waiting` drops
    /// the previous version's caches
    pub version: String,
    /// Command channel capacity
    pub channel_capacity: usize,
    /// Lifetime for cached static assets
    pub static_ttl: Duration,
    /// Lifetime for cached images
    pub image_ttl: Duration,
    /// Lifetime for cached documents
    pub document_ttl: Duration,
    /// Lifetime for cached API responses
    pub api_ttl: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            channel_capacity: 64,
            static_ttl: Duration::from_secs(24 * 3600),
            image_ttl: Duration::from_secs(7 * 24 * 3600),
            document_ttl: Duration::from_secs(3600),
            api_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl AgentConfig {
    fn ttl_for(&self, class: ResourceClass) -> Duration {
        match class {
            ResourceClass::Static => self.static_ttl,
            ResourceClass::Image => self.image_ttl,
            ResourceClass::Document => self.document_ttl,
            ResourceClass::Api => self.api_ttl,
        }
    }
}

/// One cached resource
#[derive(Debug, Clone)]
struct CachedResource {
    status: u16,
    headers: HashMap<String, String>,
    body: Bytes,
    cached_at_ms: u64,
    ttl_ms: u64,
}

impl CachedResource {
    fn is_expired(&self) -> bool {
        now_ms().saturating_sub(self.cached_at_ms) >= self.ttl_ms
    }

    fn to_response(&self, source: ResponseSource) -> AgentResponse {
        AgentResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            source,
        }
    }
}

/// One record held for the cache manager's agent tier
#[derive(Debug, Clone)]
struct DataRecord {
    record: Bytes,
    cached_at_ms: u64,
    ttl_ms: u64,
}

impl DataRecord {
    fn is_expired(&self) -> bool {
        now_ms().saturating_sub(self.cached_at_ms) >= self.ttl_ms
    }
}

/// Shared state reachable from background refresh tasks
struct AgentState {
    config: AgentConfig,
    fetcher: Arc<dyn ResourceFetcher>,
    /// Named resource caches: cache name -> url -> resource
    resources: DashMap<&'static str, DashMap<String, CachedResource>>,
    /// Manager-tier records
    data: DashMap<String, DataRecord>,
}

impl AgentState {
    fn new(config: AgentConfig, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        let resources = DashMap::new();
        for name in ["static", "images", "documents", "api"] {
            resources.insert(name, DashMap::new());
        }
        Self {
            config,
            fetcher,
            resources,
            data: DashMap::new(),
        }
    }

    fn lookup(&self, class: ResourceClass, url: &str) -> Option<CachedResource> {
        self.resources
            .get(class.cache_name())
            .and_then(|cache| cache.get(url).map(|r| r.clone()))
    }

    /// Cache a 2xx response, stamping the TTL headers at write time
    fn store_if_ok(&self, class: ResourceClass, url: &str, response: &AgentResponse) {
        if !response.is_ok() {
            return;
        }
        let cached_at_ms = now_ms();
        let ttl_ms = self.config.ttl_for(class).as_millis() as u64;

        let mut headers = response.headers.clone();
        headers.insert(CACHED_AT_HEADER.to_string(), cached_at_ms.to_string());
        headers.insert(CACHE_TTL_HEADER.to_string(), ttl_ms.to_string());

        if let Some(cache) = self.resources.get(class.cache_name()) {
            cache.insert(
                url.to_string(),
                CachedResource {
                    status: response.status,
                    headers,
                    body: response.body.clone(),
                    cached_at_ms,
                    ttl_ms,
                },
            );
        }
    }

    fn resource_count(&self) -> usize {
        self.resources.iter().map(|c| c.len()).sum()
    }

    fn clear_resources(&self, name: Option<&str>) -> Result<()> {
        match name {
            Some(name) => match self.resources.get(name) {
                Some(cache) => {
                    cache.clear();
                    Ok(())
                }
                None => Err(Error::UnknownCache(name.to_string())),
            },
            None => {
                for cache in self.resources.iter() {
                    cache.clear();
                }
                self.data.clear();
                Ok(())
            }
        }
    }
}

// =============================================================================
// Strategy execution
// =============================================================================

async fn handle_request(state: Arc<AgentState>, url: &str) -> Result<AgentResponse> {
    let class = ResourceClass::classify(url);
    match class.strategy() {
        FetchStrategy::CacheFirst => cache_first(&state, class, url).await,
        FetchStrategy::NetworkFirst => network_first(&state, class, url).await,
        FetchStrategy::StaleWhileRevalidate => stale_while_revalidate(state, class, url).await,
    }
}

async fn cache_first(state: &AgentState, class: ResourceClass, url: &str) -> Result<AgentResponse> {
    if let Some(cached) = state.lookup(class, url) {
        if !cached.is_expired() {
            return Ok(cached.to_response(ResponseSource::Cache));
        }
    }

    let response = state.fetcher.fetch(url).await?;
    state.store_if_ok(class, url, &response);
    Ok(response)
}

async fn network_first(
    state: &AgentState,
    class: ResourceClass,
    url: &str,
) -> Result<AgentResponse> {
    match state.fetcher.fetch(url).await {
        Ok(response) => {
            state.store_if_ok(class, url, &response);
            Ok(response)
        }
        Err(e) => {
            warn!(url, error = %e, "network-first fetch failed, checking cache");
            if let Some(cached) = state.lookup(class, url) {
                let source = if cached.is_expired() {
                    ResponseSource::StaleCache
                } else {
                    ResponseSource::Cache
                };
                return Ok(cached.to_response(source));
            }
            Ok(offline_response(class, url))
        }
    }
}

async fn stale_while_revalidate(
    state: Arc<AgentState>,
    class: ResourceClass,
    url: &str,
) -> Result<AgentResponse> {
    if let Some(cached) = state.lookup(class, url) {
        // Return immediately; refresh in the background for next time.
        let refresh_url = url.to_string();
        tokio::spawn(async move {
            match state.fetcher.fetch(&refresh_url).await {
                Ok(response) => state.store_if_ok(class, &refresh_url, &response),
                Err(e) => debug!(url = %refresh_url, error = %e, "background refresh failed"),
            }
        });

        let source = if cached.is_expired() {
            ResponseSource::StaleCache
        } else {
            ResponseSource::Cache
        };
        return Ok(cached.to_response(source));
    }

    let response = state.fetcher.fetch(url).await?;
    state.store_if_ok(class, url, &response);
    Ok(response)
}

fn offline_response(class: ResourceClass, url: &str) -> AgentResponse {
    let (content_type, body) = match class {
        ResourceClass::Document => ("text/html", Bytes::from_static(OFFLINE_PAGE.as_bytes())),
        _ => (
            "application/json",
            Bytes::from(
                serde_json::json!({"error": "offline", "url": url})
                    .to_string()
                    .into_bytes(),
            ),
        ),
    };

    AgentResponse {
        status: 503,
        headers: HashMap::from([("content-type".to_string(), content_type.to_string())]),
        body,
        source: ResponseSource::Offline,
    }
}

// =============================================================================
// Actor plumbing
// =============================================================================

/// Per-cache entry counts returned by `cache_size`
#[derive(Debug, Clone, Default)]
pub struct CacheSizeReport {
    pub per_cache: HashMap<String, usize>,
    pub data_entries: usize,
}

impl CacheSizeReport {
    /// Total entries across resource caches and the data tier
    pub fn total(&self) -> usize {
        self.per_cache.values().sum::<usize>() + self.data_entries
    }
}

enum AgentCommand {
    HandleRequest {
        url: String,
        reply: oneshot::Sender<Result<AgentResponse>>,
    },
    Store {
        key: String,
        record: Bytes,
        ttl: Duration,
        reply: oneshot::Sender<()>,
    },
    Load {
        key: String,
        reply: oneshot::Sender<Option<Bytes>>,
    },
    Delete {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    DeleteMatching {
        pattern: String,
        reply: oneshot::Sender<usize>,
    },
    EntryCount {
        reply: oneshot::Sender<usize>,
    },
    CacheUrls {
        urls: Vec<String>,
        reply: oneshot::Sender<usize>,
    },
    ClearCache {
        name: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    CacheSize {
        reply: oneshot::Sender<CacheSizeReport>,
    },
    AnnounceUpdate {
        version: String,
        reply: oneshot::Sender<()>,
    },
    UpdateAvailable {
        reply: oneshot::Sender<bool>,
    },
    SkipWaiting {
        reply: oneshot::Sender<String>,
    },
    Shutdown,
}

/// The background network agent actor
pub struct NetworkAgent {
    state: Arc<AgentState>,
    rx: mpsc::Receiver<AgentCommand>,
    pending_version: Option<String>,
}

impl NetworkAgent {
    /// Spawn the agent task and return a handle to it
    pub fn spawn(config: AgentConfig, fetcher: Arc<dyn ResourceFetcher>) -> AgentHandle {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let agent = NetworkAgent {
            state: Arc::new(AgentState::new(config, fetcher)),
            rx,
            pending_version: None,
        };
        tokio::spawn(agent.run());
        AgentHandle { tx }
    }

    async fn run(mut self) {
        let mut active_version = self.state.config.version.clone();
        info!(version = %active_version, "network agent started");

        while let Some(command) = self.rx.recv().await {
            match command {
                AgentCommand::HandleRequest { url, reply } => {
                    // Handled on a separate task so a slow fetch never
                    // blocks the command channel.
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        let result = handle_request(state, &url).await;
                        let _ = reply.send(result);
                    });
                }
                AgentCommand::Store {
                    key,
                    record,
                    ttl,
                    reply,
                } => {
                    self.state.data.insert(
                        key,
                        DataRecord {
                            record,
                            cached_at_ms: now_ms(),
                            ttl_ms: ttl.as_millis() as u64,
                        },
                    );
                    let _ = reply.send(());
                }
                AgentCommand::Load { key, reply } => {
                    // Clone out of the shard guard before any removal.
                    let found = self
                        .state
                        .data
                        .get(&key)
                        .map(|r| (r.is_expired(), r.record.clone()));
                    let result = match found {
                        Some((false, record)) => Some(record),
                        Some((true, _)) => {
                            self.state.data.remove(&key);
                            None
                        }
                        None => None,
                    };
                    let _ = reply.send(result);
                }
                AgentCommand::Delete { key, reply } => {
                    let _ = reply.send(self.state.data.remove(&key).is_some());
                }
                AgentCommand::DeleteMatching { pattern, reply } => {
                    let before = self.state.data.len();
                    self.state.data.retain(|k, _| !k.contains(&pattern));
                    let _ = reply.send(before - self.state.data.len());
                }
                AgentCommand::EntryCount { reply } => {
                    let _ = reply.send(self.state.data.len());
                }
                AgentCommand::CacheUrls { urls, reply } => {
                    // Pre-warm fetches run off the actor loop so a slow
                    // upstream can never stall the command channel.
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        let mut cached = 0;
                        for url in urls {
                            let class = ResourceClass::classify(&url);
                            match state.fetcher.fetch(&url).await {
                                Ok(response) if response.is_ok() => {
                                    state.store_if_ok(class, &url, &response);
                                    cached += 1;
                                }
                                Ok(response) => {
                                    warn!(url, status = response.status, "pre-cache skipped");
                                }
                                Err(e) => warn!(url, error = %e, "pre-cache fetch failed"),
                            }
                        }
                        let _ = reply.send(cached);
                    });
                }
                AgentCommand::ClearCache { name, reply } => {
                    let _ = reply.send(self.state.clear_resources(name.as_deref()));
                }
                AgentCommand::CacheSize { reply } => {
                    let per_cache = self
                        .state
                        .resources
                        .iter()
                        .map(|c| (c.key().to_string(), c.len()))
                        .collect();
                    let _ = reply.send(CacheSizeReport {
                        per_cache,
                        data_entries: self.state.data.len(),
                    });
                }
                AgentCommand::AnnounceUpdate { version, reply } => {
                    if version != active_version {
                        info!(%version, "agent update available");
                        self.pending_version = Some(version);
                    }
                    let _ = reply.send(());
                }
                AgentCommand::UpdateAvailable { reply } => {
                    let _ = reply.send(self.pending_version.is_some());
                }
                AgentCommand::SkipWaiting { reply } => {
                    if let Some(version) = self.pending_version.take() {
                        // Old-version caches are dropped on activation.
                        let _ = self.state.clear_resources(None);
                        info!(%version, "agent activated pending version");
                        active_version = version;
                    }
                    let _ = reply.send(active_version.clone());
                }
                AgentCommand::Shutdown => break,
            }
        }

        info!("network agent stopped");
    }
}

/// Cloneable handle to a running [`NetworkAgent`]
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<AgentCommand>,
}

impl AgentHandle {
    async fn call<T>(
        &self,
        command: AgentCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::AgentUnavailable)?;
        rx.await.map_err(|_| Error::AgentUnavailable)
    }

    /// Route a resource request through the agent's strategy logic
    pub async fn handle_request(&self, url: &str) -> Result<AgentResponse> {
        let (reply, rx) = oneshot::channel();
        self.call(
            AgentCommand::HandleRequest {
                url: url.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    /// Store a manager-tier record
    pub async fn store(&self, key: &CacheKey, record: Bytes, ttl: Duration) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(
            AgentCommand::Store {
                key: key.as_str().to_string(),
                record,
                ttl,
                reply,
            },
            rx,
        )
        .await
    }

    /// Load a manager-tier record (lazy expiry applies)
    pub async fn load(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let (reply, rx) = oneshot::channel();
        self.call(
            AgentCommand::Load {
                key: key.as_str().to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Delete a manager-tier record
    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.call(
            AgentCommand::Delete {
                key: key.as_str().to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Delete manager-tier records whose key contains `pattern`
    pub async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.call(
            AgentCommand::DeleteMatching {
                pattern: pattern.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Number of manager-tier records
    pub async fn entry_count(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.call(AgentCommand::EntryCount { reply }, rx).await
    }

    /// Pre-warm the resource caches; returns how many URLs were cached
    pub async fn cache_urls(&self, urls: Vec<String>) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.call(AgentCommand::CacheUrls { urls, reply }, rx).await
    }

    /// Clear one named cache, or everything when `name` is `None`
    pub async fn clear_cache(&self, name: Option<&str>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(
            AgentCommand::ClearCache {
                name: name.map(str::to_owned),
                reply,
            },
            rx,
        )
        .await?
    }

    /// Per-cache entry counts
    pub async fn cache_size(&self) -> Result<CacheSizeReport> {
        let (reply, rx) = oneshot::channel();
        self.call(AgentCommand::CacheSize { reply }, rx).await
    }

    /// Announce that a new agent version is waiting
    pub async fn announce_update(&self, version: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(
            AgentCommand::AnnounceUpdate {
                version: version.into(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Whether a new version is waiting to activate
    pub async fn update_available(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.call(AgentCommand::UpdateAvailable { reply }, rx).await
    }

    /// Activate a pending version immediately, dropping old caches.
    /// Returns the active version.
    pub async fn skip_waiting(&self) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.call(AgentCommand::SkipWaiting { reply }, rx).await
    }

    /// Stop the agent task
    pub async fn shutdown(&self) {
        let _ = self.tx.send(AgentCommand::Shutdown).await;
    }
}

// =============================================================================
// Tests
// =============================================================================
