//! Rescache - Tiered Response Caching Layer
//!
//! A client-side caching layer that sits between application logic and the
//! network. API responses are cached across three storage tiers with
//! per-endpoint policies, and a background network agent applies
//! service-worker-style strategies to resource requests.
//!
//! # Architecture
//!
//! ```text
//!                   ┌────────────────────┐
//!  application ───► │  RequestExecutor   │  retry + timeout + cache check
//!                   └─────────┬──────────┘
//!                             ▼
//!                   ┌────────────────────┐
//!                   │    CacheManager    │  policy-driven tier routing
//!                   ├────────────────────┤
//!                   │ memory │ durable   │
//!                   └─────────┬──────────┘
//!                             ▼
//!                   ┌────────────────────┐
//!                   │    NetworkAgent    │  cache-first / network-first /
//!                   └────────────────────┘  stale-while-revalidate
//! ```
//!
//! Every cached entry carries a write timestamp and a TTL; expiry is lazy,
//! performed by the read that finds a stale entry.
//!
//! # Modules
//!
//! - [`agent`] - Background network agent with per-resource-class strategies
//! - [`compression`] - Deflate codec for large durable payloads
//! - [`durable`] - Persistent key-value tier with self-describing records
//! - [`entry`] - Cache keys, entries, and durable records
//! - [`error`] - Error types
//! - [`executor`] - Cached request executor with retry
//! - [`manager`] - Tiered cache manager
//! - [`memory`] - Bounded in-process tier
//! - [`metrics`] - Hit/miss counters and statistics snapshots
//! - [`policy`] - Cache tiers, policies, and endpoint categories
//! - [`resolver`] - Endpoint policy resolution and cache key generation

pub mod agent;
pub mod compression;
pub mod durable;
pub mod entry;
pub mod error;
pub mod executor;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod policy;
pub mod resolver;

// Re-export commonly used types
pub use agent::{AgentConfig, AgentHandle, AgentResponse, NetworkAgent, ResourceFetcher};
pub use entry::{CacheEntry, CacheKey};
pub use error::{Error, Result};
pub use executor::{ApiRequest, Fetcher, Method, RequestExecutor, RetryConfig};
pub use manager::{CacheConfig, CacheManager};
pub use metrics::{CacheMetrics, CacheStats};
pub use policy::{CachePolicy, CacheTier, EndpointCategory};
pub use resolver::{generate_key, EndpointPolicyTable};
