//! Cache Policies
//!
//! A policy is the `{tier, ttl, compress}` triple governing one cache write.
//! Policies are statically associated with logical endpoint categories; each
//! category carries a default policy ranging from 30 seconds (volatile
//! status) to 24 hours (static content).

use std::time::Duration;

/// Storage tier selector for a cache write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// In-process bounded map (fast, volatile)
    Memory,
    /// Durable local key-value store
    Durable,
    /// Delegated to the background network agent's own cache
    Agent,
    /// Write-through to memory + durable; read memory first with
    /// durable fallback and memory repopulation
    Hybrid,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::Memory => write!(f, "memory"),
            CacheTier::Durable => write!(f, "durable"),
            CacheTier::Agent => write!(f, "agent"),
            CacheTier::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Policy governing one cache write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Target tier
    pub tier: CacheTier,
    /// Entry lifetime
    pub ttl: Duration,
    /// Compress large payloads before durable storage
    pub compress: bool,
}

impl CachePolicy {
    /// Create a policy without compression
    pub fn new(tier: CacheTier, ttl: Duration) -> Self {
        Self {
            tier,
            ttl,
            compress: false,
        }
    }

    /// Enable compression for durable writes
    pub fn with_compression(mut self) -> Self {
        self.compress = true;
        self
    }

    /// Entry lifetime in milliseconds
    pub fn ttl_ms(&self) -> u64 {
        self.ttl.as_millis() as u64
    }
}

/// Logical endpoint categories with static default policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointCategory {
    /// Static content (templates, fonts, bundled assets)
    StaticContent,
    /// The signed-in user's profile
    UserProfile,
    /// Generated resume documents and optimization results
    ResumeArtifact,
    /// Job/keyword search results
    SearchResult,
    /// Generic API response (fallback category)
    GenericApi,
    /// Help articles and onboarding copy
    HelpContent,
    /// Volatile system status
    SystemStatus,
}

impl EndpointCategory {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            EndpointCategory::StaticContent => "static-content",
            EndpointCategory::UserProfile => "user-profile",
            EndpointCategory::ResumeArtifact => "resume-artifact",
            EndpointCategory::SearchResult => "search-result",
            EndpointCategory::GenericApi => "generic-api",
            EndpointCategory::HelpContent => "help-content",
            EndpointCategory::SystemStatus => "system-status",
        }
    }

    /// Default `{ttl, tier}` pair for this category
    pub fn default_policy(&self) -> CachePolicy {
        match self {
            EndpointCategory::StaticContent => {
                CachePolicy::new(CacheTier::Durable, Duration::from_secs(24 * 3600))
            }
            EndpointCategory::UserProfile => {
                CachePolicy::new(CacheTier::Hybrid, Duration::from_secs(10 * 60))
            }
            EndpointCategory::ResumeArtifact => {
                CachePolicy::new(CacheTier::Hybrid, Duration::from_secs(3600)).with_compression()
            }
            EndpointCategory::SearchResult => {
                CachePolicy::new(CacheTier::Memory, Duration::from_secs(5 * 60))
            }
            EndpointCategory::GenericApi => {
                CachePolicy::new(CacheTier::Memory, Duration::from_secs(2 * 60))
            }
            EndpointCategory::HelpContent => {
                CachePolicy::new(CacheTier::Durable, Duration::from_secs(12 * 3600))
            }
            EndpointCategory::SystemStatus => {
                CachePolicy::new(CacheTier::Memory, Duration::from_secs(30))
            }
        }
    }
}

impl std::fmt::Display for EndpointCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_range_across_categories() {
        let status = EndpointCategory::SystemStatus.default_policy();
        let static_content = EndpointCategory::StaticContent.default_policy();

        assert_eq!(status.ttl, Duration::from_secs(30));
        assert_eq!(static_content.ttl, Duration::from_secs(86400));
        assert_eq!(status.tier, CacheTier::Memory);
        assert_eq!(static_content.tier, CacheTier::Durable);
    }

    #[test]
    fn test_resume_artifacts_compress() {
        let policy = EndpointCategory::ResumeArtifact.default_policy();
        assert!(policy.compress);
        assert_eq!(policy.tier, CacheTier::Hybrid);
    }

    #[test]
    fn test_generic_fallback_is_short_lived_memory() {
        let policy = EndpointCategory::GenericApi.default_policy();
        assert_eq!(policy.tier, CacheTier::Memory);
        assert!(policy.ttl <= Duration::from_secs(5 * 60));
        assert!(!policy.compress);
    }

    #[test]
    fn test_ttl_ms_conversion() {
        let policy = CachePolicy::new(CacheTier::Memory, Duration::from_secs(30));
        assert_eq!(policy.ttl_ms(), 30_000);
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(format!("{}", CacheTier::Memory), "memory");
        assert_eq!(format!("{}", CacheTier::Hybrid), "hybrid");
    }
}
