//! Strategy Resolver & Key Generator
//!
//! Maps a logical URL to an endpoint category (exact match first, then
//! longest prefix, then the generic fallback) and derives deterministic
//! cache keys from `(method, url, params)`.

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::entry::{fx_hash, CacheKey};
use crate::policy::{CachePolicy, EndpointCategory};

/// Built-in endpoint rows: the primary configuration surface.
/// Adding an endpoint category means adding one row.
static BUILTIN_ROUTES: Lazy<Vec<(&'static str, EndpointCategory)>> = Lazy::new(|| {
    vec![
        ("/api/system/status", EndpointCategory::SystemStatus),
        ("/api/user/profile", EndpointCategory::UserProfile),
        ("/api/resume", EndpointCategory::ResumeArtifact),
        ("/api/search", EndpointCategory::SearchResult),
        ("/api/help", EndpointCategory::HelpContent),
        ("/static/", EndpointCategory::StaticContent),
        ("/assets/", EndpointCategory::StaticContent),
    ]
});

/// URL-prefix to category table
#[derive(Debug, Clone)]
pub struct EndpointPolicyTable {
    rows: Vec<(String, EndpointCategory)>,
}

impl Default for EndpointPolicyTable {
    fn default() -> Self {
        Self {
            rows: BUILTIN_ROUTES
                .iter()
                .map(|(p, c)| (p.to_string(), *c))
                .collect(),
        }
    }
}

impl EndpointPolicyTable {
    /// Create a table with the built-in rows
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table (everything resolves to the generic fallback)
    pub fn empty() -> Self {
        Self { rows: Vec::new() }
    }

    /// Add one endpoint row
    pub fn insert(&mut self, prefix: impl Into<String>, category: EndpointCategory) {
        self.rows.push((prefix.into(), category));
    }

    /// Resolve a logical URL to its endpoint category
    ///
    /// Exact match wins over prefix match; among prefix matches the longest
    /// prefix wins. Unmatched URLs fall back to [`EndpointCategory::GenericApi`].
    pub fn resolve(&self, url: &str) -> EndpointCategory {
        if let Some((_, category)) = self.rows.iter().find(|(prefix, _)| prefix == url) {
            return *category;
        }

        self.rows
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, category)| *category)
            .unwrap_or(EndpointCategory::GenericApi)
    }

    /// Resolve straight to the category's default policy
    pub fn policy_for(&self, url: &str) -> CachePolicy {
        self.resolve(url).default_policy()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Derive a deterministic cache key from `(method, url, params)`
///
/// Format: `"{METHOD}:{url}:{params_hash}"`. The hash suffix is empty when
/// there are no parameters, otherwise a hex digest of the canonicalized
/// parameter object. Canonicalization sorts object keys recursively, so the
/// key never depends on insertion order.
pub fn generate_key(method: &str, url: &str, params: &Value) -> CacheKey {
    let suffix = if params_is_empty(params) {
        String::new()
    } else {
        format!("{:016x}", fx_hash(canonical_json(params).as_bytes()))
    };
    CacheKey::from_raw(format!("{}:{}:{}", method.to_ascii_uppercase(), url, suffix))
}

fn params_is_empty(params: &Value) -> bool {
    match params {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Canonical text form of a JSON value: object keys emitted in sorted
/// order at every depth, array order preserved.
fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Object keys are strings; serde_json escaping is canonical.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_exact_match_wins() {
        let mut table = EndpointPolicyTable::new();
        // A longer prefix row that would shadow the exact row under
        // prefix-only matching.
        table.insert("/api/system/status/extra", EndpointCategory::GenericApi);

        assert_eq!(
            table.resolve("/api/system/status"),
            EndpointCategory::SystemStatus
        );
    }

    #[test]
    fn test_longest_prefix_match() {
        let mut table = EndpointPolicyTable::new();
        table.insert("/api/resume/export", EndpointCategory::StaticContent);

        assert_eq!(
            table.resolve("/api/resume/export/pdf"),
            EndpointCategory::StaticContent
        );
        assert_eq!(
            table.resolve("/api/resume/123"),
            EndpointCategory::ResumeArtifact
        );
    }

    #[test]
    fn test_generic_fallback() {
        let table = EndpointPolicyTable::new();
        assert_eq!(
            table.resolve("/api/unmapped/thing"),
            EndpointCategory::GenericApi
        );
        assert_eq!(
            EndpointPolicyTable::empty().resolve("/api/user/profile"),
            EndpointCategory::GenericApi
        );
    }

    #[test]
    fn test_key_without_params_has_empty_suffix() {
        let key = generate_key("get", "/api/system/status", &Value::Null);
        assert_eq!(key.as_str(), "GET:/api/system/status:");

        let key = generate_key("GET", "/api/system/status", &json!({}));
        assert_eq!(key.as_str(), "GET:/api/system/status:");
    }

    #[test]
    fn test_key_order_independence() {
        let a = generate_key("GET", "/api/search", &json!({"q": "rust", "page": 2}));
        let b = generate_key("GET", "/api/search", &json!({"page": 2, "q": "rust"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_differs_on_any_input() {
        let base = generate_key("GET", "/api/search", &json!({"q": "rust"}));

        assert_ne!(base, generate_key("POST", "/api/search", &json!({"q": "rust"})));
        assert_ne!(base, generate_key("GET", "/api/search2", &json!({"q": "rust"})));
        assert_ne!(base, generate_key("GET", "/api/search", &json!({"q": "go"})));
    }

    #[test]
    fn test_canonical_json_nested_sorting() {
        let v = json!({"b": {"y": 1, "x": [3, 2]}, "a": true});
        assert_eq!(canonical_json(&v), r#"{"a":true,"b":{"x":[3,2],"y":1}}"#);
    }

    proptest! {
        #[test]
        fn prop_key_is_deterministic(
            pairs in proptest::collection::vec(("[a-z]{1,8}", 0i64..1000), 0..8)
        ) {
            // Dedupe by key: duplicate keys would make the forward and
            // reversed objects genuinely different parameter sets.
            let mut seen = std::collections::HashSet::new();
            let pairs: Vec<_> = pairs
                .into_iter()
                .filter(|(k, _)| seen.insert(k.clone()))
                .collect();

            let forward = Value::Object(
                pairs.iter().map(|(k, v)| (k.clone(), Value::from(*v))).collect(),
            );
            let reversed = Value::Object(
                pairs.iter().rev().map(|(k, v)| (k.clone(), Value::from(*v))).collect(),
            );

            let a = generate_key("GET", "/api/search", &forward);
            let b = generate_key("GET", "/api/search", &reversed);
            prop_assert_eq!(a, b);
        }
    }
}
