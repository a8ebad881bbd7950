//! Tier identity, request parameters, and dedup keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Cache namespace used by the combined "comprehensive" fetch.
pub const COMPREHENSIVE_NAMESPACE: &str = "comprehensive";

// ============================================================================
// TIER IDENTITY
// ============================================================================

/// Priority bucket into which dashboard data is partitioned.
///
/// Tiers load in declaration order. Each tier (other than `Critical`) has
/// exactly one dependency: the tier immediately before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierId {
    /// Data required to render anything at all
    Critical,
    /// Data rendered once the critical view is on screen
    Secondary,
    /// Expensive, below-the-fold data
    Detailed,
}

impl TierId {
    /// All tiers in load order.
    pub const ALL: [TierId; 3] = [TierId::Critical, TierId::Secondary, TierId::Detailed];

    /// The tier that must succeed before this one may start.
    pub fn dependency(&self) -> Option<TierId> {
        match self {
            Self::Critical => None,
            Self::Secondary => Some(Self::Critical),
            Self::Detailed => Some(Self::Secondary),
        }
    }

    /// The tier unlocked by this one.
    pub fn next(&self) -> Option<TierId> {
        match self {
            Self::Critical => Some(Self::Secondary),
            Self::Secondary => Some(Self::Detailed),
            Self::Detailed => None,
        }
    }

    /// Stable lowercase name, also used as the cache namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Secondary => "secondary",
            Self::Detailed => "detailed",
        }
    }

    /// Zero-based position in load order.
    pub fn index(&self) -> usize {
        match self {
            Self::Critical => 0,
            Self::Secondary => 1,
            Self::Detailed => 2,
        }
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a TierId from string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tier: {0}")]
pub struct TierIdParseError(pub String);

impl FromStr for TierId {
    type Err = TierIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "secondary" => Ok(Self::Secondary),
            "detailed" => Ok(Self::Detailed),
            _ => Err(TierIdParseError(s.to_string())),
        }
    }
}

// ============================================================================
// REQUEST PARAMETERS
// ============================================================================

/// Key/value parameters passed through to the transport.
///
/// Backed by a `BTreeMap` so iteration order, and therefore the derived
/// dedup key, is independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchParams(BTreeMap<String, String>);

impl FetchParams {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a parameter.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical `k=v&k=v` rendering in key order.
    pub fn canonical(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl<K, V> FromIterator<(K, V)> for FetchParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ============================================================================
// DEDUP KEYS AND REQUESTS
// ============================================================================

/// String uniquely identifying a logical fetch, used to collapse concurrent
/// duplicate requests and as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    /// Key for a single tier fetch.
    pub fn for_tier(tier: TierId, params: &FetchParams) -> Self {
        Self::compose(tier.as_str(), params)
    }

    /// Key for the combined comprehensive fetch.
    pub fn comprehensive(params: &FetchParams) -> Self {
        Self::compose(COMPREHENSIVE_NAMESPACE, params)
    }

    fn compose(prefix: &str, params: &FetchParams) -> Self {
        if params.is_empty() {
            Self(prefix.to_string())
        } else {
            Self(format!("{}?{}", prefix, params.canonical()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DedupKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single orchestration request for one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub tier: TierId,
    pub params: FetchParams,
    pub dedup_key: DedupKey,
}

impl FetchRequest {
    pub fn new(tier: TierId, params: FetchParams) -> Self {
        let dedup_key = DedupKey::for_tier(tier, &params);
        Self {
            tier,
            params,
            dedup_key,
        }
    }
}

/// Result of a comprehensive fetch: one payload per tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierBundle {
    pub critical: Value,
    pub secondary: Value,
    pub detailed: Value,
}

impl TierBundle {
    /// Payload for a given tier.
    pub fn get(&self, tier: TierId) -> &Value {
        match tier {
            TierId::Critical => &self.critical,
            TierId::Secondary => &self.secondary,
            TierId::Detailed => &self.detailed,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
