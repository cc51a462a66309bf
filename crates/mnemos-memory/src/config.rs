//! Engine configuration.
//!
//! Every tunable constant of the engine lives here so that deployments which
//! want more aggressive decay or stricter thresholds change parameters, not
//! code.  All fields carry serde defaults, so a partial `[memory]` table in a
//! TOML file is enough.

use mnemos_types::MnemosError;
use serde::{Deserialize, Serialize};

/// Tags that block an entry from ever leaving its owning agent.
pub const DEFAULT_NON_TRANSFERABLE_TAGS: [&str; 4] =
    ["personal", "private", "agent-specific", "temporary"];

/// Tunable parameters for [`MemoryEngine`][crate::engine::MemoryEngine].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Dimension `D` of every embedding.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Soft capacity; crossing it makes the next store trigger consolidation
    /// when `auto_consolidate` is on.
    #[serde(default = "default_max_memory_size")]
    pub max_memory_size: usize,

    #[serde(default = "default_true")]
    pub auto_consolidate: bool,

    // ── store-time linking ──────────────────────────────────────────────────
    #[serde(default = "default_link_threshold")]
    pub link_threshold: f32,
    #[serde(default = "default_max_links")]
    pub max_links: usize,

    // ── search ──────────────────────────────────────────────────────────────
    #[serde(default = "default_search_threshold")]
    pub search_threshold: f32,
    #[serde(default = "default_half_life_hours")]
    pub recency_half_life_hours: f64,
    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f32,
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f32,

    // ── clustering ──────────────────────────────────────────────────────────
    #[serde(default = "default_entries_per_cluster")]
    pub entries_per_cluster: usize,
    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,
    #[serde(default = "default_cluster_rounds")]
    pub cluster_rounds: usize,
    #[serde(default = "default_cluster_membership")]
    pub cluster_membership_threshold: f32,
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    // ── obsolescence ────────────────────────────────────────────────────────
    #[serde(default = "default_max_age_days")]
    pub obsolete_after_days: i64,
    #[serde(default = "default_min_access")]
    pub obsolete_min_access: u64,
    #[serde(default = "default_obsolete_relevance")]
    pub obsolete_relevance_floor: f32,

    // ── patterns ────────────────────────────────────────────────────────────
    #[serde(default = "default_pattern_tag_frequency")]
    pub pattern_tag_frequency: f32,
    #[serde(default = "default_pattern_boost")]
    pub pattern_importance_boost: f32,

    // ── transfer ────────────────────────────────────────────────────────────
    #[serde(default = "default_transfer_limit")]
    pub transfer_limit: usize,
    #[serde(default = "default_transfer_similarity")]
    pub transfer_min_similarity: f32,
    #[serde(default = "default_transfer_importance")]
    pub transfer_min_importance: f32,
    #[serde(default = "default_transfer_decay")]
    pub transfer_importance_decay: f32,
    #[serde(default = "default_non_transferable_tags")]
    pub non_transferable_tags: Vec<String>,
}

fn default_dimension() -> usize {
    384
}
fn default_max_memory_size() -> usize {
    10_000
}
fn default_true() -> bool {
    true
}
fn default_link_threshold() -> f32 {
    0.7
}
fn default_max_links() -> usize {
    5
}
fn default_search_threshold() -> f32 {
    0.1
}
fn default_half_life_hours() -> f64 {
    24.0
}
fn default_similarity_weight() -> f32 {
    0.6
}
fn default_recency_weight() -> f32 {
    0.2
}
fn default_importance_weight() -> f32 {
    0.2
}
fn default_entries_per_cluster() -> usize {
    100
}
fn default_max_clusters() -> usize {
    50
}
fn default_cluster_rounds() -> usize {
    10
}
fn default_cluster_membership() -> f32 {
    0.3
}
fn default_min_cluster_size() -> usize {
    3
}
fn default_max_age_days() -> i64 {
    90
}
fn default_min_access() -> u64 {
    1
}
fn default_obsolete_relevance() -> f32 {
    0.3
}
fn default_pattern_tag_frequency() -> f32 {
    0.3
}
fn default_pattern_boost() -> f32 {
    1.2
}
fn default_transfer_limit() -> usize {
    20
}
fn default_transfer_similarity() -> f32 {
    0.6
}
fn default_transfer_importance() -> f32 {
    0.7
}
fn default_transfer_decay() -> f32 {
    0.8
}
fn default_non_transferable_tags() -> Vec<String> {
    DEFAULT_NON_TRANSFERABLE_TAGS
        .iter()
        .map(|t| t.to_string())
        .collect()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            max_memory_size: default_max_memory_size(),
            auto_consolidate: default_true(),
            link_threshold: default_link_threshold(),
            max_links: default_max_links(),
            search_threshold: default_search_threshold(),
            recency_half_life_hours: default_half_life_hours(),
            similarity_weight: default_similarity_weight(),
            recency_weight: default_recency_weight(),
            importance_weight: default_importance_weight(),
            entries_per_cluster: default_entries_per_cluster(),
            max_clusters: default_max_clusters(),
            cluster_rounds: default_cluster_rounds(),
            cluster_membership_threshold: default_cluster_membership(),
            min_cluster_size: default_min_cluster_size(),
            obsolete_after_days: default_max_age_days(),
            obsolete_min_access: default_min_access(),
            obsolete_relevance_floor: default_obsolete_relevance(),
            pattern_tag_frequency: default_pattern_tag_frequency(),
            pattern_importance_boost: default_pattern_boost(),
            transfer_limit: default_transfer_limit(),
            transfer_min_similarity: default_transfer_similarity(),
            transfer_min_importance: default_transfer_importance(),
            transfer_importance_decay: default_transfer_decay(),
            non_transferable_tags: default_non_transferable_tags(),
        }
    }
}

impl MemoryConfig {
    /// Reject parameter combinations the engine cannot work with.
    pub fn validate(&self) -> Result<(), MnemosError> {
        let invalid = |msg: &str| Err(MnemosError::Validation(msg.to_string()));

        if self.dimension == 0 {
            return invalid("dimension must be at least 1");
        }
        if self.entries_per_cluster == 0 || self.max_clusters == 0 {
            return invalid("entries_per_cluster and max_clusters must be at least 1");
        }
        if self.recency_half_life_hours <= 0.0 {
            return invalid("recency_half_life_hours must be positive");
        }
        let unit = [
            ("link_threshold", self.link_threshold),
            ("cluster_membership_threshold", self.cluster_membership_threshold),
            ("obsolete_relevance_floor", self.obsolete_relevance_floor),
            ("pattern_tag_frequency", self.pattern_tag_frequency),
            ("transfer_min_importance", self.transfer_min_importance),
            ("transfer_importance_decay", self.transfer_importance_decay),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(MnemosError::Validation(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        let weights = self.similarity_weight + self.recency_weight + self.importance_weight;
        if weights <= 0.0 {
            return invalid("relevance weights must not all be zero");
        }
        Ok(())
    }

    /// `true` when `tag` is in the non-transferable set (case-insensitive).
    pub fn is_non_transferable(&self, tag: &str) -> bool {
        self.non_transferable_tags
            .iter()
            .any(|t| t.eq_ignore_ascii_case(tag))
    }
}
