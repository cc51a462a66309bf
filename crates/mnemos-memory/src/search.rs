//! Similarity search over the vector store.
//!
//! Every entry that passes the filters is scored by cosine similarity against
//! the query vector.  Entries at or above the threshold are ranked by
//! similarity first; ties are broken by a blended relevance score
//!
//! ```text
//! relevance = (ws·similarity + wr·0.5^(hours_since_access / half_life) + wi·importance)
//!             / (ws + wr + wi)
//! ```
//!
//! Ranking itself never mutates the store; [`record_hits`] applies the
//! access bookkeeping for results that are actually handed to a caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MemoryConfig;
use crate::embedding::cosine_similarity;
use crate::entry::{MemoryKind, VectorEntry};
use crate::store::VectorStore;

/// What to compare stored entries against.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput {
    Text(String),
    Vector(Vec<f32>),
}

impl From<&str> for QueryInput {
    fn from(text: &str) -> Self {
        QueryInput::Text(text.to_string())
    }
}

impl From<Vec<f32>> for QueryInput {
    fn from(v: Vec<f32>) -> Self {
        QueryInput::Vector(v)
    }
}

/// Restrictions applied before scoring.  Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub agent_id: Option<String>,
    /// Entry must carry at least one of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    pub kind: Option<MemoryKind>,
    pub project_id: Option<String>,
}

impl SearchFilters {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &VectorEntry) -> bool {
        if let Some(agent) = &self.agent_id
            && &entry.agent_id != agent
        {
            return false;
        }
        if let Some(kind) = self.kind
            && entry.kind != kind
        {
            return false;
        }
        if let Some(project) = &self.project_id
            && entry.project_id.as_ref() != Some(project)
        {
            return false;
        }
        self.tags.is_empty() || self.tags.iter().any(|t| entry.has_tag(t))
    }
}

/// A full search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub input: QueryInput,
    pub filters: SearchFilters,
    pub limit: usize,
    pub threshold: f32,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            input: QueryInput::Text(text.into()),
            filters: SearchFilters::default(),
            limit: 10,
            threshold: 0.0,
        }
    }

    pub fn vector(v: Vec<f32>) -> Self {
        Self {
            input: QueryInput::Vector(v),
            ..Self::text("")
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

/// One ranked hit, carrying the entry as it stands after the access update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub entry: VectorEntry,
    pub similarity: f32,
    pub relevance: f32,
}

/// A scored candidate before any bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Scored {
    pub id: String,
    pub similarity: f32,
    pub relevance: f32,
}

/// `0.5^(hours / half_life)`; 1.0 for timestamps in the future.
pub fn recency_decay(last: DateTime<Utc>, now: DateTime<Utc>, half_life_hours: f64) -> f32 {
    let hours = (now - last).num_seconds().max(0) as f64 / 3600.0;
    0.5f64.powf(hours / half_life_hours) as f32
}

/// Blend similarity, recency and importance into a score in `[0, 1]`.
pub fn relevance(
    similarity: f32,
    entry: &VectorEntry,
    now: DateTime<Utc>,
    cfg: &MemoryConfig,
) -> f32 {
    let recency = recency_decay(entry.last_accessed, now, cfg.recency_half_life_hours);
    let total = cfg.similarity_weight + cfg.recency_weight + cfg.importance_weight;
    let blended = cfg.similarity_weight * similarity.max(0.0)
        + cfg.recency_weight * recency
        + cfg.importance_weight * entry.importance;
    (blended / total).clamp(0.0, 1.0)
}

/// Score and order every matching entry; does not touch the store.
pub(crate) fn rank(
    store: &VectorStore,
    query: &[f32],
    filters: &SearchFilters,
    limit: usize,
    threshold: f32,
    now: DateTime<Utc>,
    cfg: &MemoryConfig,
) -> Vec<Scored> {
    let mut scored: Vec<Scored> = store
        .iter()
        .filter(|e| filters.matches(e))
        .filter_map(|e| {
            let similarity = cosine_similarity(query, &e.embedding);
            (similarity >= threshold).then(|| Scored {
                id: e.id.clone(),
                similarity,
                relevance: relevance(similarity, e, now, cfg),
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| b.relevance.total_cmp(&a.relevance))
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(limit);
    scored
}

/// Bump access bookkeeping for surfaced hits and return owned results.
pub(crate) fn record_hits(
    store: &mut VectorStore,
    hits: Vec<Scored>,
    now: DateTime<Utc>,
) -> Vec<SearchResult> {
    hits.into_iter()
        .filter_map(|hit| {
            let entry = store.get_mut(&hit.id)?;
            entry.access_count += 1;
            entry.last_accessed = now;
            entry.relevance_score = hit.relevance;
            Some(SearchResult {
                entry: entry.clone(),
                similarity: hit.similarity,
                relevance: hit.relevance,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mnemos_types::MemoryContent;

    fn entry(id: &str, agent: &str, embedding: Vec<f32>, tags: &[&str]) -> VectorEntry {
        let now = Utc::now();
        VectorEntry {
            id: id.to_string(),
            content: MemoryContent::from(id),
            embedding,
            agent_id: agent.to_string(),
            project_id: None,
            created_at: now,
            kind: MemoryKind::Knowledge,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            importance: 0.5,
            context: String::new(),
            relationships: Vec::new(),
            access_count: 0,
            last_accessed: now,
            relevance_score: 0.5,
        }
    }

    fn store() -> VectorStore {
        let mut s = VectorStore::new();
        s.put(entry("near", "a", vec![1.0, 0.0, 0.0], &["x"]));
        s.put(entry("mid", "a", vec![0.7, 0.7, 0.0], &["y"]));
        s.put(entry("far", "b", vec![0.0, 0.0, 1.0], &["x"]));
        s
    }

    // ── recency / relevance ─────────────────────────────────────────────────

    #[test]
    fn recency_halves_after_one_half_life() {
        let now = Utc::now();
        let d = recency_decay(now - Duration::hours(24), now, 24.0);
        assert!((d - 0.5).abs() < 1e-4);
        assert!((recency_decay(now, now, 24.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn relevance_stays_in_unit_interval() {
        let cfg = MemoryConfig::default();
        let e = entry("e", "a", vec![1.0], &[]);
        let now = Utc::now();
        for sim in [-1.0, 0.0, 0.5, 1.0] {
            let r = relevance(sim, &e, now, &cfg);
            assert!((0.0..=1.0).contains(&r));
        }
    }

    // ── rank ────────────────────────────────────────────────────────────────

    #[test]
    fn rank_orders_by_similarity() {
        let cfg = MemoryConfig::default();
        let hits = rank(&store(), &[1.0, 0.0, 0.0], &SearchFilters::default(), 10, -1.0, Utc::now(), &cfg);
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
    }

    #[test]
    fn rank_applies_threshold_and_limit() {
        let cfg = MemoryConfig::default();
        let hits = rank(&store(), &[1.0, 0.0, 0.0], &SearchFilters::default(), 1, 0.5, Utc::now(), &cfg);
        assert_eq!(hits.len(), 1);
        assert!(hits.iter().all(|h| h.similarity >= 0.5));
    }

    #[test]
    fn rank_filters_by_agent_and_tag() {
        let cfg = MemoryConfig::default();
        let hits = rank(&store(), &[1.0, 0.0, 0.0], &SearchFilters::for_agent("b"), 10, -1.0, Utc::now(), &cfg);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "far");

        let filters = SearchFilters {
            tags: vec!["x".to_string()],
            ..Default::default()
        };
        let hits = rank(&store(), &[1.0, 0.0, 0.0], &filters, 10, -1.0, Utc::now(), &cfg);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn rank_ties_broken_by_importance() {
        let cfg = MemoryConfig::default();
        let mut s = VectorStore::new();
        let mut low = entry("low", "a", vec![1.0, 0.0], &[]);
        low.importance = 0.1;
        let mut high = entry("high", "a", vec![1.0, 0.0], &[]);
        high.importance = 0.9;
        s.put(low);
        s.put(high);
        let hits = rank(&s, &[1.0, 0.0], &SearchFilters::default(), 10, 0.0, Utc::now(), &cfg);
        assert_eq!(hits[0].id, "high");
    }

    #[test]
    fn empty_store_yields_empty_ranking() {
        let cfg = MemoryConfig::default();
        let hits = rank(&VectorStore::new(), &[1.0], &SearchFilters::default(), 10, 0.0, Utc::now(), &cfg);
        assert!(hits.is_empty());
    }

    // ── record_hits ─────────────────────────────────────────────────────────

    #[test]
    fn record_hits_bumps_access_count() {
        let cfg = MemoryConfig::default();
        let mut s = store();
        let now = Utc::now();
        let hits = rank(&s, &[1.0, 0.0, 0.0], &SearchFilters::default(), 1, 0.0, now, &cfg);
        let results = record_hits(&mut s, hits, now);
        assert_eq!(results[0].entry.access_count, 1);
        assert_eq!(s.get("near").unwrap().access_count, 1);
        assert_eq!(s.get("mid").unwrap().access_count, 0);
    }
}
