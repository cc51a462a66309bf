//! [`MemoryEngine`] – the semantic memory engine.
//!
//! One engine instance owns the vector store, the knowledge graph, and the
//! latest clustering.  It is constructed once by the orchestration layer and
//! handed to callers by reference; there is no global instance and no
//! internal timer.  Periodic consolidation is driven from outside by calling
//! [`MemoryEngine::consolidate_memories`].
//!
//! # Operations
//!
//! | operation | effect |
//! |---|---|
//! | [`store_memory`][MemoryEngine::store_memory] | embed, link to similar entries, add a graph node |
//! | [`search_memories`][MemoryEngine::search_memories] / [`search`][MemoryEngine::search] | ranked similarity lookup; bumps access counts of hits |
//! | [`share_knowledge`][MemoryEngine::share_knowledge] | copy filtered entries from one agent to another |
//! | [`learn_pattern`][MemoryEngine::learn_pattern] | synthesize a pattern entry over a set of entries |
//! | [`consolidate_memories`][MemoryEngine::consolidate_memories] | cluster, extract patterns, evict, repair the graph |
//! | [`export_memories`][MemoryEngine::export_memories] / [`import_memories`][MemoryEngine::import_memories] | hand entries to and from a persistence collaborator |
//!
//! # Example
//!
//! ```rust
//! use mnemos_memory::{MemoryConfig, MemoryEngine};
//! use mnemos_types::{EntryType, MemoryEntry};
//!
//! let mut engine = MemoryEngine::new(MemoryConfig::default()).unwrap();
//! let entry = MemoryEntry::new("m1", EntryType::Insight, "retry flaky uploads", "agent-a")
//!     .with_tags(["uploads"])
//!     .with_relevance(0.8);
//! engine.store_memory(entry, "agent-a").unwrap();
//!
//! let hits = engine.search_memories("flaky uploads", Some("agent-a"), 5).unwrap();
//! assert_eq!(hits[0].entry.id, "m1");
//! assert_eq!(hits[0].entry.access_count, 1);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use mnemos_types::{MemoryEntry, MnemosError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clustering::{self, MemoryCluster};
use crate::config::MemoryConfig;
use crate::consolidation::{
    self, ConsolidationGate, ConsolidationReport, ConsolidationStatus, RunGuard, SchedulerState,
};
use crate::embedding::{Embedder, HashingEmbedder, magnitude};
use crate::entry::{MemoryKind, VectorEntry};
use crate::graph::{Community, KnowledgeGraph};
use crate::search::{self, QueryInput, SearchFilters, SearchQuery, SearchResult};
use crate::store::VectorStore;
use crate::transfer;

/// Default hop limit for [`MemoryEngine::find_knowledge_paths`].
pub const DEFAULT_MAX_HOPS: usize = 3;

/// Counts reported by [`MemoryEngine::get_memory_stats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_entries: usize,
    pub entries_by_agent: BTreeMap<String, usize>,
    pub entries_by_type: BTreeMap<MemoryKind, usize>,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub clusters: usize,
    pub communities: usize,
    pub average_importance: f32,
    pub last_consolidation: Option<DateTime<Utc>>,
    pub scheduler_state: SchedulerState,
}

/// A pass that holds the consolidation gate and a copy of the store.
///
/// Clustering the copy needs no access to the engine, so a driver can run
/// [`cluster`][Self::cluster] without holding the engine's lock.  Dropping
/// the pass at any point releases the gate.
pub struct PendingConsolidation {
    guard: RunGuard,
    entries: Vec<VectorEntry>,
    config: MemoryConfig,
}

impl PendingConsolidation {
    /// Number of captured entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Step 1: cluster the captured entries.
    #[tracing::instrument(name = "memory.cluster", skip_all, fields(entries = self.entries.len()))]
    pub fn cluster(self) -> ClusteredConsolidation {
        let refs: Vec<&VectorEntry> = self.entries.iter().collect();
        let clusters = clustering::cluster(&refs, &self.config);
        ClusteredConsolidation {
            guard: self.guard,
            clusters,
        }
    }
}

/// Output of [`PendingConsolidation::cluster`], ready for
/// [`MemoryEngine::finish_consolidation`].
pub struct ClusteredConsolidation {
    guard: RunGuard,
    clusters: Vec<MemoryCluster>,
}

pub struct MemoryEngine {
    config: MemoryConfig,
    embedder: Box<dyn Embedder>,
    store: VectorStore,
    graph: KnowledgeGraph,
    clusters: Vec<MemoryCluster>,
    gate: ConsolidationGate,
    last_report: Option<ConsolidationReport>,
    /// Cleared once the store crosses `max_memory_size`; set again when it
    /// drops back under.
    capacity_trigger_armed: bool,
}

impl MemoryEngine {
    /// Build an engine using the built-in [`HashingEmbedder`].
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::Validation`] if `config` is invalid.
    pub fn new(config: MemoryConfig) -> Result<Self, MnemosError> {
        let embedder = Box::new(HashingEmbedder::new(config.dimension));
        Self::with_embedder(config, embedder)
    }

    /// Build an engine around a custom embedder.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::Validation`] if `config` is invalid and
    /// [`MnemosError::DimensionMismatch`] if the embedder's dimension differs
    /// from `config.dimension`.
    pub fn with_embedder(
        config: MemoryConfig,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self, MnemosError> {
        config.validate()?;
        if embedder.dimension() != config.dimension {
            return Err(MnemosError::DimensionMismatch {
                expected: config.dimension,
                actual: embedder.dimension(),
            });
        }
        Ok(Self {
            config,
            embedder,
            store: VectorStore::new(),
            graph: KnowledgeGraph::new(),
            clusters: Vec::new(),
            gate: ConsolidationGate::new(),
            last_report: None,
            capacity_trigger_armed: true,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Store
    // ─────────────────────────────────────────────────────────────────────────

    /// Embed and store `entry` on behalf of `agent_id`, returning its id.
    ///
    /// Storing an id that already exists overwrites it.  The new entry is
    /// linked to up to `max_links` stored entries whose similarity reaches
    /// `link_threshold`.  A finite relevance outside `[0, 1]` is clamped.
    ///
    /// When `auto_consolidate` is on and this insert takes the store past
    /// `max_memory_size`, one consolidation pass runs before returning.
    /// Further inserts while the store stays over the cap do not trigger
    /// again; the trigger re-arms once the store is back under it.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::Validation`] when the id or owning agent is
    /// empty, or the relevance is not a finite number.
    #[tracing::instrument(name = "memory.store", skip_all, fields(entry_id = %entry.id))]
    pub fn store_memory(&mut self, entry: MemoryEntry, agent_id: &str) -> Result<String, MnemosError> {
        if entry.id.trim().is_empty() {
            return Err(MnemosError::Validation("memory id must not be empty".into()));
        }
        let owner = if agent_id.trim().is_empty() {
            entry.agent_id.as_str()
        } else {
            agent_id
        };
        if owner.trim().is_empty() {
            return Err(MnemosError::Validation(format!(
                "memory {} has no owning agent",
                entry.id
            )));
        }
        if !entry.relevance_score.is_finite() {
            return Err(MnemosError::Validation(format!(
                "memory {} has non-finite relevance {}",
                entry.id, entry.relevance_score
            )));
        }

        let tags: BTreeSet<String> = entry
            .tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let context = entry.project_id.clone().unwrap_or_default();
        let importance = entry.relevance_score.clamp(0.0, 1.0);

        let mut vector_entry = VectorEntry {
            id: entry.id,
            content: entry.content,
            embedding: Vec::new(),
            agent_id: owner.to_string(),
            project_id: entry.project_id,
            created_at: entry.created_at,
            kind: entry.entry_type.into(),
            tags,
            importance,
            context,
            relationships: Vec::new(),
            access_count: 0,
            last_accessed: entry.created_at,
            relevance_score: importance,
        };
        vector_entry.embedding = self.embedder.embed(&vector_entry.embedding_text());

        if let Some(previous) = self.store.get(&vector_entry.id) {
            vector_entry.relationships = previous.relationships.clone();
            vector_entry.access_count = previous.access_count;
            vector_entry.last_accessed = previous.last_accessed;
        }

        let related = search::rank(
            &self.store,
            &vector_entry.embedding,
            &SearchFilters::default(),
            self.config.max_links + 1,
            self.config.link_threshold,
            Utc::now(),
            &self.config,
        );
        let self_id = vector_entry.id.clone();
        for hit in related
            .iter()
            .filter(|h| h.id != self_id)
            .take(self.config.max_links)
        {
            vector_entry.link(&hit.id);
        }

        let id = self.insert(vector_entry);
        info!(entry_id = %id, agent = %owner, "stored memory");

        self.check_capacity();
        Ok(id)
    }

    /// Run one pass when the store first crosses `max_memory_size`.
    fn check_capacity(&mut self) {
        if self.store.len() <= self.config.max_memory_size {
            self.capacity_trigger_armed = true;
            return;
        }
        if !self.config.auto_consolidate || !self.capacity_trigger_armed {
            return;
        }
        self.capacity_trigger_armed = false;
        debug!(
            size = self.store.len(),
            max = self.config.max_memory_size,
            "store crossed capacity; consolidating"
        );
        self.consolidate_memories();
        if self.store.len() <= self.config.max_memory_size {
            self.capacity_trigger_armed = true;
        }
    }

    /// Store an already-embedded entry as-is, keeping its relationships.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::Validation`] for an empty id or agent or a
    /// non-finite score or embedding component, and
    /// [`MnemosError::DimensionMismatch`] for a wrong-sized embedding.
    pub fn store_vector_entry(&mut self, mut entry: VectorEntry) -> Result<String, MnemosError> {
        self.validate_entry(&entry)?;
        entry.importance = entry.importance.clamp(0.0, 1.0);
        entry.relevance_score = entry.relevance_score.clamp(0.0, 1.0);
        Ok(self.insert(entry))
    }

    fn validate_entry(&self, entry: &VectorEntry) -> Result<(), MnemosError> {
        if entry.id.trim().is_empty() {
            return Err(MnemosError::Validation("memory id must not be empty".into()));
        }
        if entry.agent_id.trim().is_empty() {
            return Err(MnemosError::Validation(format!(
                "memory {} has no owning agent",
                entry.id
            )));
        }
        if entry.embedding.len() != self.config.dimension {
            return Err(MnemosError::DimensionMismatch {
                expected: self.config.dimension,
                actual: entry.embedding.len(),
            });
        }
        if !entry.importance.is_finite() || !entry.relevance_score.is_finite() {
            return Err(MnemosError::Validation(format!(
                "memory {} has a non-finite importance or relevance",
                entry.id
            )));
        }
        if entry.embedding.iter().any(|x| !x.is_finite()) {
            return Err(MnemosError::Validation(format!(
                "memory {} has a non-finite embedding component",
                entry.id
            )));
        }
        Ok(())
    }

    /// Put `entry` into the store and graph and add back-links from every
    /// stored entry it names.
    fn insert(&mut self, entry: VectorEntry) -> String {
        let id = entry.id.clone();
        for related in &entry.relationships {
            if let Some(other) = self.store.get_mut(related) {
                other.link(&id);
            }
        }
        let new_edges = self.graph.add_entry(&entry);
        debug!(entry_id = %id, links = entry.relationships.len(), new_edges, "indexed memory");
        self.store.put(entry);
        id
    }

    /// Look up one entry.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::NotFound`] for an unknown id.
    pub fn get_entry(&self, id: &str) -> Result<&VectorEntry, MnemosError> {
        self.store
            .get(id)
            .ok_or_else(|| MnemosError::NotFound(format!("memory {id}")))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Search
    // ─────────────────────────────────────────────────────────────────────────

    /// Ranked search with the configured default threshold.
    pub fn search_memories(
        &mut self,
        query: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>, MnemosError> {
        let filters = SearchFilters {
            agent_id: agent_id.map(str::to_string),
            ..Default::default()
        };
        self.search(
            SearchQuery::text(query)
                .with_filters(filters)
                .with_limit(limit)
                .with_threshold(self.config.search_threshold),
        )
    }

    /// Ranked search with explicit filters, limit and threshold.
    ///
    /// Hits have their `access_count` and `last_accessed` updated.  No match
    /// is an empty result, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::Validation`] for a text query with nothing to
    /// embed and [`MnemosError::DimensionMismatch`] for a wrong-sized vector.
    #[tracing::instrument(name = "memory.search", skip_all, fields(limit = query.limit, threshold = query.threshold))]
    pub fn search(&mut self, query: SearchQuery) -> Result<Vec<SearchResult>, MnemosError> {
        let vector = self.resolve_query(query.input)?;
        let now = Utc::now();
        let hits = search::rank(
            &self.store,
            &vector,
            &query.filters,
            query.limit,
            query.threshold,
            now,
            &self.config,
        );
        debug!(hits = hits.len(), limit = query.limit, "search ranked");
        Ok(search::record_hits(&mut self.store, hits, now))
    }

    fn resolve_query(&self, input: QueryInput) -> Result<Vec<f32>, MnemosError> {
        match input {
            QueryInput::Text(text) => {
                let vector = self.embedder.embed(&text);
                if magnitude(&vector) == 0.0 {
                    return Err(MnemosError::Validation(format!(
                        "query {text:?} has no embeddable content"
                    )));
                }
                Ok(vector)
            }
            QueryInput::Vector(vector) if vector.len() != self.config.dimension => {
                Err(MnemosError::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: vector.len(),
                })
            }
            QueryInput::Vector(vector) => Ok(vector),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transfer
    // ─────────────────────────────────────────────────────────────────────────

    /// Copy `from`'s entries about `topic` to `to`.
    ///
    /// Only entries above the transfer similarity and importance thresholds
    /// and carrying no non-transferable tag are copied.  Returns the new
    /// entries.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::Validation`] when either agent is empty, both
    /// are the same, or the topic has nothing to embed.
    pub fn share_knowledge(
        &mut self,
        from: &str,
        to: &str,
        topic: &str,
    ) -> Result<Vec<VectorEntry>, MnemosError> {
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err(MnemosError::Validation("agent ids must not be empty".into()));
        }
        if from == to {
            return Err(MnemosError::Validation(format!(
                "cannot share knowledge from {from} to itself"
            )));
        }

        let candidates = self.search(
            SearchQuery::text(topic)
                .with_filters(SearchFilters::for_agent(from))
                .with_limit(self.config.transfer_limit)
                .with_threshold(self.config.transfer_min_similarity),
        )?;

        let now = Utc::now();
        let mut shared = Vec::new();
        for candidate in candidates {
            if !transfer::is_transferable(&candidate.entry, candidate.similarity, &self.config) {
                continue;
            }
            let copy = transfer::transferred_copy(&candidate.entry, to, &self.config, now);
            self.insert(copy.clone());
            shared.push(copy);
        }

        info!(from = %from, to = %to, topic = %topic, count = shared.len(), "shared knowledge");
        Ok(shared)
    }

    /// Synthesize and store a pattern entry over the entries `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::Validation`] for an empty id list and
    /// [`MnemosError::NotFound`] when any id is unknown.
    pub fn learn_pattern(&mut self, ids: &[String], name: &str) -> Result<VectorEntry, MnemosError> {
        let mut seen = HashSet::new();
        let members = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .map(|id| self.get_entry(id))
            .collect::<Result<Vec<_>, _>>()?;

        let pattern = transfer::synthesize_pattern(&members, name, &self.config, Utc::now())
            .ok_or_else(|| MnemosError::Validation("a pattern needs at least one member".into()))?;
        self.insert(pattern.clone());
        info!(pattern_id = %pattern.id, name = %name, members = ids.len(), "learned pattern");
        Ok(pattern)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Consolidation
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one consolidation pass.
    ///
    /// Steps, in order: cluster the store, describe intra-cluster tag
    /// patterns, evict obsolete entries, purge dangling edges and recompute
    /// communities, and derive insights.  If a pass is already running the
    /// call does nothing and returns the most recent report with status
    /// [`ConsolidationStatus::AlreadyRunning`].
    ///
    /// Callers that share the engine behind a lock can run the same pass in
    /// three steps instead: [`begin_consolidation`][Self::begin_consolidation]
    /// under the lock, [`PendingConsolidation::cluster`] without it, and
    /// [`finish_consolidation`][Self::finish_consolidation] under the lock
    /// again.
    pub fn consolidate_memories(&mut self) -> ConsolidationReport {
        match self.begin_consolidation() {
            Ok(pending) => self.finish_consolidation(pending.cluster()),
            Err(refused) => refused,
        }
    }

    /// Claim the gate and capture the entries to cluster.
    ///
    /// # Errors
    ///
    /// When a pass is already running, returns the most recent report with
    /// status [`ConsolidationStatus::AlreadyRunning`].
    pub fn begin_consolidation(&self) -> Result<PendingConsolidation, ConsolidationReport> {
        let Some(guard) = self.gate.try_begin() else {
            debug!("consolidation already running; ignoring trigger");
            let mut report = self
                .last_report
                .clone()
                .unwrap_or_else(|| ConsolidationReport::empty(ConsolidationStatus::AlreadyRunning));
            report.status = ConsolidationStatus::AlreadyRunning;
            return Err(report);
        };
        Ok(PendingConsolidation {
            guard,
            entries: self.store.iter().cloned().collect(),
            config: self.config.clone(),
        })
    }

    /// Apply a clustered pass: patterns, the obsolescence sweep, structural
    /// repair and insights.
    ///
    /// Entries stored while the pass was clustering are kept and swept like
    /// any other.  Clusters left with fewer than `min_cluster_size` members
    /// after eviction are dropped; `clusters_formed` counts the survivors.
    #[tracing::instrument(name = "memory.consolidate", skip_all, fields(clusters = pass.clusters.len()))]
    pub fn finish_consolidation(&mut self, pass: ClusteredConsolidation) -> ConsolidationReport {
        let ClusteredConsolidation { guard: _guard, clusters } = pass;
        let now = Utc::now();

        // 1. Clusters were built by the pass.
        // 2. Patterns.
        let patterns = consolidation::identify_patterns(&clusters, &self.store, &self.config);

        // 3. Obsolescence sweep.
        for entry in self.store.iter_mut() {
            consolidation::refresh_relevance(entry, now, &self.config);
        }
        let obsolete: Vec<String> = self
            .store
            .iter()
            .filter(|e| consolidation::is_obsolete(e, now, &self.config))
            .map(|e| e.id.clone())
            .collect();
        for id in &obsolete {
            self.store.delete(id);
            self.graph.remove_node(id);
        }
        let mut dangling_links = 0usize;
        if !obsolete.is_empty() {
            let store_ids: HashSet<String> = self.store.iter().map(|e| e.id.clone()).collect();
            for entry in self.store.iter_mut() {
                let before = entry.relationships.len();
                entry.relationships.retain(|r| store_ids.contains(r));
                dangling_links += before - entry.relationships.len();
            }
        }
        let min_size = self.config.min_cluster_size;
        self.clusters = clusters
            .into_iter()
            .filter_map(|mut c| {
                c.members.retain(|m| self.store.contains(m));
                (c.members.len() >= min_size).then_some(c)
            })
            .collect();

        // 4. Structural repair.
        let dangling_edges = self.graph.purge_dangling_edges();
        let communities = self.graph.detect_communities().len();
        if dangling_links > 0 {
            warn!(count = dangling_links, "dropped relationship ids naming evicted memories");
        }

        // 5. Insights.
        let insights = consolidation::generate_insights(&self.store, &self.clusters);

        let report = ConsolidationReport {
            status: ConsolidationStatus::Completed,
            clusters_formed: self.clusters.len(),
            patterns_identified: patterns,
            obsolete_entries_removed: obsolete.len(),
            dangling_edges_purged: dangling_edges,
            communities_detected: communities,
            knowledge_graph_updated: true,
            insights,
            finished_at: Some(Utc::now()),
        };
        info!(
            clusters = report.clusters_formed,
            patterns = report.patterns_identified.len(),
            evicted = report.obsolete_entries_removed,
            communities,
            "consolidation finished"
        );
        self.last_report = Some(report.clone());
        report
    }

    /// A handle on the re-entrancy gate, for drivers that want to observe or
    /// hold it.
    pub fn consolidation_gate(&self) -> ConsolidationGate {
        self.gate.clone()
    }

    pub fn last_consolidation(&self) -> Option<&ConsolidationReport> {
        self.last_report.as_ref()
    }

    pub fn clusters(&self) -> &[MemoryCluster] {
        &self.clusters
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Graph
    // ─────────────────────────────────────────────────────────────────────────

    /// Independent copy of the knowledge graph.
    pub fn get_knowledge_graph(&self) -> KnowledgeGraph {
        self.graph.clone()
    }

    /// Paths of at most `max_hops` edges between two memories.
    pub fn find_knowledge_paths(&self, source: &str, target: &str, max_hops: usize) -> Vec<Vec<String>> {
        self.graph.find_paths(source, target, max_hops)
    }

    /// Communities as of the last consolidation pass.
    pub fn communities(&self) -> &[Community] {
        self.graph.communities()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stats and persistence hooks
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get_memory_stats(&self) -> MemoryStats {
        let mut entries_by_agent = BTreeMap::new();
        let mut entries_by_type = BTreeMap::new();
        let mut importance = 0.0f32;
        for entry in self.store.iter() {
            *entries_by_agent.entry(entry.agent_id.clone()).or_insert(0) += 1;
            *entries_by_type.entry(entry.kind).or_insert(0) += 1;
            importance += entry.importance;
        }
        let total = self.store.len();
        MemoryStats {
            total_entries: total,
            entries_by_agent,
            entries_by_type,
            graph_nodes: self.graph.node_count(),
            graph_edges: self.graph.edge_count(),
            clusters: self.clusters.len(),
            communities: self.graph.communities().len(),
            average_importance: if total == 0 { 0.0 } else { importance / total as f32 },
            last_consolidation: self.last_report.as_ref().and_then(|r| r.finished_at),
            scheduler_state: self.gate.state(),
        }
    }

    /// All entries, or those of one agent, oldest first.
    pub fn export_memories(&self, agent_id: Option<&str>) -> Vec<VectorEntry> {
        let mut out: Vec<VectorEntry> = self
            .store
            .iter()
            .filter(|e| agent_id.is_none_or(|a| e.agent_id == a))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Add `entries` whose ids are not yet stored; returns how many were
    /// added.
    ///
    /// # Errors
    ///
    /// Every entry is validated first; if any is malformed nothing is
    /// imported and the first error is returned.
    pub fn import_memories(&mut self, entries: Vec<VectorEntry>) -> Result<usize, MnemosError> {
        for entry in &entries {
            self.validate_entry(entry)?;
        }
        let mut imported = 0usize;
        for entry in entries {
            if self.store.contains(&entry.id) {
                continue;
            }
            self.store_vector_entry(entry)?;
            imported += 1;
        }
        info!(imported, total = self.store.len(), "imported memories");
        Ok(imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemos_types::EntryType;

    fn engine() -> MemoryEngine {
        MemoryEngine::new(MemoryConfig::default()).unwrap()
    }

    fn memory(id: &str, text: &str, agent: &str, tags: &[&str], relevance: f32) -> MemoryEntry {
        MemoryEntry::new(id, EntryType::Insight, text, agent)
            .with_tags(tags.iter().copied())
            .with_relevance(relevance)
    }

    // ── construction ─────────────────────────────────────────────────────────

    #[test]
    fn mismatched_embedder_is_rejected() {
        let err = MemoryEngine::with_embedder(MemoryConfig::default(), Box::new(HashingEmbedder::new(8)))
            .err()
            .unwrap();
        assert!(matches!(err, MnemosError::DimensionMismatch { expected: 384, actual: 8 }));
    }

    // ── store_memory ─────────────────────────────────────────────────────────

    #[test]
    fn store_rejects_missing_ids() {
        let mut e = engine();
        let err = e.store_memory(memory("", "x", "a", &[], 0.5), "a").unwrap_err();
        assert!(matches!(err, MnemosError::Validation(_)));
        let err = e.store_memory(memory("m1", "x", "", &[], 0.5), "").unwrap_err();
        assert!(matches!(err, MnemosError::Validation(_)));
    }

    #[test]
    fn store_rejects_non_finite_relevance() {
        let mut e = engine();
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let err = e.store_memory(memory("m1", "x", "a", &[], bad), "a").unwrap_err();
            assert!(matches!(err, MnemosError::Validation(_)));
        }
        assert!(e.is_empty());
    }

    #[test]
    fn out_of_range_relevance_is_clamped() {
        let mut e = engine();
        e.store_memory(memory("hi", "x", "a", &[], 7.5), "a").unwrap();
        e.store_memory(memory("lo", "y", "a", &[], -2.0), "a").unwrap();
        assert!((e.get_entry("hi").unwrap().importance - 1.0).abs() < 1e-6);
        assert!(e.get_entry("lo").unwrap().importance.abs() < 1e-6);
    }

    #[test]
    fn store_vector_entry_rejects_non_finite_values() {
        let mut e = engine();
        e.store_memory(memory("m1", "x", "a", &[], 0.5), "a").unwrap();
        let good = e.get_entry("m1").unwrap().clone();

        let mut nan_importance = good.clone();
        nan_importance.id = "m2".into();
        nan_importance.importance = f32::NAN;
        assert!(matches!(e.store_vector_entry(nan_importance), Err(MnemosError::Validation(_))));

        let mut nan_embedding = good;
        nan_embedding.id = "m3".into();
        nan_embedding.embedding[0] = f32::NAN;
        assert!(matches!(e.import_memories(vec![nan_embedding]), Err(MnemosError::Validation(_))));
        assert_eq!(e.len(), 1);
    }

    #[test]
    fn store_uses_agent_argument_as_owner() {
        let mut e = engine();
        e.store_memory(memory("m1", "x", "someone-else", &[], 0.5), "owner").unwrap();
        assert_eq!(e.get_entry("m1").unwrap().agent_id, "owner");
    }

    #[test]
    fn store_same_id_twice_keeps_size() {
        let mut e = engine();
        e.store_memory(memory("m1", "first", "a", &[], 0.5), "a").unwrap();
        e.store_memory(memory("m1", "second", "a", &[], 0.5), "a").unwrap();
        assert_eq!(e.len(), 1);
        assert_eq!(e.get_entry("m1").unwrap().content.render(), "second");
        assert_eq!(e.get_knowledge_graph().node_count(), 1);
    }

    #[test]
    fn similar_memories_are_linked_both_ways() {
        let mut e = engine();
        e.store_memory(memory("m1", "database migration failed on startup", "a", &["db"], 0.5), "a")
            .unwrap();
        e.store_memory(memory("m2", "database migration failed on startup", "b", &["db"], 0.5), "b")
            .unwrap();
        assert_eq!(e.get_entry("m2").unwrap().relationships, vec!["m1".to_string()]);
        assert_eq!(e.get_entry("m1").unwrap().relationships, vec!["m2".to_string()]);
        assert_eq!(e.get_knowledge_graph().edge_count(), 1);
    }

    #[test]
    fn unrelated_memories_are_not_linked() {
        let mut e = engine();
        e.store_memory(memory("m1", "database migration failed", "a", &[], 0.5), "a").unwrap();
        e.store_memory(memory("m2", "marketing copy approved", "a", &[], 0.5), "a").unwrap();
        assert!(e.get_entry("m2").unwrap().relationships.is_empty());
    }

    #[test]
    fn get_entry_unknown_is_not_found() {
        assert!(matches!(engine().get_entry("nope"), Err(MnemosError::NotFound(_))));
    }

    #[test]
    fn store_vector_entry_checks_dimension() {
        let mut e = engine();
        e.store_memory(memory("m1", "x", "a", &[], 0.5), "a").unwrap();
        let mut bad = e.get_entry("m1").unwrap().clone();
        bad.id = "m2".into();
        bad.embedding = vec![1.0; 3];
        assert!(matches!(
            e.store_vector_entry(bad),
            Err(MnemosError::DimensionMismatch { expected: 384, actual: 3 })
        ));
    }

    // ── search ───────────────────────────────────────────────────────────────

    #[test]
    fn empty_store_search_is_empty() {
        let mut e = engine();
        assert!(e.search_memories("anything", None, 5).unwrap().is_empty());
    }

    #[test]
    fn unembeddable_query_is_an_error() {
        let mut e = engine();
        assert!(matches!(e.search_memories("  ?! ", None, 5), Err(MnemosError::Validation(_))));
    }

    #[test]
    fn vector_query_dimension_checked() {
        let mut e = engine();
        let err = e.search(SearchQuery::vector(vec![1.0, 0.0])).unwrap_err();
        assert!(matches!(err, MnemosError::DimensionMismatch { .. }));
    }

    #[test]
    fn search_hits_are_counted() {
        let mut e = engine();
        e.store_memory(memory("m1", "retry flaky uploads", "a", &[], 0.5), "a").unwrap();
        e.search_memories("flaky uploads", None, 5).unwrap();
        let hits = e.search_memories("flaky uploads", None, 5).unwrap();
        assert_eq!(hits[0].entry.access_count, 2);
        assert_eq!(e.get_entry("m1").unwrap().access_count, 2);
    }

    // ── share_knowledge ──────────────────────────────────────────────────────

    #[test]
    fn share_to_self_is_rejected() {
        let mut e = engine();
        assert!(matches!(e.share_knowledge("a", "a", "cats"), Err(MnemosError::Validation(_))));
    }

    #[test]
    fn shared_copy_links_back_to_source() {
        let mut e = engine();
        e.store_memory(memory("src", "cats", "agentA", &["cats"], 0.9), "agentA").unwrap();
        let shared = e.share_knowledge("agentA", "agentB", "cats").unwrap();
        assert_eq!(shared.len(), 1);
        let copy = &shared[0];
        assert_eq!(copy.relationships, vec!["src".to_string()]);
        assert!(e.get_entry("src").unwrap().relationships.contains(&copy.id));
        let graph = e.get_knowledge_graph();
        assert_eq!(graph.find_paths("src", &copy.id, 1).len(), 1);
    }

    // ── learn_pattern ────────────────────────────────────────────────────────

    #[test]
    fn learn_pattern_links_members() {
        let mut e = engine();
        e.store_memory(memory("a", "deploy api with canary", "x", &["deploy"], 0.5), "x").unwrap();
        e.store_memory(memory("b", "rollback api deploy", "y", &["deploy"], 0.7), "y").unwrap();
        let ids = vec!["a".to_string(), "b".to_string()];
        let pattern = e.learn_pattern(&ids, "deploy-habits").unwrap();

        assert_eq!(pattern.kind, MemoryKind::Pattern);
        assert_eq!(pattern.agent_id, crate::entry::SYSTEM_AGENT);
        assert!((pattern.importance - 0.72).abs() < 1e-5);
        assert!(pattern.tags.contains("deploy"));
        for id in &ids {
            assert!(e.get_entry(id).unwrap().relationships.contains(&pattern.id));
        }
    }

    #[test]
    fn learn_pattern_unknown_member_is_not_found() {
        let mut e = engine();
        let err = e.learn_pattern(&["ghost".to_string()], "p").unwrap_err();
        assert!(matches!(err, MnemosError::NotFound(_)));
        assert!(matches!(e.learn_pattern(&[], "p"), Err(MnemosError::Validation(_))));
    }

    // ── consolidation ────────────────────────────────────────────────────────

    #[test]
    fn consolidation_is_not_reentrant() {
        let mut e = engine();
        let guard = e.consolidation_gate().try_begin().unwrap();
        let report = e.consolidate_memories();
        assert_eq!(report.status, ConsolidationStatus::AlreadyRunning);
        assert_eq!(e.get_memory_stats().scheduler_state, SchedulerState::Running);
        drop(guard);
        let report = e.consolidate_memories();
        assert_eq!(report.status, ConsolidationStatus::Completed);
        assert!(report.knowledge_graph_updated);
        assert_eq!(e.get_memory_stats().scheduler_state, SchedulerState::Idle);
    }

    #[test]
    fn refused_run_returns_most_recent_report() {
        let mut e = engine();
        e.store_memory(memory("m1", "x", "a", &["t"], 0.5), "a").unwrap();
        let first = e.consolidate_memories();
        let _guard = e.consolidation_gate().try_begin().unwrap();
        let refused = e.consolidate_memories();
        assert_eq!(refused.status, ConsolidationStatus::AlreadyRunning);
        assert_eq!(refused.insights, first.insights);
        assert_eq!(refused.finished_at, first.finished_at);
    }

    #[test]
    fn crossing_capacity_consolidates_once() {
        let cfg = MemoryConfig {
            max_memory_size: 2,
            ..Default::default()
        };
        let mut e = MemoryEngine::new(cfg).unwrap();
        e.store_memory(memory("m0", "x", "a", &[], 0.5), "a").unwrap();
        e.store_memory(memory("m1", "x", "a", &[], 0.5), "a").unwrap();
        assert!(e.last_consolidation().is_none());

        e.store_memory(memory("m2", "x", "a", &[], 0.5), "a").unwrap();
        let first = e.last_consolidation().and_then(|r| r.finished_at);
        assert!(first.is_some());

        for i in 3..8 {
            e.store_memory(memory(&format!("m{i}"), "x", "a", &[], 0.5), "a").unwrap();
        }
        assert_eq!(e.len(), 8);
        assert_eq!(e.last_consolidation().and_then(|r| r.finished_at), first);
    }

    #[test]
    fn capacity_trigger_rearms_after_store_shrinks() {
        let cfg = MemoryConfig {
            max_memory_size: 2,
            ..Default::default()
        };
        let mut e = MemoryEngine::new(cfg).unwrap();
        for i in 0..3 {
            e.store_memory(memory(&format!("m{i}"), "x", "a", &[], 0.5), "a").unwrap();
        }
        let first = e.last_consolidation().and_then(|r| r.finished_at);

        // Age two entries so the next pass evicts them and the store drops
        // back under the cap.
        age(&mut e, "m0", 91, 0);
        age(&mut e, "m1", 91, 0);
        assert_eq!(e.consolidate_memories().obsolete_entries_removed, 2);
        let manual = e.last_consolidation().and_then(|r| r.finished_at);
        assert_ne!(manual, first);

        e.store_memory(memory("m3", "x", "a", &[], 0.5), "a").unwrap();
        assert_eq!(e.last_consolidation().and_then(|r| r.finished_at), manual);
        e.store_memory(memory("m4", "x", "a", &[], 0.5), "a").unwrap();
        assert_ne!(e.last_consolidation().and_then(|r| r.finished_at), manual);
    }

    #[test]
    fn store_and_search_stay_available_while_clustering() {
        let mut e = engine();
        for i in 0..4 {
            e.store_memory(memory(&format!("m{i}"), "queue backlog alert", "A", &["queue"], 0.5), "A")
                .unwrap();
        }
        let pending = e.begin_consolidation().unwrap();
        assert_eq!(pending.len(), 4);
        assert_eq!(e.get_memory_stats().scheduler_state, SchedulerState::Running);

        e.store_memory(memory("late", "queue backlog alert", "A", &["queue"], 0.5), "A")
            .unwrap();
        assert!(!e.search_memories("queue backlog", Some("A"), 10).unwrap().is_empty());
        let refused = e.consolidate_memories();
        assert_eq!(refused.status, ConsolidationStatus::AlreadyRunning);

        let report = e.finish_consolidation(pending.cluster());
        assert_eq!(report.status, ConsolidationStatus::Completed);
        assert_eq!(e.len(), 5);
        assert!(e.get_entry("late").is_ok());
        assert_eq!(e.get_memory_stats().scheduler_state, SchedulerState::Idle);
        assert!(e.get_knowledge_graph().is_consistent());
    }

    #[test]
    fn dropped_pending_pass_releases_gate() {
        let e = engine();
        let pending = e.begin_consolidation().unwrap();
        assert!(e.begin_consolidation().is_err());
        drop(pending);
        assert!(e.begin_consolidation().is_ok());
    }

    // ── stats / export ───────────────────────────────────────────────────────

    #[test]
    fn stats_count_agents_and_types() {
        let mut e = engine();
        e.store_memory(memory("m1", "x", "a", &[], 0.4), "a").unwrap();
        e.store_memory(
            MemoryEntry::new("m2", EntryType::Decision, "use postgres", "b").with_relevance(0.8),
            "b",
        )
        .unwrap();
        let stats = e.get_memory_stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.entries_by_agent["a"], 1);
        assert_eq!(stats.entries_by_type[&MemoryKind::Decision], 1);
        assert_eq!(stats.entries_by_type[&MemoryKind::Knowledge], 1);
        assert!((stats.average_importance - 0.6).abs() < 1e-6);
        assert_eq!(stats.graph_nodes, 2);
    }

    #[test]
    fn export_filters_by_agent() {
        let mut e = engine();
        e.store_memory(memory("m1", "x", "a", &[], 0.5), "a").unwrap();
        e.store_memory(memory("m2", "y", "b", &[], 0.5), "b").unwrap();
        assert_eq!(e.export_memories(None).len(), 2);
        let only_b = e.export_memories(Some("b"));
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].id, "m2");
    }

    #[test]
    fn import_skips_existing_and_rejects_malformed() {
        let mut e = engine();
        e.store_memory(memory("m1", "x", "a", &[], 0.5), "a").unwrap();
        let exported = e.export_memories(None);
        assert_eq!(e.import_memories(exported.clone()).unwrap(), 0);

        let mut bad = exported[0].clone();
        bad.id = "m9".into();
        bad.agent_id = String::new();
        assert!(e.import_memories(vec![bad]).is_err());
        assert_eq!(e.len(), 1);
    }

    // ── scenarios ────────────────────────────────────────────────────────────

    /// Re-store `id` as if it had been created `days` ago and never read.
    fn age(e: &mut MemoryEngine, id: &str, days: i64, access_count: u64) {
        let mut old = e.get_entry(id).unwrap().clone();
        old.created_at = Utc::now() - chrono::Duration::days(days);
        old.last_accessed = old.created_at;
        old.access_count = access_count;
        e.store_vector_entry(old).unwrap();
    }

    #[test]
    fn pet_query_ranks_pet_memories_first() {
        let mut e = engine();
        e.store_memory(memory("cats", "cats are great pets", "A", &["pets", "cats"], 0.8), "A")
            .unwrap();
        e.store_memory(memory("dogs", "dogs are loyal", "A", &["pets", "dogs"], 0.8), "A")
            .unwrap();
        e.store_memory(memory("stocks", "the stock market rose today", "A", &["finance"], 0.5), "A")
            .unwrap();

        let hits = e
            .search(
                SearchQuery::text("pets")
                    .with_filters(SearchFilters::for_agent("A"))
                    .with_limit(2)
                    .with_threshold(0.1),
            )
            .unwrap();
        let mut ids: Vec<&str> = hits.iter().map(|h| h.entry.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["cats", "dogs"]);
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[test]
    fn search_respects_agent_filter_and_threshold() {
        let mut e = engine();
        e.store_memory(memory("a1", "kubernetes rollout stalled", "A", &[], 0.5), "A").unwrap();
        e.store_memory(memory("b1", "kubernetes rollout stalled", "B", &[], 0.5), "B").unwrap();

        let hits = e.search_memories("kubernetes rollout", Some("B"), 10).unwrap();
        assert!(hits.iter().all(|h| h.entry.agent_id == "B"));
        assert_eq!(hits.len(), 1);

        let none = e
            .search(SearchQuery::text("kubernetes rollout").with_threshold(1.01))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn hundred_fifty_memories_form_few_clusters() {
        let mut e = engine();
        for i in 0..150 {
            let text = format!("deployment note {i} for the payments service");
            e.store_memory(memory(&format!("m{i}"), &text, "ops", &["deploy"], 0.6), "ops")
                .unwrap();
        }
        let report = e.consolidate_memories();
        assert_eq!(report.status, ConsolidationStatus::Completed);
        assert!(report.clusters_formed > 0);
        assert!(report.clusters_formed <= 30);
        assert_eq!(report.obsolete_entries_removed, 0);
        assert!(e.get_knowledge_graph().is_consistent());
    }

    #[test]
    fn stale_unread_memory_is_evicted_but_read_one_survives() {
        let mut e = engine();
        e.store_memory(memory("stale", "legacy ftp credentials rotated", "A", &[], 0.9), "A")
            .unwrap();
        e.store_memory(memory("used", "legacy ftp credentials rotated", "B", &[], 0.9), "B")
            .unwrap();
        age(&mut e, "stale", 91, 0);
        age(&mut e, "used", 91, 5);

        let report = e.consolidate_memories();
        assert_eq!(report.obsolete_entries_removed, 1);
        assert!(matches!(e.get_entry("stale"), Err(MnemosError::NotFound(_))));
        assert!(e.get_entry("used").is_ok());

        let graph = e.get_knowledge_graph();
        assert!(graph.node("stale").is_none());
        assert!(graph.is_consistent());
        assert!(!e.get_entry("used").unwrap().relationships.contains(&"stale".to_string()));
    }

    #[test]
    fn evicted_member_leaves_its_community() {
        let mut e = engine();
        for id in ["a", "b", "c", "d"] {
            e.store_memory(memory(id, "legacy ftp credentials rotated", "A", &["ftp"], 0.9), "A")
                .unwrap();
        }
        e.consolidate_memories();
        assert_eq!(e.communities().len(), 1);
        assert_eq!(e.communities()[0].members.len(), 4);

        age(&mut e, "d", 91, 0);
        let report = e.consolidate_memories();
        assert_eq!(report.obsolete_entries_removed, 1);
        assert_eq!(report.communities_detected, 1);

        let community = &e.communities()[0];
        assert_eq!(community.members.len(), 3);
        assert!(!community.members.contains(&"d".to_string()));
        let graph = e.get_knowledge_graph();
        assert!(graph.node("d").is_none());
        assert!(graph.is_consistent());
        assert!(e.find_knowledge_paths("a", "d", DEFAULT_MAX_HOPS).is_empty());
    }

    #[test]
    fn cluster_shrunk_by_eviction_is_dropped() {
        let mut e = engine();
        for id in ["a", "b", "c"] {
            e.store_memory(memory(id, "legacy ftp credentials rotated", "A", &["ftp"], 0.9), "A")
                .unwrap();
        }
        age(&mut e, "c", 91, 0);
        let report = e.consolidate_memories();
        assert_eq!(report.obsolete_entries_removed, 1);
        assert_eq!(report.clusters_formed, 0);
        assert!(e.clusters().is_empty());
        assert_eq!(report.communities_detected, 0);
    }

    #[test]
    fn recent_memory_is_never_evicted() {
        let mut e = engine();
        e.store_memory(memory("fresh", "something", "A", &[], 0.0), "A").unwrap();
        age(&mut e, "fresh", 89, 0);
        assert_eq!(e.consolidate_memories().obsolete_entries_removed, 0);
    }

    #[test]
    fn private_memories_are_not_shared() {
        let mut e = engine();
        e.store_memory(memory("public", "cats", "agentA", &["cats"], 0.9), "agentA").unwrap();
        e.store_memory(memory("secret", "cats", "agentA", &["cats", "private"], 0.9), "agentA")
            .unwrap();

        let shared = e.share_knowledge("agentA", "agentB", "cats").unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].relationships, vec!["public".to_string()]);
        assert_eq!(shared[0].agent_id, "agentB");
        assert!((shared[0].importance - 0.72).abs() < 1e-5);
        assert_eq!(e.export_memories(Some("agentB")).len(), 1);
    }

    #[test]
    fn disconnected_memories_have_no_path() {
        let mut e = engine();
        e.store_memory(memory("x", "volcanic soil chemistry", "A", &[], 0.5), "A").unwrap();
        e.store_memory(memory("y", "invoice reconciliation backlog", "A", &[], 0.5), "A").unwrap();
        assert!(e.find_knowledge_paths("x", "y", DEFAULT_MAX_HOPS).is_empty());
        assert_eq!(e.find_knowledge_paths("x", "x", DEFAULT_MAX_HOPS), vec![vec!["x".to_string()]]);
    }

    #[test]
    fn consolidating_a_stable_store_twice_changes_nothing() {
        let mut e = engine();
        for i in 0..5 {
            e.store_memory(memory(&format!("m{i}"), "queue backlog alert", "A", &["queue"], 0.5), "A")
                .unwrap();
        }
        let first = e.consolidate_memories();
        let before = e.export_memories(None);
        let second = e.consolidate_memories();
        let after = e.export_memories(None);

        assert_eq!(second.obsolete_entries_removed, 0);
        assert_eq!(second.dangling_edges_purged, 0);
        assert_eq!(first.communities_detected, second.communities_detected);
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(b.id, a.id);
            assert_eq!(b.relationships, a.relationships);
        }
    }

    #[test]
    fn export_import_roundtrip_restores_graph() {
        let mut e = engine();
        e.store_memory(memory("m1", "database migration failed", "a", &["db"], 0.5), "a").unwrap();
        e.store_memory(memory("m2", "database migration failed", "b", &["db"], 0.5), "b").unwrap();
        e.store_memory(memory("m3", "team offsite agenda", "a", &[], 0.5), "a").unwrap();

        let exported = e.export_memories(None);
        let mut restored = engine();
        assert_eq!(restored.import_memories(exported.clone()).unwrap(), 3);
        assert_eq!(restored.export_memories(None), exported);

        let original = e.get_knowledge_graph();
        let graph = restored.get_knowledge_graph();
        assert_eq!(graph.node_count(), original.node_count());
        assert_eq!(graph.edge_count(), original.edge_count());
        assert_eq!(restored.find_knowledge_paths("m1", "m2", 1).len(), 1);
    }
}
