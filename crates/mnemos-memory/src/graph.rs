//! Knowledge graph over stored memories.
//!
//! Every [`VectorEntry`] has exactly one [`GraphNode`].  Relationship links
//! between entries become undirected [`GraphEdge`]s registered on both
//! endpoints.  Communities are the connected components with more than two
//! members; they are derived data and are recomputed from scratch by
//! [`KnowledgeGraph::detect_communities`].
//!
//! # Integrity
//!
//! An edge whose source or target node is missing is an invariant
//! violation.  [`KnowledgeGraph::remove_node`] drops incident edges eagerly,
//! and [`KnowledgeGraph::purge_dangling_edges`] sweeps anything left behind;
//! the consolidation pass always runs the sweep before community detection.
//!
//! # Example
//!
//! ```rust
//! use mnemos_memory::graph::KnowledgeGraph;
//!
//! let graph = KnowledgeGraph::new();
//! assert!(graph.find_paths("a", "b", 3).is_empty());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::entry::{MemoryKind, VectorEntry};

/// Maximum number of paths returned by [`KnowledgeGraph::find_paths`].
pub const MAX_PATHS: usize = 10;

/// Confidence assigned to relationship edges.
pub const LINK_CONFIDENCE: f32 = 0.8;

/// Components this small or smaller are not reported as communities.
const MIN_COMMUNITY_SIZE: usize = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Nodes and edges
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Event,
    Concept,
    Decision,
    Skill,
    Pattern,
}

impl From<MemoryKind> for NodeType {
    fn from(kind: MemoryKind) -> Self {
        match kind {
            MemoryKind::Experience => NodeType::Event,
            MemoryKind::Knowledge => NodeType::Concept,
            MemoryKind::Decision => NodeType::Decision,
            MemoryKind::Skill => NodeType::Skill,
            MemoryKind::Pattern => NodeType::Pattern,
        }
    }
}

/// Entry fields copied onto the node for topic and importance queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeProperties {
    pub agent_id: String,
    pub tags: BTreeSet<String>,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub properties: NodeProperties,
    pub embedding: Vec<f32>,
    /// Ids of incident edges.
    pub connections: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    RelatedTo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    pub weight: f32,
    pub confidence: f32,
    pub metadata: BTreeMap<String, String>,
}

impl GraphEdge {
    /// The endpoint opposite `node_id`, if `node_id` is an endpoint.
    pub fn other(&self, node_id: &str) -> Option<&str> {
        if self.source == node_id {
            Some(&self.target)
        } else if self.target == node_id {
            Some(&self.source)
        } else {
            None
        }
    }
}

/// A connected group of at least three nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub members: Vec<String>,
    /// Most frequent tag across members.
    pub topic: String,
    /// Internal edges divided by all edges touching a member.
    pub coherence: f32,
    /// Mean member importance.
    pub importance: f32,
}

// ─────────────────────────────────────────────────────────────────────────────
// KnowledgeGraph
// ─────────────────────────────────────────────────────────────────────────────

/// Arena of nodes and edges keyed by id.  Cloning yields an independent
/// snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    nodes: HashMap<String, GraphNode>,
    edges: HashMap<String, GraphEdge>,
    communities: Vec<Community>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh the node for `entry` and link it to every entry in
    /// `entry.relationships` that already has a node.
    ///
    /// Returns the number of new edges.
    pub fn add_entry(&mut self, entry: &VectorEntry) -> usize {
        let node = GraphNode {
            id: entry.id.clone(),
            node_type: entry.kind.into(),
            properties: NodeProperties {
                agent_id: entry.agent_id.clone(),
                tags: entry.tags.clone(),
                importance: entry.importance,
                created_at: entry.created_at,
                summary: entry.content.render(),
            },
            embedding: entry.embedding.clone(),
            connections: Vec::new(),
        };

        match self.nodes.get_mut(&entry.id) {
            Some(existing) => {
                // Overwrite keeps the edges already registered.
                let connections = std::mem::take(&mut existing.connections);
                *existing = GraphNode {
                    connections,
                    ..node
                };
            }
            None => {
                self.nodes.insert(entry.id.clone(), node);
            }
        }

        entry
            .relationships
            .iter()
            .filter(|other| self.link(&entry.id, other, None).is_some_and(|(_, new)| new))
            .count()
    }

    /// Connect `a` and `b` with a `related_to` edge.
    ///
    /// The weight defaults to the cosine similarity of the two node
    /// embeddings, or 1.0 when that is not positive.  Returns the edge id and
    /// whether it was newly created, or `None` when either node is missing
    /// or `a == b`.
    pub fn link(&mut self, a: &str, b: &str, weight: Option<f32>) -> Option<(String, bool)> {
        if a == b {
            return None;
        }
        let (node_a, node_b) = (self.nodes.get(a)?, self.nodes.get(b)?);

        if let Some(existing) = self.edge_between(a, b) {
            return Some((existing.id.clone(), false));
        }

        let weight = weight.unwrap_or_else(|| {
            let sim = cosine_similarity(&node_a.embedding, &node_b.embedding);
            if sim > 0.0 { sim } else { 1.0 }
        });
        let edge = GraphEdge {
            id: Uuid::new_v4().to_string(),
            source: a.to_string(),
            target: b.to_string(),
            kind: EdgeKind::RelatedTo,
            weight,
            confidence: LINK_CONFIDENCE,
            metadata: BTreeMap::from([("created_at".to_string(), Utc::now().to_rfc3339())]),
        };
        let edge_id = edge.id.clone();
        self.edges.insert(edge_id.clone(), edge);
        for endpoint in [a, b] {
            if let Some(node) = self.nodes.get_mut(endpoint) {
                node.connections.push(edge_id.clone());
            }
        }
        debug!(source = %a, target = %b, weight, "linked graph nodes");
        Some((edge_id, true))
    }

    /// Remove the node `id` and every edge incident to it.
    pub fn remove_node(&mut self, id: &str) -> Option<GraphNode> {
        let node = self.nodes.remove(id)?;
        for edge_id in &node.connections {
            if let Some(edge) = self.edges.remove(edge_id)
                && let Some(other) = edge.other(id)
                && let Some(other_node) = self.nodes.get_mut(other)
            {
                other_node.connections.retain(|c| c != edge_id);
            }
        }
        Some(node)
    }

    /// Drop every edge with a missing endpoint and every connection entry
    /// naming a missing edge.  Returns the number of edges removed.
    pub fn purge_dangling_edges(&mut self) -> usize {
        let dangling: Vec<String> = self
            .edges
            .values()
            .filter(|e| !self.nodes.contains_key(&e.source) || !self.nodes.contains_key(&e.target))
            .map(|e| e.id.clone())
            .collect();
        for edge_id in &dangling {
            self.edges.remove(edge_id);
        }
        if !dangling.is_empty() {
            warn!(count = dangling.len(), "purged edges referencing missing nodes");
        }

        let edges = &self.edges;
        for node in self.nodes.values_mut() {
            node.connections.retain(|c| edges.contains_key(c));
        }
        dangling.len()
    }

    /// Ids of the nodes sharing an edge with `id`.
    pub fn neighbors(&self, id: &str) -> Vec<&str> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        node.connections
            .iter()
            .filter_map(|edge_id| self.edges.get(edge_id))
            .filter_map(|edge| edge.other(id))
            .filter(|other| self.nodes.contains_key(*other))
            .collect()
    }

    /// Up to [`MAX_PATHS`] simple paths from `source` to `target` with at most
    /// `max_hops` edges, found depth-first.  Each path lists node ids from
    /// `source` to `target` inclusive.  Unknown or disconnected endpoints
    /// yield an empty list.
    pub fn find_paths(&self, source: &str, target: &str, max_hops: usize) -> Vec<Vec<String>> {
        if !self.nodes.contains_key(source) || !self.nodes.contains_key(target) {
            return Vec::new();
        }
        let mut paths = Vec::new();
        let mut path = vec![source.to_string()];
        let mut visited = HashSet::from([source.to_string()]);
        self.walk(target, max_hops, &mut path, &mut visited, &mut paths);
        paths
    }

    fn walk(
        &self,
        target: &str,
        hops_left: usize,
        path: &mut Vec<String>,
        visited: &mut HashSet<String>,
        paths: &mut Vec<Vec<String>>,
    ) {
        if paths.len() >= MAX_PATHS {
            return;
        }
        let Some(current) = path.last().cloned() else {
            return;
        };
        if current == target {
            paths.push(path.clone());
            return;
        }
        if hops_left == 0 {
            return;
        }
        for next in self.neighbors(&current) {
            if visited.contains(next) {
                continue;
            }
            visited.insert(next.to_string());
            path.push(next.to_string());
            self.walk(target, hops_left - 1, path, visited, paths);
            path.pop();
            visited.remove(next);
            if paths.len() >= MAX_PATHS {
                return;
            }
        }
    }

    /// Recompute communities from the connected components of the graph.
    pub fn detect_communities(&mut self) -> &[Community] {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut components: Vec<Vec<String>> = Vec::new();

        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();

        for start in ids {
            if !seen.insert(start) {
                continue;
            }
            let mut component = vec![start.to_string()];
            let mut stack = vec![start];
            while let Some(id) = stack.pop() {
                for next in self.neighbors(id) {
                    if seen.insert(next) {
                        component.push(next.to_string());
                        stack.push(next);
                    }
                }
            }
            if component.len() >= MIN_COMMUNITY_SIZE {
                component.sort();
                components.push(component);
            }
        }

        let communities = components
            .into_iter()
            .enumerate()
            .map(|(i, members)| self.describe_community(i, members))
            .collect();
        self.communities = communities;
        &self.communities
    }

    fn describe_community(&self, index: usize, members: Vec<String>) -> Community {
        let member_set: HashSet<&str> = members.iter().map(String::as_str).collect();

        let mut tag_counts: BTreeMap<&str, usize> = BTreeMap::new();
        let mut importance_sum = 0.0f32;
        for node in members.iter().filter_map(|m| self.nodes.get(m)) {
            importance_sum += node.properties.importance;
            for tag in &node.properties.tags {
                *tag_counts.entry(tag).or_default() += 1;
            }
        }
        // BTreeMap iteration is sorted, so ties resolve to the smallest tag.
        let topic = tag_counts
            .iter()
            .fold(None::<(&str, usize)>, |best, (tag, count)| match best {
                Some((_, best_count)) if best_count >= *count => best,
                _ => Some((*tag, *count)),
            })
            .map(|(tag, _)| tag.to_string())
            .unwrap_or_else(|| "general".to_string());

        let (mut internal, mut total) = (0usize, 0usize);
        for edge in self.edges.values() {
            let touches_source = member_set.contains(edge.source.as_str());
            let touches_target = member_set.contains(edge.target.as_str());
            if touches_source || touches_target {
                total += 1;
                if touches_source && touches_target {
                    internal += 1;
                }
            }
        }

        Community {
            id: format!("community-{index}"),
            topic,
            coherence: if total == 0 { 0.0 } else { internal as f32 / total as f32 },
            importance: importance_sum / members.len() as f32,
            members,
        }
    }

    // ── accessors ───────────────────────────────────────────────────────────

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    /// The edge joining `a` and `b`, in either direction.
    pub fn edge_between(&self, a: &str, b: &str) -> Option<&GraphEdge> {
        self.nodes
            .get(a)?
            .connections
            .iter()
            .filter_map(|edge_id| self.edges.get(edge_id))
            .find(|e| e.other(a) == Some(b))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges.values()
    }

    pub fn communities(&self) -> &[Community] {
        &self.communities
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// `true` when every edge's endpoints exist as nodes.
    pub fn is_consistent(&self) -> bool {
        self.edges
            .values()
            .all(|e| self.nodes.contains_key(&e.source) && self.nodes.contains_key(&e.target))
    }

    /// Drop nodes without touching their edges.  Only used to exercise the
    /// dangling-edge sweep.
    #[cfg(test)]
    pub(crate) fn forget_node(&mut self, id: &str) {
        self.nodes.remove(id);
    }
}
