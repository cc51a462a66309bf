//! Knowledge transfer between agents and pattern synthesis.
//!
//! These are the pure halves of
//! [`MemoryEngine::share_knowledge`][crate::engine::MemoryEngine::share_knowledge]
//! and [`MemoryEngine::learn_pattern`][crate::engine::MemoryEngine::learn_pattern]:
//! deciding what may move and building the new entries.  Persisting them and
//! wiring the back-links is the engine's job.

use chrono::{DateTime, Utc};
use mnemos_types::MemoryContent;
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::consolidation::common_tags;
use crate::embedding::mean_vector;
use crate::entry::{MemoryKind, SYSTEM_AGENT, VectorEntry};

/// `true` when `entry`, found at `similarity` to the topic, may be copied to
/// another agent.
pub fn is_transferable(entry: &VectorEntry, similarity: f32, cfg: &MemoryConfig) -> bool {
    similarity > cfg.transfer_min_similarity
        && entry.importance > cfg.transfer_min_importance
        && !entry.tags.iter().any(|t| cfg.is_non_transferable(t))
}

/// Copy of `source` owned by `target_agent`.
///
/// The embedding is reused verbatim, importance is decayed, the content is
/// wrapped with its provenance, and the copy links back to its source.
pub fn transferred_copy(
    source: &VectorEntry,
    target_agent: &str,
    cfg: &MemoryConfig,
    now: DateTime<Utc>,
) -> VectorEntry {
    let importance = (source.importance * cfg.transfer_importance_decay).clamp(0.0, 1.0);
    VectorEntry {
        id: Uuid::new_v4().to_string(),
        content: MemoryContent::Transferred {
            source_agent: source.agent_id.clone(),
            source_entry: source.id.clone(),
            original: Box::new(source.content.clone()),
        },
        embedding: source.embedding.clone(),
        agent_id: target_agent.to_string(),
        project_id: source.project_id.clone(),
        created_at: now,
        kind: source.kind,
        tags: source.tags.clone(),
        importance,
        context: format!("shared by {} from {}", source.agent_id, source.id),
        relationships: vec![source.id.clone()],
        access_count: 0,
        last_accessed: now,
        relevance_score: importance,
    }
}

/// Synthesize a system-owned pattern entry over `members`.
///
/// Returns `None` for an empty member list.
pub fn synthesize_pattern(
    members: &[&VectorEntry],
    name: &str,
    cfg: &MemoryConfig,
    now: DateTime<Utc>,
) -> Option<VectorEntry> {
    let centroid = mean_vector(members.iter().map(|e| e.embedding.as_slice()))?;
    let tags = common_tags(members.iter().copied(), cfg)
        .into_iter()
        .map(|(tag, _)| tag)
        .collect();
    let mean_importance =
        members.iter().map(|e| e.importance).sum::<f32>() / members.len() as f32;
    let importance = (mean_importance * cfg.pattern_importance_boost).min(1.0);

    Some(VectorEntry {
        id: Uuid::new_v4().to_string(),
        content: MemoryContent::Pattern {
            name: name.to_string(),
            description: format!("pattern learned from {} memories", members.len()),
            member_count: members.len(),
        },
        embedding: centroid,
        agent_id: SYSTEM_AGENT.to_string(),
        project_id: None,
        created_at: now,
        kind: MemoryKind::Pattern,
        tags,
        importance,
        context: name.to_string(),
        relationships: members.iter().map(|e| e.id.clone()).collect(),
        access_count: 0,
        last_accessed: now,
        relevance_score: importance,
    })
}
