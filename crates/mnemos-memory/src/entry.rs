//! The stored memory unit.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use mnemos_types::{EntryType, MemoryContent, MnemosError};
use serde::{Deserialize, Serialize};

/// Agent id used for entries synthesized by the engine itself.
pub const SYSTEM_AGENT: &str = "system";

/// Kind of a stored memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Experience,
    Knowledge,
    Decision,
    Skill,
    Pattern,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Experience => "experience",
            MemoryKind::Knowledge => "knowledge",
            MemoryKind::Decision => "decision",
            MemoryKind::Skill => "skill",
            MemoryKind::Pattern => "pattern",
        }
    }

}

impl FromStr for MemoryKind {
    type Err = MnemosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "experience" => Ok(MemoryKind::Experience),
            "knowledge" => Ok(MemoryKind::Knowledge),
            "decision" => Ok(MemoryKind::Decision),
            "skill" => Ok(MemoryKind::Skill),
            "pattern" => Ok(MemoryKind::Pattern),
            other => Err(MnemosError::Validation(format!("unknown memory kind '{other}'"))),
        }
    }
}

impl From<EntryType> for MemoryKind {
    fn from(t: EntryType) -> Self {
        match t {
            EntryType::Task | EntryType::Error => MemoryKind::Experience,
            EntryType::Insight | EntryType::Feedback => MemoryKind::Knowledge,
            EntryType::Decision => MemoryKind::Decision,
        }
    }
}

/// A memory held by the vector store.
///
/// Cross-references (`relationships`) are plain ids resolved through the
/// owning store; they may name entries that have since been evicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorEntry {
    pub id: String,
    pub content: MemoryContent,
    pub embedding: Vec<f32>,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub tags: BTreeSet<String>,
    /// In `[0.0, 1.0]`.
    pub importance: f32,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub relationships: Vec<String>,
    #[serde(default)]
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    /// In `[0.0, 1.0]`; refreshed by search and consolidation.
    pub relevance_score: f32,
}

impl VectorEntry {
    /// Text the embedding is computed from: rendered content, tags, context.
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.content, &self.tags, &self.context)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Append `id` to `relationships` unless already present or self.
    pub fn link(&mut self, id: &str) {
        if id != self.id && !self.relationships.iter().any(|r| r == id) {
            self.relationships.push(id.to_string());
        }
    }
}

fn embedding_text(
    content: &MemoryContent,
    tags: &BTreeSet<String>,
    context: &str,
) -> String {
    let mut text = content.render();
    for tag in tags {
        text.push(' ');
        text.push_str(tag);
    }
    if !context.is_empty() {
        text.push(' ');
        text.push_str(context);
    }
    text
}
