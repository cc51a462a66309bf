use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a memory as reported by the calling agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Task,
    Decision,
    Insight,
    Error,
    Feedback,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Task => "task",
            EntryType::Decision => "decision",
            EntryType::Insight => "insight",
            EntryType::Error => "error",
            EntryType::Feedback => "feedback",
        }
    }
}

impl std::str::FromStr for EntryType {
    type Err = MnemosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "task" => Ok(EntryType::Task),
            "decision" => Ok(EntryType::Decision),
            "insight" => Ok(EntryType::Insight),
            "error" => Ok(EntryType::Error),
            "feedback" => Ok(EntryType::Feedback),
            other => Err(MnemosError::Validation(format!("unknown entry type: {other}"))),
        }
    }
}

/// Payload of a memory, one variant per shape the agents produce.
///
/// `Transferred` and `Pattern` are created by the engine itself; `Raw` keeps
/// anything that did not match a known shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MemoryContent {
    Text(String),
    Task {
        title: String,
        #[serde(default)]
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outcome: Option<String>,
    },
    Decision {
        decision: String,
        #[serde(default)]
        rationale: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        alternatives: Vec<String>,
    },
    Insight {
        summary: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        evidence: Vec<String>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resolution: Option<String>,
    },
    Feedback {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rating: Option<f32>,
    },
    /// A copy received from another agent, with the original kept intact.
    Transferred {
        source_agent: String,
        source_entry: String,
        original: Box<MemoryContent>,
    },
    /// A synthesized summary over several entries.
    Pattern {
        name: String,
        description: String,
        member_count: usize,
    },
    Raw(serde_json::Value),
}

impl MemoryContent {
    /// Render the payload as plain text for embedding and display.
    pub fn render(&self) -> String {
        match self {
            MemoryContent::Text(text) => text.clone(),
            MemoryContent::Task {
                title,
                description,
                outcome,
            } => join_parts([Some(title.as_str()), Some(description.as_str()), outcome.as_deref()]),
            MemoryContent::Decision {
                decision,
                rationale,
                alternatives,
            } => {
                let mut text = join_parts([Some(decision.as_str()), Some(rationale.as_str())]);
                if !alternatives.is_empty() {
                    text.push_str(" alternatives: ");
                    text.push_str(&alternatives.join(", "));
                }
                text
            }
            MemoryContent::Insight { summary, evidence } => {
                let mut text = summary.clone();
                for e in evidence {
                    text.push(' ');
                    text.push_str(e);
                }
                text
            }
            MemoryContent::Error {
                message,
                cause,
                resolution,
            } => join_parts([Some(message.as_str()), cause.as_deref(), resolution.as_deref()]),
            MemoryContent::Feedback { text, .. } => text.clone(),
            MemoryContent::Transferred {
                source_agent,
                original,
                ..
            } => format!("[shared by {source_agent}] {}", original.render()),
            MemoryContent::Pattern {
                name, description, ..
            } => format!("{name}: {description}"),
            MemoryContent::Raw(value) => match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }
}

impl From<&str> for MemoryContent {
    fn from(text: &str) -> Self {
        MemoryContent::Text(text.to_string())
    }
}

impl From<String> for MemoryContent {
    fn from(text: String) -> Self {
        MemoryContent::Text(text)
    }
}

fn join_parts<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> String {
    parts
        .into_iter()
        .flatten()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A memory as submitted by a worker agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub content: MemoryContent,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Caller's estimate of how relevant this memory is, in `[0.0, 1.0]`.
    pub relevance_score: f32,
    pub created_at: DateTime<Utc>,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl MemoryEntry {
    /// Build an entry stamped with the current UTC time.
    pub fn new(
        id: impl Into<String>,
        entry_type: EntryType,
        content: impl Into<MemoryContent>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            entry_type,
            content: content.into(),
            tags: Vec::new(),
            relevance_score: 0.5,
            created_at: Utc::now(),
            agent_id: agent_id.into(),
            project_id: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_relevance(mut self, relevance: f32) -> Self {
        self.relevance_score = relevance;
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// Error type shared by every Mnemos crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MnemosError {
    #[error("Validation Error: {0}")]
    Validation(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Snapshot Error: {0}")]
    Snapshot(String),
}
