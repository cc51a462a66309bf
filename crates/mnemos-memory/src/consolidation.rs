//! Consolidation pass building blocks.
//!
//! [`MemoryEngine::consolidate_memories`][crate::engine::MemoryEngine::consolidate_memories]
//! drives the pass; this module holds the pieces it is made of:
//!
//! * [`ConsolidationGate`] – the `Idle → Running → Idle` re-entrancy guard.
//!   [`ConsolidationGate::try_begin`] hands out a [`RunGuard`] whose `Drop`
//!   returns the gate to `Idle`, so every exit path (including a panic)
//!   releases it.
//! * [`identify_patterns`] – tag co-occurrence inside each cluster.
//! * [`is_obsolete`] – the eviction predicate.
//! * [`generate_insights`] – free-text summary lines.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clustering::MemoryCluster;
use crate::config::MemoryConfig;
use crate::entry::VectorEntry;
use crate::search::recency_decay;
use crate::store::VectorStore;

// ─────────────────────────────────────────────────────────────────────────────
// Gate
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Shared flag marking a consolidation run in progress.
///
/// Clones observe the same flag, so an external driver can hold a clone and
/// see whether the engine is busy.
#[derive(Debug, Clone, Default)]
pub struct ConsolidationGate {
    running: Arc<AtomicBool>,
}

impl ConsolidationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `Running`, or return `None` when a run is already in progress.
    pub fn try_begin(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                running: Arc::clone(&self.running),
            })
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::Acquire) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }
}

/// Held for the duration of one run; dropping it returns the gate to `Idle`.
#[derive(Debug)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Report
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationStatus {
    Completed,
    /// A run was already in progress; the report is the most recent one.
    AlreadyRunning,
}

/// Outcome of one consolidation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub status: ConsolidationStatus,
    pub clusters_formed: usize,
    pub patterns_identified: Vec<String>,
    pub obsolete_entries_removed: usize,
    pub dangling_edges_purged: usize,
    pub communities_detected: usize,
    pub knowledge_graph_updated: bool,
    pub insights: Vec<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ConsolidationReport {
    /// Report returned when a run is refused and none has finished yet.
    pub fn empty(status: ConsolidationStatus) -> Self {
        Self {
            status,
            clusters_formed: 0,
            patterns_identified: Vec::new(),
            obsolete_entries_removed: 0,
            dangling_edges_purged: 0,
            communities_detected: 0,
            knowledge_graph_updated: false,
            insights: Vec::new(),
            finished_at: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pass steps
// ─────────────────────────────────────────────────────────────────────────────

/// Tags carried by at least `cfg.pattern_tag_frequency` of `members`, with
/// their member share, most frequent first.
pub fn common_tags<'a>(
    members: impl IntoIterator<Item = &'a VectorEntry>,
    cfg: &MemoryConfig,
) -> Vec<(String, f32)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut total = 0usize;
    for entry in members {
        total += 1;
        for tag in &entry.tags {
            *counts.entry(tag).or_default() += 1;
        }
    }
    if total == 0 {
        return Vec::new();
    }
    let mut common: Vec<(String, f32)> = counts
        .into_iter()
        .map(|(tag, n)| (tag.to_string(), n as f32 / total as f32))
        .filter(|(_, share)| *share >= cfg.pattern_tag_frequency)
        .collect();
    common.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    common
}

/// One description per cluster whose members share frequent tags.
pub fn identify_patterns(
    clusters: &[MemoryCluster],
    store: &VectorStore,
    cfg: &MemoryConfig,
) -> Vec<String> {
    clusters
        .iter()
        .filter_map(|cluster| {
            let members = cluster.members.iter().filter_map(|id| store.get(id));
            let common = common_tags(members, cfg);
            if common.is_empty() {
                return None;
            }
            let tags = common
                .iter()
                .map(|(tag, share)| format!("{tag} ({:.0}%)", share * 100.0))
                .collect::<Vec<_>>()
                .join(", ");
            let verb = if common.len() > 1 { "co-occur" } else { "recurs" };
            Some(format!(
                "{tags} {verb} across {} related memories",
                cluster.members.len()
            ))
        })
        .collect()
}

/// Recompute `relevance_score` as importance decayed by time since the last
/// access.
pub fn refresh_relevance(entry: &mut VectorEntry, now: DateTime<Utc>, cfg: &MemoryConfig) {
    let decay = recency_decay(entry.last_accessed, now, cfg.recency_half_life_hours);
    entry.relevance_score = (entry.importance * decay).clamp(0.0, 1.0);
}

/// `true` when the entry is old, never read, and low in decayed relevance.
/// All three must hold.
///
/// The relevance test reads the score left by [`refresh_relevance`], which
/// halves every `recency_half_life_hours` since the last access.  With the
/// default 24 h half-life even importance 1.0 falls under the 0.3 floor after
/// about two days unread, so for entries past `obsolete_after_days` the rule
/// in practice reduces to age and access count.
pub fn is_obsolete(entry: &VectorEntry, now: DateTime<Utc>, cfg: &MemoryConfig) -> bool {
    now - entry.created_at > Duration::days(cfg.obsolete_after_days)
        && entry.access_count < cfg.obsolete_min_access
        && entry.relevance_score < cfg.obsolete_relevance_floor
}

/// Most active agent, most common tag, and mean cluster size.
pub fn generate_insights(store: &VectorStore, clusters: &[MemoryCluster]) -> Vec<String> {
    let mut insights = Vec::new();

    let mut per_agent: BTreeMap<&str, usize> = BTreeMap::new();
    let mut per_tag: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in store.iter() {
        *per_agent.entry(&entry.agent_id).or_default() += 1;
        for tag in &entry.tags {
            *per_tag.entry(tag).or_default() += 1;
        }
    }

    if let Some((agent, count)) = most_frequent(&per_agent) {
        insights.push(format!("Most active agent: {agent} ({count} memories)"));
    }
    if let Some((tag, count)) = most_frequent(&per_tag) {
        insights.push(format!("Most common tag: {tag} ({count} memories)"));
    }
    if !clusters.is_empty() {
        let mean = clusters.iter().map(|c| c.members.len()).sum::<usize>() as f32
            / clusters.len() as f32;
        insights.push(format!(
            "Average cluster size: {mean:.1} memories across {} clusters",
            clusters.len()
        ));
    }
    insights
}

/// Highest count; ties go to the alphabetically first key.
fn most_frequent<'a>(counts: &BTreeMap<&'a str, usize>) -> Option<(&'a str, usize)> {
    counts
        .iter()
        .fold(None::<(&'a str, usize)>, |best, (k, v)| match best {
            Some((_, n)) if n >= *v => best,
            _ => Some((*k, *v)),
        })
}
