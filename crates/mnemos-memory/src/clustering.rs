//! Thematic clustering of stored memories.
//!
//! A k-means variant on cosine similarity:
//!
//! 1. `k = min(ceil(n / entries_per_cluster), max_clusters)`.
//! 2. Seed `k` centroids with embeddings sampled at random.
//! 3. For `cluster_rounds` rounds, assign each entry to its most similar
//!    centroid and move each centroid to the plain mean of its members.
//! 4. Re-scan every entry against the final centroids, keeping it only if
//!    its similarity reaches `cluster_membership_threshold`; clusters with
//!    fewer than `min_cluster_size` members are dropped.
//!
//! Seeding is random, so membership differs between runs; only structural
//! properties are stable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::embedding::{cosine_similarity, mean_vector};
use crate::entry::VectorEntry;

/// Number of tags reported as a cluster's theme.
const THEME_TAGS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCluster {
    pub id: String,
    /// Mean of the member embeddings; not unit length.
    pub centroid: Vec<f32>,
    pub members: Vec<String>,
    /// Up to three most frequent member tags.
    pub theme: Vec<String>,
    /// Mean member-to-centroid similarity.
    pub coherence_score: f32,
    pub last_updated: DateTime<Utc>,
}

/// Number of centroids used for `n` entries.
pub fn cluster_count(n: usize, cfg: &MemoryConfig) -> usize {
    n.div_ceil(cfg.entries_per_cluster).min(cfg.max_clusters)
}

/// Cluster `entries` with the thread-local RNG.
pub fn cluster(entries: &[&VectorEntry], cfg: &MemoryConfig) -> Vec<MemoryCluster> {
    cluster_with_rng(entries, cfg, &mut rand::thread_rng())
}

/// Cluster `entries`, drawing the initial centroids from `rng`.
pub fn cluster_with_rng<R: Rng + ?Sized>(
    entries: &[&VectorEntry],
    cfg: &MemoryConfig,
    rng: &mut R,
) -> Vec<MemoryCluster> {
    let n = entries.len();
    let k = cluster_count(n, cfg);
    if n == 0 || n < k {
        return Vec::new();
    }

    let mut centroids: Vec<Vec<f32>> = index::sample(rng, n, k)
        .into_iter()
        .map(|i| entries[i].embedding.clone())
        .collect();

    for _ in 0..cfg.cluster_rounds {
        let assignments: Vec<usize> = entries
            .iter()
            .map(|e| nearest(&e.embedding, &centroids).0)
            .collect();
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members = entries
                .iter()
                .zip(&assignments)
                .filter(|(_, a)| **a == c)
                .map(|(e, _)| e.embedding.as_slice());
            // An empty cluster keeps its previous centroid.
            if let Some(mean) = mean_vector(members) {
                *centroid = mean;
            }
        }
    }

    let now = Utc::now();
    let mut members: Vec<Vec<(&VectorEntry, f32)>> = vec![Vec::new(); k];
    for entry in entries {
        let (c, similarity) = nearest(&entry.embedding, &centroids);
        if similarity >= cfg.cluster_membership_threshold {
            members[c].push((*entry, similarity));
        }
    }

    centroids
        .into_iter()
        .zip(members)
        .filter(|(_, m)| m.len() >= cfg.min_cluster_size)
        .map(|(centroid, m)| MemoryCluster {
            id: Uuid::new_v4().to_string(),
            theme: top_tags(m.iter().map(|(e, _)| *e), THEME_TAGS),
            coherence_score: m.iter().map(|(_, s)| s).sum::<f32>() / m.len() as f32,
            members: m.iter().map(|(e, _)| e.id.clone()).collect(),
            centroid,
            last_updated: now,
        })
        .collect()
}

/// Index and similarity of the centroid closest to `v`.
fn nearest(v: &[f32], centroids: &[Vec<f32>]) -> (usize, f32) {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(v, c)))
        .fold((0, f32::NEG_INFINITY), |best, cur| {
            if cur.1 > best.1 { cur } else { best }
        })
}

/// The `limit` most frequent tags, ties broken alphabetically.
pub(crate) fn top_tags<'a>(
    entries: impl IntoIterator<Item = &'a VectorEntry>,
    limit: usize,
) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in entries {
        for tag in &entry.tags {
            *counts.entry(tag).or_default() += 1;
        }
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(tag, _)| tag.to_string())
        .collect()
}
