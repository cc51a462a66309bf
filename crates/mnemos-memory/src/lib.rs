//! `mnemos-memory` – The shared semantic memory.
//!
//! Gives a fleet of agents one place to store what they learn, recall it by
//! meaning, and pass it on to each other.  Everything lives in process; the
//! [`snapshot`] module is the optional SQLite persistence collaborator.
//!
//! # Modules
//!
//! - [`engine`] – [`MemoryEngine`]: the facade owning the store, the graph
//!   and the latest clustering.
//! - [`embedding`] – [`Embedder`] trait and the [`HashingEmbedder`] that
//!   turns text into fixed-dimension unit vectors.
//! - [`entry`] / [`store`] – [`VectorEntry`] and the id-keyed
//!   [`VectorStore`].
//! - [`search`] – filters, ranking and access bookkeeping.
//! - [`graph`] – [`KnowledgeGraph`]: nodes mirror entries, edges mirror
//!   relationships; path finding and community detection.
//! - [`clustering`] – k-means over cosine similarity.
//! - [`consolidation`] – the re-entrancy gate and the individual pass steps.
//! - [`transfer`] – cross-agent sharing and pattern synthesis.
//! - [`snapshot`] – [`SnapshotStore`]: SQLite export target.
//! - [`config`] – [`MemoryConfig`], every tunable threshold.

pub mod clustering;
pub mod config;
pub mod consolidation;
pub mod embedding;
pub mod engine;
pub mod entry;
pub mod graph;
pub mod search;
pub mod snapshot;
pub mod store;
pub mod transfer;

pub use config::MemoryConfig;
pub use consolidation::{ConsolidationReport, ConsolidationStatus, SchedulerState};
pub use embedding::{Embedder, HashingEmbedder};
pub use engine::{ClusteredConsolidation, MemoryEngine, MemoryStats, PendingConsolidation};
pub use entry::{MemoryKind, VectorEntry};
pub use graph::KnowledgeGraph;
pub use search::{SearchFilters, SearchQuery, SearchResult};
pub use snapshot::{SnapshotError, SnapshotStore};
pub use store::VectorStore;
