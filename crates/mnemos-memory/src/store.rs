//! In-memory vector store: an arena of [`VectorEntry`] keyed by id.
//!
//! The store never enforces its soft capacity; the consolidation pass is
//! what brings it back under `max_memory_size`.

use std::collections::HashMap;

use crate::entry::VectorEntry;

#[derive(Debug, Default, Clone)]
pub struct VectorStore {
    entries: HashMap<String, VectorEntry>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry`, replacing any entry with the same id.
    ///
    /// Returns the replaced entry, if any.
    pub fn put(&mut self, entry: VectorEntry) -> Option<VectorEntry> {
        self.entries.insert(entry.id.clone(), entry)
    }

    pub fn get(&self, id: &str) -> Option<&VectorEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut VectorEntry> {
        self.entries.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn delete(&mut self, id: &str) -> Option<VectorEntry> {
        self.entries.remove(id)
    }

    /// All entries, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &VectorEntry> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VectorEntry> {
        self.entries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
