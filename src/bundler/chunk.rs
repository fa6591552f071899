//! Chunk generation for code splitting

use regex::Regex;

use super::{ModuleGraph, ModuleId};
use crate::rules::normalize;

/// Type of chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Module-loading runtime only
    Runtime,
    /// Modules pulled out of entries by a cache group
    Shared,
    /// Entry point chunk, executes its entry module
    Entry,
}

/// A chunk is a group of modules that will be bundled together
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk name (used for output filename)
    pub name: String,

    pub kind: ChunkKind,

    /// Module IDs included in this chunk
    pub module_ids: Vec<ModuleId>,

    /// Module executed when an entry chunk loads
    pub entry_module: Option<ModuleId>,
}

impl Chunk {
    pub fn entry(name: String, entry_module: ModuleId, module_ids: Vec<ModuleId>) -> Self {
        Self {
            name,
            kind: ChunkKind::Entry,
            module_ids,
            entry_module: Some(entry_module),
        }
    }

    pub fn shared(name: String, module_ids: Vec<ModuleId>) -> Self {
        Self {
            name,
            kind: ChunkKind::Shared,
            module_ids,
            entry_module: None,
        }
    }

    pub fn runtime(name: String) -> Self {
        Self {
            name,
            kind: ChunkKind::Runtime,
            module_ids: Vec::new(),
            entry_module: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.module_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.module_ids.len()
    }
}

/// A compiled cache group
#[derive(Debug, Clone)]
pub struct CacheGroup {
    pub name: String,
    pub test: Regex,
}

/// Split the graph into chunks, in load order: runtime, shared, entries.
///
/// Every module reachable from an entry lands in the first cache group whose
/// test matches its path, once, no matter how many entries use it. The rest
/// stay in the entry's own chunk.
pub fn split_chunks(
    graph: &ModuleGraph,
    entries: &[(String, ModuleId)],
    cache_groups: &[CacheGroup],
    runtime_chunk: Option<&str>,
) -> Vec<Chunk> {
    let mut shared: Vec<Chunk> = cache_groups
        .iter()
        .map(|group| Chunk::shared(group.name.clone(), Vec::new()))
        .collect();
    let mut entry_chunks = Vec::new();

    for (name, entry_id) in entries {
        let mut own = Vec::new();

        for id in graph.get_reachable_modules(*entry_id) {
            let Some(module) = graph.get_module(id) else {
                continue;
            };
            let resource = normalize(&module.path);
            let group = if id == *entry_id {
                None
            } else {
                cache_groups.iter().position(|g| g.test.is_match(&resource))
            };

            match group {
                Some(index) => {
                    if !shared[index].module_ids.contains(&id) {
                        shared[index].module_ids.push(id);
                    }
                }
                None => own.push(id),
            }
        }

        entry_chunks.push(Chunk::entry(name.clone(), *entry_id, own));
    }

    let mut chunks = Vec::new();
    if let Some(runtime) = runtime_chunk {
        chunks.push(Chunk::runtime(runtime.to_string()));
    }
    chunks.extend(shared.into_iter().filter(|c| !c.is_empty()));
    chunks.extend(entry_chunks);
    chunks
}
