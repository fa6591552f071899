//! Module graph data structures

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::loaders::EmittedFile;

/// Index of a module in the graph
pub type ModuleId = usize;

/// What a module turned into after its loader chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Plain script
    Script,
    /// Stylesheet pulled out of the bundle; the module itself only exports locals
    ExtractedStyle,
    /// File reference produced by an asset stage
    Asset,
}

/// A processed module
#[derive(Debug, Clone)]
pub struct Module {
    /// Root-relative id, e.g. `./src/index.js`
    pub id: String,

    /// Absolute path to the module
    pub path: PathBuf,

    pub kind: ModuleKind,

    /// Linked module body
    pub code: String,

    /// Extracted stylesheet, for `ExtractedStyle` modules
    pub css: Option<String>,

    /// Files emitted while processing this module
    pub emitted: Vec<EmittedFile>,
}

/// The module dependency graph
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<Module>,

    path_to_id: HashMap<PathBuf, ModuleId>,

    /// Dependency edges in import order
    edges: Vec<Vec<ModuleId>>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module, returning the existing id if its path is known
    pub fn add_module(&mut self, module: Module) -> ModuleId {
        if let Some(&id) = self.path_to_id.get(&module.path) {
            return id;
        }

        let id = self.modules.len();
        self.path_to_id.insert(module.path.clone(), id);
        self.modules.push(module);
        self.edges.push(Vec::new());
        id
    }

    /// Record that `from` imports `to`
    pub fn add_dependency(&mut self, from: ModuleId, to: ModuleId) {
        if let Some(deps) = self.edges.get_mut(from) {
            if !deps.contains(&to) {
                deps.push(to);
            }
        }
    }

    pub fn get_module_id(&self, path: &Path) -> Option<ModuleId> {
        self.path_to_id.get(path).copied()
    }

    pub fn get_module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn get_module_mut(&mut self, id: ModuleId) -> Option<&mut Module> {
        self.modules.get_mut(id)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    pub fn get_dependencies(&self, id: ModuleId) -> &[ModuleId] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Modules reachable from `start`, depth-first in import order
    pub fn get_reachable_modules(&self, start: ModuleId) -> Vec<ModuleId> {
        let mut visited = HashSet::new();
        let mut result = Vec::new();
        let mut stack = vec![start];

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            result.push(id);
            for &dep in self.get_dependencies(id).iter().rev() {
                if !visited.contains(&dep) {
                    stack.push(dep);
                }
            }
        }

        result
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
