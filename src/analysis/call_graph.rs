//! Workspace-wide routine graph with transitive PV access closure.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::ops::Range;

use derive_more::Display;

/// A routine, identified by its document and name.
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{uri}#{name}")]
pub struct FunctionKey {
    pub uri: String,
    pub name: String,
}

impl FunctionKey {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub uri: String,
    pub span: Range<usize>,
    pub range: lsp_types::Range,
    pub name_range: lsp_types::Range,
    pub parameters: Vec<String>,
}

impl FunctionDef {
    pub fn key(&self) -> FunctionKey {
        FunctionKey::new(&self.uri, &self.name)
    }
}

/// An unresolved call inside a routine body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallSite {
    pub callee: String,
    /// Dotted module path for `alias.callee(...)`.
    pub qualifier: Option<String>,
    /// Name of the enclosing routine.
    pub caller: String,
    /// Span of the callee name token.
    pub span: Range<usize>,
    pub range: lsp_types::Range,
}

#[derive(Clone, Debug)]
pub struct CallGraphNode {
    pub def: FunctionDef,
    pub callees: BTreeSet<FunctionKey>,
    pub callers: BTreeSet<FunctionKey>,
    pub direct_pv_reads: BTreeSet<String>,
    pub direct_pv_writes: BTreeSet<String>,
}

impl CallGraphNode {
    fn new(def: FunctionDef) -> Self {
        Self {
            def,
            callees: BTreeSet::new(),
            callers: BTreeSet::new(),
            direct_pv_reads: BTreeSet::new(),
            direct_pv_writes: BTreeSet::new(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CallGraph {
    nodes: HashMap<FunctionKey, CallGraphNode>,
    by_name: HashMap<String, Vec<FunctionKey>>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a routine. Re-registering a key replaces only its definition.
    pub fn add_function(&mut self, def: FunctionDef) {
        let key = def.key();
        if let Some(node) = self.nodes.get_mut(&key) {
            node.def = def;
            return;
        }
        self.by_name
            .entry(key.name.clone())
            .or_default()
            .push(key.clone());
        self.nodes.insert(key, CallGraphNode::new(def));
    }

    /// Link `caller -> callee`. Returns `false` (and does nothing) when either
    /// routine is unknown.
    pub fn add_edge(&mut self, caller: &FunctionKey, callee: &FunctionKey) -> bool {
        if !self.nodes.contains_key(caller) || !self.nodes.contains_key(callee) {
            return false;
        }
        if let Some(node) = self.nodes.get_mut(caller) {
            node.callees.insert(callee.clone());
        }
        if let Some(node) = self.nodes.get_mut(callee) {
            node.callers.insert(caller.clone());
        }
        true
    }

    /// Record the PV identity keys a routine touches in its own body.
    pub fn set_direct_pv_access(
        &mut self,
        key: &FunctionKey,
        reads: BTreeSet<String>,
        writes: BTreeSet<String>,
    ) -> bool {
        let Some(node) = self.nodes.get_mut(key) else {
            return false;
        };
        node.direct_pv_reads = reads;
        node.direct_pv_writes = writes;
        true
    }

    /// Keys of `start` and every routine reachable from it, each once.
    pub fn reachable_from(&self, start: &FunctionKey) -> Vec<&FunctionKey> {
        let Some((first, _)) = self.nodes.get_key_value(start) else {
            return Vec::new();
        };
        let mut visited: HashSet<&FunctionKey> = HashSet::from([first]);
        let mut queue: VecDeque<&FunctionKey> = VecDeque::from([first]);
        let mut order = Vec::new();

        while let Some(key) = queue.pop_front() {
            order.push(key);
            let Some(node) = self.nodes.get(key) else {
                continue;
            };
            for callee in &node.callees {
                if visited.insert(callee) {
                    queue.push_back(callee);
                }
            }
        }
        order
    }

    fn transitive(
        &self,
        start: &FunctionKey,
        select: impl Fn(&CallGraphNode) -> &BTreeSet<String>,
    ) -> BTreeSet<String> {
        self.reachable_from(start)
            .into_iter()
            .filter_map(|key| self.nodes.get(key))
            .flat_map(|node| select(node).iter().cloned())
            .collect()
    }

    pub fn get_transitive_pv_writes(&self, key: &FunctionKey) -> BTreeSet<String> {
        self.transitive(key, |node| &node.direct_pv_writes)
    }

    pub fn get_transitive_pv_reads(&self, key: &FunctionKey) -> BTreeSet<String> {
        self.transitive(key, |node| &node.direct_pv_reads)
    }

    /// Whether any routine in the workspace writes `pv_key` directly.
    ///
    /// Deliberately global: no call path from the reading routine is required.
    pub fn has_transitive_write(&self, pv_key: &str) -> bool {
        self.nodes
            .values()
            .any(|node| node.direct_pv_writes.contains(pv_key))
    }

    /// Drop every routine of `uri` and every edge touching one.
    pub fn remove_file(&mut self, uri: &str) {
        let doomed: Vec<FunctionKey> = self
            .nodes
            .keys()
            .filter(|key| key.uri == uri)
            .cloned()
            .collect();
        for key in &doomed {
            let Some(node) = self.nodes.remove(key) else {
                continue;
            };
            for neighbor in node.callees.iter().chain(node.callers.iter()) {
                if let Some(other) = self.nodes.get_mut(neighbor) {
                    other.callers.remove(key);
                    other.callees.remove(key);
                }
            }
        }
        self.by_name.retain(|_, keys| {
            keys.retain(|key| key.uri != uri);
            !keys.is_empty()
        });
    }

    /// Forget every edge, keeping routines and their direct accesses.
    pub fn clear_edges(&mut self) {
        for node in self.nodes.values_mut() {
            node.callees.clear();
            node.callers.clear();
        }
    }

    pub fn get_functions_by_name(&self, name: &str) -> &[FunctionKey] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct routine names, sorted.
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn node(&self, key: &FunctionKey) -> Option<&CallGraphNode> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &FunctionKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Routines defined in `uri`, sorted by position.
    pub fn functions_in(&self, uri: &str) -> Vec<&FunctionDef> {
        let mut defs: Vec<&FunctionDef> = self
            .nodes
            .values()
            .filter(|node| node.def.uri == uri)
            .map(|node| &node.def)
            .collect();
        defs.sort_by_key(|def| def.span.start);
        defs
    }

    pub fn nodes(&self) -> impl Iterator<Item = &CallGraphNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
