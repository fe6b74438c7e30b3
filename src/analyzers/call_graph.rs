use std::collections::HashMap;
use std::sync::Arc;

use kemi_front::Document;
use lsp_types::{Hover, Location};

use super::Shared;
use crate::analysis::import_resolver::{resolve_call_target, resolve_qualified_module};
use crate::analysis::syntax::{MODULE_SCOPE, call_sites, routines};
use crate::analysis::{
    AnalysisContext, AnalysisError, Analyzer, CallGraph, CallSite, FunctionDef, FunctionKey,
    ImportTable, Query, WorkspaceView, location, markdown_hover,
};

/// Owns the workspace call graph.
///
/// Raw call sites are kept per document and every edge is relinked after each
/// pass, so the graph does not depend on the order documents were indexed in.
pub struct CallGraphAnalyzer {
    graph: Shared<CallGraph>,
    imports: Shared<ImportTable>,
    sites: HashMap<String, Vec<CallSite>>,
}

impl CallGraphAnalyzer {
    pub fn new(imports: Shared<ImportTable>) -> Self {
        Self {
            graph: Arc::default(),
            imports,
            sites: HashMap::new(),
        }
    }

    pub fn graph(&self) -> Shared<CallGraph> {
        Arc::clone(&self.graph)
    }

    fn relink(&self) {
        let imports = self.imports.read();
        let mut graph = self.graph.write();
        graph.clear_edges();
        let mut linked = 0usize;
        for (uri, sites) in &self.sites {
            for site in sites {
                let caller = FunctionKey::new(uri, &site.caller);
                if let Some(callee) = resolve_site(&graph, &imports, uri, site)
                    && graph.add_edge(&caller, &callee)
                {
                    linked += 1;
                }
            }
        }
        tracing::debug!(routines = graph.len(), edges = linked, "Relinked call graph");
    }

    fn site_at(&self, query: &Query<'_>) -> Option<&CallSite> {
        self.sites
            .get(query.document.uri())?
            .iter()
            .find(|site| site.span.start <= query.offset && query.offset <= site.span.end)
    }

    /// Routine named at the cursor: a definition name or a resolved call.
    fn routine_at(&self, query: &Query<'_>) -> Option<FunctionKey> {
        let graph = self.graph.read();
        if let Some(site) = self.site_at(query) {
            let imports = self.imports.read();
            return resolve_site(&graph, &imports, query.document.uri(), site);
        }
        graph
            .functions_in(query.document.uri())
            .into_iter()
            .find(|def| {
                if def.name == MODULE_SCOPE {
                    return false;
                }
                let span = name_span(def, query.document);
                span.start <= query.offset && query.offset <= span.end
            })
            .map(FunctionDef::key)
    }
}

fn name_span(def: &FunctionDef, document: &Document) -> std::ops::Range<usize> {
    document.offset_at(def.name_range.start)..document.offset_at(def.name_range.end)
}

/// Where a call site lands, trying the same document, import bindings,
/// module-qualified calls, wildcard imports and finally a unique bare name.
fn resolve_site(
    graph: &CallGraph,
    imports: &ImportTable,
    uri: &str,
    site: &CallSite,
) -> Option<FunctionKey> {
    match &site.qualifier {
        None => {
            let local = FunctionKey::new(uri, &site.callee);
            if graph.contains(&local) {
                return Some(local);
            }
            if let Some(target) = resolve_call_target(&site.callee, uri, imports)
                && let Some(remote) = target.remote_name
            {
                let key = FunctionKey::new(target.uri, remote);
                if graph.contains(&key) {
                    return Some(key);
                }
            }
            let wildcard = imports.get(uri).into_iter().flatten().find_map(|binding| {
                let module = binding.resolved_uri.as_ref().filter(|_| binding.is_wildcard)?;
                let key = FunctionKey::new(module, &site.callee);
                graph.contains(&key).then_some(key)
            });
            if wildcard.is_some() {
                return wildcard;
            }
        }
        Some(qualifier) => {
            if let Some(module) = resolve_qualified_module(qualifier, uri, imports) {
                let key = FunctionKey::new(module, &site.callee);
                if graph.contains(&key) {
                    return Some(key);
                }
            }
        }
    }
    match graph.get_functions_by_name(&site.callee) {
        [only] => Some(only.clone()),
        _ => None,
    }
}

impl Analyzer for CallGraphAnalyzer {
    fn id(&self) -> &'static str {
        "call-graph"
    }

    fn analyze(&mut self, cx: &AnalysisContext<'_>) -> Result<(), AnalysisError> {
        let uri = cx.document.uri();
        let root = cx.document.tree().root_node();
        let found = routines(root, cx.source);
        {
            let mut graph = self.graph.write();
            graph.remove_file(uri);
            let whole = 0..cx.source.len();
            let whole_range = cx.document.range_of(whole.clone());
            graph.add_function(FunctionDef {
                name: MODULE_SCOPE.to_string(),
                uri: uri.to_string(),
                span: whole,
                range: whole_range,
                name_range: lsp_types::Range::new(whole_range.start, whole_range.start),
                parameters: Vec::new(),
            });
            for routine in found {
                graph.add_function(FunctionDef {
                    range: cx.document.range_of(routine.span.clone()),
                    name_range: cx.document.range_of(routine.name_span),
                    name: routine.name,
                    uri: uri.to_string(),
                    span: routine.span,
                    parameters: routine.parameters,
                });
            }
        }

        let sites: Vec<CallSite> = call_sites(root, cx.source)
            .into_iter()
            .map(|call| CallSite {
                range: cx.document.range_of(call.callee_span.clone()),
                callee: call.callee,
                qualifier: call.qualifier,
                caller: call.scope,
                span: call.callee_span,
            })
            .collect();
        tracing::debug!(uri, calls = sites.len(), "Collected call sites");
        self.sites.insert(uri.to_string(), sites);
        self.relink();
        Ok(())
    }

    fn document_removed(
        &mut self,
        uri: &str,
        _workspace: WorkspaceView<'_>,
    ) -> Result<(), AnalysisError> {
        self.sites.remove(uri);
        self.graph.write().remove_file(uri);
        self.relink();
        Ok(())
    }

    fn definitions(&self, query: &Query<'_>) -> Result<Vec<Location>, AnalysisError> {
        let Some(key) = self.routine_at(query) else {
            return Ok(Vec::new());
        };
        let graph = self.graph.read();
        Ok(graph
            .node(&key)
            .and_then(|node| location(&node.def.uri, node.def.name_range))
            .into_iter()
            .collect())
    }

    fn references(&self, query: &Query<'_>) -> Result<Vec<Location>, AnalysisError> {
        let Some(key) = self.routine_at(query) else {
            return Ok(Vec::new());
        };
        let graph = self.graph.read();
        let imports = self.imports.read();
        let mut found: Vec<(String, lsp_types::Range)> = Vec::new();
        if let Some(node) = graph.node(&key) {
            found.push((node.def.uri.clone(), node.def.name_range));
        }
        for (uri, sites) in &self.sites {
            for site in sites {
                if resolve_site(&graph, &imports, uri, site).as_ref() == Some(&key) {
                    found.push((uri.clone(), site.range));
                }
            }
        }
        found.sort_by(|a, b| {
            (&a.0, a.1.start.line, a.1.start.character).cmp(&(&b.0, b.1.start.line, b.1.start.character))
        });
        Ok(found
            .into_iter()
            .filter_map(|(uri, range)| location(&uri, range))
            .collect())
    }

    fn hover(&self, query: &Query<'_>) -> Result<Option<Hover>, AnalysisError> {
        let Some(key) = self.routine_at(query) else {
            return Ok(None);
        };
        let graph = self.graph.read();
        let Some(node) = graph.node(&key) else {
            return Ok(None);
        };
        let mut value = format!(
            "```python\ndef {}({})\n```",
            node.def.name,
            node.def.parameters.join(", ")
        );
        let writes = graph.get_transitive_pv_writes(&key);
        if !writes.is_empty() {
            let listed: Vec<String> = writes.iter().map(|key| format!("`{key}`")).collect();
            value.push_str(&format!("\n\nWrites (including callees): {}", listed.join(", ")));
        }
        Ok(Some(markdown_hover(value, node.def.name_range)))
    }
}

#[cfg(test)]
mod tests {
    use kemi_front::DocumentStore;

    use super::*;
    use crate::analyzers::ImportAnalyzer;

    struct Fixture {
        store: DocumentStore,
        imports: ImportAnalyzer,
        graph: CallGraphAnalyzer,
    }

    impl Fixture {
        fn new() -> Self {
            let imports = ImportAnalyzer::new();
            let graph = CallGraphAnalyzer::new(imports.table());
            Self {
                store: DocumentStore::new(),
                imports,
                graph,
            }
        }

        fn open(&mut self, uri: &str, text: &str) {
            let document = self.store.open(uri, text, 1).unwrap();
            let source = document.source();
            let cx = AnalysisContext {
                document: &document,
                source: &source,
                changes: None,
                workspace: WorkspaceView {
                    documents: &self.store,
                    roots: &[],
                },
            };
            self.imports.analyze(&cx).unwrap();
            self.graph.analyze(&cx).unwrap();
        }

        fn callees(&self, uri: &str, name: &str) -> Vec<String> {
            let graph = self.graph.graph();
            let graph = graph.read();
            graph
                .node(&FunctionKey::new(uri, name))
                .map(|node| node.callees.iter().map(ToString::to_string).collect())
                .unwrap_or_default()
        }
    }

    #[test]
    fn test_edges_independent_of_index_order() {
        let mut fixture = Fixture::new();
        fixture.open(
            "file:///ws/main.py",
            "from helpers import helper\n\ndef main():\n    helper()\n",
        );
        assert!(fixture.callees("file:///ws/main.py", "main").is_empty());

        fixture.open(
            "file:///ws/helpers.py",
            "def helper():\n    deep()\n\ndef deep():\n    pass\n",
        );
        assert_eq!(
            fixture.callees("file:///ws/main.py", "main"),
            vec!["file:///ws/helpers.py#helper"]
        );
        assert_eq!(
            fixture.callees("file:///ws/helpers.py", "helper"),
            vec!["file:///ws/helpers.py#deep"]
        );
    }

    #[test]
    fn test_module_qualified_and_wildcard_calls() {
        let mut fixture = Fixture::new();
        fixture.open("file:///ws/util.py", "def send():\n    pass\n\ndef shared():\n    pass\n");
        fixture.open("file:///ws/other.py", "def shared():\n    pass\n");
        fixture.open(
            "file:///ws/main.py",
            "import util\nfrom util import *\n\ndef main():\n    util.send()\n    shared()\n",
        );
        assert_eq!(
            fixture.callees("file:///ws/main.py", "main"),
            vec!["file:///ws/util.py#send", "file:///ws/util.py#shared"]
        );
    }

    #[test]
    fn test_dotted_module_path_calls() {
        let mut fixture = Fixture::new();
        fixture.open("file:///ws/lib/__init__.py", "def send():\n    pass\n");
        fixture.open("file:///ws/lib/net.py", "def send():\n    pass\n");
        fixture.open(
            "file:///ws/main.py",
            "import lib.net\nimport lib\n\ndef main():\n    lib.net.send()\n    lib.send()\n",
        );
        assert_eq!(
            fixture.callees("file:///ws/main.py", "main"),
            vec!["file:///ws/lib/__init__.py#send", "file:///ws/lib/net.py#send"]
        );
    }

    #[test]
    fn test_unique_bare_name_fallback_and_ambiguity() {
        let mut fixture = Fixture::new();
        fixture.open("file:///ws/a.py", "def only():\n    pass\n\ndef twice():\n    pass\n");
        fixture.open("file:///ws/b.py", "def twice():\n    pass\n");
        fixture.open("file:///ws/main.py", "def main():\n    only()\n    twice()\n");
        assert_eq!(
            fixture.callees("file:///ws/main.py", "main"),
            vec!["file:///ws/a.py#only"]
        );
    }

    #[test]
    fn test_module_level_calls_use_module_node() {
        let mut fixture = Fixture::new();
        fixture.open("file:///ws/main.py", "def setup():\n    pass\n\nsetup()\n");
        assert_eq!(
            fixture.callees("file:///ws/main.py", MODULE_SCOPE),
            vec!["file:///ws/main.py#setup"]
        );
    }

    #[test]
    fn test_definition_and_references_across_files() {
        let mut fixture = Fixture::new();
        let helpers = "def helper():\n    pass\n";
        let main = "from helpers import helper\n\ndef main():\n    helper()\n";
        fixture.open("file:///ws/helpers.py", helpers);
        fixture.open("file:///ws/main.py", main);

        let document = fixture.store.get("file:///ws/main.py").unwrap();
        let query = Query {
            document: &document,
            source: main,
            offset: main.rfind("helper()").unwrap() + 1,
        };
        let definitions = fixture.graph.definitions(&query).unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].uri.as_str(), "file:///ws/helpers.py");
        assert_eq!(definitions[0].range.start, lsp_types::Position::new(0, 4));

        let references = fixture.graph.references(&query).unwrap();
        let uris: Vec<&str> = references.iter().map(|l| l.uri.as_str()).collect();
        assert_eq!(uris, vec!["file:///ws/helpers.py", "file:///ws/main.py"]);
    }

    #[test]
    fn test_removal_relinks() {
        let mut fixture = Fixture::new();
        fixture.open("file:///ws/helpers.py", "def helper():\n    pass\n");
        fixture.open("file:///ws/main.py", "def main():\n    helper()\n");
        fixture.store.close("file:///ws/helpers.py");
        let workspace = WorkspaceView {
            documents: &fixture.store,
            roots: &[],
        };
        fixture.imports.document_removed("file:///ws/helpers.py", workspace).unwrap();
        fixture.graph.document_removed("file:///ws/helpers.py", workspace).unwrap();
        assert!(fixture.callees("file:///ws/main.py", "main").is_empty());
    }
}
