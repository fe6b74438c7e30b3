use std::collections::HashMap;
use std::ops::Range;

use kemi_front::Document;
use lsp_types::{CompletionItem, CompletionItemKind, Diagnostic, DiagnosticSeverity, Hover, Location};

use super::Shared;
use crate::analysis::syntax::{MODULE_SCOPE, ksr_string_call_at, ksr_string_calls};
use crate::analysis::{
    AnalysisContext, AnalysisError, Analyzer, CallGraph, Query, SemanticTokenEntry, WorkspaceView,
    codes, diagnostic, location, markdown_hover, token_for,
};

/// `KSR.tm` methods whose first argument names a routine to run later.
const CALLBACK_METHODS: &[&str] = &[
    "t_on_failure",
    "t_on_branch",
    "t_on_reply",
    "t_on_branch_failure",
];

fn is_callback(module: &str, method: &str) -> bool {
    module == "tm" && CALLBACK_METHODS.contains(&method)
}

#[derive(Clone, Debug)]
struct CallbackRef {
    name: String,
    method: String,
    span: Range<usize>,
    range: lsp_types::Range,
}

/// Checks that transaction callbacks name existing routines.
pub struct CallbackAnalyzer {
    graph: Shared<CallGraph>,
    refs: HashMap<String, Vec<CallbackRef>>,
}

impl CallbackAnalyzer {
    pub fn new(graph: Shared<CallGraph>) -> Self {
        Self {
            graph,
            refs: HashMap::new(),
        }
    }

    fn ref_at(&self, query: &Query<'_>) -> Option<&CallbackRef> {
        self.refs
            .get(query.document.uri())?
            .iter()
            .find(|callback| callback.span.start <= query.offset && query.offset <= callback.span.end)
    }

    fn exists(&self, name: &str) -> bool {
        name != MODULE_SCOPE && !self.graph.read().get_functions_by_name(name).is_empty()
    }
}

impl Analyzer for CallbackAnalyzer {
    fn id(&self) -> &'static str {
        "callbacks"
    }

    fn analyze(&mut self, cx: &AnalysisContext<'_>) -> Result<(), AnalysisError> {
        let refs: Vec<CallbackRef> = ksr_string_calls(cx.document.tree().root_node(), cx.source)
            .into_iter()
            .filter(|call| is_callback(&call.module, &call.method))
            .map(|call| CallbackRef {
                range: cx.document.range_of(call.content_span.clone()),
                name: call.content,
                method: call.method,
                span: call.content_span,
            })
            .collect();
        self.refs.insert(cx.document.uri().to_string(), refs);
        Ok(())
    }

    fn document_removed(
        &mut self,
        uri: &str,
        _workspace: WorkspaceView<'_>,
    ) -> Result<(), AnalysisError> {
        self.refs.remove(uri);
        Ok(())
    }

    fn diagnostics(&self, document: &Document) -> Result<Vec<Diagnostic>, AnalysisError> {
        let Some(refs) = self.refs.get(document.uri()) else {
            return Ok(Vec::new());
        };
        Ok(refs
            .iter()
            .filter(|callback| !self.exists(&callback.name))
            .map(|callback| {
                diagnostic(
                    callback.range,
                    DiagnosticSeverity::ERROR,
                    codes::CALLBACK_UNRESOLVED,
                    format!(
                        "No routine named `{}` for KSR.tm.{}",
                        callback.name, callback.method
                    ),
                )
            })
            .collect())
    }

    fn definitions(&self, query: &Query<'_>) -> Result<Vec<Location>, AnalysisError> {
        let Some(callback) = self.ref_at(query) else {
            return Ok(Vec::new());
        };
        let graph = self.graph.read();
        let mut keys = graph.get_functions_by_name(&callback.name).to_vec();
        keys.sort();
        Ok(keys
            .iter()
            .filter_map(|key| graph.node(key))
            .filter_map(|node| location(&node.def.uri, node.def.name_range))
            .collect())
    }

    fn references(&self, query: &Query<'_>) -> Result<Vec<Location>, AnalysisError> {
        let Some(callback) = self.ref_at(query) else {
            return Ok(Vec::new());
        };
        let mut uris: Vec<&String> = self.refs.keys().collect();
        uris.sort();
        Ok(uris
            .into_iter()
            .flat_map(|uri| {
                self.refs[uri]
                    .iter()
                    .filter(move |other| other.name == callback.name)
                    .filter_map(move |other| location(uri, other.range))
            })
            .collect())
    }

    fn hover(&self, query: &Query<'_>) -> Result<Option<Hover>, AnalysisError> {
        let Some(callback) = self.ref_at(query) else {
            return Ok(None);
        };
        let status = if self.exists(&callback.name) {
            "routine"
        } else {
            "unresolved routine"
        };
        Ok(Some(markdown_hover(
            format!("`KSR.tm.{}` callback: {status} `{}`", callback.method, callback.name),
            callback.range,
        )))
    }

    fn completions(&self, query: &Query<'_>) -> Result<Vec<CompletionItem>, AnalysisError> {
        let root = query.document.tree().root_node();
        let Some(call) = ksr_string_call_at(root, query.source, query.offset) else {
            return Ok(Vec::new());
        };
        if !is_callback(&call.module, &call.method) {
            return Ok(Vec::new());
        }
        let prefix = call
            .content
            .get(..query.offset - call.content_span.start)
            .unwrap_or("");
        let graph = self.graph.read();
        Ok(graph
            .function_names()
            .into_iter()
            .filter(|name| *name != MODULE_SCOPE && name.starts_with(prefix))
            .map(|name| CompletionItem {
                label: name.to_string(),
                kind: Some(CompletionItemKind::FUNCTION),
                ..Default::default()
            })
            .collect())
    }

    fn semantic_tokens(&self, document: &Document) -> Result<Vec<SemanticTokenEntry>, AnalysisError> {
        let Some(refs) = self.refs.get(document.uri()) else {
            return Ok(Vec::new());
        };
        Ok(refs
            .iter()
            .filter(|callback| self.exists(&callback.name))
            .filter_map(|callback| token_for(callback.range, "function", Vec::new()))
            .collect())
    }
}
