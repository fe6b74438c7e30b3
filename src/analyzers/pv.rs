use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use kemi_front::Document;
use kemi_pv::{category_of, is_known_class, known_classes};
use lsp_types::{CompletionItem, CompletionItemKind, Diagnostic, DiagnosticSeverity, Hover, Location};

use super::Shared;
use crate::analysis::extractor::extract_pv_occurrences;
use crate::analysis::syntax::ksr_string_call_at;
use crate::analysis::{
    AnalysisContext, AnalysisError, Analyzer, CallGraph, FunctionKey, PvOccurrence, Query,
    SemanticTokenEntry, VariableIndex, WorkspaceView, codes, diagnostic, location, markdown_hover,
    token_for,
};

/// Owns one [`VariableIndex`] per document and feeds each routine's direct PV
/// accesses into the call graph.
pub struct PvAnalyzer {
    indexes: Shared<HashMap<String, VariableIndex>>,
    graph: Shared<CallGraph>,
}

impl PvAnalyzer {
    pub fn new(graph: Shared<CallGraph>) -> Self {
        Self {
            indexes: Arc::default(),
            graph,
        }
    }

    pub fn indexes(&self) -> Shared<HashMap<String, VariableIndex>> {
        Arc::clone(&self.indexes)
    }

    fn occurrence_at(&self, query: &Query<'_>) -> Option<PvOccurrence> {
        self.indexes
            .read()
            .get(query.document.uri())?
            .find_at_offset(query.offset)
            .cloned()
    }

    /// Every occurrence of `identity` in the workspace, as locations sorted by
    /// document and position.
    fn locations_of(&self, identity: &str, writes_only: bool) -> Vec<Location> {
        let indexes = self.indexes.read();
        let mut uris: Vec<&String> = indexes.keys().collect();
        uris.sort();
        uris.into_iter()
            .flat_map(|uri| {
                indexes[uri]
                    .get_by_identity(identity)
                    .iter()
                    .filter(move |occurrence| !writes_only || occurrence.is_write)
                    .filter_map(move |occurrence| location(uri, occurrence.range))
            })
            .collect()
    }

    /// Whether a read of `identity` in `scope` of `uri` has a matching write.
    fn is_written(&self, uri: &str, scope: &str, identity: &str) -> bool {
        let indexes = self.indexes.read();
        if indexes
            .get(uri)
            .is_some_and(|index| index.get_first_write(identity).is_some())
        {
            return true;
        }
        let graph = self.graph.read();
        if graph
            .get_transitive_pv_writes(&FunctionKey::new(uri, scope))
            .contains(identity)
            || graph.has_transitive_write(identity)
        {
            return true;
        }
        // Writes outside any routine the graph knows about.
        indexes
            .values()
            .any(|index| index.get_first_write(identity).is_some())
    }

    fn counts(&self, identity: &str) -> (usize, usize) {
        let indexes = self.indexes.read();
        indexes
            .values()
            .flat_map(|index| index.get_by_identity(identity))
            .fold((0, 0), |(writes, reads), occurrence| {
                if occurrence.is_write {
                    (writes + 1, reads)
                } else {
                    (writes, reads + 1)
                }
            })
    }

    fn inner_names(&self, class: &str) -> BTreeSet<String> {
        let indexes = self.indexes.read();
        indexes
            .values()
            .flat_map(|index| index.occurrences())
            .filter(|occurrence| occurrence.pv.class == class)
            .filter_map(|occurrence| occurrence.pv.inner_name.clone())
            .collect()
    }
}

/// What is being typed after a `$` inside a string.
#[derive(Debug, PartialEq, Eq)]
enum PvCompletion<'a> {
    Class { prefix: &'a str },
    Inner { class: &'a str, prefix: &'a str },
}

fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Start of the run of name bytes ending at `end`.
fn name_start(text: &str, end: usize) -> usize {
    let bytes = text.as_bytes();
    let mut start = end;
    while start > 0 && is_name_byte(bytes[start - 1]) {
        start -= 1;
    }
    start
}

fn completion_context(before: &str) -> Option<PvCompletion<'_>> {
    let bytes = before.as_bytes();
    let prefix_start = name_start(before, before.len());
    let prefix = &before[prefix_start..];
    match prefix_start.checked_sub(1).map(|i| bytes[i]) {
        Some(b'$') => Some(PvCompletion::Class { prefix }),
        Some(b'(') => {
            let class_end = prefix_start - 1;
            let class_start = name_start(before, class_end);
            if class_start == class_end {
                return None;
            }
            let opener = &before[..class_start];
            (opener.ends_with('$') || opener.ends_with("$(")).then(|| PvCompletion::Inner {
                class: &before[class_start..class_end],
                prefix,
            })
        }
        _ => None,
    }
}

fn describe(occurrence: &PvOccurrence) -> String {
    let pv = &occurrence.pv;
    let mut text = format!("**`{}`** ({})", pv.full_match, pv.category);
    if !is_known_class(&pv.class) {
        text.push_str(&format!("\n\nUnknown class `{}`", pv.class));
    }
    if let Some(index) = &pv.index {
        text.push_str(&format!("\n\nIndex `{index}`"));
    }
    text
}

impl Analyzer for PvAnalyzer {
    fn id(&self) -> &'static str {
        "pv"
    }

    fn analyze(&mut self, cx: &AnalysisContext<'_>) -> Result<(), AnalysisError> {
        let uri = cx.document.uri();
        let index = VariableIndex::from_occurrences(extract_pv_occurrences(cx.document, cx.source));

        let mut per_scope: BTreeMap<&str, (BTreeSet<String>, BTreeSet<String>)> = BTreeMap::new();
        for occurrence in index.occurrences() {
            let (reads, writes) = per_scope.entry(occurrence.scope.as_str()).or_default();
            if occurrence.is_write {
                writes.insert(occurrence.identity_key());
            } else {
                reads.insert(occurrence.identity_key());
            }
        }
        {
            let mut graph = self.graph.write();
            for (scope, (reads, writes)) in per_scope {
                let key = FunctionKey::new(uri, scope);
                if !graph.set_direct_pv_access(&key, reads, writes) {
                    tracing::debug!(uri, scope, "PV access in routine unknown to the call graph");
                }
            }
        }

        tracing::debug!(uri, occurrences = index.len(), "Indexed pseudo-variables");
        self.indexes.write().insert(uri.to_string(), index);
        Ok(())
    }

    fn document_removed(
        &mut self,
        uri: &str,
        _workspace: WorkspaceView<'_>,
    ) -> Result<(), AnalysisError> {
        self.indexes.write().remove(uri);
        Ok(())
    }

    fn diagnostics(&self, document: &Document) -> Result<Vec<Diagnostic>, AnalysisError> {
        let uri = document.uri();
        let occurrences: Vec<PvOccurrence> = match self.indexes.read().get(uri) {
            Some(index) => index.occurrences().to_vec(),
            None => return Ok(Vec::new()),
        };

        let mut diagnostics = Vec::new();
        for occurrence in &occurrences {
            let pv = &occurrence.pv;
            if !is_known_class(&pv.class) {
                diagnostics.push(diagnostic(
                    occurrence.range,
                    DiagnosticSeverity::WARNING,
                    codes::PV_UNKNOWN_CLASS,
                    format!("Unknown pseudo-variable class `${}`", pv.class),
                ));
                continue;
            }
            if occurrence.is_write || !pv.category.is_writable() {
                continue;
            }
            let identity = occurrence.identity_key();
            if !self.is_written(uri, &occurrence.scope, &identity) {
                diagnostics.push(diagnostic(
                    occurrence.range,
                    DiagnosticSeverity::WARNING,
                    codes::PV_NEVER_WRITTEN,
                    format!("`{}` is read but never written", pv.full_match),
                ));
            }
        }
        Ok(diagnostics)
    }

    fn definitions(&self, query: &Query<'_>) -> Result<Vec<Location>, AnalysisError> {
        Ok(self
            .occurrence_at(query)
            .map(|occurrence| self.locations_of(&occurrence.identity_key(), true))
            .unwrap_or_default())
    }

    fn references(&self, query: &Query<'_>) -> Result<Vec<Location>, AnalysisError> {
        Ok(self
            .occurrence_at(query)
            .map(|occurrence| self.locations_of(&occurrence.identity_key(), false))
            .unwrap_or_default())
    }

    fn hover(&self, query: &Query<'_>) -> Result<Option<Hover>, AnalysisError> {
        let Some(occurrence) = self.occurrence_at(query) else {
            return Ok(None);
        };
        let identity = occurrence.identity_key();
        let (writes, reads) = self.counts(&identity);
        let value = format!(
            "{}\n\nIdentity `{identity}`: {writes} write(s), {reads} read(s) in the workspace",
            describe(&occurrence)
        );
        Ok(Some(markdown_hover(value, occurrence.range)))
    }

    fn completions(&self, query: &Query<'_>) -> Result<Vec<CompletionItem>, AnalysisError> {
        let root = query.document.tree().root_node();
        let Some(call) = ksr_string_call_at(root, query.source, query.offset) else {
            return Ok(Vec::new());
        };
        let Some(before) = call.content.get(..query.offset - call.content_span.start) else {
            return Ok(Vec::new());
        };
        let items = match completion_context(before) {
            Some(PvCompletion::Class { prefix }) => known_classes()
                .filter(|(class, _)| class.starts_with(prefix))
                .map(|(class, category)| CompletionItem {
                    label: class.to_string(),
                    kind: Some(CompletionItemKind::VARIABLE),
                    detail: Some(category.to_string()),
                    ..Default::default()
                })
                .collect(),
            Some(PvCompletion::Inner { class, prefix }) => {
                let category = category_of(class);
                self.inner_names(class)
                    .into_iter()
                    .filter(|name| name.starts_with(prefix))
                    .map(|name| CompletionItem {
                        detail: Some(format!("{category} `{class}:{name}`")),
                        label: name,
                        kind: Some(CompletionItemKind::VARIABLE),
                        ..Default::default()
                    })
                    .collect()
            }
            None => Vec::new(),
        };
        Ok(items)
    }

    fn semantic_tokens(&self, document: &Document) -> Result<Vec<SemanticTokenEntry>, AnalysisError> {
        let indexes = self.indexes.read();
        let Some(index) = indexes.get(document.uri()) else {
            return Ok(Vec::new());
        };
        Ok(index
            .occurrences()
            .iter()
            .filter_map(|occurrence| {
                let mut modifiers = Vec::new();
                if occurrence.is_write {
                    modifiers.push("modification");
                }
                if occurrence.pv.category.is_builtin() && is_known_class(&occurrence.pv.class) {
                    modifiers.push("defaultLibrary");
                }
                token_for(occurrence.range, "variable", modifiers)
            })
            .collect())
    }
}
