use std::collections::HashMap;
use std::sync::Arc;

use lsp_types::{Hover, Location, Position, Range};

use super::Shared;
use crate::analysis::import_resolver::{ImportBinding, ImportTable, extract_imports, resolve_bindings};
use crate::analysis::{AnalysisContext, AnalysisError, Analyzer, Query, WorkspaceView, location, markdown_hover};

/// Owns every document's import bindings.
///
/// Bindings are re-resolved for the whole workspace on every pass, since a
/// newly indexed document can satisfy imports of documents analyzed earlier.
pub struct ImportAnalyzer {
    extracted: HashMap<String, Vec<ImportBinding>>,
    table: Shared<ImportTable>,
}

impl ImportAnalyzer {
    pub fn new() -> Self {
        Self {
            extracted: HashMap::new(),
            table: Arc::default(),
        }
    }

    pub fn table(&self) -> Shared<ImportTable> {
        Arc::clone(&self.table)
    }

    fn resolve_all(&self, workspace: WorkspaceView<'_>) {
        let resolved: ImportTable = self
            .extracted
            .iter()
            .map(|(uri, bindings)| {
                let mut bindings = bindings.clone();
                resolve_bindings(&mut bindings, uri, workspace.roots, workspace.documents);
                (uri.clone(), bindings)
            })
            .collect();
        *self.table.write() = resolved;
    }

    fn binding_at(&self, query: &Query<'_>) -> Option<ImportBinding> {
        let table = self.table.read();
        table
            .get(query.document.uri())?
            .iter()
            .find(|binding| binding.span.start <= query.offset && query.offset <= binding.span.end)
            .cloned()
    }
}

impl Default for ImportAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for ImportAnalyzer {
    fn id(&self) -> &'static str {
        "imports"
    }

    fn analyze(&mut self, cx: &AnalysisContext<'_>) -> Result<(), AnalysisError> {
        let bindings = extract_imports(cx.document, cx.source);
        tracing::debug!(uri = cx.document.uri(), count = bindings.len(), "Extracted imports");
        self.extracted.insert(cx.document.uri().to_string(), bindings);
        self.resolve_all(cx.workspace);
        Ok(())
    }

    fn document_removed(
        &mut self,
        uri: &str,
        workspace: WorkspaceView<'_>,
    ) -> Result<(), AnalysisError> {
        self.extracted.remove(uri);
        self.resolve_all(workspace);
        Ok(())
    }

    fn definitions(&self, query: &Query<'_>) -> Result<Vec<Location>, AnalysisError> {
        let Some(binding) = self.binding_at(query) else {
            return Ok(Vec::new());
        };
        let start = Range::new(Position::new(0, 0), Position::new(0, 0));
        Ok(binding
            .resolved_uri
            .as_deref()
            .and_then(|uri| location(uri, start))
            .into_iter()
            .collect())
    }

    fn hover(&self, query: &Query<'_>) -> Result<Option<Hover>, AnalysisError> {
        let Some(binding) = self.binding_at(query) else {
            return Ok(None);
        };
        let target = match &binding.resolved_uri {
            Some(uri) => format!("`{uri}`"),
            None => "unresolved".to_string(),
        };
        let value = match &binding.remote_name {
            Some(remote) => format!("`{remote}` from module `{}`\n\n{target}", binding.module_path),
            None => format!("module `{}`\n\n{target}", binding.module_path),
        };
        Ok(Some(markdown_hover(value, binding.range)))
    }
}
