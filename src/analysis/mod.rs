//! Analysis engine: syntax walks, per-document indexes, the call graph and
//! the analyzer interface the dispatcher drives.

pub mod call_graph;
pub mod dispatcher;
pub mod extractor;
pub mod import_resolver;
pub mod syntax;
pub mod variable_index;

use std::path::PathBuf;

use derive_more::{Display, Error, From};
use kemi_front::{BufferError, ChangeSummary, Document, DocumentStore};
use lsp_types::{CompletionItem, Diagnostic, Hover, Location};

pub use call_graph::{CallGraph, CallGraphNode, CallSite, FunctionDef, FunctionKey};
pub use dispatcher::{Dispatcher, RegistrationError};
pub use import_resolver::{ImportBinding, ImportTable, KnownDocuments};
pub use variable_index::{PvOccurrence, VariableIndex};

/// `source` of every diagnostic this crate produces.
pub const DIAGNOSTIC_SOURCE: &str = "kemi-pv";

/// Stable diagnostic codes.
pub mod codes {
    /// A PV is read but nothing in the workspace writes it.
    pub const PV_NEVER_WRITTEN: &str = "pv-never-written";
    /// `$class` is not a known PV class.
    pub const PV_UNKNOWN_CLASS: &str = "pv-unknown-class";
    /// A transaction callback names a routine that does not exist.
    pub const CALLBACK_UNRESOLVED: &str = "callback-unresolved";
    /// A hash table is read but never written nor declared.
    pub const HTABLE_NEVER_WRITTEN: &str = "htable-never-written";
    /// A statistic is not among the declared ones.
    pub const STATISTIC_UNDECLARED: &str = "statistic-undeclared";
}

#[derive(Debug, Display, Error, From)]
pub enum AnalysisError {
    #[display("{source}")]
    Buffer { source: BufferError },
    #[from(ignore)]
    #[display("{analyzer}: {message}")]
    Inconsistent {
        analyzer: &'static str,
        message: String,
    },
}

/// Read-only view of the workspace handed to analyzers.
#[derive(Clone, Copy)]
pub struct WorkspaceView<'a> {
    pub documents: &'a DocumentStore,
    /// Import roots, in lookup order.
    pub roots: &'a [PathBuf],
}

/// Everything an analyzer sees when (re)analyzing one document.
pub struct AnalysisContext<'a> {
    pub document: &'a Document,
    pub source: &'a str,
    /// Regions touched by the edit that triggered this pass, if any.
    pub changes: Option<&'a ChangeSummary>,
    pub workspace: WorkspaceView<'a>,
}

/// A point query inside one document.
pub struct Query<'a> {
    pub document: &'a Document,
    pub source: &'a str,
    /// Byte offset of the cursor.
    pub offset: usize,
}

/// One semantic token, in absolute document coordinates.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SemanticTokenEntry {
    pub line: u32,
    pub character: u32,
    pub length: u32,
    pub token_type: &'static str,
    pub modifiers: Vec<&'static str>,
}

/// One independently implemented analysis.
///
/// Every method has an empty default so analyzers only implement what they
/// contribute.
pub trait Analyzer: Send + Sync {
    /// Unique registration id.
    fn id(&self) -> &'static str;

    /// Rebuild this analyzer's state for `cx.document`.
    fn analyze(&mut self, cx: &AnalysisContext<'_>) -> Result<(), AnalysisError>;

    /// Drop everything owned by `uri`.
    fn document_removed(
        &mut self,
        _uri: &str,
        _workspace: WorkspaceView<'_>,
    ) -> Result<(), AnalysisError> {
        Ok(())
    }

    fn diagnostics(&self, _document: &Document) -> Result<Vec<Diagnostic>, AnalysisError> {
        Ok(Vec::new())
    }

    fn definitions(&self, _query: &Query<'_>) -> Result<Vec<Location>, AnalysisError> {
        Ok(Vec::new())
    }

    fn references(&self, _query: &Query<'_>) -> Result<Vec<Location>, AnalysisError> {
        Ok(Vec::new())
    }

    fn hover(&self, _query: &Query<'_>) -> Result<Option<Hover>, AnalysisError> {
        Ok(None)
    }

    fn completions(&self, _query: &Query<'_>) -> Result<Vec<CompletionItem>, AnalysisError> {
        Ok(Vec::new())
    }

    fn semantic_tokens(
        &self,
        _document: &Document,
    ) -> Result<Vec<SemanticTokenEntry>, AnalysisError> {
        Ok(Vec::new())
    }
}

/// `Location` for a range in `uri`. Unparseable uris yield `None`.
pub fn location(uri: &str, range: lsp_types::Range) -> Option<Location> {
    match uri.parse() {
        Ok(uri) => Some(Location::new(uri, range)),
        Err(error) => {
            tracing::warn!(uri, %error, "Skipping location with invalid uri");
            None
        }
    }
}

/// Diagnostic with this crate's source and `code`.
pub fn diagnostic(
    range: lsp_types::Range,
    severity: lsp_types::DiagnosticSeverity,
    code: &'static str,
    message: String,
) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(severity),
        code: Some(lsp_types::NumberOrString::String(code.to_string())),
        source: Some(DIAGNOSTIC_SOURCE.to_string()),
        message,
        ..Default::default()
    }
}

/// Markdown hover over `range`.
pub fn markdown_hover(value: String, range: lsp_types::Range) -> Hover {
    Hover {
        contents: lsp_types::HoverContents::Markup(lsp_types::MarkupContent {
            kind: lsp_types::MarkupKind::Markdown,
            value,
        }),
        range: Some(range),
    }
}

/// Semantic token covering a single-line range.
pub fn token_for(
    range: lsp_types::Range,
    token_type: &'static str,
    modifiers: Vec<&'static str>,
) -> Option<SemanticTokenEntry> {
    if range.start.line != range.end.line || range.end.character <= range.start.character {
        return None;
    }
    Some(SemanticTokenEntry {
        line: range.start.line,
        character: range.start.character,
        length: range.end.character - range.start.character,
        token_type,
        modifiers,
    })
}
