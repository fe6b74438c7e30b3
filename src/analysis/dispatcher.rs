//! Fans document events and queries out to every registered analyzer.
//!
//! Analyzers run in registration order. A failing analyzer (error or panic)
//! is logged and skipped for that call; the others still run and their results
//! are still returned.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use derive_more::{Display, Error};
use kemi_front::Document;
use lsp_types::{CompletionItem, Diagnostic, Hover, Location};

use super::{AnalysisContext, AnalysisError, Analyzer, Query, SemanticTokenEntry, WorkspaceView};

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[display("analyzer `{id}` is already registered")]
    DuplicateAnalyzer { id: &'static str },
}

#[derive(Default)]
pub struct Dispatcher {
    analyzers: Vec<Box<dyn Analyzer>>,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Run one analyzer call, turning errors and panics into `None`.
fn isolated<T>(
    analyzer: &'static str,
    operation: &'static str,
    call: impl FnOnce() -> Result<T, AnalysisError>,
) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(error)) => {
            tracing::error!(analyzer, operation, %error, "Analyzer failed");
            None
        }
        Err(payload) => {
            tracing::error!(
                analyzer,
                operation,
                panic = panic_message(payload.as_ref()),
                "Analyzer panicked"
            );
            None
        }
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `analyzer`; ids must be unique.
    pub fn register(&mut self, analyzer: Box<dyn Analyzer>) -> Result<(), RegistrationError> {
        let id = analyzer.id();
        if self.analyzers.iter().any(|existing| existing.id() == id) {
            return Err(RegistrationError::DuplicateAnalyzer { id });
        }
        tracing::debug!(analyzer = id, "Registered analyzer");
        self.analyzers.push(analyzer);
        Ok(())
    }

    /// Registered ids, in dispatch order.
    pub fn ids(&self) -> Vec<&'static str> {
        self.analyzers.iter().map(|analyzer| analyzer.id()).collect()
    }

    /// Re-analyze one document. Returns the ids of analyzers that failed.
    pub fn analyze(&mut self, cx: &AnalysisContext<'_>) -> Vec<&'static str> {
        tracing::debug!(
            uri = cx.document.uri(),
            version = cx.document.version(),
            "Dispatching analysis"
        );
        let mut failed = Vec::new();
        for analyzer in &mut self.analyzers {
            let id = analyzer.id();
            if isolated(id, "analyze", || analyzer.analyze(cx)).is_none() {
                failed.push(id);
            }
        }
        failed
    }

    pub fn document_removed(&mut self, uri: &str, workspace: WorkspaceView<'_>) {
        tracing::debug!(uri, "Dispatching removal");
        for analyzer in &mut self.analyzers {
            let id = analyzer.id();
            isolated(id, "document_removed", || {
                analyzer.document_removed(uri, workspace)
            });
        }
    }

    fn collect<T>(
        &self,
        operation: &'static str,
        call: impl Fn(&dyn Analyzer) -> Result<Vec<T>, AnalysisError>,
    ) -> Vec<T> {
        self.analyzers
            .iter()
            .filter_map(|analyzer| isolated(analyzer.id(), operation, || call(analyzer.as_ref())))
            .flatten()
            .collect()
    }

    pub fn diagnostics(&self, document: &Document) -> Vec<Diagnostic> {
        self.collect("diagnostics", |analyzer| analyzer.diagnostics(document))
    }

    pub fn definitions(&self, query: &Query<'_>) -> Vec<Location> {
        self.collect("definitions", |analyzer| analyzer.definitions(query))
    }

    pub fn references(&self, query: &Query<'_>) -> Vec<Location> {
        self.collect("references", |analyzer| analyzer.references(query))
    }

    pub fn completions(&self, query: &Query<'_>) -> Vec<CompletionItem> {
        self.collect("completions", |analyzer| analyzer.completions(query))
    }

    /// First hover any analyzer produces, in registration order.
    pub fn hover(&self, query: &Query<'_>) -> Option<Hover> {
        self.analyzers
            .iter()
            .find_map(|analyzer| isolated(analyzer.id(), "hover", || analyzer.hover(query)).flatten())
    }

    /// Tokens from every analyzer, sorted by position.
    pub fn semantic_tokens(&self, document: &Document) -> Vec<SemanticTokenEntry> {
        let mut tokens = self.collect("semantic_tokens", |analyzer| {
            analyzer.semantic_tokens(document)
        });
        tokens.sort();
        tokens.dedup_by(|a, b| a.line == b.line && a.character == b.character);
        tokens
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kemi_front::DocumentStore;
    use parking_lot::Mutex;

    use super::*;

    struct Recorder {
        id: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Analyzer for Recorder {
        fn id(&self) -> &'static str {
            self.id
        }

        fn analyze(&mut self, _cx: &AnalysisContext<'_>) -> Result<(), AnalysisError> {
            self.log.lock().push(self.id);
            Ok(())
        }

        fn diagnostics(&self, _document: &Document) -> Result<Vec<Diagnostic>, AnalysisError> {
            Ok(vec![Diagnostic {
                message: self.id.to_string(),
                ..Default::default()
            }])
        }
    }

    struct Panicker;

    impl Analyzer for Panicker {
        fn id(&self) -> &'static str {
            "panicker"
        }

        fn analyze(&mut self, _cx: &AnalysisContext<'_>) -> Result<(), AnalysisError> {
            panic!("boom");
        }

        fn diagnostics(&self, _document: &Document) -> Result<Vec<Diagnostic>, AnalysisError> {
            Err(AnalysisError::Inconsistent {
                analyzer: "panicker",
                message: "no state".to_string(),
            })
        }
    }

    fn recorder(id: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Box<dyn Analyzer> {
        Box::new(Recorder {
            id,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let log = Arc::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(recorder("pv", &log)).unwrap();
        let error = dispatcher.register(recorder("pv", &log)).unwrap_err();
        assert_eq!(error, RegistrationError::DuplicateAnalyzer { id: "pv" });
        assert_eq!(error.to_string(), "analyzer `pv` is already registered");
        assert_eq!(dispatcher.ids(), vec!["pv"]);
    }

    #[test]
    fn test_faults_are_isolated_and_order_kept() {
        let log = Arc::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(recorder("first", &log)).unwrap();
        dispatcher.register(Box::new(Panicker)).unwrap();
        dispatcher.register(recorder("last", &log)).unwrap();

        let store = DocumentStore::new();
        let document = store.open("file:///a.py", "x = 1\n", 1).unwrap();
        let source = document.source();
        let cx = AnalysisContext {
            document: &document,
            source: &source,
            changes: None,
            workspace: WorkspaceView {
                documents: &store,
                roots: &[],
            },
        };

        let failed = dispatcher.analyze(&cx);
        assert_eq!(failed, vec!["panicker"]);
        assert_eq!(*log.lock(), vec!["first", "last"]);

        let messages: Vec<String> = dispatcher
            .diagnostics(&document)
            .into_iter()
            .map(|d| d.message)
            .collect();
        assert_eq!(messages, vec!["first", "last"]);
    }
}
