use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

use kemi_front::Document;
use lsp_types::{CompletionItem, CompletionItemKind, Diagnostic, DiagnosticSeverity, Location};

use crate::analysis::extractor::extract_pv_occurrences;
use crate::analysis::syntax::{ksr_string_call_at, ksr_string_calls};
use crate::analysis::{
    AnalysisContext, AnalysisError, Analyzer, Query, WorkspaceView, codes, diagnostic, location,
};

const STATISTIC_METHODS: &[&str] = &["update_stat", "reset_stat", "get_stat"];

fn is_statistic_call(module: &str, method: &str) -> bool {
    module == "statistics" && STATISTIC_METHODS.contains(&method)
}

#[derive(Clone, Debug)]
struct StatisticUse {
    name: String,
    span: Range<usize>,
    range: lsp_types::Range,
}

/// Statistic names from `KSR.statistics.*` calls and `$stat(name)`.
///
/// Names are only checked when the configuration declares some.
pub struct StatisticsAnalyzer {
    declared: BTreeSet<String>,
    uses: HashMap<String, Vec<StatisticUse>>,
}

impl StatisticsAnalyzer {
    pub fn new(declared: &[String]) -> Self {
        Self {
            declared: declared.iter().cloned().collect(),
            uses: HashMap::new(),
        }
    }

    fn use_at(&self, query: &Query<'_>) -> Option<&StatisticUse> {
        self.uses
            .get(query.document.uri())?
            .iter()
            .find(|stat| stat.span.start <= query.offset && query.offset <= stat.span.end)
    }
}

impl Analyzer for StatisticsAnalyzer {
    fn id(&self) -> &'static str {
        "statistics"
    }

    fn analyze(&mut self, cx: &AnalysisContext<'_>) -> Result<(), AnalysisError> {
        let root = cx.document.tree().root_node();
        let mut uses: Vec<StatisticUse> = ksr_string_calls(root, cx.source)
            .into_iter()
            .filter(|call| is_statistic_call(&call.module, &call.method))
            .map(|call| StatisticUse {
                range: cx.document.range_of(call.content_span.clone()),
                name: call.content,
                span: call.content_span,
            })
            .collect();
        uses.extend(
            extract_pv_occurrences(cx.document, cx.source)
                .into_iter()
                .filter(|occurrence| occurrence.pv.class == "stat")
                .filter_map(|occurrence| {
                    Some(StatisticUse {
                        name: occurrence.pv.inner_name.clone()?,
                        span: occurrence.span,
                        range: occurrence.range,
                    })
                }),
        );
        uses.sort_by_key(|stat| stat.span.start);
        self.uses.insert(cx.document.uri().to_string(), uses);
        Ok(())
    }

    fn document_removed(
        &mut self,
        uri: &str,
        _workspace: WorkspaceView<'_>,
    ) -> Result<(), AnalysisError> {
        self.uses.remove(uri);
        Ok(())
    }

    fn diagnostics(&self, document: &Document) -> Result<Vec<Diagnostic>, AnalysisError> {
        if self.declared.is_empty() {
            return Ok(Vec::new());
        }
        let Some(uses) = self.uses.get(document.uri()) else {
            return Ok(Vec::new());
        };
        Ok(uses
            .iter()
            .filter(|stat| !self.declared.contains(&stat.name))
            .map(|stat| {
                diagnostic(
                    stat.range,
                    DiagnosticSeverity::WARNING,
                    codes::STATISTIC_UNDECLARED,
                    format!("Statistic `{}` is not declared", stat.name),
                )
            })
            .collect())
    }

    fn references(&self, query: &Query<'_>) -> Result<Vec<Location>, AnalysisError> {
        let Some(stat) = self.use_at(query) else {
            return Ok(Vec::new());
        };
        let mut uris: Vec<&String> = self.uses.keys().collect();
        uris.sort();
        Ok(uris
            .into_iter()
            .flat_map(|uri| {
                self.uses[uri]
                    .iter()
                    .filter(move |other| other.name == stat.name)
                    .filter_map(move |other| location(uri, other.range))
            })
            .collect())
    }

    fn completions(&self, query: &Query<'_>) -> Result<Vec<CompletionItem>, AnalysisError> {
        let root = query.document.tree().root_node();
        let Some(call) = ksr_string_call_at(root, query.source, query.offset) else {
            return Ok(Vec::new());
        };
        if !is_statistic_call(&call.module, &call.method) {
            return Ok(Vec::new());
        }
        let prefix = call
            .content
            .get(..query.offset - call.content_span.start)
            .unwrap_or("");
        Ok(self
            .declared
            .iter()
            .filter(|name| name.starts_with(prefix))
            .map(|name| CompletionItem {
                label: name.clone(),
                kind: Some(CompletionItemKind::CONSTANT),
                detail: Some("statistic".to_string()),
                ..Default::default()
            })
            .collect())
    }
}
