use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

use kemi_front::Document;
use lsp_types::{CompletionItem, CompletionItemKind, Diagnostic, DiagnosticSeverity, Hover, Location};

use crate::analysis::extractor::extract_pv_occurrences;
use crate::analysis::syntax::{ksr_string_call_at, ksr_string_calls};
use crate::analysis::{
    AnalysisContext, AnalysisError, Analyzer, Query, WorkspaceView, codes, diagnostic, location,
    markdown_hover,
};

/// `(method, is_write)` for `KSR.htable` methods taking a table name first.
const HTABLE_METHODS: &[(&str, bool)] = &[
    ("sht_get", false),
    ("sht_gete", false),
    ("sht_is_null", false),
    ("sht_match_name", false),
    ("sht_match_str_value", false),
    ("sht_sets", true),
    ("sht_seti", true),
    ("sht_setex", true),
    ("sht_setxs", true),
    ("sht_setxi", true),
    ("sht_rm", true),
    ("sht_rm_name", true),
    ("sht_rm_value", true),
    ("sht_rm_name_re", true),
    ("sht_rm_value_re", true),
    ("sht_reset", true),
    ("sht_inc", true),
    ("sht_dec", true),
];

/// PV classes addressing `table=>key`; the counters modify the table.
const TABLE_CLASSES: &[(&str, bool)] = &[
    ("sht", false),
    ("shtex", false),
    ("shtcn", false),
    ("shtcv", false),
    ("shtinc", true),
    ("shtdec", true),
];

fn htable_access(module: &str, method: &str) -> Option<bool> {
    if module != "htable" {
        return None;
    }
    HTABLE_METHODS
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, is_write)| *is_write)
}

#[derive(Clone, Debug)]
struct TableUse {
    table: String,
    is_write: bool,
    span: Range<usize>,
    range: lsp_types::Range,
}

/// Hash table names used through `KSR.htable.*` and `$sht(...)`-style PVs.
pub struct HtableAnalyzer {
    declared: BTreeSet<String>,
    uses: HashMap<String, Vec<TableUse>>,
}

impl HtableAnalyzer {
    pub fn new(declared: &[String]) -> Self {
        Self {
            declared: declared.iter().cloned().collect(),
            uses: HashMap::new(),
        }
    }

    fn use_at(&self, query: &Query<'_>) -> Option<&TableUse> {
        self.uses
            .get(query.document.uri())?
            .iter()
            .find(|table| table.span.start <= query.offset && query.offset <= table.span.end)
    }

    fn is_written(&self, table: &str) -> bool {
        self.declared.contains(table)
            || self
                .uses
                .values()
                .flatten()
                .any(|other| other.is_write && other.table == table)
    }

    fn locations_of(&self, table: &str, writes_only: bool) -> Vec<Location> {
        let mut uris: Vec<&String> = self.uses.keys().collect();
        uris.sort();
        uris.into_iter()
            .flat_map(|uri| {
                self.uses[uri]
                    .iter()
                    .filter(move |other| other.table == table && (!writes_only || other.is_write))
                    .filter_map(move |other| location(uri, other.range))
            })
            .collect()
    }

    fn known_tables(&self) -> BTreeSet<&str> {
        self.declared
            .iter()
            .map(String::as_str)
            .chain(self.uses.values().flatten().map(|used| used.table.as_str()))
            .collect()
    }
}

impl Analyzer for HtableAnalyzer {
    fn id(&self) -> &'static str {
        "htable"
    }

    fn analyze(&mut self, cx: &AnalysisContext<'_>) -> Result<(), AnalysisError> {
        let root = cx.document.tree().root_node();
        let mut uses: Vec<TableUse> = ksr_string_calls(root, cx.source)
            .into_iter()
            .filter_map(|call| {
                let is_write = htable_access(&call.module, &call.method)?;
                Some(TableUse {
                    range: cx.document.range_of(call.content_span.clone()),
                    table: call.content,
                    is_write,
                    span: call.content_span,
                })
            })
            .collect();

        for occurrence in extract_pv_occurrences(cx.document, cx.source) {
            let Some((_, modifies)) = TABLE_CLASSES
                .iter()
                .find(|(class, _)| *class == occurrence.pv.class)
            else {
                continue;
            };
            let Some(table) = occurrence.pv.table_name() else {
                continue;
            };
            uses.push(TableUse {
                table: table.to_string(),
                is_write: occurrence.is_write || *modifies,
                span: occurrence.span.clone(),
                range: occurrence.range,
            });
        }
        uses.sort_by_key(|used| used.span.start);
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
        let Some(uses) = self.uses.get(document.uri()) else {
            return Ok(Vec::new());
        };
        Ok(uses
            .iter()
            .filter(|used| !used.is_write && !used.table.is_empty() && !self.is_written(&used.table))
            .map(|used| {
                diagnostic(
                    used.range,
                    DiagnosticSeverity::WARNING,
                    codes::HTABLE_NEVER_WRITTEN,
                    format!("Hash table `{}` is read but never written", used.table),
                )
            })
            .collect())
    }

    fn definitions(&self, query: &Query<'_>) -> Result<Vec<Location>, AnalysisError> {
        Ok(self
            .use_at(query)
            .map(|used| self.locations_of(&used.table, true))
            .unwrap_or_default())
    }

    fn references(&self, query: &Query<'_>) -> Result<Vec<Location>, AnalysisError> {
        Ok(self
            .use_at(query)
            .map(|used| self.locations_of(&used.table, false))
            .unwrap_or_default())
    }

    fn hover(&self, query: &Query<'_>) -> Result<Option<Hover>, AnalysisError> {
        // `$sht(...)` occurrences are described by the PV analyzer.
        let Some(used) = self.use_at(query) else {
            return Ok(None);
        };
        let all = self.uses.values().flatten().filter(|other| other.table == used.table);
        let (writes, reads) = all.fold((0, 0), |(w, r), other| {
            if other.is_write { (w + 1, r) } else { (w, r + 1) }
        });
        let declared = if self.declared.contains(&used.table) {
            ", declared in configuration"
        } else {
            ""
        };
        Ok(Some(markdown_hover(
            format!(
                "Hash table `{}`: {writes} write(s), {reads} read(s){declared}",
                used.table
            ),
            used.range,
        )))
    }

    fn completions(&self, query: &Query<'_>) -> Result<Vec<CompletionItem>, AnalysisError> {
        let root = query.document.tree().root_node();
        let Some(call) = ksr_string_call_at(root, query.source, query.offset) else {
            return Ok(Vec::new());
        };
        if htable_access(&call.module, &call.method).is_none() {
            return Ok(Vec::new());
        }
        let prefix = call
            .content
            .get(..query.offset - call.content_span.start)
            .unwrap_or("");
        Ok(self
            .known_tables()
            .into_iter()
            .filter(|table| !table.is_empty() && table.starts_with(prefix) && *table != prefix)
            .map(|table| CompletionItem {
                label: table.to_string(),
                kind: Some(CompletionItemKind::STRUCT),
                detail: Some("hash table".to_string()),
                ..Default::default()
            })
            .collect())
    }
}
