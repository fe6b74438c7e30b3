//! Shared helpers for workspace scenario tests.

use kemi_analyzer::{AnalysisHost, Config};
use lsp_types::{NumberOrString, Position, Range, TextDocumentContentChangeEvent};

pub fn host() -> AnalysisHost {
    AnalysisHost::new(Config::default()).expect("default analyzers register")
}

/// `(line, code)` of every diagnostic the host reports for `uri`.
pub fn diagnostic_codes(host: &AnalysisHost, uri: &str) -> Vec<(u32, String)> {
    host.diagnostics(uri)
        .into_iter()
        .map(|d| {
            let code = match d.code {
                Some(NumberOrString::String(code)) => code,
                other => format!("{other:?}"),
            };
            (d.range.start.line, code)
        })
        .collect()
}

/// Insert `text` at `(line, character)`.
#[allow(dead_code)]
pub fn insert_at(line: u32, character: u32, text: &str) -> TextDocumentContentChangeEvent {
    let at = Position::new(line, character);
    TextDocumentContentChangeEvent {
        range: Some(Range::new(at, at)),
        range_length: None,
        text: text.to_string(),
    }
}
