//! Terminal rendering of analyzer diagnostics for the CLI.

use std::io::Write;

use ariadne::{Color, IndexType, Label, Report, ReportKind, Source};
use kemi_front::{Document, offset_from_position};
use lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString};

/// Report kind and label color for a diagnostic severity.
pub fn severity_style(severity: Option<DiagnosticSeverity>) -> (ReportKind<'static>, Color) {
    match severity {
        Some(DiagnosticSeverity::ERROR) => (ReportKind::Error, Color::Red),
        Some(DiagnosticSeverity::INFORMATION) | Some(DiagnosticSeverity::HINT) => {
            (ReportKind::Advice, Color::Cyan)
        }
        _ => (ReportKind::Warning, Color::Yellow),
    }
}

pub fn is_error(diagnostic: &Diagnostic) -> bool {
    diagnostic.severity == Some(DiagnosticSeverity::ERROR)
}

/// Normalize a span to ensure end > start (required by ariadne).
pub fn normalize_span(start: usize, end: usize) -> (usize, usize) {
    (start, end.max(start + 1))
}

fn code_of(diagnostic: &Diagnostic) -> Option<String> {
    match diagnostic.code.as_ref()? {
        NumberOrString::String(code) => Some(code.clone()),
        NumberOrString::Number(code) => Some(code.to_string()),
    }
}

/// Write one report for `diagnostic` against `document`'s text.
pub fn write_diagnostic(
    out: &mut impl Write,
    diagnostic: &Diagnostic,
    document: &Document,
    file_path: &str,
    color: bool,
) -> std::io::Result<()> {
    let text = document.text();
    let (start, end) = normalize_span(
        offset_from_position(text, diagnostic.range.start),
        offset_from_position(text, diagnostic.range.end),
    );
    let (kind, label_color) = severity_style(diagnostic.severity);

    let mut report = Report::build(kind, (file_path, start..end))
        .with_config(
            ariadne::Config::default()
                .with_color(color)
                .with_index_type(IndexType::Byte),
        )
        .with_message(&diagnostic.message)
        .with_label(
            Label::new((file_path, start..end))
                .with_message(&diagnostic.message)
                .with_color(label_color),
        );
    if let Some(code) = code_of(diagnostic) {
        report = report.with_code(code);
    }
    report
        .finish()
        .write((file_path, Source::from(text.to_string())), out)
}
