//! Source buffers with incrementally maintained syntax trees.
//!
//! Each known document owns its text and the tree parsed from it. Ranged edits
//! are applied one after another, each against the text produced by the
//! previous one, and the old tree is reused for every reparse.

use std::cell::RefCell;
use std::ops::Range;

use dashmap::DashMap;
use derive_more::{Display, Error};
use lsp_types::TextDocumentContentChangeEvent;
use ropey::Rope;
use tree_sitter::{InputEdit, Parser, Tree};

use crate::position::{byte_point, offset_from_position, point_after_text, range_from_offsets};

thread_local! {
    static PARSER: RefCell<Option<Parser>> = RefCell::new(python_parser());
}

fn python_parser() -> Option<Parser> {
    let mut parser = Parser::new();
    match parser.set_language(&tree_sitter_python::LANGUAGE.into()) {
        Ok(()) => Some(parser),
        Err(error) => {
            tracing::error!(%error, "Python grammar rejected by tree-sitter");
            None
        }
    }
}

/// Parse `text`, reusing `old_tree` when given.
pub fn parse_with_thread_local(text: &Rope, old_tree: Option<&Tree>) -> Option<Tree> {
    PARSER.with(|parser| {
        let mut parser = parser.borrow_mut();
        let parser = parser.as_mut()?;
        parser.parse(text.to_string(), old_tree)
    })
}

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[display("document {uri} is not open")]
    UnknownDocument { uri: String },
    #[display("failed to parse {uri}")]
    ParseFailed { uri: String },
}

/// One document: its text, syntax tree and editor version.
#[derive(Clone, Debug)]
pub struct Document {
    uri: String,
    text: Rope,
    tree: Tree,
    version: i32,
}

impl Document {
    /// Parse `text` from scratch.
    pub fn parse(uri: &str, text: &str, version: i32) -> Result<Self, BufferError> {
        let text = Rope::from_str(text);
        let tree = parse_with_thread_local(&text, None).ok_or_else(|| BufferError::ParseFailed {
            uri: uri.to_owned(),
        })?;
        Ok(Self {
            uri: uri.to_owned(),
            text,
            tree,
            version,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn text(&self) -> &Rope {
        &self.text
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    /// Contiguous copy of the text, for byte-indexed node access.
    pub fn source(&self) -> String {
        self.text.to_string()
    }

    /// Byte offset of an LSP position in this document.
    pub fn offset_at(&self, position: lsp_types::Position) -> usize {
        offset_from_position(&self.text, position)
    }

    /// LSP range of a byte range in this document.
    pub fn range_of(&self, span: Range<usize>) -> lsp_types::Range {
        range_from_offsets(&self.text, span.start, span.end)
    }

    fn apply_change(
        &mut self,
        change: &TextDocumentContentChangeEvent,
        summary: &mut ChangeSummary,
    ) -> Result<(), BufferError> {
        let Some(range) = change.range else {
            self.text = Rope::from_str(&change.text);
            self.tree = self.reparse(None)?;
            summary.full_reparse = true;
            summary.changed_ranges.clear();
            return Ok(());
        };

        let start_byte = offset_from_position(&self.text, range.start);
        let old_end_byte = offset_from_position(&self.text, range.end).max(start_byte);
        let start_position = byte_point(&self.text, start_byte);
        let old_end_position = byte_point(&self.text, old_end_byte);
        let edit = InputEdit {
            start_byte,
            old_end_byte,
            new_end_byte: start_byte + change.text.len(),
            start_position,
            old_end_position,
            new_end_position: point_after_text(start_position, &change.text),
        };

        let start_char = self.text.byte_to_char(start_byte);
        let old_end_char = self.text.byte_to_char(old_end_byte);
        self.text.remove(start_char..old_end_char);
        self.text.insert(start_char, &change.text);

        let mut old_tree = self.tree.clone();
        old_tree.edit(&edit);
        let new_tree = self.reparse(Some(&old_tree))?;

        for span in summary.changed_ranges.iter_mut() {
            *span = shift_span(span.clone(), &edit);
        }
        summary.changed_ranges.extend(
            old_tree
                .changed_ranges(&new_tree)
                .map(|r| r.start_byte..r.end_byte),
        );
        // Token text can change without any structural difference.
        summary
            .changed_ranges
            .push(edit.start_byte..edit.new_end_byte);

        self.tree = new_tree;
        Ok(())
    }

    fn reparse(&self, old_tree: Option<&Tree>) -> Result<Tree, BufferError> {
        parse_with_thread_local(&self.text, old_tree).ok_or_else(|| BufferError::ParseFailed {
            uri: self.uri.clone(),
        })
    }
}

/// What a change batch did to a document's tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    /// A full-text replacement happened; consumers must rebuild everything.
    pub full_reparse: bool,
    /// Sorted, non-overlapping byte ranges of the final text that differ from
    /// the text before the batch.
    pub changed_ranges: Vec<Range<usize>>,
}

/// Map a byte range of the pre-edit text onto the post-edit text.
fn shift_span(span: Range<usize>, edit: &InputEdit) -> Range<usize> {
    if span.end <= edit.start_byte {
        return span;
    }
    let shift = |offset: usize| offset + edit.new_end_byte - edit.old_end_byte.min(offset);
    if span.start >= edit.old_end_byte {
        let delta_start = span.start - edit.old_end_byte;
        let delta_end = span.end - edit.old_end_byte;
        return edit.new_end_byte + delta_start..edit.new_end_byte + delta_end;
    }
    let start = span.start.min(edit.start_byte);
    let end = if span.end > edit.old_end_byte {
        shift(span.end)
    } else {
        edit.new_end_byte
    };
    start..end.max(edit.new_end_byte)
}

fn coalesce(mut spans: Vec<Range<usize>>) -> Vec<Range<usize>> {
    spans.sort_by_key(|span| (span.start, span.end));
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// All documents known to the workspace, keyed by URI.
#[derive(Default)]
pub struct DocumentStore {
    documents: DashMap<String, Document>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and store a document, replacing any previous state for `uri`.
    pub fn open(&self, uri: &str, text: &str, version: i32) -> Result<Document, BufferError> {
        let document = Document::parse(uri, text, version)?;
        tracing::debug!(uri, version, "Document parsed");
        self.documents.insert(uri.to_owned(), document.clone());
        Ok(document)
    }

    /// Apply a batch of edits in order and reparse incrementally.
    ///
    /// The stored document is only replaced once the whole batch succeeded.
    pub fn change(
        &self,
        uri: &str,
        changes: &[TextDocumentContentChangeEvent],
        version: i32,
    ) -> Result<(Document, ChangeSummary), BufferError> {
        let mut entry =
            self.documents
                .get_mut(uri)
                .ok_or_else(|| BufferError::UnknownDocument {
                    uri: uri.to_owned(),
                })?;

        let mut updated = entry.value().clone();
        let mut summary = ChangeSummary::default();
        for change in changes {
            updated.apply_change(change, &mut summary)?;
        }
        updated.version = version;
        summary.changed_ranges = coalesce(summary.changed_ranges);

        tracing::debug!(
            uri,
            version,
            full = summary.full_reparse,
            ranges = summary.changed_ranges.len(),
            "Document changed"
        );

        *entry.value_mut() = updated.clone();
        Ok((updated, summary))
    }

    /// Forget a document. Returns whether it was known.
    pub fn close(&self, uri: &str) -> bool {
        self.documents.remove(uri).is_some()
    }

    /// Snapshot of a document.
    pub fn get(&self, uri: &str) -> Option<Document> {
        self.documents.get(uri).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.documents.contains_key(uri)
    }

    /// URIs of every known document, sorted.
    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.documents.iter().map(|e| e.key().clone()).collect();
        uris.sort();
        uris
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{Position, Range as LspRange};

    fn ranged(start: (u32, u32), end: (u32, u32), text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: Some(LspRange::new(
                Position::new(start.0, start.1),
                Position::new(end.0, end.1),
            )),
            range_length: None,
            text: text.to_string(),
        }
    }

    fn full(text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_open_parses_python() {
        let store = DocumentStore::new();
        let doc = store.open("file:///a.py", "def f():\n    pass\n", 1).unwrap();
        assert_eq!(doc.tree().root_node().kind(), "module");
        assert!(!doc.tree().root_node().has_error());
    }

    #[test]
    fn test_malformed_input_is_tolerated() {
        let store = DocumentStore::new();
        let doc = store.open("file:///a.py", "def (:\n  KSR.pv.sets(", 1).unwrap();
        assert!(doc.tree().root_node().has_error());
    }

    #[test]
    fn test_ranged_edit_updates_text_and_tree() {
        let store = DocumentStore::new();
        store.open("file:///a.py", "x = 1\n", 1).unwrap();
        let (doc, summary) = store
            .change("file:///a.py", &[ranged((0, 4), (0, 5), "'$var(a)'")], 2)
            .unwrap();
        assert_eq!(doc.source(), "x = '$var(a)'\n");
        assert_eq!(doc.version(), 2);
        assert!(!summary.full_reparse);
        assert!(summary.changed_ranges.iter().any(|r| r.start <= 4 && r.end >= 13));
        let fresh = Document::parse("file:///b.py", "x = '$var(a)'\n", 1).unwrap();
        assert_eq!(
            doc.tree().root_node().to_sexp(),
            fresh.tree().root_node().to_sexp()
        );
    }

    #[test]
    fn test_ranged_edit_after_form_feed_line() {
        let store = DocumentStore::new();
        store
            .open("file:///a.py", "x = 1\x0c\ny = 2\nz = 3\n", 1)
            .unwrap();
        let (doc, _) = store
            .change("file:///a.py", &[ranged((2, 0), (2, 1), "w")], 2)
            .unwrap();
        assert_eq!(doc.source(), "x = 1\x0c\ny = 2\nw = 3\n");
        assert_eq!(doc.range_of(13..14).start, Position::new(2, 0));
    }

    #[test]
    fn test_batch_edits_apply_progressively() {
        let store = DocumentStore::new();
        store.open("file:///a.py", "ab\n", 1).unwrap();
        // Second edit's coordinates refer to the text produced by the first.
        let (doc, _) = store
            .change(
                "file:///a.py",
                &[ranged((0, 0), (0, 0), "xyz"), ranged((0, 3), (0, 4), "")],
                2,
            )
            .unwrap();
        assert_eq!(doc.source(), "xyzb\n");
    }

    #[test]
    fn test_full_replacement_resets() {
        let store = DocumentStore::new();
        store.open("file:///a.py", "a = 1\n", 1).unwrap();
        let (doc, summary) = store
            .change("file:///a.py", &[full("b = 2\n")], 2)
            .unwrap();
        assert_eq!(doc.source(), "b = 2\n");
        assert!(summary.full_reparse);
    }

    #[test]
    fn test_change_unknown_document() {
        let store = DocumentStore::new();
        let err = store.change("file:///missing.py", &[full("")], 1).unwrap_err();
        assert_eq!(
            err,
            BufferError::UnknownDocument {
                uri: "file:///missing.py".to_string()
            }
        );
    }

    #[test]
    fn test_close_discards_state() {
        let store = DocumentStore::new();
        store.open("file:///a.py", "", 1).unwrap();
        assert!(store.close("file:///a.py"));
        assert!(store.get("file:///a.py").is_none());
        assert!(!store.close("file:///a.py"));
    }

    #[test]
    fn test_earlier_ranges_shift_with_later_edits() {
        let edit = InputEdit {
            start_byte: 0,
            old_end_byte: 0,
            new_end_byte: 3,
            start_position: tree_sitter::Point { row: 0, column: 0 },
            old_end_position: tree_sitter::Point { row: 0, column: 0 },
            new_end_position: tree_sitter::Point { row: 0, column: 3 },
        };
        assert_eq!(shift_span(10..12, &edit), 13..15);
        let deletion = InputEdit {
            start_byte: 5,
            old_end_byte: 9,
            new_end_byte: 5,
            start_position: tree_sitter::Point { row: 0, column: 5 },
            old_end_position: tree_sitter::Point { row: 0, column: 9 },
            new_end_position: tree_sitter::Point { row: 0, column: 5 },
        };
        assert_eq!(shift_span(0..2, &deletion), 0..2);
        assert_eq!(shift_span(6..12, &deletion), 5..8);
    }

    #[test]
    fn test_coalesce_merges_overlaps() {
        assert_eq!(coalesce(vec![5..8, 0..2, 1..3, 8..9]), vec![0..3, 5..9]);
    }
}
