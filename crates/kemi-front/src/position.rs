//! Conversions between LSP positions, byte offsets and tree-sitter points.
//!
//! LSP positions count UTF-16 code units per line. Byte offsets and
//! tree-sitter columns count UTF-8 bytes.
//!
//! Lines end at `\n`, `\r\n` or `\r` only, as in LSP; the workspace builds
//! ropey without `unicode_lines`. Tree-sitter rows only count `\n`.

use lsp_types::{Position, Range};
use ropey::Rope;
use tree_sitter::Point;

/// Byte offset of an LSP position.
///
/// Lines past the end clamp to the end of the text, columns past the end of a
/// line clamp to the end of that line.
pub fn offset_from_position(rope: &Rope, position: Position) -> usize {
    let line = position.line as usize;
    if line >= rope.len_lines() {
        return rope.len_bytes();
    }
    let line_start_char = rope.line_to_char(line);
    let slice = line_without_newline(rope, line);
    let utf16_offset = (position.character as usize).min(slice.len_utf16_cu());
    let char_offset = slice.utf16_cu_to_char(utf16_offset);
    rope.char_to_byte(line_start_char + char_offset)
}

/// LSP position of a byte offset. Offsets past the end clamp to the end.
pub fn position_from_offset(rope: &Rope, offset: usize) -> Position {
    let offset = offset.min(rope.len_bytes());
    let char_index = rope.byte_to_char(offset);
    let line = rope.char_to_line(char_index);
    let line_start_char = rope.line_to_char(line);
    let slice = line_without_newline(rope, line);
    let char_in_line = char_index
        .saturating_sub(line_start_char)
        .min(slice.len_chars());
    let utf16 = slice.char_to_utf16_cu(char_in_line);
    Position::new(line as u32, utf16 as u32)
}

/// LSP range covering `start..end` byte offsets.
pub fn range_from_offsets(rope: &Rope, start: usize, end: usize) -> Range {
    Range::new(
        position_from_offset(rope, start),
        position_from_offset(rope, end),
    )
}

/// Tree-sitter point (row, byte column) of a byte offset.
pub fn byte_point(rope: &Rope, offset: usize) -> Point {
    let offset = offset.min(rope.len_bytes());
    let mut point = Point { row: 0, column: 0 };
    for chunk in rope.byte_slice(..offset).chunks() {
        for byte in chunk.bytes() {
            if byte == b'\n' {
                point.row += 1;
                point.column = 0;
            } else {
                point.column += 1;
            }
        }
    }
    point
}

/// Point reached after inserting `text` at `start`.
pub fn point_after_text(start: Point, text: &str) -> Point {
    let mut row = start.row;
    let mut column = start.column;
    let mut lines = text.split('\n');
    if let Some(first) = lines.next() {
        column += first.len();
    }
    for line in lines {
        row += 1;
        column = line.len();
    }
    Point { row, column }
}

fn line_without_newline(rope: &Rope, line: usize) -> ropey::RopeSlice<'_> {
    let line_slice = rope.line(line);
    let mut end = line_slice.len_chars();
    if end > 0 && line_slice.char(end - 1) == '\n' {
        end -= 1;
    }
    if end > 0 && line_slice.char(end - 1) == '\r' {
        end -= 1;
    }
    line_slice.slice(..end)
}
