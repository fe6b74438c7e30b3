//! Front end for KEMI routing scripts.
//!
//! Owns document text and incrementally maintained tree-sitter Python trees,
//! plus the position and URI conversions every consumer needs.

pub mod document;
pub mod position;
pub mod uri;

pub use document::{BufferError, ChangeSummary, Document, DocumentStore, parse_with_thread_local};
pub use position::{offset_from_position, position_from_offset, range_from_offsets};
pub use uri::{canonical_uri, path_to_uri, uri_parent_dir, uri_to_path};
