//! Per-document index of pseudo-variable occurrences.
//!
//! Rebuilt from scratch on every analysis of its document; never patched.

use std::ops::Range;

use indexmap::IndexMap;
use kemi_pv::ParsedPv;

/// One concrete appearance of a PV in a document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PvOccurrence {
    pub pv: ParsedPv,
    /// KEMI method whose argument holds the PV (`sets`, `get`, ...).
    pub method: String,
    pub is_write: bool,
    /// Byte span in the document.
    pub span: Range<usize>,
    pub range: lsp_types::Range,
    /// Routine the access happens in.
    pub scope: String,
}

impl PvOccurrence {
    pub fn identity_key(&self) -> String {
        self.pv.identity_key()
    }
}

#[derive(Clone, Debug, Default)]
pub struct VariableIndex {
    by_identity: IndexMap<String, Vec<PvOccurrence>>,
    by_position: Vec<PvOccurrence>,
}

impl VariableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_occurrences(occurrences: impl IntoIterator<Item = PvOccurrence>) -> Self {
        let mut index = Self::new();
        for occurrence in occurrences {
            index.add(occurrence);
        }
        index
    }

    pub fn add(&mut self, occurrence: PvOccurrence) {
        let at = self
            .by_position
            .partition_point(|existing| existing.span.start <= occurrence.span.start);
        self.by_position.insert(at, occurrence.clone());
        self.by_identity
            .entry(occurrence.identity_key())
            .or_default()
            .push(occurrence);
    }

    /// The occurrence whose half-open span contains `offset`.
    pub fn find_at_offset(&self, offset: usize) -> Option<&PvOccurrence> {
        let after = self
            .by_position
            .partition_point(|occurrence| occurrence.span.start <= offset);
        let candidate = self.by_position.get(after.checked_sub(1)?)?;
        candidate.span.contains(&offset).then_some(candidate)
    }

    pub fn get_by_identity(&self, key: &str) -> &[PvOccurrence] {
        self.by_identity.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_all_writes(&self, key: &str) -> impl Iterator<Item = &PvOccurrence> {
        self.get_by_identity(key).iter().filter(|o| o.is_write)
    }

    pub fn get_first_write(&self, key: &str) -> Option<&PvOccurrence> {
        self.get_all_writes(key).next()
    }

    /// Identity keys in first-seen order.
    pub fn get_all_identities(&self) -> impl Iterator<Item = &str> {
        self.by_identity.keys().map(String::as_str)
    }

    /// All occurrences in document order.
    pub fn occurrences(&self) -> &[PvOccurrence] {
        &self.by_position
    }

    pub fn len(&self) -> usize {
        self.by_position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_position.is_empty()
    }
}
