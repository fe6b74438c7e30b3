//! PV references in `KSR.pv.*` calls.
//!
//! Read/write classification is a static table lookup; methods outside the
//! table are ignored.

use std::ops::Range;

use kemi_front::Document;
use kemi_pv::parse_pvs;

use super::syntax::{KsrStringCall, ksr_string_calls, ksr_string_calls_in};
use super::variable_index::PvOccurrence;

/// `(module, method, is_write)` for every KEMI method taking a PV name.
const PV_METHODS: &[(&str, &str, bool)] = &[
    ("pv", "get", false),
    ("pv", "gete", false),
    ("pv", "getw", false),
    ("pv", "getvs", false),
    ("pv", "getvn", false),
    ("pv", "is_null", false),
    ("pv", "sets", true),
    ("pv", "seti", true),
    ("pv", "unset", true),
    ("pvx", "pv_printf", true),
];

/// Whether `KSR.module.method` writes its PV argument, or `None` if it is not
/// a PV access method.
pub fn pv_access(module: &str, method: &str) -> Option<bool> {
    PV_METHODS
        .iter()
        .find(|(m, name, _)| *m == module && *name == method)
        .map(|(_, _, is_write)| *is_write)
}

/// All PV method names, for completion and documentation.
pub fn pv_methods() -> impl Iterator<Item = (&'static str, &'static str, bool)> {
    PV_METHODS.iter().copied()
}

fn occurrences_of(document: &Document, call: KsrStringCall) -> Vec<PvOccurrence> {
    let Some(is_write) = pv_access(&call.module, &call.method) else {
        return Vec::new();
    };
    parse_pvs(&call.content)
        .into_iter()
        .map(|pv| {
            let start = call.content_span.start + pv.offset;
            let span = start..start + pv.length;
            PvOccurrence {
                range: document.range_of(span.clone()),
                pv,
                method: call.method.clone(),
                is_write,
                span,
                scope: call.scope.clone(),
            }
        })
        .collect()
}

/// Every PV occurrence in the document, in document order.
pub fn extract_pv_occurrences(document: &Document, source: &str) -> Vec<PvOccurrence> {
    ksr_string_calls(document.tree().root_node(), source)
        .into_iter()
        .flat_map(|call| occurrences_of(document, call))
        .collect()
}

/// PV occurrences in the statements touched by `ranges`.
pub fn extract_pv_occurrences_in(
    document: &Document,
    source: &str,
    ranges: &[Range<usize>],
) -> Vec<PvOccurrence> {
    ksr_string_calls_in(document.tree().root_node(), source, ranges)
        .into_iter()
        .flat_map(|call| occurrences_of(document, call))
        .collect()
}
