//! Scanner for pseudo-variable occurrences inside a string literal body.
//!
//! Alternatives are tried in order at every `$`, most specific first:
//!
//! ```text
//! $(class(inner)[index])   bracketed form, inner and index optional
//! $class(inner)            class with an opaque payload
//! $class                   bare class
//! $@path                   select alias, class `sel`
//! ```
//!
//! `$$` is an escaped dollar and never starts a match. The scanner only moves
//! forward, so it terminates after at most `input.len()` steps.

use crate::classify::{PvCategory, category_of};

/// A single pseudo-variable found in a string.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParsedPv {
    /// Exact text of the match, `input[offset..offset + length]`.
    pub full_match: String,
    /// Class name (`var` in `$var(x)`).
    pub class: String,
    /// Payload between the parentheses, verbatim. `None` for bare forms.
    pub inner_name: Option<String>,
    /// Subscript of the bracketed form (`0` in `$(avp(x)[0])`).
    pub index: Option<String>,
    /// Byte offset of the leading `$` relative to the input start.
    pub offset: usize,
    /// Byte length of the match.
    pub length: usize,
    /// True when no inner payload was given.
    pub is_bare: bool,
    pub category: PvCategory,
}

impl ParsedPv {
    /// Canonical key shared by every occurrence of the same variable.
    ///
    /// `class` for bare forms, `class:inner` otherwise.
    pub fn identity_key(&self) -> String {
        if self.is_bare {
            self.class.clone()
        } else {
            format!("{}:{}", self.class, self.inner_name.as_deref().unwrap_or(""))
        }
    }

    /// Byte range of the match relative to the input start.
    pub fn span(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.length
    }

    /// Hash table name for `$sht(table=>key)`-style payloads.
    pub fn table_name(&self) -> Option<&str> {
        let inner = self.inner_name.as_deref()?;
        let table = inner.split("=>").next().unwrap_or(inner).trim();
        (!table.is_empty()).then_some(table)
    }
}

/// Parse every pseudo-variable in `input`, in source order.
pub fn parse_pvs(input: &str) -> Vec<ParsedPv> {
    let bytes = input.as_bytes();
    let mut found = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'$' {
            pos += 1;
            continue;
        }
        if bytes.get(pos + 1) == Some(&b'$') {
            pos += 2;
            continue;
        }

        let matched = scan_bracketed(input, pos)
            .or_else(|| scan_class(input, pos))
            .or_else(|| scan_alias(input, pos));

        match matched {
            Some(pv) => {
                pos = pv.offset + pv.length;
                found.push(pv);
            }
            None => pos += 1,
        }
    }

    found
}

struct Pieces<'a> {
    class: &'a str,
    inner: Option<&'a str>,
    index: Option<&'a str>,
}

fn build(input: &str, start: usize, end: usize, pieces: Pieces<'_>) -> ParsedPv {
    ParsedPv {
        full_match: input[start..end].to_string(),
        class: pieces.class.to_string(),
        inner_name: pieces.inner.map(str::to_string),
        index: pieces.index.map(str::to_string),
        offset: start,
        length: end - start,
        is_bare: pieces.inner.is_none(),
        category: category_of(pieces.class),
    }
}

/// `$(class(inner)[index])`
fn scan_bracketed(input: &str, start: usize) -> Option<ParsedPv> {
    let bytes = input.as_bytes();
    if bytes.get(start + 1) != Some(&b'(') {
        return None;
    }
    let class_start = start + 2;
    let class_end = identifier_end(bytes, class_start)?;
    let mut pos = class_end;

    let mut inner = None;
    if bytes.get(pos) == Some(&b'(') {
        let close = matching_paren(bytes, pos)?;
        inner = Some(&input[pos + 1..close]);
        pos = close + 1;
    }

    let mut index = None;
    if bytes.get(pos) == Some(&b'[') {
        let close = pos + 1 + bytes[pos + 1..].iter().position(|&b| b == b']')?;
        index = Some(&input[pos + 1..close]);
        pos = close + 1;
    }

    if bytes.get(pos) != Some(&b')') {
        return None;
    }

    let pieces = Pieces {
        class: &input[class_start..class_end],
        inner,
        index,
    };
    Some(build(input, start, pos + 1, pieces))
}

/// `$class(inner)` or bare `$class`
fn scan_class(input: &str, start: usize) -> Option<ParsedPv> {
    let bytes = input.as_bytes();
    let class_start = start + 1;
    let class_end = identifier_end(bytes, class_start)?;
    let class = &input[class_start..class_end];

    if bytes.get(class_end) == Some(&b'(')
        && let Some(close) = matching_paren(bytes, class_end)
    {
        let pieces = Pieces {
            class,
            inner: Some(&input[class_end + 1..close]),
            index: None,
        };
        return Some(build(input, start, close + 1, pieces));
    }

    let pieces = Pieces {
        class,
        inner: None,
        index: None,
    };
    Some(build(input, start, class_end, pieces))
}

/// `$@path`
fn scan_alias(input: &str, start: usize) -> Option<ParsedPv> {
    let bytes = input.as_bytes();
    if bytes.get(start + 1) != Some(&b'@') {
        return None;
    }
    let path_start = start + 2;
    let path_len = bytes[path_start..]
        .iter()
        .take_while(|&&b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
        .count();
    if path_len == 0 {
        return None;
    }
    let end = path_start + path_len;
    let pieces = Pieces {
        class: "sel",
        inner: Some(&input[path_start..end]),
        index: None,
    };
    Some(build(input, start, end, pieces))
}

/// End of an identifier starting at `start`, or `None` if there is none.
fn identifier_end(bytes: &[u8], start: usize) -> Option<usize> {
    let first = *bytes.get(start)?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let rest = bytes[start + 1..]
        .iter()
        .take_while(|&&b| b.is_ascii_alphanumeric() || b == b'_')
        .count();
    Some(start + 1 + rest)
}

/// Index of the `)` balancing the `(` at `open`.
fn matching_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    fn keys(input: &str) -> Vec<String> {
        parse_pvs(input).iter().map(ParsedPv::identity_key).collect()
    }

    #[test]
    fn test_no_dollar() {
        assert!(parse_pvs("").is_empty());
        assert!(parse_pvs("plain text (with) [brackets]").is_empty());
    }

    #[test]
    fn test_double_dollar_never_matches() {
        assert!(parse_pvs("$$").is_empty());
        assert!(parse_pvs("cost: $$var").is_empty());
        assert_eq!(keys("$$ then $ru"), vec!["ru"]);
    }

    #[test]
    fn test_bare_class() {
        let pvs = parse_pvs("$ru");
        assert_eq!(pvs.len(), 1);
        assert!(pvs[0].is_bare);
        assert_eq!(pvs[0].class, "ru");
        assert_eq!(pvs[0].identity_key(), "ru");
        assert_eq!(pvs[0].category, PvCategory::Uri);
    }

    #[test]
    fn test_class_with_inner() {
        let pvs = parse_pvs("$var(caller)");
        assert_eq!(pvs[0].inner_name.as_deref(), Some("caller"));
        assert_eq!(pvs[0].identity_key(), "var:caller");
        assert_eq!(pvs[0].category, PvCategory::ScriptVariable);
    }

    #[test]
    fn test_same_inner_different_class() {
        assert_eq!(keys("$var(x) $shv(x)"), vec!["var:x", "shv:x"]);
    }

    #[test]
    fn test_empty_inner() {
        let pvs = parse_pvs("$var()");
        assert!(!pvs[0].is_bare);
        assert_eq!(pvs[0].identity_key(), "var:");
    }

    #[test]
    fn test_bracketed_with_index() {
        let pvs = parse_pvs("x=$(avp(dst)[1]);");
        assert_eq!(pvs.len(), 1);
        assert_eq!(pvs[0].full_match, "$(avp(dst)[1])");
        assert_eq!(pvs[0].index.as_deref(), Some("1"));
        assert_eq!(pvs[0].identity_key(), "avp:dst");
        assert_eq!(pvs[0].offset, 2);
    }

    #[test]
    fn test_bracketed_without_inner() {
        let pvs = parse_pvs("$(ru)");
        assert!(pvs[0].is_bare);
        assert_eq!(pvs[0].identity_key(), "ru");
    }

    #[test]
    fn test_unterminated_payload_falls_back_to_bare() {
        let pvs = parse_pvs("$var(x");
        assert_eq!(pvs[0].full_match, "$var");
        assert!(pvs[0].is_bare);
    }

    #[test]
    fn test_nested_payload_is_opaque() {
        let pvs = parse_pvs("$sht(acl=>$(ru))");
        assert_eq!(pvs.len(), 1);
        assert_eq!(pvs[0].inner_name.as_deref(), Some("acl=>$(ru)"));
        assert_eq!(pvs[0].table_name(), Some("acl"));
    }

    #[test]
    fn test_select_alias() {
        let pvs = parse_pvs("@ $@ruri.user");
        assert_eq!(pvs.len(), 1);
        assert_eq!(pvs[0].class, "sel");
        assert_eq!(pvs[0].identity_key(), "sel:ruri.user");
        assert!(!pvs[0].is_bare);
    }

    #[test]
    fn test_lone_dollar_is_skipped() {
        assert!(parse_pvs("$ $( $1").is_empty());
    }

    #[test]
    fn test_offsets_round_trip() {
        let input = "sip:$rU@$(rd) via $var(gw) and $$ and $@ruri.host ü $hdr(X-Id)";
        for pv in parse_pvs(input) {
            assert_eq!(&input[pv.span()], pv.full_match);
        }
    }

    #[test]
    fn test_listing() {
        let listing = parse_pvs("$fu -> $(tu) [$var(a)] $sht(t=>k)")
            .iter()
            .map(|pv| format!("{}@{}+{} {}", pv.identity_key(), pv.offset, pv.length, pv.category))
            .collect::<Vec<_>>()
            .join("\n");
        assert_snapshot!(listing, @r"
        fu@0+3 URI
        tu@7+5 URI
        var:a@14+7 script variable
        sht:t=>k@23+10 hash table
        ");
    }
}
