//! Tree walks over Python syntax trees.
//!
//! Everything here is tolerant of error nodes: shapes that do not match simply
//! produce nothing.

use std::ops::Range;

use tree_sitter::Node;

/// Scope name for code outside any routine.
pub const MODULE_SCOPE: &str = "<module>";

/// Root object of every KEMI call.
const KSR: &str = "KSR";

/// A `KSR.<module>.<method>(...)` call whose first argument is a plain string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KsrStringCall {
    pub module: String,
    pub method: String,
    /// Literal body, without prefix and quotes.
    pub content: String,
    /// Byte span of `content` in the document.
    pub content_span: Range<usize>,
    /// Byte span of the whole call expression.
    pub call_span: Range<usize>,
    /// Innermost enclosing routine, or [`MODULE_SCOPE`].
    pub scope: String,
}

/// Visit `root` and every descendant in document order, without recursion.
pub fn for_each_descendant<'tree>(root: Node<'tree>, mut visit: impl FnMut(Node<'tree>)) {
    let mut cursor = root.walk();
    'outer: loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.node() == root {
                break 'outer;
            }
            if cursor.goto_next_sibling() {
                continue 'outer;
            }
            if !cursor.goto_parent() {
                break 'outer;
            }
        }
    }
}

pub fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// `(module, method)` if `call` has the shape `KSR.module.method(...)`.
pub fn ksr_method<'s>(call: Node<'_>, source: &'s str) -> Option<(&'s str, &'s str)> {
    if call.kind() != "call" {
        return None;
    }
    let function = call.child_by_field_name("function")?;
    if function.kind() != "attribute" {
        return None;
    }
    let method = function.child_by_field_name("attribute")?;
    let namespace = function.child_by_field_name("object")?;
    if namespace.kind() != "attribute" {
        return None;
    }
    let root = namespace.child_by_field_name("object")?;
    let module = namespace.child_by_field_name("attribute")?;
    if root.kind() != "identifier" || node_text(root, source) != KSR {
        return None;
    }
    Some((node_text(module, source), node_text(method, source)))
}

/// Body span of the first positional argument, if it is a plain string literal.
pub fn first_string_argument(call: Node<'_>) -> Option<Range<usize>> {
    let arguments = call.child_by_field_name("arguments")?;
    let mut cursor = arguments.walk();
    let first = arguments
        .named_children(&mut cursor)
        .find(|child| child.kind() != "comment")?;
    if first.kind() != "string" {
        return None;
    }
    string_body(first)
}

/// Byte span between the opening and closing quote tokens of a string node.
pub fn string_body(string: Node<'_>) -> Option<Range<usize>> {
    let mut cursor = string.walk();
    let mut start = None;
    let mut end = None;
    for child in string.children(&mut cursor) {
        match child.kind() {
            "string_start" => start = Some(child.end_byte()),
            "string_end" => end = Some(child.start_byte()),
            _ => {}
        }
    }
    let (start, end) = (start?, end?);
    (start <= end).then_some(start..end)
}

/// Name of the innermost routine containing `node`.
pub fn enclosing_scope(node: Node<'_>, source: &str) -> String {
    let mut current = node.parent();
    while let Some(candidate) = current {
        if candidate.kind() == "function_definition"
            && let Some(name) = candidate.child_by_field_name("name")
        {
            return node_text(name, source).to_string();
        }
        current = candidate.parent();
    }
    MODULE_SCOPE.to_string()
}

/// Nearest ancestor (or self) that is a whole statement or definition.
pub fn statement_ancestor(node: Node<'_>) -> Node<'_> {
    let mut current = node;
    loop {
        let kind = current.kind();
        if kind == "module" || kind.ends_with("_statement") || kind.ends_with("_definition") {
            return current;
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return current,
        }
    }
}

fn string_call(call: Node<'_>, source: &str) -> Option<KsrStringCall> {
    let (module, method) = ksr_method(call, source)?;
    let body = first_string_argument(call)?;
    Some(KsrStringCall {
        module: module.to_string(),
        method: method.to_string(),
        content: source.get(body.clone())?.to_string(),
        content_span: body,
        call_span: call.byte_range(),
        scope: enclosing_scope(call, source),
    })
}

/// Every KEMI call with a leading string argument under `root`.
pub fn ksr_string_calls(root: Node<'_>, source: &str) -> Vec<KsrStringCall> {
    let mut calls = Vec::new();
    for_each_descendant(root, |node| {
        if let Some(call) = string_call(node, source) {
            calls.push(call);
        }
    });
    calls
}

/// The KEMI string call whose literal body contains `offset` (end inclusive,
/// so a cursor right before the closing quote still counts).
pub fn ksr_string_call_at(root: Node<'_>, source: &str, offset: usize) -> Option<KsrStringCall> {
    let mut current = Some(root.descendant_for_byte_range(offset, offset)?);
    while let Some(node) = current {
        if node.kind() == "call" {
            return string_call(node, source).filter(|call| {
                call.content_span.start <= offset && offset <= call.content_span.end
            });
        }
        current = node.parent();
    }
    None
}

/// KEMI string calls inside the statements touched by `ranges`.
///
/// Each range is widened to its nearest statement-like ancestor; subtrees
/// nested in an already selected subtree are skipped.
pub fn ksr_string_calls_in(
    root: Node<'_>,
    source: &str,
    ranges: &[Range<usize>],
) -> Vec<KsrStringCall> {
    let mut subtrees: Vec<Node<'_>> = ranges
        .iter()
        .filter_map(|range| root.descendant_for_byte_range(range.start, range.end.max(range.start)))
        .map(statement_ancestor)
        .collect();
    subtrees.sort_by_key(|node| (node.start_byte(), std::cmp::Reverse(node.end_byte())));

    let mut selected: Vec<Node<'_>> = Vec::new();
    for node in subtrees {
        let covered = selected
            .last()
            .is_some_and(|last| last.start_byte() <= node.start_byte() && node.end_byte() <= last.end_byte());
        if !covered {
            selected.push(node);
        }
    }

    selected
        .into_iter()
        .flat_map(|subtree| ksr_string_calls(subtree, source))
        .collect()
}

/// A routine declared with `def`, including class methods.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutineSyntax {
    pub name: String,
    pub span: Range<usize>,
    pub name_span: Range<usize>,
    pub parameters: Vec<String>,
}

pub fn routines(root: Node<'_>, source: &str) -> Vec<RoutineSyntax> {
    let mut found = Vec::new();
    for_each_descendant(root, |node| {
        if node.kind() != "function_definition" {
            return;
        }
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let parameters = node
            .child_by_field_name("parameters")
            .map(|params| parameter_names(params, source))
            .unwrap_or_default();
        found.push(RoutineSyntax {
            name: node_text(name, source).to_string(),
            span: node.byte_range(),
            name_span: name.byte_range(),
            parameters,
        });
    });
    found
}

fn parameter_names(parameters: Node<'_>, source: &str) -> Vec<String> {
    let mut cursor = parameters.walk();
    parameters
        .named_children(&mut cursor)
        .filter_map(|param| {
            if param.kind() == "identifier" {
                return Some(node_text(param, source).to_string());
            }
            if let Some(name) = param.child_by_field_name("name") {
                return Some(node_text(name, source).to_string());
            }
            let mut inner = param.walk();
            let ident = param
                .named_children(&mut inner)
                .find(|child| child.kind() == "identifier")?;
            Some(node_text(ident, source).to_string())
        })
        .collect()
}

/// A call to a plain, `self.`-qualified or module-qualified name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallSyntax {
    pub callee: String,
    /// Module path for `alias.name(...)` or `pkg.mod.name(...)`; `None` for `name(...)` and `self.name(...)`.
    pub qualifier: Option<String>,
    pub scope: String,
    pub span: Range<usize>,
    pub callee_span: Range<usize>,
}

/// `a.b.c` for an identifier or a chain of plain attribute accesses.
fn dotted_path(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, source).to_string()),
        "attribute" => {
            let object = dotted_path(node.child_by_field_name("object")?, source)?;
            let attribute = node.child_by_field_name("attribute")?;
            Some(format!("{object}.{}", node_text(attribute, source)))
        }
        _ => None,
    }
}

pub fn call_sites(root: Node<'_>, source: &str) -> Vec<CallSyntax> {
    let mut found = Vec::new();
    for_each_descendant(root, |node| {
        if node.kind() != "call" {
            return;
        }
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let (callee, qualifier) = match function.kind() {
            "identifier" => (function, None),
            "attribute" => {
                let (Some(object), Some(attribute)) = (
                    function.child_by_field_name("object"),
                    function.child_by_field_name("attribute"),
                ) else {
                    return;
                };
                let Some(path) = dotted_path(object, source) else {
                    return;
                };
                if path == KSR || path.starts_with("KSR.") {
                    return;
                }
                match path.as_str() {
                    "self" | "cls" => (attribute, None),
                    _ => (attribute, Some(path)),
                }
            }
            _ => return,
        };
        found.push(CallSyntax {
            callee: node_text(callee, source).to_string(),
            qualifier,
            scope: enclosing_scope(node, source),
            span: node.byte_range(),
            callee_span: callee.byte_range(),
        });
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use kemi_front::Document;

    fn parse(source: &str) -> Document {
        Document::parse("file:///t.py", source, 1).unwrap()
    }

    #[test]
    fn test_ksr_string_calls() {
        let source = "\
import KSR
def route():
    KSR.pv.sets(\"$var(a)\", \"x\")
    KSR.tm.t_on_failure('failure_route')
    KSR.pv.get(name)
    other.pv.get(\"$var(b)\")
";
        let doc = parse(source);
        let calls = ksr_string_calls(doc.tree().root_node(), source);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].module, "pv");
        assert_eq!(calls[0].method, "sets");
        assert_eq!(calls[0].content, "$var(a)");
        assert_eq!(&source[calls[0].content_span.clone()], "$var(a)");
        assert_eq!(calls[0].scope, "route");
        assert_eq!(calls[1].content, "failure_route");
    }

    #[test]
    fn test_module_scope() {
        let source = "KSR.pv.sets(\"$shv(x)\", 1)\n";
        let doc = parse(source);
        let calls = ksr_string_calls(doc.tree().root_node(), source);
        assert_eq!(calls[0].scope, MODULE_SCOPE);
    }

    #[test]
    fn test_prefixed_and_empty_strings() {
        let source = "def f():\n    KSR.pv.get(r'$ru')\n    KSR.pv.get(\"\")\n";
        let doc = parse(source);
        let calls = ksr_string_calls(doc.tree().root_node(), source);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].content, "$ru");
        assert_eq!(calls[1].content, "");
    }

    #[test]
    fn test_keyword_first_argument_is_ignored() {
        let source = "KSR.pv.sets(name=\"$var(a)\")\n";
        let doc = parse(source);
        assert!(ksr_string_calls(doc.tree().root_node(), source).is_empty());
    }

    #[test]
    fn test_string_call_at_cursor() {
        let source = "def f():\n    KSR.tm.t_on_failure(\"fail\")\n    KSR.pv.get(\"\")\n";
        let doc = parse(source);
        let root = doc.tree().root_node();
        let inside = source.find("fail\"").unwrap() + 2;
        let call = ksr_string_call_at(root, source, inside).unwrap();
        assert_eq!((call.module.as_str(), call.method.as_str()), ("tm", "t_on_failure"));

        let empty = source.find("\"\")").unwrap() + 1;
        let call = ksr_string_call_at(root, source, empty).unwrap();
        assert_eq!(call.content, "");

        assert!(ksr_string_call_at(root, source, 2).is_none());
    }

    #[test]
    fn test_range_scoped_calls() {
        let source = "\
def a():
    KSR.pv.sets(\"$var(a)\", 1)

def b():
    KSR.pv.get(\"$var(b)\")
";
        let doc = parse(source);
        let offset = source.find("$var(b)").unwrap();
        let calls = ksr_string_calls_in(doc.tree().root_node(), source, &[offset..offset + 1]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].content, "$var(b)");
    }

    #[test]
    fn test_routines_and_parameters() {
        let source = "\
class kamailio:
    def ksr_request_route(self, msg):
        return 1

def helper(a, b=1, *rest, **kw):
    pass
";
        let doc = parse(source);
        let found = routines(doc.tree().root_node(), source);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "ksr_request_route");
        assert_eq!(found[0].parameters, vec!["self", "msg"]);
        assert_eq!(found[1].parameters, vec!["a", "b", "rest", "kw"]);
    }

    #[test]
    fn test_call_sites() {
        let source = "\
def route():
    helper()
    self.check()
    util.send()
    util.net.probe()
    KSR.pv.get(\"$ru\")
    KSR.tm.t_relay()
    make().go()
";
        let doc = parse(source);
        let calls = call_sites(doc.tree().root_node(), source);
        let shapes: Vec<(&str, Option<&str>)> = calls
            .iter()
            .map(|c| (c.callee.as_str(), c.qualifier.as_deref()))
            .collect();
        assert_eq!(
            shapes,
            vec![
                ("helper", None),
                ("check", None),
                ("send", Some("util")),
                ("probe", Some("util.net")),
                ("make", None),
            ]
        );
        assert!(calls.iter().all(|c| c.scope == "route"));
    }
}
