//! Import statements and module path resolution.
//!
//! Extraction is purely syntactic and leaves every binding unresolved;
//! resolution runs separately against whatever documents are currently known,
//! so it can be repeated cheaply whenever the workspace changes.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};

use kemi_front::{Document, DocumentStore, path_to_uri, uri_parent_dir};
use tree_sitter::Node;

use super::syntax::{for_each_descendant, node_text};

/// One name introduced by an import statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportBinding {
    /// Name visible in the importing file (`*` for wildcard imports).
    pub local_name: String,
    /// Imported attribute for `from m import name`; `None` binds the module itself.
    pub remote_name: Option<String>,
    /// Module path as written, including leading dots.
    pub module_path: String,
    /// Expression naming the module in the importing file: `a.b` for
    /// `import a.b` (which binds `a`), otherwise the local name.
    pub access_path: String,
    pub resolved_uri: Option<String>,
    pub is_wildcard: bool,
    pub span: Range<usize>,
    pub range: lsp_types::Range,
}

impl ImportBinding {
    /// Whether the local name refers to a whole module.
    pub fn is_module_binding(&self) -> bool {
        self.remote_name.is_none() && !self.is_wildcard
    }
}

/// Import bindings per document uri, in declaration order.
pub type ImportTable = HashMap<String, Vec<ImportBinding>>;

/// Membership test for documents an import may resolve to.
pub trait KnownDocuments {
    fn contains_document(&self, uri: &str) -> bool;
}

impl KnownDocuments for DocumentStore {
    fn contains_document(&self, uri: &str) -> bool {
        self.contains(uri)
    }
}

impl KnownDocuments for HashSet<String> {
    fn contains_document(&self, uri: &str) -> bool {
        self.contains(uri)
    }
}

fn binding(
    document: &Document,
    node: Node<'_>,
    local_name: &str,
    remote_name: Option<&str>,
    module_path: &str,
) -> ImportBinding {
    ImportBinding {
        local_name: local_name.to_string(),
        remote_name: remote_name.map(str::to_string),
        module_path: module_path.to_string(),
        access_path: local_name.to_string(),
        resolved_uri: None,
        is_wildcard: false,
        span: node.byte_range(),
        range: document.range_of(node.byte_range()),
    }
}

/// Every import binding in `document`, in source order, unresolved.
pub fn extract_imports(document: &Document, source: &str) -> Vec<ImportBinding> {
    let mut bindings = Vec::new();
    for_each_descendant(document.tree().root_node(), |node| match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                match name.kind() {
                    "dotted_name" => {
                        let path = node_text(name, source);
                        let root = path.split('.').next().unwrap_or(path);
                        bindings.push(ImportBinding {
                            access_path: path.to_string(),
                            ..binding(document, name, root, None, path)
                        });
                    }
                    "aliased_import" => {
                        let (Some(target), Some(alias)) = (
                            name.child_by_field_name("name"),
                            name.child_by_field_name("alias"),
                        ) else {
                            continue;
                        };
                        let path = node_text(target, source);
                        bindings.push(binding(
                            document,
                            name,
                            node_text(alias, source),
                            None,
                            path,
                        ));
                    }
                    _ => {}
                }
            }
        }
        "import_from_statement" => {
            let Some(module) = node.child_by_field_name("module_name") else {
                return;
            };
            let module_path: String = node_text(module, source)
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();

            let mut cursor = node.walk();
            if let Some(wildcard) = node
                .named_children(&mut cursor)
                .find(|child| child.kind() == "wildcard_import")
            {
                bindings.push(ImportBinding {
                    is_wildcard: true,
                    ..binding(document, wildcard, "*", None, &module_path)
                });
                return;
            }

            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                match name.kind() {
                    "dotted_name" => {
                        let remote = node_text(name, source);
                        bindings.push(binding(document, name, remote, Some(remote), &module_path));
                    }
                    "aliased_import" => {
                        let (Some(target), Some(alias)) = (
                            name.child_by_field_name("name"),
                            name.child_by_field_name("alias"),
                        ) else {
                            continue;
                        };
                        bindings.push(binding(
                            document,
                            name,
                            node_text(alias, source),
                            Some(node_text(target, source)),
                            &module_path,
                        ));
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    });
    bindings
}

fn candidates(base: &Path, rest: &str) -> Vec<PathBuf> {
    if rest.is_empty() {
        return vec![base.join("__init__.py")];
    }
    let mut module_dir = base.to_path_buf();
    for segment in rest.split('.').filter(|s| !s.is_empty()) {
        module_dir.push(segment);
    }
    vec![module_dir.with_extension("py"), module_dir.join("__init__.py")]
}

/// Resolve a module path to a known document uri.
///
/// Relative paths (`.x`, `..x`) ascend one directory per extra leading dot
/// from the importing document. Absolute paths are tried against `roots` in
/// order, then against the importing document's directory.
pub fn resolve_module_path(
    path: &str,
    from_uri: &str,
    roots: &[PathBuf],
    known: &impl KnownDocuments,
) -> Option<String> {
    let dots = path.chars().take_while(|c| *c == '.').count();
    let rest = &path[dots..];
    let from_dir = uri_parent_dir(from_uri);

    let bases: Vec<PathBuf> = if dots > 0 {
        let mut base = from_dir?;
        for _ in 1..dots {
            base = base.parent()?.to_path_buf();
        }
        vec![base]
    } else {
        if rest.is_empty() {
            return None;
        }
        roots.iter().cloned().chain(from_dir).collect()
    };

    bases
        .iter()
        .flat_map(|base| candidates(base, rest))
        .map(|candidate| path_to_uri(&candidate))
        .find(|uri| known.contains_document(uri))
}

fn submodule_path(module_path: &str, name: &str) -> String {
    if module_path.ends_with('.') {
        format!("{module_path}{name}")
    } else {
        format!("{module_path}.{name}")
    }
}

/// Fill in `resolved_uri` for every binding of `from_uri`.
///
/// `from m import name` binds the module `m` when it resolves to a plain
/// module. When `m` is a package (or does not resolve) and `m.name` is a
/// module of its own, the binding is rewritten into a module binding for it.
pub fn resolve_bindings(
    bindings: &mut [ImportBinding],
    from_uri: &str,
    roots: &[PathBuf],
    known: &impl KnownDocuments,
) {
    for binding in bindings.iter_mut() {
        let module = resolve_module_path(&binding.module_path, from_uri, roots, known);
        let is_package = module
            .as_deref()
            .is_some_and(|uri| uri.ends_with("/__init__.py"));

        binding.resolved_uri = module.clone();
        if let Some(remote) = binding.remote_name.clone()
            && (module.is_none() || is_package)
        {
            let nested = submodule_path(&binding.module_path, &remote);
            if let Some(uri) = resolve_module_path(&nested, from_uri, roots, known) {
                binding.module_path = nested;
                binding.remote_name = None;
                binding.resolved_uri = Some(uri);
            }
        }
        if binding.resolved_uri.is_none() {
            tracing::debug!(
                uri = from_uri,
                module = %binding.module_path,
                "Import left unresolved"
            );
        }
    }
}

/// Where a call through an imported name lands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallTarget {
    pub uri: String,
    /// Routine name in the target document; `None` when the binding is a module.
    pub remote_name: Option<String>,
}

/// The first binding in `from_uri` named `local_name`, with its resolved
/// document. An unresolved first binding shadows later ones.
pub fn resolve_call_target(
    local_name: &str,
    from_uri: &str,
    imports: &ImportTable,
) -> Option<CallTarget> {
    let binding = imports
        .get(from_uri)?
        .iter()
        .find(|binding| !binding.is_wildcard && binding.local_name == local_name)?;
    Some(CallTarget {
        uri: binding.resolved_uri.clone()?,
        remote_name: binding.remote_name.clone(),
    })
}

/// Module reached through a dotted qualifier such as `net` or `util.net`.
///
/// Only module bindings count; the first one whose access path matches wins.
pub fn resolve_qualified_module(
    qualifier: &str,
    from_uri: &str,
    imports: &ImportTable,
) -> Option<String> {
    imports
        .get(from_uri)?
        .iter()
        .find(|binding| binding.is_module_binding() && binding.access_path == qualifier)?
        .resolved_uri
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(uris: &[&str]) -> HashSet<String> {
        uris.iter().map(|uri| uri.to_string()).collect()
    }

    fn imports_of(source: &str) -> Vec<ImportBinding> {
        let doc = Document::parse("file:///ws/app/main.py", source, 1).unwrap();
        extract_imports(&doc, source)
    }

    #[test]
    fn test_extract_all_forms() {
        let bindings = imports_of(
            "\
import helpers
import util.net as net
import os.path
from lib import send, check as verify
from . import sibling
from ..pkg import *
",
        );
        let shapes: Vec<(&str, Option<&str>, &str, bool)> = bindings
            .iter()
            .map(|b| {
                (
                    b.local_name.as_str(),
                    b.remote_name.as_deref(),
                    b.module_path.as_str(),
                    b.is_wildcard,
                )
            })
            .collect();
        assert_eq!(
            shapes,
            vec![
                ("helpers", None, "helpers", false),
                ("net", None, "util.net", false),
                ("os", None, "os.path", false),
                ("send", Some("send"), "lib", false),
                ("verify", Some("check"), "lib", false),
                ("sibling", Some("sibling"), ".", false),
                ("*", None, "..pkg", true),
            ]
        );
        assert!(bindings.iter().all(|b| b.resolved_uri.is_none()));
    }

    #[test]
    fn test_resolve_absolute_against_roots_in_order() {
        let docs = known(&["file:///lib2/helpers.py", "file:///lib1/helpers/__init__.py"]);
        let roots = vec![PathBuf::from("/lib1"), PathBuf::from("/lib2")];
        assert_eq!(
            resolve_module_path("helpers", "file:///ws/main.py", &roots, &docs).as_deref(),
            Some("file:///lib1/helpers/__init__.py")
        );
    }

    #[test]
    fn test_resolve_falls_back_to_importing_directory() {
        let docs = known(&["file:///ws/helpers.py"]);
        assert_eq!(
            resolve_module_path("helpers", "file:///ws/main.py", &[], &docs).as_deref(),
            Some("file:///ws/helpers.py")
        );
    }

    #[test]
    fn test_resolve_relative() {
        let docs = known(&[
            "file:///ws/app/util.py",
            "file:///ws/pkg/deep/mod.py",
            "file:///ws/__init__.py",
        ]);
        let from = "file:///ws/app/main.py";
        assert_eq!(
            resolve_module_path(".util", from, &[], &docs).as_deref(),
            Some("file:///ws/app/util.py")
        );
        assert_eq!(
            resolve_module_path("..pkg.deep.mod", from, &[], &docs).as_deref(),
            Some("file:///ws/pkg/deep/mod.py")
        );
        assert_eq!(
            resolve_module_path("..", from, &[], &docs).as_deref(),
            Some("file:///ws/__init__.py")
        );
    }

    #[test]
    fn test_unresolvable_paths_are_none() {
        let docs = known(&[]);
        assert_eq!(resolve_module_path("missing", "file:///ws/a.py", &[], &docs), None);
        assert_eq!(
            resolve_module_path("......far", "file:///a.py", &[], &docs),
            None
        );
        assert_eq!(resolve_module_path("", "file:///a.py", &[], &docs), None);
    }

    #[test]
    fn test_from_package_import_submodule() {
        let docs = known(&["file:///ws/app/pkg/__init__.py", "file:///ws/app/pkg/tools.py"]);
        let mut bindings = imports_of("from pkg import tools\n");
        resolve_bindings(&mut bindings, "file:///ws/app/main.py", &[], &docs);
        assert!(bindings[0].is_module_binding());
        assert_eq!(
            bindings[0].resolved_uri.as_deref(),
            Some("file:///ws/app/pkg/tools.py")
        );
        assert_eq!(bindings[0].module_path, "pkg.tools");
    }

    #[test]
    fn test_duplicate_local_name_first_declared_wins() {
        let docs = known(&["file:///ws/app/first.py", "file:///ws/app/second.py"]);
        let mut bindings = imports_of("from first import handle\nfrom second import handle\n");
        resolve_bindings(&mut bindings, "file:///ws/app/main.py", &[], &docs);
        let table: ImportTable = [("file:///ws/app/main.py".to_string(), bindings)].into();

        let target = resolve_call_target("handle", "file:///ws/app/main.py", &table).unwrap();
        assert_eq!(target.uri, "file:///ws/app/first.py");
        assert_eq!(target.remote_name.as_deref(), Some("handle"));
    }

    #[test]
    fn test_dotted_import_binds_root_name() {
        let docs = known(&[
            "file:///ws/app/util/__init__.py",
            "file:///ws/app/util/net.py",
        ]);
        let mut bindings = imports_of("import util.net\nimport util\nimport util.net as n\n");
        resolve_bindings(&mut bindings, "file:///ws/app/main.py", &[], &docs);
        assert_eq!(bindings[0].local_name, "util");
        let table: ImportTable = [("file:///ws/app/main.py".to_string(), bindings)].into();

        let from = "file:///ws/app/main.py";
        assert_eq!(
            resolve_qualified_module("util.net", from, &table).as_deref(),
            Some("file:///ws/app/util/net.py")
        );
        assert_eq!(
            resolve_qualified_module("util", from, &table).as_deref(),
            Some("file:///ws/app/util/__init__.py")
        );
        assert_eq!(
            resolve_qualified_module("n", from, &table).as_deref(),
            Some("file:///ws/app/util/net.py")
        );
        assert_eq!(resolve_qualified_module("net", from, &table), None);
    }

    #[test]
    fn test_call_target_unknown_name() {
        let table = ImportTable::new();
        assert_eq!(resolve_call_target("x", "file:///a.py", &table), None);
    }
}
