//! `file://` URI helpers.
//!
//! Documents are keyed by URI strings; import resolution needs to step between
//! those and filesystem paths. Every key goes through [`canonical_uri`] or
//! [`path_to_uri`] so that an editor's URI and the indexer's URI for the same
//! file compare equal.

use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Bytes escaped in a path: everything outside RFC 3986 `pchar` and `/`.
const PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b':')
    .remove(b'@')
    .remove(b'/');

/// Convert a filesystem path to a file:// URI.
pub fn path_to_uri(path: &Path) -> String {
    let path_str = path.to_string_lossy().replace('\\', "/");
    let encoded = utf8_percent_encode(&path_str, PATH).to_string();
    if encoded.starts_with('/') {
        format!("file://{encoded}")
    } else {
        format!("file:///{encoded}")
    }
}

/// Extract the path component from a file:// URI.
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    let path = uri.strip_prefix("file://")?;
    Some(PathBuf::from(
        percent_decode_str(path).decode_utf8_lossy().into_owned(),
    ))
}

/// Directory containing the document, as a path.
pub fn uri_parent_dir(uri: &str) -> Option<PathBuf> {
    uri_to_path(uri)?.parent().map(Path::to_path_buf)
}

/// The key a local file URI is stored under, whatever escaping the client
/// chose. Other URIs are returned unchanged.
pub fn canonical_uri(uri: &str) -> String {
    match uri.strip_prefix("file://") {
        Some(path) if path.starts_with('/') => match uri_to_path(uri) {
            Some(path) => path_to_uri(&path),
            None => uri.to_string(),
        },
        _ => uri.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let path = Path::new("/srv/kamailio/my routes/main.py");
        let uri = path_to_uri(path);
        assert_eq!(uri, "file:///srv/kamailio/my%20routes/main.py");
        assert_eq!(uri_to_path(&uri).unwrap(), path);
    }

    #[test]
    fn test_non_ascii_round_trip() {
        let path = Path::new("/srv/réseau/main#1.py");
        let uri = path_to_uri(path);
        assert_eq!(uri, "file:///srv/r%C3%A9seau/main%231.py");
        assert!(uri.parse::<lsp_types::Uri>().is_ok());
        assert_eq!(uri_to_path(&uri).unwrap(), path);
    }

    #[test]
    fn test_canonical_uri() {
        let expected = "file:///srv/r%C3%A9seau/main.py";
        assert_eq!(canonical_uri("file:///srv/r%c3%a9seau/main.py"), expected);
        assert_eq!(canonical_uri("file:///srv/réseau/main.py"), expected);
        assert_eq!(canonical_uri(expected), expected);
        assert_eq!(canonical_uri("file:///c%3A/w/a.py"), "file:///c:/w/a.py");
        assert_eq!(canonical_uri("untitled:Untitled-1"), "untitled:Untitled-1");
    }

    #[test]
    fn test_non_file_scheme() {
        assert_eq!(uri_to_path("untitled:Untitled-1"), None);
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(
            uri_parent_dir("file:///srv/app/pkg/mod.py").unwrap(),
            Path::new("/srv/app/pkg")
        );
    }

    #[test]
    fn test_decode_utf8() {
        assert_eq!(
            uri_to_path("file:///r%C3%A9seau.py").unwrap(),
            Path::new("/réseau.py")
        );
        assert_eq!(uri_to_path("file:///100%").unwrap(), Path::new("/100%"));
    }
}
