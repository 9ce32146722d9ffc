//! Path keys for the local tree
//!
//! Keys are relative, `/`-separated and NFC-normalized so that the same name
//! produced by different platforms maps to one entry.

use std::io;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// NFC form of a single name
pub fn normalize(name: &str) -> String {
    name.nfc().collect()
}

/// Key for `path` below `root`; `None` for the root itself or non-UTF-8 names
pub fn path_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(normalize(part.to_str()?)),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Reject keys that could escape the root
pub fn validate_key(key: &str) -> io::Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('/')
        && key
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");
    if valid {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid path key: {:?}", key),
        ))
    }
}

/// On-disk location of a key, built component by component
pub fn key_to_path(root: &Path, key: &str) -> io::Result<PathBuf> {
    validate_key(key)?;
    let mut path = root.to_path_buf();
    for part in key.split('/') {
        path.push(part);
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_key_normalizes() {
        let root = Path::new("/data/vault");
        let decomposed = root.join("notes").join("cafe\u{301}.md");
        assert_eq!(
            path_key(root, &decomposed).as_deref(),
            Some("notes/caf\u{e9}.md")
        );
        assert_eq!(path_key(root, root), None);
        assert_eq!(path_key(root, Path::new("/elsewhere/a.md")), None);
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("a/b.md").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a//b").is_err());
    }

    #[test]
    fn test_key_to_path() {
        let root = Path::new("/r");
        assert_eq!(key_to_path(root, "x/y.md").unwrap(), Path::new("/r/x/y.md"));
        assert!(key_to_path(root, "../etc/passwd").is_err());
    }
}
