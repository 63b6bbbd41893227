//! Path normalization for catalog lookups.
//!
//! Catalog paths are absolute, `/`-separated, without `.`/`..` components,
//! without trailing slashes, and `/` is the root.

use super::CatalogError;

/// Normalize a user-supplied path.
///
/// Relative paths are treated as relative to the root. Empty components
/// (`a//b`) are collapsed. `.` and `..` are rejected rather than resolved.
pub fn normalize(path: &str) -> Result<String, CatalogError> {
    let mut out = String::with_capacity(path.len() + 1);
    for component in path.split('/') {
        match component {
            "" => continue,
            "." | ".." => return Err(CatalogError::InvalidPath(path.to_string())),
            c if c.contains('\0') => return Err(CatalogError::InvalidPath(path.to_string())),
            c => {
                out.push('/');
                out.push_str(c);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Split a normalized path into its parent and final component.
///
/// Fails for the root, which has no parent.
pub fn split_parent(path: &str) -> Result<(String, String), CatalogError> {
    let path = normalize(path)?;
    if path == "/" {
        return Err(CatalogError::InvalidPath(path));
    }
    match path.rfind('/') {
        Some(0) => Ok(("/".to_string(), path[1..].to_string())),
        Some(idx) => Ok((path[..idx].to_string(), path[idx + 1..].to_string())),
        None => Err(CatalogError::InvalidPath(path)),
    }
}

pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Final component of a path, empty for the root
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("").unwrap(), "/");
        assert_eq!(normalize("a/b").unwrap(), "/a/b");
        assert_eq!(normalize("//a///b/").unwrap(), "/a/b");
        assert!(normalize("/a/../b").is_err());
        assert!(normalize("/a/./b").is_err());
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(
            split_parent("/docs/report.txt").unwrap(),
            ("/docs".to_string(), "report.txt".to_string())
        );
        assert_eq!(
            split_parent("/top").unwrap(),
            ("/".to_string(), "top".to_string())
        );
        assert!(split_parent("/").is_err());
    }

    #[test]
    fn test_join_and_name() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
        assert_eq!(file_name("/a/b.txt"), "b.txt");
        assert_eq!(file_name("/"), "");
    }
}
