//! Absolute-path helpers
//!
//! Paths are absolute with `'/'` separators. Helpers split a path into its
//! parent and final component; `clean_path` canonicalizes away a trailing or
//! doubled separator so cache keys compare reliably.

use super::error::FsError;

/// Everything up to the last separator: `/tmp/db/a` → `/tmp/db`
pub fn parent_path(path: &str) -> &str {
    let mut end = path.rfind('/').unwrap_or(0);
    // Tolerate a doubled separator before the final component.
    if end > 0 && path.as_bytes()[end - 1] == b'/' {
        end -= 1;
    }
    &path[..end]
}

/// The final component: `/tmp/db/a` → `a`
pub fn entity_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Canonical form used as the lookup-cache key
pub fn clean_path(path: &str) -> Result<String, FsError> {
    if !path.starts_with('/') {
        return Err(FsError::InvalidPath);
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(FsError::InvalidPath);
    }
    let name = entity_name(trimmed);
    if name.is_empty() {
        return Err(FsError::InvalidPath);
    }
    let mut clean = String::from(parent_path(trimmed));
    clean.push('/');
    clean.push_str(name);
    Ok(clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/tmp/db/a"), "/tmp/db");
        assert_eq!(parent_path("/tmp"), "");
        assert_eq!(parent_path("/tmp/db//a"), "/tmp/db");
    }

    #[test]
    fn test_entity_name() {
        assert_eq!(entity_name("/tmp/db/a"), "a");
        assert_eq!(entity_name("/tmp"), "tmp");
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/tmp/db/").unwrap(), "/tmp/db");
        assert_eq!(clean_path("/tmp/db").unwrap(), "/tmp/db");
        assert_eq!(clean_path("/tmp/db//a").unwrap(), "/tmp/db/a");
        assert_eq!(clean_path("relative"), Err(FsError::InvalidPath));
        assert_eq!(clean_path("/"), Err(FsError::InvalidPath));
    }
}
