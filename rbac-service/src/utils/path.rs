//! Resource and department path algebra.
//!
//! Resource paths look like `/<tenant>/<workspace>/<seg>...`; department paths
//! share the grammar and are conventionally rooted at `/org`. Everything here
//! is pure string manipulation.

use crate::services::AuthzError;

/// Number of leading segments that identify the owning tenant and workspace.
const SCOPE_SEGMENTS: usize = 2;

/// Split a path into its segments.
///
/// The path must start with `/` and contain no empty segment; a single
/// trailing slash is tolerated and stripped.
pub fn split(path: &str) -> Result<Vec<&str>, AuthzError> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| AuthzError::InvalidPath(path.to_string()))?;
    let rest = rest.strip_suffix('/').unwrap_or(rest);

    if rest.is_empty() {
        return Err(AuthzError::InvalidPath(path.to_string()));
    }

    let segments: Vec<&str> = rest.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(AuthzError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// Join segments back into canonical form.
pub fn join(segments: &[&str]) -> String {
    let mut out = String::with_capacity(segments.iter().map(|s| s.len() + 1).sum());
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}

/// Canonical form of `path`, with any trailing slash removed.
pub fn normalize(path: &str) -> Result<String, AuthzError> {
    Ok(join(&split(path)?))
}

/// The `(tenant, workspace)` pair owning a resource path.
pub fn tenant_app(path: &str) -> Result<(String, String), AuthzError> {
    let segments = split(path)?;
    if segments.len() < SCOPE_SEGMENTS {
        return Err(AuthzError::InvalidPath(path.to_string()));
    }
    Ok((segments[0].to_string(), segments[1].to_string()))
}

/// Path of the workspace root, `/<tenant>/<workspace>`.
pub fn app_path(tenant: &str, workspace: &str) -> String {
    join(&[tenant, workspace])
}

/// Strict prefixes of `path` that still contain the tenant and workspace
/// segments, ordered from the direct parent outward.
///
/// `/t/w/a/b/c` yields `[/t/w/a/b, /t/w/a, /t/w]`.
pub fn ancestors(path: &str) -> Result<Vec<String>, AuthzError> {
    let segments = split(path)?;
    if segments.len() < SCOPE_SEGMENTS {
        return Err(AuthzError::InvalidPath(path.to_string()));
    }
    Ok((SCOPE_SEGMENTS..segments.len())
        .rev()
        .map(|len| join(&segments[..len]))
        .collect())
}

/// True when `descendant` equals `ancestor` or lies underneath it.
pub fn is_ancestor_of(ancestor: &str, descendant: &str) -> bool {
    descendant == ancestor
        || (descendant.len() > ancestor.len()
            && descendant.starts_with(ancestor)
            && descendant.as_bytes()[ancestor.len()] == b'/')
}

/// A department followed by each of its parents, stopping at the first
/// segment under the root.
///
/// `/org/x/y/z` yields `[/org/x/y/z, /org/x/y, /org/x]`.
pub fn department_chain(department: &str) -> Result<Vec<String>, AuthzError> {
    let segments = split(department)?;
    Ok((SCOPE_SEGMENTS..=segments.len())
        .rev()
        .map(|len| join(&segments[..len]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_rejects_malformed_paths() {
        assert!(split("t/w").is_err());
        assert!(split("/").is_err());
        assert!(split("").is_err());
        assert!(split("/t//w").is_err());
        assert_eq!(split("/t/w/").unwrap(), vec!["t", "w"]);
    }

    #[test]
    fn test_normalize_strips_trailing_slash() {
        assert_eq!(normalize("/tenantA/shop/sales/").unwrap(), "/tenantA/shop/sales");
        assert_eq!(normalize("/org/eng").unwrap(), "/org/eng");
        assert!(normalize("org/eng").is_err());
    }

    #[test]
    fn test_tenant_app() {
        assert_eq!(
            tenant_app("/tenantA/shop/sales").unwrap(),
            ("tenantA".to_string(), "shop".to_string())
        );
        assert!(matches!(
            tenant_app("/tenantA"),
            Err(AuthzError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_ancestors_order() {
        assert_eq!(
            ancestors("/t/w/a/b/c").unwrap(),
            vec!["/t/w/a/b", "/t/w/a", "/t/w"]
        );
        assert!(ancestors("/t/w").unwrap().is_empty());
    }

    #[test]
    fn test_is_ancestor_of() {
        assert!(is_ancestor_of("/t/w", "/t/w"));
        assert!(is_ancestor_of("/t/w", "/t/w/a"));
        assert!(!is_ancestor_of("/t/w", "/t/wx"));
        assert!(!is_ancestor_of("/t/w/a", "/t/w"));
    }

    #[test]
    fn test_department_chain() {
        assert_eq!(
            department_chain("/org/x/y/z").unwrap(),
            vec!["/org/x/y/z", "/org/x/y", "/org/x"]
        );
        assert_eq!(
            department_chain("/org/eng/payments").unwrap(),
            vec!["/org/eng/payments", "/org/eng"]
        );
        assert!(department_chain("/org").unwrap().is_empty());
    }
}
