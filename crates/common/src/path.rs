//! Logical-name handling.
//!
//! Every object in a share is addressed by a POSIX-style forward-slash
//! path (the *logical name*), independent of where its bytes live. The
//! local tree, work tree, and remote tree all resolve the same logical
//! name against their own roots.

use unicode_normalization::UnicodeNormalization;

/// Normalize a logical name to a consistent form: leading slash, no
/// trailing slash, `/` for the root.
pub fn normalize(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() || name == "/" {
        return "/".to_string();
    }

    let mut normalized = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{}", name)
    };

    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }

    normalized
}

/// Parent directory of a logical name. The root is its own parent.
pub fn parent(name: &str) -> String {
    let normalized = normalize(name);
    if normalized == "/" {
        return "/".to_string();
    }

    match normalized.rfind('/') {
        Some(0) => "/".to_string(),
        Some(pos) => normalized[..pos].to_string(),
        None => "/".to_string(),
    }
}

/// Final component of a logical name; empty for the root.
pub fn basename(name: &str) -> &str {
    let name = name.trim_end_matches('/');
    if name.is_empty() {
        return "";
    }
    match name.rfind('/') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// Join a directory and a child component.
pub fn join(dir: &str, child: &str) -> String {
    let dir = normalize(dir);
    let child = child.trim_matches('/');
    if dir == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", dir, child)
    }
}

/// Whether `name` equals `prefix` or lies below it.
pub fn starts_with(name: &str, prefix: &str) -> bool {
    let name = normalize(name);
    let prefix = normalize(prefix);
    if prefix == "/" {
        return true;
    }
    name == prefix || name.starts_with(&format!("{}/", prefix))
}

/// Rewrite the `old` prefix of `name` to `new`. Returns `None` when `name`
/// is not under `old`.
pub fn rebase(name: &str, old: &str, new: &str) -> Option<String> {
    let name = normalize(name);
    let old = normalize(old);
    let new = normalize(new);
    if name == old {
        return Some(new);
    }
    name.strip_prefix(&format!("{}/", old))
        .map(|rest| join(&new, rest))
}

/// NFKD-normalized equality, used when matching local names against remote
/// ones. Two names differing only in normalization form compare equal.
pub fn nfkd_eq(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    a.nfkd().eq(b.nfkd())
}

/// NFKD-normalized form of a name, usable as a lookup key.
pub fn nfkd_key(name: &str) -> String {
    name.nfkd().collect()
}
