//! Remote path normalization.
//!
//! Every remote call addresses a canonical absolute path: a leading `/`,
//! no empty, `.` or `..` segments, no trailing `/`. Caller-supplied paths
//! are resolved lexically and are never allowed to climb above the
//! configured root.

/// Split `path` into segments, resolving `.` and `..` lexically.
///
/// `..` at the start of the path is dropped.
fn resolve(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            segment => out.push(segment),
        }
    }
    out
}

fn to_absolute(segments: &[&str]) -> String {
    format!("/{}", segments.join("/"))
}

/// Clean a relative path: `a//b/./c/../d` becomes `a/b/d`.
pub fn clean(path: &str) -> String {
    resolve(path).join("/")
}

/// Resolve `path` under `root` into the canonical absolute remote path.
///
/// An empty path addresses the root itself. An absolute path that already
/// lies under `root` is kept as-is (after cleaning), so normalizing twice
/// gives the same result as normalizing once. Any other path is joined
/// under `root`, with `..` clamped at `root`.
pub fn normalize(root: &str, path: &str) -> String {
    let root_segments = resolve(root);

    if path.starts_with('/') {
        let absolute = resolve(path);
        if absolute.starts_with(&root_segments) {
            return to_absolute(&absolute);
        }
    }

    let mut out = root_segments.clone();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if out.len() > root_segments.len() {
                    out.pop();
                }
            }
            segment => out.push(segment),
        }
    }
    to_absolute(&out)
}

/// Join a child name onto a relative directory path.
pub fn join(dir: &str, name: &str) -> String {
    let dir = clean(dir);
    let name = clean(name);
    match (dir.is_empty(), name.is_empty()) {
        (true, _) => name,
        (false, true) => dir,
        (false, false) => format!("{}/{}", dir, name),
    }
}

/// Segments of a canonical path, ready to be appended to a URL.
pub fn segments(path: &str) -> Vec<String> {
    resolve(path).into_iter().map(str::to_string).collect()
}

/// Last segment of a path, or an empty string for the root.
pub fn base_name(path: &str) -> &str {
    resolve(path).last().copied().unwrap_or("")
}

/// Whether `path` lies lexically under (or at) `root`.
pub fn is_within(root: &str, path: &str) -> bool {
    resolve(path).starts_with(&resolve(root))
}
