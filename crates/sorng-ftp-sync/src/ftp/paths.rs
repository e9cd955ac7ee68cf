//! Listing path normalisation.
//!
//! Some servers answer a listing of the current directory with entries
//! named `./child`. Those are rewritten against the session's working
//! directory and the configured remote root; every other path is passed
//! through untouched.

const RELATIVE_MARKER: &str = "./";

/// Canonical absolute form of a listing path.
///
/// Deterministic in `(raw, working_directory, remote_root)` and
/// idempotent for absolute input.
pub fn normalize(raw: &str, working_directory: &str, remote_root: &str) -> String {
    let rest = match raw.strip_prefix(RELATIVE_MARKER) {
        Some(rest) => rest,
        None => return raw.to_string(),
    };

    let base = if working_directory != remote_root
        && working_directory.starts_with(remote_root)
        && working_directory != "/"
    {
        working_directory.to_string()
    } else {
        reconcile(working_directory, remote_root)
    };

    collapse_separators(&format!("{}/{}", base, rest))
}

/// Base directory when the working directory is not below the root.
fn reconcile(working_directory: &str, remote_root: &str) -> String {
    let root = match remote_root.trim() {
        "" => "/",
        r => r,
    };
    match working_directory.trim() {
        "" | "/" => root.to_string(),
        wd if wd == root => root.to_string(),
        // Absolute but outside the root: the server's view wins.
        wd if wd.starts_with('/') => wd.to_string(),
        wd => format!("{}/{}", root.trim_end_matches('/'), wd),
    }
}

fn collapse_separators(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Join a directory and a child name with a single separator.
pub fn join(dir: &str, name: &str) -> String {
    collapse_separators(&format!("{}/{}", dir, name))
}
