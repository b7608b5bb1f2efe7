//! Resolve caller-supplied paths relative to the workspace root, reject
//! traversal, and enforce deny-glob / allow-path policy.

use globset::Glob;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PathSafetyError(pub String);

impl std::fmt::Display for PathSafetyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for PathSafetyError {}

/// Lexically collapses `.`/`..` without touching the filesystem. A `..`
/// with nothing left to pop is simply dropped, which is safe here because
/// callers only ever feed this a path already prefixed by `root`'s own
/// components.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut stack: Vec<Component> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                stack.pop();
            }
            Component::CurDir => {}
            other => stack.push(other),
        }
    }
    stack.into_iter().collect()
}

/// Resolves `target` against `root` (which must already be canonical) and
/// ensures the result stays inside `root`. Paths that exist on disk are
/// additionally canonicalized (following symlinks) and re-checked, so a
/// symlink planted inside the workspace cannot point the caller back out.
pub fn resolve(root: &Path, target: &str) -> Result<PathBuf, PathSafetyError> {
    if target.trim().is_empty() {
        return Err(PathSafetyError("path must not be empty".to_string()));
    }
    let target_path = Path::new(target);

    let candidate = if target_path.is_absolute() {
        match target_path.strip_prefix(root) {
            Ok(rel) => root.join(rel),
            Err(_) => {
                return Err(PathSafetyError(format!(
                    "path {target} is outside workspace root"
                )))
            }
        }
    } else {
        root.join(target_path)
    };

    let normalized = lexical_normalize(&candidate);
    if !normalized.starts_with(root) {
        return Err(PathSafetyError(format!("path traversal detected: {target}")));
    }

    let final_path = if normalized.exists() {
        let canon = normalized
            .canonicalize()
            .map_err(|e| PathSafetyError(format!("invalid path {target}: {e}")))?;
        if !canon.starts_with(root) {
            return Err(PathSafetyError(format!(
                "path traversal detected via symlink: {target}"
            )));
        }
        canon
    } else {
        normalized
    };

    Ok(final_path)
}

/// The POSIX-normalized path of `path` relative to `root` (forward
/// slashes, no leading `./`). Used by tools that need to report or match
/// against a caller-facing path after [`resolve`] has already vetted it.
pub fn posix_relative(path: &Path, root: &Path) -> Result<String, PathSafetyError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| PathSafetyError(format!("{} is not under {}", path.display(), root.display())))?;
    Ok(rel.to_string_lossy().replace('\\', "/"))
}

/// A single glob-pattern match against a POSIX-relative candidate path.
pub fn glob_matches(pattern: &str, candidate: &str) -> bool {
    Glob::new(pattern)
        .map(|g| g.compile_matcher().is_match(candidate))
        .unwrap_or(false)
}

/// Validates that `path` (already resolved via [`resolve`]) does not match
/// any deny glob, and if `allow_paths` is non-empty and doesn't itself
/// contain the empty string, that the path falls under one of those roots.
pub fn validate(
    path: &Path,
    root: &Path,
    deny_globs: &[String],
    allow_paths: &[String],
) -> Result<(), PathSafetyError> {
    let rel_path = posix_relative(path, root)?;

    for pattern in deny_globs {
        if glob_matches(pattern, &rel_path) {
            return Err(PathSafetyError(format!(
                "path matches denied pattern '{pattern}': {rel_path}"
            )));
        }
    }

    if !allow_paths.is_empty() {
        let normalized = rel_path.trim_start_matches("./");
        // "." means "the whole workspace root", which is the same
        // allow-everywhere semantics as an empty entry below.
        let allowed_roots: Vec<String> = allow_paths
            .iter()
            .map(|p| {
                let trimmed = p.replace('\\', "/").trim_start_matches("./").to_string();
                if trimmed == "." {
                    String::new()
                } else {
                    trimmed
                }
            })
            .collect();
        if !allowed_roots.iter().any(|r| r.is_empty()) {
            let in_allowlist = allowed_roots
                .iter()
                .any(|allowed| normalized == allowed || normalized.starts_with(&format!("{allowed}/")));
            if !in_allowlist {
                return Err(PathSafetyError(format!("path outside allow_paths: {rel_path}")));
            }
        }
    }

    Ok(())
}

/// Convenience combining [`resolve`] and [`validate`], returning the
/// resolved path on success.
pub fn resolve_and_validate(
    root: &Path,
    target: &str,
    deny_globs: &[String],
    allow_paths: &[String],
) -> Result<PathBuf, PathSafetyError> {
    let resolved = resolve(root, target)?;
    validate(&resolved, root, deny_globs, allow_paths)?;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    #[test]
    fn resolves_plain_relative_path() {
        let (_dir, root) = workspace();
        let resolved = resolve(&root, "src/lib.rs").unwrap();
        assert_eq!(resolved, root.join("src/lib.rs"));
    }

    #[test]
    fn rejects_empty_path() {
        let (_dir, root) = workspace();
        assert!(resolve(&root, "").is_err());
    }

    #[test]
    fn rejects_parent_traversal() {
        let (_dir, root) = workspace();
        assert!(resolve(&root, "../outside.txt").is_err());
        assert!(resolve(&root, "a/../../outside.txt").is_err());
    }

    #[test]
    fn accepts_absolute_path_inside_root() {
        let (_dir, root) = workspace();
        let abs = root.join("nested/file.txt");
        let resolved = resolve(&root, abs.to_str().unwrap()).unwrap();
        assert_eq!(resolved, abs);
    }

    #[test]
    fn rejects_absolute_path_outside_root() {
        let (_dir, root) = workspace();
        assert!(resolve(&root, "/etc/passwd").is_err());
    }

    #[test]
    fn deny_globs_reject_matching_paths() {
        let (_dir, root) = workspace();
        let resolved = resolve(&root, "secrets/key.pem").unwrap();
        let deny = vec!["secrets/*".to_string()];
        assert!(validate(&resolved, &root, &deny, &[]).is_err());
    }

    #[test]
    fn allow_paths_restrict_to_listed_roots() {
        let (_dir, root) = workspace();
        let inside = resolve(&root, "src/main.rs").unwrap();
        let outside = resolve(&root, "docs/readme.md").unwrap();
        let allow = vec!["src".to_string()];
        assert!(validate(&inside, &root, &[], &allow).is_ok());
        assert!(validate(&outside, &root, &[], &allow).is_err());
    }

    #[test]
    fn empty_string_in_allow_paths_disables_the_check() {
        let (_dir, root) = workspace();
        let anywhere = resolve(&root, "docs/readme.md").unwrap();
        let allow = vec!["".to_string()];
        assert!(validate(&anywhere, &root, &[], &allow).is_ok());
    }

    #[test]
    fn dot_in_allow_paths_means_the_whole_root() {
        let (_dir, root) = workspace();
        let anywhere = resolve(&root, "docs/readme.md").unwrap();
        let allow = vec![".".to_string()];
        assert!(validate(&anywhere, &root, &[], &allow).is_ok());
    }

    #[test]
    fn symlink_escaping_root_is_rejected() {
        let (dir, root) = workspace();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("secret.txt");
        fs::write(&target, b"top secret").unwrap();
        let link = dir.path().join("escape");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, &link).unwrap();
        #[cfg(unix)]
        assert!(resolve(&root, "escape").is_err());
    }
}
