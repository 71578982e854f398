use crate::error::{HistoryError, Result};
use std::path::{Path, PathBuf};

pub const HISTORY_DIR_NAME: &str = ".mcp/edit_history";
pub const LOGS_DIR: &str = "logs";
pub const DIFFS_DIR: &str = "diffs";
pub const CHECKPOINTS_DIR: &str = "checkpoints";

/// Ascends from `start` until a directory containing `.mcp/edit_history/` is found.
pub fn find_workspace_root(start: &Path) -> Result<PathBuf> {
    let mut current = if start.is_absolute() {
        start.to_path_buf()
    } else {
        std::env::current_dir()?.join(start)
    };

    loop {
        if current.join(HISTORY_DIR_NAME).is_dir() {
            return Ok(current);
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => {
                return Err(HistoryError::WorkspaceNotFound(
                    start.display().to_string(),
                ));
            }
        }
    }
}

pub fn history_root(workspace: &Path) -> PathBuf {
    workspace.join(HISTORY_DIR_NAME)
}

pub fn logs_dir(workspace: &Path) -> PathBuf {
    history_root(workspace).join(LOGS_DIR)
}

pub fn diffs_dir(workspace: &Path) -> PathBuf {
    history_root(workspace).join(DIFFS_DIR)
}

pub fn checkpoints_dir(workspace: &Path) -> PathBuf {
    history_root(workspace).join(CHECKPOINTS_DIR)
}

/// Ensures `logs/`, `diffs/`, `checkpoints/` exist under the history root.
pub fn ensure_history_layout(workspace: &Path) -> Result<()> {
    std::fs::create_dir_all(logs_dir(workspace))?;
    std::fs::create_dir_all(diffs_dir(workspace))?;
    std::fs::create_dir_all(checkpoints_dir(workspace))?;
    Ok(())
}

/// Replaces path separators and unsafe characters with `_`. If the result exceeds
/// 200 bytes, truncates and appends an 8-hex-char SHA-1 suffix of the original to
/// preserve uniqueness.
pub fn sanitize_for_filename(relative_path: &str) -> String {
    let mut sanitized: String = relative_path
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => c,
            _ => '_',
        })
        .collect();

    const MAX_LEN: usize = 200;
    if sanitized.len() > MAX_LEN {
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(relative_path.as_bytes());
        let digest = hasher.finalize();
        let suffix: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
        sanitized.truncate(MAX_LEN - 9);
        sanitized.push('_');
        sanitized.push_str(&suffix);
    }
    sanitized
}

/// Resolves `path` (absolute, or relative to `workspace`) and verifies every ancestor
/// symlink stays within `workspace`, and that the final resolved path is inside it.
pub fn verify_path_is_safe(path: &Path, workspace: &Path) -> Result<PathBuf> {
    let candidate = if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    };

    let workspace_canon = workspace.canonicalize().map_err(HistoryError::Io)?;

    let mut current = candidate.clone();
    loop {
        if current.is_symlink() {
            let target = current.read_link().ok().and_then(|t| {
                let resolved = if t.is_absolute() {
                    t
                } else {
                    current.parent().unwrap_or(Path::new("/")).join(t)
                };
                resolved.canonicalize().ok()
            });
            if let Some(target) = target
                && !target.starts_with(&workspace_canon)
            {
                return Err(HistoryError::AccessDenied {
                    path: path.display().to_string(),
                    reason: format!(
                        "symlink '{}' escapes workspace",
                        current.display()
                    ),
                });
            }
        }
        match current.parent() {
            Some(parent) if parent != current => current = parent.to_path_buf(),
            _ => break,
        }
    }

    let resolved = if candidate.exists() {
        candidate.canonicalize().map_err(HistoryError::Io)?
    } else {
        // Canonicalize the nearest existing ancestor and rejoin the missing tail.
        let mut ancestor = candidate.clone();
        let mut tail = Vec::new();
        loop {
            if ancestor.exists() {
                break;
            }
            match ancestor.parent() {
                Some(parent) => {
                    if let Some(name) = ancestor.file_name() {
                        tail.push(name.to_owned());
                    }
                    ancestor = parent.to_path_buf();
                }
                None => break,
            }
        }
        let mut resolved = ancestor.canonicalize().unwrap_or(ancestor);
        for component in tail.into_iter().rev() {
            resolved.push(component);
        }
        resolved
    };

    if !resolved.starts_with(&workspace_canon) {
        return Err(HistoryError::AccessDenied {
            path: path.display().to_string(),
            reason: "resolves outside workspace root".to_string(),
        });
    }

    Ok(resolved)
}

/// Returns `path` relative to `workspace`, using forward slashes regardless of platform.
pub fn to_workspace_relative(path: &Path, workspace: &Path) -> Result<String> {
    let relative = path.strip_prefix(workspace).map_err(|_| {
        HistoryError::AccessDenied {
            path: path.display().to_string(),
            reason: "not within workspace".to_string(),
        }
    })?;
    Ok(relative.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_for_filename("src/main.rs"), "src_main.rs");
        assert_eq!(sanitize_for_filename("a\\b:c"), "a_b_c");
    }

    #[test]
    fn sanitize_truncates_long_paths_with_suffix() {
        let long = "a/".repeat(150) + "file.txt";
        let sanitized = sanitize_for_filename(&long);
        assert!(sanitized.len() <= 200);
        assert!(sanitized.contains('_'));
    }

    #[test]
    fn find_workspace_root_ascends() {
        let tmp = tempfile::tempdir().unwrap();
        let history = tmp.path().join(HISTORY_DIR_NAME);
        std::fs::create_dir_all(&history).unwrap();
        let nested = tmp.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_workspace_root(&nested).unwrap();
        assert_eq!(found.canonicalize().unwrap(), tmp.path().canonicalize().unwrap());
    }

    #[test]
    fn find_workspace_root_fails_without_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let err = find_workspace_root(tmp.path());
        assert!(err.is_err());
    }

    #[test]
    fn verify_path_is_safe_rejects_escape_via_symlink() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = tmp.path().join("workspace");
        std::fs::create_dir_all(&workspace).unwrap();
        let outside = tmp.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();

        #[cfg(unix)]
        {
            let link = workspace.join("escape");
            std::os::unix::fs::symlink(&outside, &link).unwrap();
            let result = verify_path_is_safe(Path::new("escape"), &workspace);
            assert!(result.is_err());
        }
    }

    #[test]
    fn verify_path_is_safe_allows_internal_path() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = tmp.path().join("workspace");
        std::fs::create_dir_all(workspace.join("sub")).unwrap();

        let result = verify_path_is_safe(Path::new("sub/file.txt"), &workspace);
        assert!(result.is_ok());
    }
}
