use crate::config::Config;
use crate::error::{HistoryError, Result};
use crate::history::entry::{EditEntry, Operation, Status};
use crate::history::lock::MultiLock;
use crate::history::{diff_engine, hash, log_store, paths};
use crate::utils::debug_log;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Process-wide, per-conversation `tool_call_index` counters. In-memory only;
/// indices are advisory tie-breakers and need no persistence across restarts.
static INDEX_COUNTERS: Mutex<Option<HashMap<String, i64>>> = Mutex::new(None);

fn next_index(conversation_id: &str) -> i64 {
    let mut guard = INDEX_COUNTERS.lock().expect("index counter mutex poisoned");
    let map = guard.get_or_insert_with(HashMap::new);
    let counter = map.entry(conversation_id.to_string()).or_insert(-1);
    *counter += 1;
    *counter
}

/// The operation kind a caller (a tool handler) asserts for a tracked call.
/// `Create`/`Replace` are classified automatically by the Tracker from whether
/// the target exists; callers pass `Edit`, `Delete`, or `Move` explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Write,
    Edit,
    Delete,
    Move,
}

pub struct TrackRequest<'a> {
    pub kind: OperationKind,
    pub target: &'a Path,
    pub source: Option<&'a Path>,
    pub conversation_id: &'a str,
    pub tool_name: &'a str,
}

/// Wraps one mutating tool call per the tracker contract: resolves and
/// safety-checks paths, checkpoints on first touch, runs `execute_mutation`,
/// diffs pre/post state, and appends a `pending` log entry.
pub fn track<F>(
    workspace: &Path,
    config: &Config,
    request: TrackRequest,
    execute_mutation: F,
) -> Result<EditEntry>
where
    F: FnOnce() -> Result<()>,
{
    let lock_timeout = Duration::from_secs(config.lock_timeout_secs);
    let tool_call_index = next_index(request.conversation_id);

    let target_abs = paths::verify_path_is_safe(request.target, workspace)?;
    let source_abs = request
        .source
        .map(|s| paths::verify_path_is_safe(s, workspace))
        .transpose()?;

    let target_exists = target_abs.exists();
    let operation = match request.kind {
        OperationKind::Write => {
            if target_exists {
                Operation::Replace
            } else {
                Operation::Create
            }
        }
        OperationKind::Edit => {
            if !target_exists {
                return Err(HistoryError::InvalidState(format!(
                    "edit requires existing file: {}",
                    request.target.display()
                )));
            }
            Operation::Edit
        }
        OperationKind::Delete => Operation::Delete,
        OperationKind::Move => Operation::Move,
    };

    let log_path = paths::logs_dir(workspace).join(format!("{}.log", request.conversation_id));

    let mut lock_paths = vec![target_abs.clone()];
    if let Some(ref src) = source_abs {
        lock_paths.push(src.clone());
    }
    lock_paths.push(log_path.clone());
    let _locks = MultiLock::acquire_all(&lock_paths, lock_timeout)?;

    let target_relpath = paths::to_workspace_relative(&target_abs, workspace)?;
    let source_relpath = source_abs
        .as_ref()
        .map(|s| paths::to_workspace_relative(s, workspace))
        .transpose()?;

    // A move's content lives at the source path right up until
    // `execute_mutation` runs; the destination never exists beforehand, so
    // pre-state (hash, line snapshot, first-touch checkpoint) must be read
    // from there rather than from the target.
    let (pre_state_abs, pre_state_relpath): (&Path, String) = if operation == Operation::Move {
        let src_abs = source_abs.as_deref().ok_or_else(|| {
            HistoryError::InvalidState("move requires a source path".to_string())
        })?;
        let src_relpath = source_relpath.clone().ok_or_else(|| {
            HistoryError::InvalidState("move requires a source path".to_string())
        })?;
        (src_abs, src_relpath)
    } else {
        (target_abs.as_path(), target_relpath.clone())
    };
    let pre_state_exists = pre_state_abs.exists();

    let hash_before = hash::hash_file(pre_state_abs)?;
    let before_lines = read_lines_if_exists(pre_state_abs)?;

    let existing_entries = log_store::read(&log_path, lock_timeout)?;
    let already_touched = existing_entries.iter().any(|e| {
        e.file_path == target_relpath || source_relpath.as_deref() == Some(e.file_path.as_str())
    });

    let mut entry = EditEntry::new(
        request.conversation_id,
        tool_call_index,
        operation,
        target_relpath.clone(),
        request.tool_name,
    );
    entry.source_path = source_relpath;
    entry.hash_before = hash_before.clone();

    if !already_touched && pre_state_exists {
        let checkpoint_dir = paths::checkpoints_dir(workspace).join(request.conversation_id);
        std::fs::create_dir_all(&checkpoint_dir)?;
        let sanitized = paths::sanitize_for_filename(pre_state_relpath);
        let checkpoint_path = checkpoint_dir.join(format!("{sanitized}.chkpt"));
        std::fs::copy(pre_state_abs, &checkpoint_path)?;
        let checkpoint_relpath = checkpoint_path
            .strip_prefix(paths::history_root(workspace))
            .unwrap_or(&checkpoint_path)
            .to_string_lossy()
            .replace('\\', "/");
        entry.checkpoint_file = Some(checkpoint_relpath);
        debug_log(&format!("checkpointed {pre_state_relpath} for {}", request.conversation_id));
    }

    execute_mutation()?;

    let hash_after = hash::hash_file(&target_abs)?;
    entry.hash_after = hash_after;

    if matches!(operation, Operation::Create | Operation::Replace | Operation::Edit) {
        let after_lines = read_lines_if_exists(&target_abs)?;
        let diff = diff_engine::generate_unified_diff(&before_lines, &after_lines, &target_relpath);
        if !diff.is_empty() {
            let diff_dir = paths::diffs_dir(workspace).join(request.conversation_id);
            std::fs::create_dir_all(&diff_dir)?;
            let diff_path = diff_dir.join(format!("{}.diff", entry.edit_id));
            std::fs::write(&diff_path, &diff)?;
            entry.diff_file = Some(format!("{}/{}.diff", request.conversation_id, entry.edit_id));
        }
    }

    entry.status = Status::Pending;
    log_store::append(&log_path, entry.clone(), lock_timeout)?;

    Ok(entry)
}

fn read_lines_if_exists(path: &Path) -> Result<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content.split_inclusive('\n').map(|s| s.to_string()).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_workspace() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".mcp/edit_history")).unwrap();
        paths::ensure_history_layout(tmp.path()).unwrap();
        tmp
    }

    #[test]
    fn create_emits_pending_entry_with_diff() {
        let tmp = setup_workspace();
        let config = Config::default();
        let target = PathBuf::from("a.txt");

        let entry = track(
            tmp.path(),
            &config,
            TrackRequest {
                kind: OperationKind::Write,
                target: &target,
                source: None,
                conversation_id: "C1",
                tool_name: "write_file",
            },
            || {
                std::fs::write(tmp.path().join("a.txt"), "hello\n")?;
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(entry.operation, Operation::Create);
        assert_eq!(entry.status, Status::Pending);
        assert_eq!(entry.hash_before, None);
        assert!(entry.hash_after.is_some());
        assert!(entry.diff_file.is_some());
    }

    #[test]
    fn edit_on_missing_file_is_rejected() {
        let tmp = setup_workspace();
        let config = Config::default();
        let target = PathBuf::from("missing.txt");

        let result = track(
            tmp.path(),
            &config,
            TrackRequest {
                kind: OperationKind::Edit,
                target: &target,
                source: None,
                conversation_id: "C1",
                tool_name: "edit_file_diff",
            },
            || Ok(()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn checkpoint_taken_on_first_touch_only() {
        let tmp = setup_workspace();
        let config = Config::default();
        std::fs::write(tmp.path().join("a.txt"), "v1\n").unwrap();
        let target = PathBuf::from("a.txt");

        let first = track(
            tmp.path(),
            &config,
            TrackRequest {
                kind: OperationKind::Edit,
                target: &target,
                source: None,
                conversation_id: "C1",
                tool_name: "edit_file_diff",
            },
            || {
                std::fs::write(tmp.path().join("a.txt"), "v2\n")?;
                Ok(())
            },
        )
        .unwrap();
        assert!(first.checkpoint_file.is_some());

        let second = track(
            tmp.path(),
            &config,
            TrackRequest {
                kind: OperationKind::Edit,
                target: &target,
                source: None,
                conversation_id: "C1",
                tool_name: "edit_file_diff",
            },
            || {
                std::fs::write(tmp.path().join("a.txt"), "v3\n")?;
                Ok(())
            },
        )
        .unwrap();
        assert!(second.checkpoint_file.is_none());
    }
}
