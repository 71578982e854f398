use crate::config::Config;
use crate::error::{HistoryError, Result};
use crate::history::entry::{EditEntry, Operation, Status};
use crate::history::reconstruct::{reconstruct, ReplayMode};
use crate::history::{diff_engine, hash, lock, log_store, paths};
use crate::utils::debug_log;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Reads every conversation's log file under the history root and merges them.
pub fn load_all_entries(workspace: &Path, lock_timeout: Duration) -> Result<Vec<EditEntry>> {
    let logs_dir = paths::logs_dir(workspace);
    if !logs_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for item in std::fs::read_dir(&logs_dir)? {
        let item = item?;
        let path = item.path();
        if path.extension().and_then(|e| e.to_str()) == Some("log") {
            entries.extend(log_store::read(&path, lock_timeout)?);
        }
    }
    Ok(entries)
}

fn log_path_for(workspace: &Path, conversation_id: &str) -> std::path::PathBuf {
    paths::logs_dir(workspace).join(format!("{conversation_id}.log"))
}

#[derive(Debug, Default, Clone)]
pub struct StatusFilter {
    pub conversation: Option<String>,
    pub file_substring: Option<String>,
    pub status: Option<Status>,
    pub since: Option<Duration>,
    pub operation: Option<Operation>,
    pub limit: usize,
}

/// Filters and paginates entries newest-first. `limit == 0` means unlimited.
pub fn filter_status(entries: &[EditEntry], filter: &StatusFilter) -> Vec<EditEntry> {
    let now = chrono::Utc::now();
    let mut filtered: Vec<EditEntry> = entries
        .iter()
        .filter(|e| {
            if let Some(conv) = &filter.conversation
                && !(e.conversation_id.starts_with(conv.as_str())
                    || e.conversation_id.ends_with(conv.as_str()))
            {
                return false;
            }
            if let Some(sub) = &filter.file_substring
                && !e.file_path.contains(sub.as_str())
            {
                return false;
            }
            if let Some(status) = filter.status
                && e.status != status
            {
                return false;
            }
            if let Some(op) = filter.operation
                && e.operation != op
            {
                return false;
            }
            if let Some(since) = filter.since
                && let Ok(ts) = chrono::DateTime::parse_from_rfc3339(&e.timestamp)
            {
                let age = now.signed_duration_since(ts.with_timezone(&chrono::Utc));
                if age.to_std().unwrap_or(Duration::ZERO) > since {
                    return false;
                }
            }
            true
        })
        .cloned()
        .collect();

    filtered.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    if filter.limit > 0 && filtered.len() > filter.limit {
        filtered.truncate(filter.limit);
    }
    filtered
}

/// Finds entries whose `edit_id` starts with `prefix`.
pub fn find_by_edit_prefix<'a>(entries: &'a [EditEntry], prefix: &str) -> Vec<&'a EditEntry> {
    entries.iter().filter(|e| e.edit_id.starts_with(prefix)).collect()
}

/// Finds all entries belonging to a conversation whose id the given string
/// prefixes or suffixes.
pub fn find_by_conversation<'a>(entries: &'a [EditEntry], id: &str) -> Vec<&'a EditEntry> {
    let mut matches: Vec<&EditEntry> = entries
        .iter()
        .filter(|e| e.conversation_id.starts_with(id) || e.conversation_id.ends_with(id))
        .collect();
    matches.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    matches
}

/// Resolves a possibly-ambiguous edit id prefix to a single entry, or returns
/// `AmbiguousIdentifier` naming all candidates for the caller to disambiguate.
pub fn resolve_edit_prefix<'a>(entries: &'a [EditEntry], prefix: &str) -> Result<&'a EditEntry> {
    let matches = find_by_edit_prefix(entries, prefix);
    match matches.len() {
        0 => Err(HistoryError::NotFound(format!("no edit matching '{prefix}'"))),
        1 => Ok(matches[0]),
        _ => Err(HistoryError::AmbiguousIdentifier {
            identifier: prefix.to_string(),
            candidates: matches.iter().map(|e| e.edit_id.clone()).collect(),
        }),
    }
}

pub enum VerifyOutcome {
    Clean,
    Modified { diff: String },
}

/// Pre-verify step shared by accept and reject: compares the working file's
/// current hash against the `hash_after` of the most recent accepted/pending
/// entry for that file; on mismatch, produces a diff against the matching
/// checkpoint for the caller to show the user.
pub fn verify_external_modification(
    workspace: &Path,
    file_path: &str,
    all_entries: &[EditEntry],
) -> Result<VerifyOutcome> {
    let mut history: Vec<&EditEntry> = all_entries
        .iter()
        .filter(|e| e.file_path == file_path || e.source_path.as_deref() == Some(file_path))
        .collect();
    history.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let last_applied = history
        .iter()
        .rev()
        .find(|e| matches!(e.status, Status::Accepted | Status::Pending));

    let Some(last_applied) = last_applied else {
        return Ok(VerifyOutcome::Clean);
    };

    // If the most recent entry touching this path is a move that carried it
    // away (this path was the source, not the destination), the path is
    // expected to no longer exist rather than to still hold `hash_after`.
    let expected_hash = if last_applied.file_path == file_path {
        last_applied.hash_after.clone()
    } else {
        None
    };

    let working_path = workspace.join(file_path);
    let current_hash = hash::hash_file(&working_path)?;
    if current_hash == expected_hash {
        return Ok(VerifyOutcome::Clean);
    }

    let checkpoint_entry = history
        .iter()
        .rev()
        .find(|e| e.checkpoint_file.is_some() && e.hash_after == expected_hash)
        .or_else(|| history.iter().find(|e| e.checkpoint_file.is_some()));

    let diff = if let Some(checkpoint_entry) = checkpoint_entry {
        let checkpoint_path =
            paths::history_root(workspace).join(checkpoint_entry.checkpoint_file.as_ref().unwrap());
        diff_engine::diff_against_checkpoint(&working_path, &checkpoint_path, file_path)?
    } else {
        String::new()
    };

    Ok(VerifyOutcome::Modified { diff })
}

/// Groups entry references by the distinct file they target, expanded through
/// each entry's rename-identity group so that rejecting/accepting a `move`
/// also covers its source path, used to derive "affected files" for accept/reject.
pub fn affected_files(all_entries: &[EditEntry], entries: &[&EditEntry]) -> Vec<String> {
    let mut seen = HashMap::new();
    for e in entries {
        for name in crate::history::reconstruct::identity_group(all_entries, &e.file_path) {
            seen.entry(name).or_insert(());
        }
    }
    seen.into_keys().collect()
}

/// Implements `accept`: pre-verify, reconstruct in include-pending mode, flip
/// status to accepted for each target entry. `force` skips the
/// external-modification hard-stop; the CLI layer sets it after the user has
/// already been shown the diff and confirmed "continue anyway".
pub fn accept(
    workspace: &Path,
    config: &Config,
    all_entries: &mut Vec<EditEntry>,
    target_edit_ids: &[String],
    force: bool,
) -> Result<()> {
    let lock_timeout = Duration::from_secs(config.lock_timeout_secs);
    let patch_timeout = Duration::from_secs(config.patch_timeout_secs);

    let targets: Vec<EditEntry> = all_entries
        .iter()
        .filter(|e| target_edit_ids.contains(&e.edit_id))
        .cloned()
        .collect();
    let files: Vec<String> = {
        let refs: Vec<&EditEntry> = targets.iter().collect();
        affected_files(all_entries, &refs)
    };

    if !force {
        for file in &files {
            if let VerifyOutcome::Modified { .. } = verify_external_modification(workspace, file, all_entries)? {
                return Err(HistoryError::ExternalModification {
                    path: file.clone(),
                });
            }
        }
    }

    let mut reconstructed_groups: Vec<String> = Vec::new();
    let mut computed_hashes: HashMap<String, Option<String>> = HashMap::new();
    for file in &files {
        if reconstructed_groups
            .iter()
            .any(|g| crate::history::reconstruct::identity_group(all_entries, g).contains(file))
        {
            continue;
        }
        let hashes = reconstruct(workspace, all_entries, file, ReplayMode::IncludePending, patch_timeout)?;
        reconstructed_groups.push(file.clone());

        for entry in all_entries.iter_mut() {
            if let Some(new_hash) = hashes.get(&entry.file_path)
                && target_edit_ids.contains(&entry.edit_id)
            {
                entry.status = Status::Accepted;
                entry.hash_after = new_hash.clone();
                computed_hashes.insert(entry.edit_id.clone(), new_hash.clone());
            }
        }
    }

    for target in &targets {
        let log_path = log_path_for(workspace, &target.conversation_id);
        let new_hash = computed_hashes.get(&target.edit_id).cloned().flatten();
        log_store::update_entry(&log_path, &target.edit_id, lock_timeout, |e| {
            e.status = Status::Accepted;
            e.hash_after = new_hash.clone();
        })?;
    }

    Ok(())
}

/// Implements `reject`: pre-verify, snapshot, flip to rejected, reconstruct in
/// accepted-only mode, append a `revert` entry, with best-effort rollback on
/// reconstruction failure. `force` skips the external-modification hard-stop,
/// same convention as `accept`.
pub fn reject(
    workspace: &Path,
    config: &Config,
    all_entries: &mut Vec<EditEntry>,
    target_edit_ids: &[String],
    force: bool,
) -> Result<()> {
    let lock_timeout = Duration::from_secs(config.lock_timeout_secs);
    let patch_timeout = Duration::from_secs(config.patch_timeout_secs);

    let targets: Vec<EditEntry> = all_entries
        .iter()
        .filter(|e| target_edit_ids.contains(&e.edit_id))
        .cloned()
        .collect();
    if targets.is_empty() {
        return Err(HistoryError::NotFound("no matching edits to reject".to_string()));
    }
    let files: Vec<String> = {
        let refs: Vec<&EditEntry> = targets.iter().collect();
        affected_files(all_entries, &refs)
    };

    if !force {
        for file in &files {
            if let VerifyOutcome::Modified { .. } = verify_external_modification(workspace, file, all_entries)? {
                return Err(HistoryError::ExternalModification {
                    path: file.clone(),
                });
            }
        }
    }

    // A rename-identity group can include a source path that never appears
    // as a target's own `file_path` (e.g. rejecting a `move` pulls in the
    // path it moved away from); fall back to the first target's conversation.
    let fallback_conversation_id = targets[0].conversation_id.clone();

    // Snapshot every affected file before mutating any status.
    let mut snapshots = HashMap::new();
    for file in &files {
        let working_path = workspace.join(file);
        let conversation_id = targets
            .iter()
            .find(|e| &e.file_path == file || e.source_path.as_deref() == Some(file.as_str()))
            .map(|e| e.conversation_id.clone())
            .unwrap_or_else(|| fallback_conversation_id.clone());
        let checkpoint_dir = paths::checkpoints_dir(workspace).join(&conversation_id);
        std::fs::create_dir_all(&checkpoint_dir)?;
        let sanitized = paths::sanitize_for_filename(file);
        let edit_or_conv = target_edit_ids.first().cloned().unwrap_or_default();
        let snapshot_path = checkpoint_dir.join(format!(
            "{sanitized}_{edit_or_conv}_{}.chkpt",
            crate::utils::hex_timestamp()
        ));
        if working_path.exists() {
            std::fs::copy(&working_path, &snapshot_path)?;
        } else {
            std::fs::write(&snapshot_path, b"")?;
        }
        snapshots.insert(file.clone(), snapshot_path);

        let snapshot_relpath = snapshots[file]
            .strip_prefix(paths::history_root(workspace))
            .unwrap_or(&snapshots[file])
            .to_string_lossy()
            .replace('\\', "/");
        let mut snapshot_entry = EditEntry::new(
            conversation_id.clone(),
            crate::history::entry::SNAPSHOT_INDEX,
            Operation::Snapshot,
            file.clone(),
            "reject",
        );
        snapshot_entry.status = Status::Done;
        snapshot_entry.checkpoint_file = Some(snapshot_relpath);
        let log_path = log_path_for(workspace, &conversation_id);
        log_store::append(&log_path, snapshot_entry, lock_timeout)?;
    }

    let prior_statuses: HashMap<String, Status> =
        targets.iter().map(|e| (e.edit_id.clone(), e.status)).collect();

    for entry in all_entries.iter_mut() {
        if target_edit_ids.contains(&entry.edit_id) {
            entry.status = Status::Rejected;
        }
    }
    for target in &targets {
        let log_path = log_path_for(workspace, &target.conversation_id);
        log_store::update_entry(&log_path, &target.edit_id, lock_timeout, |e| {
            e.status = Status::Rejected;
        })?;
    }

    let mut rollback_needed = false;
    let mut failure_reason = String::new();
    let mut reconstructed_groups: Vec<String> = Vec::new();
    for file in &files {
        if reconstructed_groups
            .iter()
            .any(|g| crate::history::reconstruct::identity_group(all_entries, g).contains(file))
        {
            continue;
        }
        match reconstruct(workspace, all_entries, file, ReplayMode::AcceptedOnly, patch_timeout) {
            Ok(hashes) => {
                reconstructed_groups.push(file.clone());
                for (group_file, hash_after) in &hashes {
                    let last_rejected = targets
                        .iter()
                        .filter(|e| e.file_path == *group_file)
                        .next_back()
                        .map(|e| e.edit_id.clone())
                        .unwrap_or_else(|| target_edit_ids.first().cloned().unwrap_or_default());
                    let conversation_id = targets
                        .iter()
                        .find(|e| &e.file_path == group_file || e.source_path.as_deref() == Some(group_file.as_str()))
                        .map(|e| e.conversation_id.clone())
                        .unwrap_or_else(|| fallback_conversation_id.clone());
                    let mut revert_entry = EditEntry::new(
                        conversation_id.clone(),
                        crate::history::entry::REVERT_INDEX,
                        Operation::Revert,
                        group_file.clone(),
                        "reject",
                    );
                    revert_entry.status = Status::Done;
                    revert_entry.rejected_edit_id = Some(last_rejected);
                    revert_entry.hash_after = hash_after.clone();
                    let log_path = log_path_for(workspace, &conversation_id);
                    log_store::append(&log_path, revert_entry, lock_timeout)?;
                }
            }
            Err(e) => {
                rollback_needed = true;
                failure_reason = e.to_string();
                break;
            }
        }
    }

    if rollback_needed {
        for (file, snapshot_path) in &snapshots {
            let working_path = workspace.join(file);
            let _ = std::fs::copy(snapshot_path, &working_path);
        }
        for entry in all_entries.iter_mut() {
            if let Some(prior) = prior_statuses.get(&entry.edit_id) {
                entry.status = *prior;
            }
        }
        for target in &targets {
            if let Some(prior) = prior_statuses.get(&target.edit_id) {
                let log_path = log_path_for(workspace, &target.conversation_id);
                let prior = *prior;
                log_store::update_entry(&log_path, &target.edit_id, lock_timeout, |e| {
                    e.status = prior;
                })?;
            }
        }
        return Err(HistoryError::ReconstructionFailed {
            path: files.join(", "),
            reason: failure_reason,
        });
    }

    Ok(())
}

#[derive(Debug, Default)]
pub struct ReviewSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub remaining: usize,
}

/// Scans the history root for `*.lockdir` directories and removes stale ones.
pub fn cleanup(workspace: &Path) -> Result<usize> {
    let removed = lock::cleanup_stale_locks(&paths::history_root(workspace))?;
    debug_log(&format!("cleanup removed {removed} stale lock directories"));
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::entry::Operation;

    fn entry(file: &str, idx: i64, ts: &str, op: Operation, status: Status) -> EditEntry {
        let mut e = EditEntry::new("C1", idx, op, file, "write_file");
        e.timestamp = ts.to_string();
        e.status = status;
        e
    }

    #[test]
    fn filter_status_respects_limit_and_newest_first() {
        let entries = vec![
            entry("a.txt", 0, "2026-01-01T00:00:00.000Z", Operation::Create, Status::Accepted),
            entry("b.txt", 1, "2026-01-02T00:00:00.000Z", Operation::Create, Status::Pending),
        ];
        let filter = StatusFilter {
            limit: 1,
            ..Default::default()
        };
        let result = filter_status(&entries, &filter);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].file_path, "b.txt");
    }

    #[test]
    fn filter_status_by_status_kind() {
        let entries = vec![
            entry("a.txt", 0, "2026-01-01T00:00:00.000Z", Operation::Create, Status::Accepted),
            entry("b.txt", 1, "2026-01-02T00:00:00.000Z", Operation::Create, Status::Pending),
        ];
        let filter = StatusFilter {
            status: Some(Status::Pending),
            ..Default::default()
        };
        let result = filter_status(&entries, &filter);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].file_path, "b.txt");
    }

    #[test]
    fn resolve_edit_prefix_ambiguous() {
        let mut e1 = entry("a.txt", 0, "2026-01-01T00:00:00.000Z", Operation::Create, Status::Pending);
        let mut e2 = entry("b.txt", 1, "2026-01-01T00:00:01.000Z", Operation::Create, Status::Pending);
        e1.edit_id = "ab1234".to_string();
        e2.edit_id = "ab1299".to_string();
        let entries = vec![e1, e2];
        let result = resolve_edit_prefix(&entries, "ab12");
        assert!(matches!(result, Err(HistoryError::AmbiguousIdentifier { .. })));
    }

    #[test]
    fn resolve_edit_prefix_unique() {
        let mut e1 = entry("a.txt", 0, "2026-01-01T00:00:00.000Z", Operation::Create, Status::Pending);
        e1.edit_id = "ab1234".to_string();
        let entries = vec![e1];
        let result = resolve_edit_prefix(&entries, "ab12").unwrap();
        assert_eq!(result.edit_id, "ab1234");
    }

    #[test]
    fn verify_external_modification_clean_when_no_history() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".mcp/edit_history")).unwrap();
        let outcome = verify_external_modification(tmp.path(), "a.txt", &[]).unwrap();
        assert!(matches!(outcome, VerifyOutcome::Clean));
    }
}
