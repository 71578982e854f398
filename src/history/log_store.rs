use crate::error::Result;
use crate::history::entry::EditEntry;
use crate::history::lock::FileLock;
use crate::utils::debug_log;
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Duration;

/// Reads all entries from `log_path` in file order, tolerating malformed lines
/// (skipped with a debug warning). Sets `log_file_source` on each entry.
pub fn read(log_path: &Path, lock_timeout: Duration) -> Result<Vec<EditEntry>> {
    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let lock = FileLock::acquire(log_path, lock_timeout)?;
    let result = read_unlocked(log_path);
    lock.release();
    result
}

fn read_unlocked(log_path: &Path) -> Result<Vec<EditEntry>> {
    let file = std::fs::File::open(log_path)?;
    let reader = std::io::BufReader::new(file);
    let source_name = log_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut entries = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EditEntry>(&line) {
            Ok(mut entry) => {
                entry.log_file_source = source_name.clone();
                entries.push(entry);
            }
            Err(e) => {
                debug_log(&format!(
                    "skipping malformed log line {} in {}: {e}",
                    lineno + 1,
                    log_path.display()
                ));
            }
        }
    }
    Ok(entries)
}

/// Sorts by (timestamp, tool_call_index) and rewrites `log_path` atomically via a
/// temp file followed by a rename.
pub fn write(log_path: &Path, entries: &[EditEntry], lock_timeout: Duration) -> Result<()> {
    let lock = FileLock::acquire(log_path, lock_timeout)?;
    let result = write_unlocked(log_path, entries);
    lock.release();
    result
}

fn write_unlocked(log_path: &Path, entries: &[EditEntry]) -> Result<()> {
    let mut sorted: Vec<&EditEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = log_path.with_extension(format!(
        "{}.tmp.{}",
        log_path.extension().and_then(|e| e.to_str()).unwrap_or("log"),
        std::process::id()
    ));

    let write_result = (|| -> Result<()> {
        let mut file = std::fs::File::create(&tmp_path)?;
        for entry in &sorted {
            let line = serde_json::to_string(entry)?;
            writeln!(file, "{line}")?;
        }
        file.sync_all()?;
        std::fs::rename(&tmp_path, log_path)?;
        Ok(())
    })();

    if write_result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    write_result
}

/// Read-modify-write: appends `entry` to the log, preserving sort order.
pub fn append(log_path: &Path, entry: EditEntry, lock_timeout: Duration) -> Result<()> {
    let lock = FileLock::acquire(log_path, lock_timeout)?;
    let result = (|| -> Result<()> {
        let mut entries = if log_path.exists() {
            read_unlocked(log_path)?
        } else {
            Vec::new()
        };
        entries.push(entry);
        write_unlocked(log_path, &entries)
    })();
    lock.release();
    result
}

/// Rewrites a single entry in place (status transitions), identified by `edit_id`.
pub fn update_entry<F>(log_path: &Path, edit_id: &str, lock_timeout: Duration, mutate: F) -> Result<()>
where
    F: FnOnce(&mut EditEntry),
{
    let lock = FileLock::acquire(log_path, lock_timeout)?;
    let result = (|| -> Result<()> {
        let mut entries = read_unlocked(log_path)?;
        if let Some(entry) = entries.iter_mut().find(|e| e.edit_id == edit_id) {
            mutate(entry);
        }
        write_unlocked(log_path, &entries)
    })();
    lock.release();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::entry::Operation;
    use std::time::Duration;

    fn entry(conv: &str, idx: i64, ts: &str) -> EditEntry {
        let mut e = EditEntry::new(conv, idx, Operation::Create, "a.txt", "write_file");
        e.timestamp = ts.to_string();
        e
    }

    #[test]
    fn append_then_read_preserves_order() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("C1.log");

        append(&log_path, entry("C1", 1, "2026-01-01T00:00:01.000Z"), Duration::from_secs(1)).unwrap();
        append(&log_path, entry("C1", 0, "2026-01-01T00:00:00.000Z"), Duration::from_secs(1)).unwrap();

        let entries = read(&log_path, Duration::from_secs(1)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tool_call_index, 0);
        assert_eq!(entries[1].tool_call_index, 1);
        assert_eq!(entries[0].log_file_source, "C1.log");
    }

    #[test]
    fn no_tmp_file_remains_after_write() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("C1.log");
        append(&log_path, entry("C1", 0, "2026-01-01T00:00:00.000Z"), Duration::from_secs(1)).unwrap();

        let tmp_files: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(tmp_files.is_empty());
    }

    #[test]
    fn update_entry_rewrites_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("C1.log");
        let e = entry("C1", 0, "2026-01-01T00:00:00.000Z");
        let id = e.edit_id.clone();
        append(&log_path, e, Duration::from_secs(1)).unwrap();

        update_entry(&log_path, &id, Duration::from_secs(1), |entry| {
            entry.status = crate::history::entry::Status::Accepted;
        })
        .unwrap();

        let entries = read(&log_path, Duration::from_secs(1)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, crate::history::entry::Status::Accepted);
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("C1.log");
        let e = entry("C1", 0, "2026-01-01T00:00:00.000Z");
        std::fs::write(&log_path, format!("{{not json\n{}\n", serde_json::to_string(&e).unwrap())).unwrap();

        let entries = read(&log_path, Duration::from_secs(1)).unwrap();
        assert_eq!(entries.len(), 1);
    }
}
