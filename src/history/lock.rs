use crate::error::{HistoryError, Result};
use crate::utils::debug_log;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An exclusive advisory lock bound to a path, represented on disk as a sibling
/// `<path>.lockdir/` directory containing a `pid.lock` file naming the holder.
pub struct FileLock {
    lock_dir: PathBuf,
    held: bool,
}

impl FileLock {
    fn lock_dir_for(path: &Path) -> PathBuf {
        let mut os_string = path.as_os_str().to_owned();
        os_string.push(".lockdir");
        PathBuf::from(os_string)
    }

    /// Acquires the lock on `path`, waiting up to `timeout` and polling for
    /// staleness/contention in between.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<FileLock> {
        let lock_dir = Self::lock_dir_for(path);
        if let Some(parent) = lock_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            clear_if_stale(&lock_dir);

            match std::fs::create_dir(&lock_dir) {
                Ok(()) => {
                    let pid_path = lock_dir.join("pid.lock");
                    let mut file = std::fs::File::create(&pid_path)?;
                    write!(file, "{}", std::process::id())?;
                    debug_log(&format!("acquired lock {}", lock_dir.display()));
                    return Ok(FileLock {
                        lock_dir,
                        held: true,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        // One final staleness check right at the deadline.
                        clear_if_stale(&lock_dir);
                        if std::fs::create_dir(&lock_dir).is_ok() {
                            let pid_path = lock_dir.join("pid.lock");
                            let mut file = std::fs::File::create(&pid_path)?;
                            write!(file, "{}", std::process::id())?;
                            return Ok(FileLock {
                                lock_dir,
                                held: true,
                            });
                        }
                        return Err(HistoryError::LockTimeout {
                            path: path.display().to_string(),
                            waited_secs: timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if self.held {
            let _ = std::fs::remove_dir_all(&self.lock_dir);
            self.held = false;
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.do_release();
    }
}

/// Checks whether the lock directory's owning pid is dead (or missing/empty),
/// and removes it if so. Used both by `acquire` and by the `cleanup` command.
pub fn clear_if_stale(lock_dir: &Path) -> bool {
    if !lock_dir.is_dir() {
        return false;
    }
    let pid_path = lock_dir.join("pid.lock");
    let pid_str = match std::fs::read_to_string(&pid_path) {
        Ok(s) => s,
        Err(_) => {
            debug_log(&format!(
                "lock dir {} missing pid file, treating as stale",
                lock_dir.display()
            ));
            let _ = std::fs::remove_dir_all(lock_dir);
            return true;
        }
    };

    let pid: i32 = match pid_str.trim().parse() {
        Ok(p) if p > 0 => p,
        _ => {
            debug_log(&format!(
                "lock dir {} has empty/invalid pid, treating as stale",
                lock_dir.display()
            ));
            let _ = std::fs::remove_dir_all(lock_dir);
            return true;
        }
    };

    if is_process_alive(pid) {
        false
    } else {
        debug_log(&format!(
            "lock dir {} owner pid {} is dead, removing",
            lock_dir.display(),
            pid
        ));
        let _ = std::fs::remove_dir_all(lock_dir);
        true
    }
}

#[cfg(unix)]
fn is_process_alive(pid: i32) -> bool {
    // kill(pid, 0) checks for existence without sending a signal.
    unsafe { libc::kill(pid, 0) == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM) }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: i32) -> bool {
    true
}

/// Recursively scans `root` for `*.lockdir` directories and removes stale ones.
/// Returns the number removed.
pub fn cleanup_stale_locks(root: &Path) -> Result<usize> {
    let mut removed = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let is_lockdir = path
                .extension()
                .map(|ext| ext == "lockdir")
                .unwrap_or(false)
                || path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(".lockdir"))
                    .unwrap_or(false);
            if is_lockdir {
                if clear_if_stale(&path) {
                    removed += 1;
                }
            } else {
                stack.push(path);
            }
        }
    }
    Ok(removed)
}

/// Acquires locks for several paths in canonical order (alphabetical by resolved
/// absolute path) to prevent deadlocks when multiple locks are required together.
pub struct MultiLock {
    locks: Vec<FileLock>,
}

impl MultiLock {
    pub fn acquire_all(paths: &[PathBuf], timeout: Duration) -> Result<MultiLock> {
        let mut ordered: Vec<&PathBuf> = paths.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut locks = Vec::with_capacity(ordered.len());
        for path in ordered {
            locks.push(FileLock::acquire(path, timeout)?);
        }
        Ok(MultiLock { locks })
    }
}

impl Drop for MultiLock {
    fn drop(&mut self) {
        // Release in reverse acquisition order.
        while let Some(lock) = self.locks.pop() {
            lock.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("file.log");
        let lock_dir = FileLock::lock_dir_for(&target);

        let lock = FileLock::acquire(&target, Duration::from_secs(1)).unwrap();
        assert!(lock_dir.exists());
        lock.release();
        assert!(!lock_dir.exists());
    }

    #[test]
    fn stale_lock_with_dead_pid_is_recovered() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("file.log");
        let lock_dir = PathBuf::from(format!("{}.lockdir", target.display()));
        std::fs::create_dir_all(&lock_dir).unwrap();
        std::fs::write(lock_dir.join("pid.lock"), "999999").unwrap();

        let lock = FileLock::acquire(&target, Duration::from_secs(2)).unwrap();
        lock.release();
    }

    #[test]
    fn cleanup_removes_stale_locks_recursively() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("logs");
        std::fs::create_dir_all(&nested).unwrap();
        let lock_dir = nested.join("C1.log.lockdir");
        std::fs::create_dir_all(&lock_dir).unwrap();
        std::fs::write(lock_dir.join("pid.lock"), "999999").unwrap();

        let removed = cleanup_stale_locks(tmp.path()).unwrap();
        assert_eq!(removed, 1);
        assert!(!lock_dir.exists());
    }
}
