use crate::error::{HistoryError, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

/// Produces a standard unified diff between `before` and `after` (newline-split
/// lines, no trailing newline assumed), with `a/<name>`/`b/<name>` headers.
pub fn generate_unified_diff(before: &[String], after: &[String], display_name: &str) -> String {
    let hunks = diff_lines(before, after);
    if hunks.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&format!("--- a/{display_name}\n"));
    out.push_str(&format!("+++ b/{display_name}\n"));
    for hunk in hunks {
        out.push_str(&hunk.render());
    }
    out
}

/// Produces a unified diff between the current working file and a checkpoint,
/// used when prompting about external modifications. Both sides display the
/// same workspace-relative `display_name`.
pub fn diff_against_checkpoint(
    current_file: &Path,
    checkpoint_file: &Path,
    display_name: &str,
) -> Result<String> {
    let current = read_lines(current_file)?;
    let checkpoint = read_lines(checkpoint_file)?;
    Ok(generate_unified_diff(&checkpoint, &current, display_name))
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(split_keep_lines(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn split_keep_lines(content: &str) -> Vec<String> {
    content.split_inclusive('\n').map(|s| s.to_string()).collect()
}

/// Invokes the system `patch` utility with `--no-backup-if-mismatch -p1 [-R]`,
/// working directory set to `workspace`, bounded by `timeout`.
pub fn apply_patch(
    diff: &str,
    workspace: &Path,
    target_relpath: &str,
    reverse: bool,
    timeout: Duration,
) -> Result<()> {
    let mut cmd = Command::new("patch");
    cmd.arg("--no-backup-if-mismatch")
        .arg("-p1")
        .arg("-s") // silent, diagnostics captured via stderr instead
        .current_dir(workspace)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if reverse {
        cmd.arg("-R");
    }

    let mut child = cmd.spawn().map_err(HistoryError::Io)?;
    {
        use std::io::Write;
        let mut stdin = child.stdin.take().expect("patch stdin piped");
        stdin.write_all(diff.as_bytes()).map_err(HistoryError::Io)?;
    }

    let output = wait_with_timeout(child, timeout)?;

    if !output.status.success() {
        return Err(HistoryError::PatchFailed {
            target: target_relpath.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

fn wait_with_timeout(
    mut child: std::process::Child,
    timeout: Duration,
) -> Result<std::process::Output> {
    let start = std::time::Instant::now();
    loop {
        match child.try_wait().map_err(HistoryError::Io)? {
            Some(_) => return child.wait_with_output().map_err(HistoryError::Io),
            None => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(HistoryError::PatchFailed {
                        target: "<unknown>".to_string(),
                        stderr: format!("patch did not complete within {}s", timeout.as_secs()),
                    });
                }
                std::thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

// --- Minimal unified-diff hunk generation (Myers-style LCS over lines) ---

struct Hunk {
    before_start: usize,
    before_len: usize,
    after_start: usize,
    after_len: usize,
    lines: Vec<(char, String)>,
}

impl Hunk {
    fn render(&self) -> String {
        let mut out = format!(
            "@@ -{},{} +{},{} @@\n",
            self.before_start, self.before_len, self.after_start, self.after_len
        );
        for (marker, line) in &self.lines {
            out.push(*marker);
            out.push_str(line);
            if !line.ends_with('\n') {
                out.push('\n');
                out.push_str("\\ No newline at end of file\n");
            }
        }
        out
    }
}

/// Computes a simple LCS-based diff and groups adjacent changes into hunks with
/// up to 3 lines of context, matching conventional unified diff output.
fn diff_lines(before: &[String], after: &[String]) -> Vec<Hunk> {
    let ops = lcs_ops(before, after);
    if ops.iter().all(|op| matches!(op, LineOp::Equal(_, _))) {
        return Vec::new();
    }

    const CONTEXT: usize = 3;
    let mut hunks = Vec::new();
    let mut i = 0;
    while i < ops.len() {
        if matches!(ops[i], LineOp::Equal(_, _)) {
            i += 1;
            continue;
        }
        // Found a change; expand backward for context.
        let mut start = i;
        let mut context_used = 0;
        while start > 0 && context_used < CONTEXT && matches!(ops[start - 1], LineOp::Equal(_, _)) {
            start -= 1;
            context_used += 1;
        }

        let mut end = i;
        loop {
            while end < ops.len() && !matches!(ops[end], LineOp::Equal(_, _)) {
                end += 1;
            }
            // Look ahead: if another change starts within 2*CONTEXT, merge hunks.
            let mut lookahead = end;
            let mut gap = 0;
            while lookahead < ops.len() && matches!(ops[lookahead], LineOp::Equal(_, _)) && gap < CONTEXT * 2 {
                lookahead += 1;
                gap += 1;
            }
            if lookahead < ops.len() && !matches!(ops[lookahead], LineOp::Equal(_, _)) {
                end = lookahead;
                continue;
            }
            break;
        }
        let trailing_context = CONTEXT.min(ops.len() - end);
        end += trailing_context;

        hunks.push(build_hunk(&ops[start..end], before, after));
        i = end;
    }
    hunks
}

#[derive(Clone, Copy)]
enum LineOp {
    Equal(usize, usize),
    Delete(usize),
    Insert(usize),
}

fn lcs_ops(before: &[String], after: &[String]) -> Vec<LineOp> {
    let n = before.len();
    let m = after.len();
    let mut dp = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if before[i] == after[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if before[i] == after[j] {
            ops.push(LineOp::Equal(i, j));
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            ops.push(LineOp::Delete(i));
            i += 1;
        } else {
            ops.push(LineOp::Insert(j));
            j += 1;
        }
    }
    while i < n {
        ops.push(LineOp::Delete(i));
        i += 1;
    }
    while j < m {
        ops.push(LineOp::Insert(j));
        j += 1;
    }
    ops
}

fn build_hunk(ops: &[LineOp], before: &[String], after: &[String]) -> Hunk {
    let mut lines = Vec::new();
    let mut before_start = None;
    let mut after_start = None;
    let mut before_len = 0usize;
    let mut after_len = 0usize;

    for op in ops {
        match *op {
            LineOp::Equal(bi, ai) => {
                before_start.get_or_insert(bi);
                after_start.get_or_insert(ai);
                before_len += 1;
                after_len += 1;
                lines.push((' ', before[bi].clone()));
            }
            LineOp::Delete(bi) => {
                before_start.get_or_insert(bi);
                before_len += 1;
                lines.push(('-', before[bi].clone()));
            }
            LineOp::Insert(ai) => {
                after_start.get_or_insert(ai);
                after_len += 1;
                lines.push(('+', after[ai].clone()));
            }
        }
    }

    Hunk {
        before_start: before_start.map(|v| v + 1).unwrap_or(0),
        before_len,
        after_start: after_start.map(|v| v + 1).unwrap_or(0),
        after_len,
        lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_diff_for_identical_content() {
        let lines = vec!["a\n".to_string(), "b\n".to_string()];
        let diff = generate_unified_diff(&lines, &lines, "a.txt");
        assert!(diff.is_empty());
    }

    #[test]
    fn diff_shows_replaced_line() {
        let before = vec!["hello\n".to_string()];
        let after = vec!["world\n".to_string()];
        let diff = generate_unified_diff(&before, &after, "a.txt");
        assert!(diff.contains("--- a/a.txt"));
        assert!(diff.contains("+++ b/a.txt"));
        assert!(diff.contains("-hello"));
        assert!(diff.contains("+world"));
    }

    #[test]
    fn diff_against_checkpoint_handles_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let current = tmp.path().join("current.txt");
        let checkpoint = tmp.path().join("checkpoint.txt");
        std::fs::write(&current, "new\n").unwrap();

        let diff = diff_against_checkpoint(&current, &checkpoint, "a.txt").unwrap();
        assert!(diff.contains("+new"));
    }
}
