use crate::commands::accept::prompt_yes_no;
use crate::config::Config;
use crate::error::Result;
use crate::history::entry::Status;
use crate::history::review::{self, ReviewSummary, VerifyOutcome};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Iterates pending edits oldest-first, prompting a/r/s/q for each.
pub fn run(workspace: &Path, config: &Config, conversation: Option<&str>) -> Result<()> {
    let lock_timeout = Duration::from_secs(config.lock_timeout_secs);
    let mut all_entries = review::load_all_entries(workspace, lock_timeout)?;

    let mut pending: Vec<String> = all_entries
        .iter()
        .filter(|e| e.status == Status::Pending)
        .filter(|e| conversation.is_none_or(|c| e.conversation_id.starts_with(c)))
        .collect::<Vec<_>>()
        .iter()
        .map(|e| e.edit_id.clone())
        .collect();
    pending.sort_by_key(|id| {
        all_entries
            .iter()
            .find(|e| &e.edit_id == id)
            .map(|e| e.sort_key())
            .unwrap_or_default()
    });

    let mut summary = ReviewSummary::default();

    for edit_id in &pending {
        // Re-check status: an earlier accept/reject in this loop (e.g. via a
        // conversation-wide cascade) may have already resolved this entry.
        let Some(entry) = all_entries.iter().find(|e| &e.edit_id == edit_id) else {
            continue;
        };
        if entry.status != Status::Pending {
            continue;
        }

        println!(
            "\n{} [{}] {} {}",
            entry.edit_id, entry.conversation_id, entry.operation, entry.file_path
        );
        if let Some(diff_relpath) = &entry.diff_file {
            let diff_path = crate::history::paths::diffs_dir(workspace).join(diff_relpath);
            if let Ok(content) = std::fs::read_to_string(&diff_path) {
                print!("{content}");
            }
        }

        print!("(a)ccept / (r)eject / (s)kip / (q)uit: ");
        std::io::stdout().flush()?;
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        match input.trim().to_lowercase().as_str() {
            "a" => {
                let Some(force) = confirm_external_modification(workspace, &all_entries, edit_id, "accepting")? else {
                    summary.skipped += 1;
                    continue;
                };
                review::accept(workspace, config, &mut all_entries, &[edit_id.clone()], force)?;
                summary.accepted += 1;
            }
            "r" => {
                let Some(force) = confirm_external_modification(workspace, &all_entries, edit_id, "rejecting")? else {
                    summary.skipped += 1;
                    continue;
                };
                review::reject(workspace, config, &mut all_entries, &[edit_id.clone()], force)?;
                summary.rejected += 1;
            }
            "s" => {
                summary.skipped += 1;
            }
            "q" => break,
            _ => {
                println!("unrecognized input, skipping");
                summary.skipped += 1;
            }
        }
    }

    summary.remaining = all_entries
        .iter()
        .filter(|e| e.status == Status::Pending)
        .count();

    println!(
        "\nReview summary: {} accepted, {} rejected, {} skipped, {} remaining pending.",
        summary.accepted, summary.rejected, summary.skipped, summary.remaining
    );

    Ok(())
}

/// Checks every file the given edit affects for external modification; shows
/// the diff and prompts per spec §4.7. Returns `Some(force)` to proceed
/// (`force` true only if the user opted to continue past a modified file) or
/// `None` if the user chose to skip this entry.
fn confirm_external_modification(
    workspace: &Path,
    all_entries: &[crate::history::entry::EditEntry],
    edit_id: &str,
    verb: &str,
) -> Result<Option<bool>> {
    let refs: Vec<_> = all_entries.iter().filter(|e| e.edit_id == edit_id).collect();
    let files = review::affected_files(all_entries, &refs);

    let mut force = false;
    for file in &files {
        if let VerifyOutcome::Modified { diff } = review::verify_external_modification(workspace, file, all_entries)? {
            println!("'{file}' was modified outside the tracked history:");
            println!("{diff}");
            if !prompt_yes_no(&format!("Continue {verb} anyway? [y/N] "))? {
                println!("Skipped.");
                return Ok(None);
            }
            force = true;
        }
    }
    Ok(Some(force))
}
