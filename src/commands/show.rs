use crate::config::Config;
use crate::error::{HistoryError, Result};
use crate::history::entry::{EditEntry, Operation};
use crate::history::{paths, review};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

pub fn run(workspace: &Path, config: &Config, identifier: &str) -> Result<()> {
    let lock_timeout = Duration::from_secs(config.lock_timeout_secs);
    let all_entries = review::load_all_entries(workspace, lock_timeout)?;

    match review::resolve_edit_prefix(&all_entries, identifier) {
        Ok(entry) => return show_entry(workspace, entry),
        Err(HistoryError::AmbiguousIdentifier { candidates, .. }) => {
            let matches = review::find_by_edit_prefix(&all_entries, identifier);
            if let Some(chosen) = prompt_disambiguate(&candidates)? {
                if let Some(entry) = matches.iter().find(|e| e.edit_id == chosen) {
                    return show_entry(workspace, entry);
                }
            }
            return Ok(());
        }
        Err(HistoryError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let conv_matches = review::find_by_conversation(&all_entries, identifier);
    if conv_matches.is_empty() {
        return Err(HistoryError::NotFound(format!(
            "no edit or conversation matching '{identifier}'"
        )));
    }
    for entry in conv_matches {
        show_entry(workspace, entry)?;
    }
    Ok(())
}

fn prompt_disambiguate(candidates: &[String]) -> Result<Option<String>> {
    println!("Multiple edits match:");
    for (i, id) in candidates.iter().enumerate() {
        println!("  {}) {}", i + 1, id);
    }
    print!("Pick a number, or 'q' to cancel: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("q") {
        return Ok(None);
    }
    match trimmed.parse::<usize>() {
        Ok(n) if n >= 1 && n <= candidates.len() => Ok(Some(candidates[n - 1].clone())),
        _ => Ok(None),
    }
}

fn show_entry(workspace: &Path, entry: &EditEntry) -> Result<()> {
    println!(
        "{} [{}] {} {} -> {}",
        entry.edit_id, entry.conversation_id, entry.operation, entry.status, entry.file_path
    );
    match entry.operation {
        Operation::Move => {
            println!(
                "  moved {} -> {}",
                entry.source_path.as_deref().unwrap_or("?"),
                entry.file_path
            );
        }
        Operation::Create => println!("  created {}", entry.file_path),
        Operation::Delete => println!("  deleted {}", entry.file_path),
        Operation::Snapshot => println!("  snapshot taken: {:?}", entry.checkpoint_file),
        Operation::Revert => println!("  revert of {:?}", entry.rejected_edit_id),
        Operation::Edit | Operation::Replace => {
            if let Some(diff_relpath) = &entry.diff_file {
                let diff_path = paths::diffs_dir(workspace).join(diff_relpath);
                match std::fs::read_to_string(&diff_path) {
                    Ok(content) => print!("{content}"),
                    Err(_) => println!("  (diff file missing: {diff_relpath})"),
                }
            }
        }
    }
    Ok(())
}
