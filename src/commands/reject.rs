use crate::commands::accept::prompt_yes_no;
use crate::config::Config;
use crate::error::{HistoryError, Result};
use crate::history::review::{self, VerifyOutcome};
use std::path::Path;
use std::time::Duration;

pub enum Selector {
    Edit(String),
    Conversation(String),
}

pub fn run(workspace: &Path, config: &Config, selector: Selector) -> Result<()> {
    let lock_timeout = Duration::from_secs(config.lock_timeout_secs);
    let mut all_entries = review::load_all_entries(workspace, lock_timeout)?;

    let target_ids = resolve_targets(&all_entries, &selector)?;
    if target_ids.is_empty() {
        return Err(HistoryError::NotFound("no matching edits to reject".to_string()));
    }

    let files: Vec<String> = {
        let refs: Vec<_> = all_entries
            .iter()
            .filter(|e| target_ids.contains(&e.edit_id))
            .collect();
        review::affected_files(&all_entries, &refs)
    };
    let mut force = false;
    for file in &files {
        if let VerifyOutcome::Modified { diff } =
            review::verify_external_modification(workspace, file, &all_entries)?
        {
            println!("'{file}' was modified outside the tracked history:");
            println!("{diff}");
            if !prompt_yes_no("Continue rejecting anyway? [y/N] ")? {
                println!("Aborted; no changes made.");
                return Ok(());
            }
            force = true;
        }
    }

    review::reject(workspace, config, &mut all_entries, &target_ids, force)?;
    println!("Rejected {} edit(s).", target_ids.len());
    Ok(())
}

fn resolve_targets(
    all_entries: &[crate::history::entry::EditEntry],
    selector: &Selector,
) -> Result<Vec<String>> {
    match selector {
        Selector::Edit(prefix) => {
            let entry = review::resolve_edit_prefix(all_entries, prefix)?;
            Ok(vec![entry.edit_id.clone()])
        }
        Selector::Conversation(conv) => {
            let matches = review::find_by_conversation(all_entries, conv);
            Ok(matches
                .into_iter()
                .filter(|e| {
                    matches!(
                        e.status,
                        crate::history::entry::Status::Pending | crate::history::entry::Status::Accepted
                    )
                })
                .map(|e| e.edit_id.clone())
                .collect())
        }
    }
}
