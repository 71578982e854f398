use crate::config::Config;
use crate::error::Result;
use crate::history::entry::{Operation, Status};
use crate::history::review::{self, StatusFilter};
use std::path::Path;
use std::time::Duration;

pub struct StatusArgs {
    pub conversation: Option<String>,
    pub file: Option<String>,
    pub status: Option<String>,
    pub since: Option<String>,
    pub operation: Option<String>,
    pub limit: usize,
}

pub fn run(workspace: &Path, config: &Config, args: StatusArgs) -> Result<()> {
    let lock_timeout = Duration::from_secs(config.lock_timeout_secs);
    let all_entries = review::load_all_entries(workspace, lock_timeout)?;

    let filter = StatusFilter {
        conversation: args.conversation,
        file_substring: args.file,
        status: args.status.as_deref().and_then(|s| parse_status(s)),
        since: args.since.as_deref().and_then(crate::utils::parse_time_filter),
        operation: args.operation.as_deref().and_then(|s| parse_operation(s)),
        limit: args.limit,
    };

    let filtered = review::filter_status(&all_entries, &filter);
    if filtered.is_empty() {
        println!("No matching edit entries.");
        return Ok(());
    }

    for entry in &filtered {
        println!(
            "{}  {:<8}  {:<9}  {} {}",
            &entry.edit_id[..entry.edit_id.len().min(8)],
            entry.operation,
            entry.status,
            entry.timestamp,
            entry.file_path
        );
    }
    Ok(())
}

fn parse_status(s: &str) -> Option<Status> {
    match s {
        "pending" => Some(Status::Pending),
        "accepted" => Some(Status::Accepted),
        "rejected" => Some(Status::Rejected),
        "done" => Some(Status::Done),
        _ => None,
    }
}

fn parse_operation(s: &str) -> Option<Operation> {
    match s {
        "create" => Some(Operation::Create),
        "replace" => Some(Operation::Replace),
        "edit" => Some(Operation::Edit),
        "delete" => Some(Operation::Delete),
        "move" => Some(Operation::Move),
        "snapshot" => Some(Operation::Snapshot),
        "revert" => Some(Operation::Revert),
        _ => None,
    }
}
