use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Replace,
    Edit,
    Delete,
    Move,
    Snapshot,
    Revert,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Replace => "replace",
            Operation::Edit => "edit",
            Operation::Delete => "delete",
            Operation::Move => "move",
            Operation::Snapshot => "snapshot",
            Operation::Revert => "revert",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Accepted,
    Rejected,
    Done,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Accepted => "accepted",
            Status::Rejected => "rejected",
            Status::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// Reserved `tool_call_index` values for entries the controller, not the tracker, emits.
pub const SNAPSHOT_INDEX: i64 = -1;
pub const REVERT_INDEX: i64 = -2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditEntry {
    pub edit_id: String,
    pub conversation_id: String,
    pub tool_call_index: i64,
    pub timestamp: String,
    pub operation: Operation,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    pub tool_name: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_file: Option<String>,
    pub hash_before: Option<String>,
    pub hash_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_edit_id: Option<String>,

    /// Materialized on read from the owning log filename; never persisted.
    #[serde(skip)]
    pub log_file_source: String,
}

impl EditEntry {
    pub fn new(
        conversation_id: impl Into<String>,
        tool_call_index: i64,
        operation: Operation,
        file_path: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        EditEntry {
            edit_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            tool_call_index,
            timestamp: crate::utils::now_iso8601_millis(),
            operation,
            file_path: file_path.into(),
            source_path: None,
            tool_name: tool_name.into(),
            status: Status::Pending,
            diff_file: None,
            checkpoint_file: None,
            hash_before: None,
            hash_after: None,
            rejected_edit_id: None,
            log_file_source: String::new(),
        }
    }

    pub fn sort_key(&self) -> (String, i64) {
        (self.timestamp.clone(), self.tool_call_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_without_absent_optionals() {
        let entry = EditEntry::new("C1", 0, Operation::Create, "a.txt", "write_file");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("source_path"));
        assert!(!json.contains("diff_file"));
        assert!(!json.contains("log_file_source"));
    }

    #[test]
    fn round_trips_through_json() {
        let mut entry = EditEntry::new("C1", 0, Operation::Edit, "a.txt", "edit_file_diff");
        entry.hash_before = Some("abc".into());
        entry.hash_after = Some("def".into());
        entry.diff_file = Some("C1/edit.diff".into());

        let json = serde_json::to_string(&entry).unwrap();
        let back: EditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.edit_id, entry.edit_id);
        assert_eq!(back.hash_before, entry.hash_before);
        assert_eq!(back.diff_file, entry.diff_file);
    }
}
