use std::fmt;

/// Errors raised anywhere in the edit history engine.
///
/// Each variant corresponds to one of the error kinds the review controller and
/// tracker reason about explicitly; there is no catch-all "anyhow" style wrapping
/// because callers branch on the kind (e.g. to decide whether to prompt the user).
#[derive(Debug)]
pub enum HistoryError {
    WorkspaceNotFound(String),
    AccessDenied { path: String, reason: String },
    LockTimeout { path: String, waited_secs: u64 },
    LogCorruption { path: String, line: usize, reason: String },
    AmbiguousIdentifier { identifier: String, candidates: Vec<String> },
    PatchFailed { target: String, stderr: String },
    ExternalModification { path: String },
    ReconstructionFailed { path: String, reason: String },
    NotFound(String),
    InvalidState(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryError::WorkspaceNotFound(start) => {
                write!(f, "no .mcp/edit_history found above {start}")
            }
            HistoryError::AccessDenied { path, reason } => {
                write!(f, "access denied for '{path}': {reason}")
            }
            HistoryError::LockTimeout { path, waited_secs } => {
                write!(f, "timed out after {waited_secs}s acquiring lock on '{path}'")
            }
            HistoryError::LogCorruption { path, line, reason } => {
                write!(f, "malformed log line {line} in '{path}': {reason}")
            }
            HistoryError::AmbiguousIdentifier { identifier, candidates } => {
                write!(
                    f,
                    "'{identifier}' matches {} entries: {}",
                    candidates.len(),
                    candidates.join(", ")
                )
            }
            HistoryError::PatchFailed { target, stderr } => {
                write!(f, "patch failed for '{target}': {stderr}")
            }
            HistoryError::ExternalModification { path } => {
                write!(f, "'{path}' was modified outside the tracked history")
            }
            HistoryError::ReconstructionFailed { path, reason } => {
                write!(f, "could not reconstruct '{path}': {reason}")
            }
            HistoryError::NotFound(what) => write!(f, "not found: {what}"),
            HistoryError::InvalidState(reason) => write!(f, "invalid state: {reason}"),
            HistoryError::Io(e) => write!(f, "I/O error: {e}"),
            HistoryError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for HistoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HistoryError::Io(e) => Some(e),
            HistoryError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HistoryError {
    fn from(e: std::io::Error) -> Self {
        HistoryError::Io(e)
    }
}

impl From<serde_json::Error> for HistoryError {
    fn from(e: serde_json::Error) -> Self {
        HistoryError::Json(e)
    }
}

/// Exit codes for the reviewer CLI, per the external interface contract.
impl HistoryError {
    pub fn exit_code(&self) -> i32 {
        match self {
            HistoryError::WorkspaceNotFound(_)
            | HistoryError::LockTimeout { .. }
            | HistoryError::AmbiguousIdentifier { .. }
            | HistoryError::NotFound(_)
            | HistoryError::InvalidState(_)
            | HistoryError::ExternalModification { .. } => 1,
            _ => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, HistoryError>;
