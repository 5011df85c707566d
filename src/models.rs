//! Core data models shared by the synchronizer, the provider client and the
//! chat session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const PDF_MIME: &str = "application/pdf";

/// A PDF discovered in the local documents directory.
///
/// The bytes are read lazily, only when the file has to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDocument {
    pub path: PathBuf,
    /// File name, used as the remote display name.
    pub name: String,
}

impl LocalDocument {
    pub fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }
}

/// Server-side processing state of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Pending,
    Active,
    Failed,
}

impl FileState {
    /// Map the provider's state string. Anything unrecognised is still processing.
    pub fn from_provider(state: &str) -> Self {
        match state {
            "ACTIVE" => FileState::Active,
            "FAILED" => FileState::Failed,
            _ => FileState::Pending,
        }
    }
}

/// A document handle held by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Provider-assigned resource name, e.g. `files/abc123`.
    pub id: String,
    pub display_name: String,
    pub mime_type: String,
    /// URI referenced from chat requests.
    pub uri: String,
    pub state: FileState,
}

impl RemoteDocument {
    pub fn is_ready(&self) -> bool {
        self.state == FileState::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Complete,
    /// The assistant slot holds an error explanation instead of an answer.
    Failed,
}

/// One entry of a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub status: TurnStatus,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text.into(), TurnStatus::Complete)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text.into(), TurnStatus::Complete)
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text.into(), TurnStatus::Failed)
    }

    fn new(role: Role, text: String, status: TurnStatus) -> Self {
        Self {
            role,
            text,
            status,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_states() {
        assert_eq!(FileState::from_provider("ACTIVE"), FileState::Active);
        assert_eq!(FileState::from_provider("FAILED"), FileState::Failed);
        assert_eq!(FileState::from_provider("PROCESSING"), FileState::Pending);
        assert_eq!(
            FileState::from_provider("STATE_UNSPECIFIED"),
            FileState::Pending
        );
    }

    #[test]
    fn failed_turn_is_assistant() {
        let t = Turn::failed("lỗi");
        assert_eq!(t.role, Role::Assistant);
        assert_eq!(t.status, TurnStatus::Failed);
    }
}
