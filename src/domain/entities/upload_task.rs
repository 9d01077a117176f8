use crate::domain::value_objects::{ScopeId, UploadId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Error,
}

/// One file transfer tracked independently of its siblings.
/// `pending -> uploading -> {completed | error}`; `error -> uploading`
/// on manual retry; nothing leaves `completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTask {
    pub id: UploadId,
    pub scope: ScopeId,
    pub file_name: String,
    pub file_type: String,
    pub size: u64,
    pub progress: u8,
    pub status: UploadStatus,
    pub error: Option<String>,
}

impl UploadTask {
    pub fn new(
        id: UploadId,
        scope: ScopeId,
        file_name: String,
        file_type: String,
        size: u64,
    ) -> Self {
        Self {
            id,
            scope,
            file_name,
            file_type,
            size,
            progress: 0,
            status: UploadStatus::Pending,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, UploadStatus::Completed | UploadStatus::Error)
    }
}
