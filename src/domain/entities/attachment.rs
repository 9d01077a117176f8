use crate::domain::value_objects::{EntityId, ScopeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: EntityId,
    pub scope: ScopeId,
    pub file_name: String,
    pub file_type: String,
    pub size: u64,
    /// Server-side location; absent until the upload is registered remotely.
    pub url: Option<String>,
    pub is_cover: bool,
    pub created_at: i64,
    /// Locally applied but not yet server-confirmed. Never persisted.
    #[serde(skip, default)]
    pub optimistic: bool,
}
