use crate::domain::value_objects::{EntityId, ScopeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: EntityId,
    pub scope: ScopeId,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub archived: bool,
    pub created_at: i64,
    /// Locally applied but not yet server-confirmed. Never persisted.
    #[serde(skip, default)]
    pub optimistic: bool,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        !self.read && !self.archived
    }
}
