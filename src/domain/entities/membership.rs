use crate::domain::value_objects::{EntityId, ScopeId};
use serde::{Deserialize, Serialize};

/// Assignment of a user to a department or team scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: EntityId,
    /// The department/team the member belongs to.
    pub scope: ScopeId,
    pub member_id: EntityId,
    pub role: String,
    pub created_at: i64,
    /// Locally applied but not yet server-confirmed. Never persisted.
    #[serde(skip, default)]
    pub optimistic: bool,
}
