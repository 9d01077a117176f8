use crate::domain::value_objects::{ChangeKind, DomainKind, EntityId, ScopeId};
use serde::{Deserialize, Serialize};

/// A server-pushed state change originating from another client or a
/// server-side process. Event names on the wire are `<domain>-<kind>`,
/// e.g. `notification-created`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub domain: DomainKind,
    pub kind: ChangeKind,
    pub scope: ScopeId,
    pub entity_id: EntityId,
    /// Full entity representation for created/updated/moved; may be empty
    /// for deletes.
    pub payload: serde_json::Value,
}

impl RemoteChange {
    pub fn event_name(&self) -> String {
        format!("{}-{}", self.domain, self.kind)
    }

    pub fn parse_event_name(name: &str) -> Result<(DomainKind, ChangeKind), String> {
        let (domain, kind) = name
            .rsplit_once('-')
            .ok_or_else(|| format!("Malformed event name: {name}"))?;
        Ok((domain.parse()?, kind.parse()?))
    }
}
