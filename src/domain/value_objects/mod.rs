pub mod domain_kind;
pub mod entity_id;
pub mod scope_id;
pub mod upload_id;

pub use domain_kind::{ChangeKind, DomainKind};
pub use entity_id::EntityId;
pub use scope_id::ScopeId;
pub use upload_id::UploadId;
