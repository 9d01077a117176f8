pub mod entities;
pub mod value_objects;

pub use entities::{
    Attachment, Membership, MutationDraft, MutationRecord, Notification, RemoteChange,
    UploadStatus, UploadTask,
};
pub use value_objects::{ChangeKind, DomainKind, EntityId, ScopeId, UploadId};
