pub mod attachment;
pub mod membership;
pub mod mutation_record;
pub mod notification;
pub mod remote_change;
pub mod upload_task;

pub use attachment::Attachment;
pub use membership::Membership;
pub use mutation_record::{MutationDraft, MutationRecord};
pub use notification::Notification;
pub use remote_change::RemoteChange;
pub use upload_task::{UploadStatus, UploadTask};
