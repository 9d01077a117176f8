pub mod attachment_service;
pub mod connectivity;
pub mod membership_service;
pub mod notification_service;
pub mod optimistic;
pub mod reconciliation;
pub mod replayer;
pub mod upload_tracker;

pub use attachment_service::AttachmentService;
pub use connectivity::ConnectivityMonitor;
pub use membership_service::MembershipService;
pub use notification_service::NotificationService;
pub use optimistic::{
    run_optimistic, OperationId, OptimisticEntity, OptimisticStore, QueuedOpResolver,
};
pub use reconciliation::{DomainSync, ReconciliationController};
pub use replayer::{MutationReplayer, ReplayReport};
pub use upload_tracker::UploadTracker;
