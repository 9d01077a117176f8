use crate::application::ports::{
    BroadcastNotifier, EventChannel, RequestGateway, UploadTransport, UserNotice,
};
use crate::application::services::{
    AttachmentService, ConnectivityMonitor, DomainSync, MembershipService, MutationReplayer,
    NotificationService, ReconciliationController, UploadTracker,
};
use crate::infrastructure::database::{ConnectionPool, SqliteMutationLog};
use crate::shared::config::SyncConfig;
use crate::shared::error::{Result, SyncError};
use std::sync::Arc;
use tokio::sync::broadcast;

/// The assembled synchronization core.
///
/// Owns one optimistic store per domain, the durable mutation log and its
/// replayer, the upload tracker, and the reconciliation controller that keeps
/// everything aligned with the push channel. Transport implementations are
/// injected so the core itself stays testable.
pub struct SyncCore {
    pub config: SyncConfig,
    pub connectivity: ConnectivityMonitor,
    pub notifications: Arc<NotificationService>,
    pub attachments: Arc<AttachmentService>,
    pub memberships: Arc<MembershipService>,
    pub uploads: Arc<UploadTracker>,
    pub replayer: Arc<MutationReplayer>,
    pub reconciliation: Arc<ReconciliationController>,
    notifier: Arc<BroadcastNotifier>,
}

impl SyncCore {
    pub async fn new(
        config: SyncConfig,
        gateway: Arc<dyn RequestGateway>,
        channel: Arc<dyn EventChannel>,
        transport: Arc<dyn UploadTransport>,
    ) -> Result<Self> {
        config.validate().map_err(SyncError::Validation)?;

        let pool = ConnectionPool::new(&config.database).await?;
        let log = Arc::new(SqliteMutationLog::new(pool));
        log.initialize().await?;

        let notifier = Arc::new(BroadcastNotifier::default());
        let connectivity = ConnectivityMonitor::default();
        let base_url = config.api.base_url.clone();

        let notifications = Arc::new(NotificationService::new(
            gateway.clone(),
            log.clone(),
            notifier.clone(),
            base_url.clone(),
        ));
        let attachments = Arc::new(AttachmentService::new(
            gateway.clone(),
            log.clone(),
            notifier.clone(),
            base_url.clone(),
        ));
        let memberships = Arc::new(MembershipService::new(
            gateway.clone(),
            log.clone(),
            notifier.clone(),
            base_url,
        ));

        let uploads = Arc::new(UploadTracker::new(
            transport,
            attachments.clone(),
            notifier.clone(),
            config.upload.clone(),
        ));

        let replayer = Arc::new(MutationReplayer::new(
            log,
            gateway,
            notifier.clone(),
            vec![
                notifications.resolver(),
                attachments.resolver(),
                memberships.resolver(),
            ],
            config.replay.clone(),
        ));
        replayer.spawn(connectivity.subscribe());

        // Records queued in a previous session see no offline-to-online
        // edge; drain them now if the session starts online.
        if connectivity.is_online() {
            let startup = replayer.clone();
            tokio::spawn(async move {
                match startup.replay_pending().await {
                    Ok(report) if report.replayed + report.dropped > 0 => tracing::info!(
                        "Startup replay: {} replayed, {} dropped, {} remaining",
                        report.replayed,
                        report.dropped,
                        report.remaining
                    ),
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Startup replay failed: {}", e),
                }
            });
        }

        let domains: Vec<Arc<dyn DomainSync>> = vec![
            notifications.clone(),
            attachments.clone(),
            memberships.clone(),
        ];
        let reconciliation = Arc::new(ReconciliationController::new(channel, domains));
        reconciliation.spawn();

        tracing::info!("Sync core initialized");

        Ok(Self {
            config,
            connectivity,
            notifications,
            attachments,
            memberships,
            uploads,
            replayer,
            reconciliation,
            notifier,
        })
    }

    /// Toast-style notices for the UI layer.
    pub fn notices(&self) -> broadcast::Receiver<UserNotice> {
        self.notifier.subscribe()
    }
}
