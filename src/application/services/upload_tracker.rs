use crate::application::ports::{Notifier, UploadSource, UploadTransport, UserNotice};
use crate::application::services::attachment_service::AttachmentService;
use crate::domain::entities::{Attachment, UploadStatus, UploadTask};
use crate::domain::value_objects::{ScopeId, UploadId};
use crate::shared::config::UploadConfig;
use crate::shared::error::{Result, SyncError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Tracks file uploads as independent tasks.
///
/// Each task carries its own progress, status and error; one failing or
/// being cancelled never touches its siblings. Concurrency is bounded by a
/// semaphore sized from config, so selecting twenty files queues workers
/// instead of opening twenty transfers at once.
pub struct UploadTracker {
    tasks: RwLock<HashMap<UploadId, UploadTask>>,
    // retained so a failed task can be retried without re-selecting the file
    sources: RwLock<HashMap<UploadId, Arc<UploadSource>>>,
    cancels: RwLock<HashMap<UploadId, CancellationToken>>,
    transport: Arc<dyn UploadTransport>,
    attachments: Arc<AttachmentService>,
    notifier: Arc<dyn Notifier>,
    semaphore: Arc<Semaphore>,
    config: UploadConfig,
}

impl UploadTracker {
    pub fn new(
        transport: Arc<dyn UploadTransport>,
        attachments: Arc<AttachmentService>,
        notifier: Arc<dyn Notifier>,
        config: UploadConfig,
    ) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            sources: RwLock::new(HashMap::new()),
            cancels: RwLock::new(HashMap::new()),
            transport,
            attachments,
            notifier,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent as usize)),
            config,
        }
    }

    pub fn tasks(&self) -> Vec<UploadTask> {
        let mut tasks: Vec<UploadTask> = self.tasks.read().unwrap().values().cloned().collect();
        tasks.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        tasks
    }

    pub fn get(&self, id: &UploadId) -> Option<UploadTask> {
        self.tasks
            .read()
            .unwrap()
            .get(id)
            .cloned()
    }

    /// Register a file for upload and start a worker for it. Files over the
    /// configured size limit become error tasks immediately, with a single
    /// notice naming the file, and no transfer is attempted.
    pub fn start(self: &Arc<Self>, scope: &ScopeId, source: UploadSource) -> UploadId {
        let id = UploadId::generate();
        let mut task = UploadTask::new(
            id.clone(),
            scope.clone(),
            source.file_name.clone(),
            source.file_type.clone(),
            source.size(),
        );

        if source.size() > self.config.max_file_size {
            task.status = UploadStatus::Error;
            task.error = Some(format!(
                "{} exceeds the {} byte upload limit",
                source.file_name, self.config.max_file_size
            ));
            self.notifier.notify(UserNotice::error(format!(
                "{} is too large to upload",
                source.file_name
            )));
            self.insert(task, source);
            return id;
        }

        self.insert(task, source);
        self.spawn_worker(id.clone(), scope.clone());
        id
    }

    /// Re-run a failed task with its retained file. Only `error` tasks are
    /// eligible.
    pub fn retry(self: &Arc<Self>, id: &UploadId) -> Result<()> {
        let (scope, size) = {
            let tasks = self.tasks.read().unwrap();
            let task = tasks
                .get(id)
                .ok_or_else(|| SyncError::Validation(format!("Unknown upload {id}")))?;
            if task.status != UploadStatus::Error {
                return Err(SyncError::Validation(format!(
                    "Upload {id} is not in an error state"
                )));
            }
            (task.scope.clone(), task.size)
        };
        if size > self.config.max_file_size {
            return Err(SyncError::Validation(
                "File exceeds the upload size limit".to_string(),
            ));
        }

        self.update(id, |task| {
            task.status = UploadStatus::Pending;
            task.progress = 0;
            task.error = None;
        });
        self.spawn_worker(id.clone(), scope);
        Ok(())
    }

    /// Stop an in-flight transfer. The task is removed; siblings keep going.
    pub fn cancel(&self, id: &UploadId) {
        if let Some(token) = self
            .cancels
            .write()
            .unwrap()
            .remove(id)
        {
            token.cancel();
        }
        self.remove(id);
    }

    /// Drop a terminal task from the list.
    pub fn dismiss(&self, id: &UploadId) {
        let terminal = self
            .get(id)
            .map(|t| t.is_terminal())
            .unwrap_or(false);
        if terminal {
            self.remove(id);
        }
    }

    fn insert(&self, task: UploadTask, source: UploadSource) {
        let id = task.id.clone();
        self.tasks
            .write()
            .unwrap()
            .insert(id.clone(), task);
        self.sources
            .write()
            .unwrap()
            .insert(id, Arc::new(source));
    }

    fn remove(&self, id: &UploadId) {
        self.tasks
            .write()
            .unwrap()
            .remove(id);
        self.sources
            .write()
            .unwrap()
            .remove(id);
        self.cancels
            .write()
            .unwrap()
            .remove(id);
    }

    fn update(&self, id: &UploadId, mutate: impl FnOnce(&mut UploadTask)) {
        if let Some(task) = self
            .tasks
            .write()
            .unwrap()
            .get_mut(id)
        {
            mutate(task);
        }
    }

    fn spawn_worker(self: &Arc<Self>, id: UploadId, scope: ScopeId) {
        let token = CancellationToken::new();
        self.cancels
            .write()
            .unwrap()
            .insert(id.clone(), token.clone());

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = match tracker.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            // Cancelled while waiting for a slot.
            if token.is_cancelled() {
                return;
            }
            let source = {
                let sources = tracker.sources.read().unwrap();
                match sources.get(&id) {
                    Some(source) => Arc::clone(source),
                    None => return,
                }
            };

            tracker.update(&id, |task| task.status = UploadStatus::Uploading);
            tracing::debug!("Uploading {} ({} bytes)", source.file_name, source.size());

            let (progress_tx, mut progress_rx) = mpsc::channel::<u8>(32);
            let forward = {
                let tracker = Arc::clone(&tracker);
                let id = id.clone();
                tokio::spawn(async move {
                    while let Some(percent) = progress_rx.recv().await {
                        // Reported progress never moves backwards.
                        tracker.update(&id, |task| {
                            if percent > task.progress {
                                task.progress = percent.min(100);
                            }
                        });
                    }
                })
            };

            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    forward.abort();
                    tracing::debug!("Upload {} cancelled", id);
                    return;
                }
                result = tracker.transport.upload(&source, &scope, progress_tx, token.clone()) => result,
            };
            let _ = forward.await;

            match outcome {
                Ok(attachment) => tracker.finish_success(&id, attachment),
                Err(err) => tracker.finish_error(&id, &source.file_name, err),
            }
        });
    }

    fn finish_success(self: &Arc<Self>, id: &UploadId, attachment: Attachment) {
        self.update(id, |task| {
            task.progress = 100;
            task.status = UploadStatus::Completed;
        });
        self.attachments.merge_uploaded(attachment);

        // Leave the completed row visible briefly, then clear it.
        let tracker = Arc::clone(self);
        let id = id.clone();
        let linger = Duration::from_millis(self.config.completed_linger_ms);
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            if tracker
                .get(&id)
                .map(|t| t.status == UploadStatus::Completed)
                .unwrap_or(false)
            {
                tracker.remove(&id);
            }
        });
    }

    fn finish_error(&self, id: &UploadId, file_name: &str, err: SyncError) {
        tracing::warn!("Upload of {} failed: {}", file_name, err);
        self.update(id, |task| {
            task.status = UploadStatus::Error;
            task.error = Some(err.to_string());
        });
        self.notifier
            .notify(UserNotice::error(format!("Upload of {file_name} failed")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::BroadcastNotifier;
    use crate::domain::entities::Attachment;
    use crate::domain::value_objects::EntityId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    enum Script {
        Succeed,
        Fail,
        /// Send the listed percentages, then succeed.
        Progress(Vec<u8>),
        /// Hold until cancelled or dropped.
        Stall,
    }

    struct FakeTransport {
        scripts: Mutex<HashMap<String, Script>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        fn script(&self, file_name: &str, script: Script) {
            self.scripts
                .lock()
                .unwrap()
                .insert(file_name.to_string(), script);
        }

        fn attachment(source: &UploadSource, scope: &ScopeId) -> Attachment {
            Attachment {
                id: EntityId::new(format!("att:{}", source.file_name)).unwrap(),
                scope: scope.clone(),
                file_name: source.file_name.clone(),
                file_type: source.file_type.clone(),
                size: source.size(),
                url: Some(format!("https://cdn.example/{}", source.file_name)),
                is_cover: false,
                created_at: 1,
                optimistic: false,
            }
        }
    }

    #[async_trait]
    impl UploadTransport for FakeTransport {
        async fn upload(
            &self,
            source: &UploadSource,
            scope: &ScopeId,
            progress: mpsc::Sender<u8>,
            cancel: CancellationToken,
        ) -> crate::shared::error::Result<Attachment> {
            let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(current, Ordering::SeqCst);
            // Hold the slot long enough for overlap to be observable.
            tokio::time::sleep(Duration::from_millis(20)).await;

            let script = self.scripts.lock().unwrap().remove(&source.file_name);
            let result = match script {
                Some(Script::Fail) => Err(SyncError::Upload("stream reset".into())),
                Some(Script::Progress(percents)) => {
                    for p in percents {
                        let _ = progress.send(p).await;
                    }
                    Ok(Self::attachment(source, scope))
                }
                Some(Script::Stall) => {
                    cancel.cancelled().await;
                    Err(SyncError::Upload("cancelled".into()))
                }
                Some(Script::Succeed) | None => {
                    let _ = progress.send(100).await;
                    Ok(Self::attachment(source, scope))
                }
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn source(file_name: &str, size: usize) -> UploadSource {
        UploadSource {
            file_name: file_name.to_string(),
            file_type: "application/pdf".to_string(),
            bytes: vec![0u8; size],
        }
    }

    fn scope() -> ScopeId {
        ScopeId::new("card:42".into()).unwrap()
    }

    fn config() -> UploadConfig {
        UploadConfig {
            max_concurrent: 4,
            max_file_size: 1024,
            // long enough that completed rows stay visible to assertions
            completed_linger_ms: 60_000,
        }
    }

    struct NullGateway;

    #[async_trait]
    impl crate::application::ports::RequestGateway for NullGateway {
        async fn send(
            &self,
            _request: crate::application::ports::GatewayRequest,
        ) -> crate::shared::error::Result<crate::application::ports::GatewayResponse> {
            Ok(crate::application::ports::GatewayResponse {
                status: 200,
                body: None,
            })
        }
    }

    struct NullLog;

    #[async_trait]
    impl crate::application::ports::MutationLog for NullLog {
        async fn enqueue(
            &self,
            _draft: crate::domain::entities::MutationDraft,
        ) -> crate::shared::error::Result<crate::domain::entities::MutationRecord> {
            Err(SyncError::Internal("not used".into()))
        }

        async fn list_all(
            &self,
        ) -> crate::shared::error::Result<Vec<crate::domain::entities::MutationRecord>> {
            Ok(Vec::new())
        }

        async fn remove(&self, _id: i64) -> crate::shared::error::Result<()> {
            Ok(())
        }

        async fn record_attempt(&self, _id: i64) -> crate::shared::error::Result<u32> {
            Ok(0)
        }
    }

    fn tracker_with(
        transport: Arc<FakeTransport>,
        notifier: Arc<BroadcastNotifier>,
        config: UploadConfig,
    ) -> (Arc<UploadTracker>, Arc<AttachmentService>) {
        let attachments = Arc::new(AttachmentService::new(
            Arc::new(NullGateway),
            Arc::new(NullLog),
            notifier.clone(),
            "/api".into(),
        ));
        let tracker = Arc::new(UploadTracker::new(
            transport,
            attachments.clone(),
            notifier,
            config,
        ));
        (tracker, attachments)
    }

    async fn wait_for_status(tracker: &UploadTracker, id: &UploadId, status: UploadStatus) {
        for _ in 0..200 {
            if tracker.get(id).map(|t| t.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("upload never reached {status:?}");
    }

    #[tokio::test]
    async fn one_failure_leaves_siblings_untouched() {
        let transport = Arc::new(FakeTransport::new());
        transport.script("broken.pdf", Script::Fail);
        let (tracker, attachments) =
            tracker_with(transport, Arc::new(BroadcastNotifier::default()), config());

        let good = tracker.start(&scope(), source("fine.pdf", 100));
        let bad = tracker.start(&scope(), source("broken.pdf", 100));

        wait_for_status(&tracker, &bad, UploadStatus::Error).await;
        wait_for_status(&tracker, &good, UploadStatus::Completed).await;

        assert!(tracker.get(&bad).unwrap().error.is_some());
        assert!(attachments
            .get(&EntityId::new("att:fine.pdf".into()).unwrap())
            .is_some());
    }

    #[tokio::test]
    async fn progress_never_moves_backwards() {
        let transport = Arc::new(FakeTransport::new());
        transport.script("big.pdf", Script::Progress(vec![10, 60, 30, 90]));
        let (tracker, _) =
            tracker_with(transport, Arc::new(BroadcastNotifier::default()), config());

        let id = tracker.start(&scope(), source("big.pdf", 100));
        wait_for_status(&tracker, &id, UploadStatus::Completed).await;

        // completion pins it at 100 regardless of the stale 30 in between
        assert_eq!(tracker.get(&id).unwrap().progress, 100);
    }

    #[tokio::test]
    async fn oversized_file_errors_without_a_transfer() {
        let transport = Arc::new(FakeTransport::new());
        let notifier = Arc::new(BroadcastNotifier::default());
        let mut notices = notifier.subscribe();
        let (tracker, _) = tracker_with(transport.clone(), notifier, config());

        let small_a = tracker.start(&scope(), source("one.pdf", 100));
        let huge = tracker.start(&scope(), source("giant.pdf", 4096));
        let small_b = tracker.start(&scope(), source("two.pdf", 100));

        wait_for_status(&tracker, &small_a, UploadStatus::Completed).await;
        wait_for_status(&tracker, &small_b, UploadStatus::Completed).await;

        let huge_task = tracker.get(&huge).unwrap();
        assert_eq!(huge_task.status, UploadStatus::Error);
        assert_eq!(huge_task.progress, 0);

        let notice = notices.recv().await.unwrap();
        assert!(notice.message.contains("giant.pdf"));
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn retry_reruns_a_failed_task() {
        let transport = Arc::new(FakeTransport::new());
        transport.script("flaky.pdf", Script::Fail);
        let (tracker, attachments) = tracker_with(
            transport.clone(),
            Arc::new(BroadcastNotifier::default()),
            config(),
        );

        let id = tracker.start(&scope(), source("flaky.pdf", 100));
        wait_for_status(&tracker, &id, UploadStatus::Error).await;

        // Second attempt succeeds (no script left for the file).
        tracker.retry(&id).unwrap();
        wait_for_status(&tracker, &id, UploadStatus::Completed).await;

        assert!(attachments
            .get(&EntityId::new("att:flaky.pdf".into()).unwrap())
            .is_some());
    }

    #[tokio::test]
    async fn retry_of_a_running_task_is_rejected() {
        let transport = Arc::new(FakeTransport::new());
        transport.script("slow.pdf", Script::Stall);
        let (tracker, _) =
            tracker_with(transport, Arc::new(BroadcastNotifier::default()), config());

        let id = tracker.start(&scope(), source("slow.pdf", 100));
        wait_for_status(&tracker, &id, UploadStatus::Uploading).await;

        assert!(tracker.retry(&id).is_err());
        tracker.cancel(&id);
    }

    #[tokio::test]
    async fn completed_task_disappears_after_the_linger_window() {
        let transport = Arc::new(FakeTransport::new());
        let mut cfg = config();
        cfg.completed_linger_ms = 20;
        let (tracker, _) =
            tracker_with(transport, Arc::new(BroadcastNotifier::default()), cfg);

        let id = tracker.start(&scope(), source("done.pdf", 100));
        wait_for_status(&tracker, &id, UploadStatus::Completed).await;

        for _ in 0..100 {
            if tracker.get(&id).is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("completed task was never cleared");
    }

    #[tokio::test]
    async fn cancel_stops_an_inflight_transfer() {
        let transport = Arc::new(FakeTransport::new());
        transport.script("hang.pdf", Script::Stall);
        let (tracker, attachments) =
            tracker_with(transport, Arc::new(BroadcastNotifier::default()), config());

        let id = tracker.start(&scope(), source("hang.pdf", 100));
        wait_for_status(&tracker, &id, UploadStatus::Uploading).await;

        tracker.cancel(&id);

        assert!(tracker.get(&id).is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(attachments
            .get(&EntityId::new("att:hang.pdf".into()).unwrap())
            .is_none());
    }

    #[tokio::test]
    async fn concurrency_stays_within_the_configured_bound() {
        let transport = Arc::new(FakeTransport::new());
        let mut cfg = config();
        cfg.max_concurrent = 2;
        let (tracker, _) = tracker_with(
            transport.clone(),
            Arc::new(BroadcastNotifier::default()),
            cfg,
        );

        let ids: Vec<UploadId> = (0..6)
            .map(|i| tracker.start(&scope(), source(&format!("f{i}.pdf"), 100)))
            .collect();
        for id in &ids {
            wait_for_status(&tracker, id, UploadStatus::Completed).await;
        }

        assert!(transport.max_active.load(Ordering::SeqCst) <= 2);
    }
}
