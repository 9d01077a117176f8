use crate::application::ports::{GatewayRequest, MutationLog, Notifier, RequestGateway};
use crate::application::services::optimistic::{
    run_optimistic, OptimisticEntity, OptimisticStore, QueuedOpResolver,
};
use crate::application::services::reconciliation::DomainSync;
use crate::domain::entities::{Notification, RemoteChange};
use crate::domain::value_objects::{ChangeKind, DomainKind, EntityId, ScopeId};
use crate::shared::error::{Result, SyncError};
use async_trait::async_trait;
use std::sync::Arc;

impl OptimisticEntity for Notification {
    fn entity_id(&self) -> &EntityId {
        &self.id
    }

    fn scope_id(&self) -> &ScopeId {
        &self.scope
    }

    fn set_optimistic(&mut self, flag: bool) {
        self.optimistic = flag;
    }
}

/// Notification domain on top of the generic optimistic store:
/// mark-read/unread, archive and delete apply locally first and reconcile on
/// request completion.
pub struct NotificationService {
    store: Arc<OptimisticStore<Notification>>,
    gateway: Arc<dyn RequestGateway>,
    log: Arc<dyn MutationLog>,
    notifier: Arc<dyn Notifier>,
    base_url: String,
}

impl NotificationService {
    pub fn new(
        gateway: Arc<dyn RequestGateway>,
        log: Arc<dyn MutationLog>,
        notifier: Arc<dyn Notifier>,
        base_url: String,
    ) -> Self {
        Self {
            store: Arc::new(OptimisticStore::new()),
            gateway,
            log,
            notifier,
            base_url,
        }
    }

    pub fn list(&self) -> Vec<Notification> {
        let mut items = self.store.snapshot();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }

    pub fn get(&self, id: &EntityId) -> Option<Notification> {
        self.store.get(id)
    }

    /// Derived from the collection, so it moves by exactly the delta the
    /// collection moved by, including on rollback.
    pub fn unread_count(&self) -> usize {
        self.store.count_where(Notification::is_unread)
    }

    pub fn store(&self) -> &OptimisticStore<Notification> {
        &self.store
    }

    /// Hook for the replayer: queued operations resolve from record
    /// outcomes.
    pub fn resolver(&self) -> Arc<dyn QueuedOpResolver> {
        self.store.clone()
    }

    pub async fn mark_read(&self, id: &EntityId) -> Result<()> {
        self.patch_flags(id, |n| n.read = true, r#"{"read":true}"#)
            .await
    }

    pub async fn mark_unread(&self, id: &EntityId) -> Result<()> {
        self.patch_flags(id, |n| n.read = false, r#"{"read":false}"#)
            .await
    }

    pub async fn archive(&self, id: &EntityId) -> Result<()> {
        self.patch_flags(id, |n| n.archived = true, r#"{"archived":true}"#)
            .await
    }

    pub async fn delete(&self, id: &EntityId) -> Result<()> {
        let operation = self.store.apply(id, |_| None)?;
        let request = GatewayRequest::new("DELETE", format!("{}/notifications/{}", self.base_url, id));
        run_optimistic(
            &self.store,
            self.gateway.as_ref(),
            self.log.as_ref(),
            self.notifier.as_ref(),
            operation,
            request,
            |_| None,
        )
        .await
    }

    async fn patch_flags(
        &self,
        id: &EntityId,
        mutate: impl FnOnce(&mut Notification),
        body: &str,
    ) -> Result<()> {
        let operation = self.store.apply(id, |current| {
            current.map(|n| {
                let mut n = n.clone();
                mutate(&mut n);
                n
            })
        })?;
        let request = GatewayRequest::new("PATCH", format!("{}/notifications/{}", self.base_url, id))
            .with_json_body(body);
        run_optimistic(
            &self.store,
            self.gateway.as_ref(),
            self.log.as_ref(),
            self.notifier.as_ref(),
            operation,
            request,
            |canonical| serde_json::from_str(canonical).ok(),
        )
        .await
    }
}

#[async_trait]
impl DomainSync for NotificationService {
    fn domain(&self) -> DomainKind {
        DomainKind::Notification
    }

    async fn resync(&self, scope: &ScopeId, generation: u64) -> Result<()> {
        let request = GatewayRequest::new(
            "GET",
            format!("{}/scopes/{}/notifications", self.base_url, scope),
        );
        let response = self.gateway.send(request).await?;
        let body = response
            .body
            .ok_or_else(|| SyncError::Serialization("Empty resync response".to_string()))?;
        let fresh: Vec<Notification> = serde_json::from_str(&body)?;
        self.store.reconcile(scope, fresh, generation);
        Ok(())
    }

    fn apply_remote(&self, change: &RemoteChange) {
        match change.kind {
            ChangeKind::Created | ChangeKind::Updated | ChangeKind::Moved => {
                match serde_json::from_value::<Notification>(change.payload.clone()) {
                    Ok(notification) => self.store.upsert_remote(notification),
                    Err(e) => tracing::warn!("Ignoring malformed {} payload: {}", change.event_name(), e),
                }
            }
            ChangeKind::Deleted => self.store.remove_remote(&change.entity_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{
        BroadcastNotifier, GatewayResponse, MutationLog, NoticeLevel,
    };
    use crate::domain::entities::{MutationDraft, MutationRecord};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MemoryLog {
        records: Mutex<Vec<MutationRecord>>,
    }

    impl MemoryLog {
        fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MutationLog for MemoryLog {
        async fn enqueue(&self, draft: MutationDraft) -> Result<MutationRecord> {
            let mut records = self.records.lock().unwrap();
            let record = MutationRecord {
                id: records.len() as i64 + 1,
                url: draft.url,
                method: draft.method,
                headers: serde_json::to_string(&draft.headers).unwrap(),
                body: draft.body,
                attempts: 0,
                created_at: 0,
            };
            records.push(record.clone());
            Ok(record)
        }

        async fn list_all(&self) -> Result<Vec<MutationRecord>> {
            Ok(self.records.lock().unwrap().clone())
        }

        async fn remove(&self, id: i64) -> Result<()> {
            self.records.lock().unwrap().retain(|r| r.id != id);
            Ok(())
        }

        async fn record_attempt(&self, _id: i64) -> Result<u32> {
            Ok(1)
        }
    }

    #[derive(Default)]
    struct ScriptedGateway {
        outcomes: Mutex<HashMap<String, Result<GatewayResponse>>>,
        issued: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        fn script(&self, url: &str, outcome: Result<GatewayResponse>) {
            self.outcomes.lock().unwrap().insert(url.to_string(), outcome);
        }
    }

    #[async_trait]
    impl RequestGateway for ScriptedGateway {
        async fn send(&self, request: GatewayRequest) -> Result<GatewayResponse> {
            self.issued.lock().unwrap().push(request.url.clone());
            match self.outcomes.lock().unwrap().remove(&request.url) {
                Some(outcome) => outcome,
                None => Ok(GatewayResponse {
                    status: 200,
                    body: None,
                }),
            }
        }
    }

    fn notification(id: &str, read: bool) -> Notification {
        Notification {
            id: EntityId::new(id.into()).unwrap(),
            scope: ScopeId::new("board:1".into()).unwrap(),
            title: format!("Notification {id}"),
            body: "body".into(),
            read,
            archived: false,
            created_at: 100,
            optimistic: false,
        }
    }

    fn scope() -> ScopeId {
        ScopeId::new("board:1".into()).unwrap()
    }

    fn eid(id: &str) -> EntityId {
        EntityId::new(id.into()).unwrap()
    }

    fn service(
        gateway: Arc<ScriptedGateway>,
        log: Arc<MemoryLog>,
    ) -> (NotificationService, Arc<BroadcastNotifier>) {
        let notifier = Arc::new(BroadcastNotifier::default());
        let service = NotificationService::new(gateway, log, notifier.clone(), "/api".into());
        (service, notifier)
    }

    fn seed_unread(service: &NotificationService, ids: &[&str]) {
        let fresh = ids.iter().map(|id| notification(id, false)).collect();
        service.store().reconcile(&scope(), fresh, 1);
    }

    #[tokio::test]
    async fn mark_read_applies_immediately_and_confirms() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (service, _) = service(gateway, Arc::new(MemoryLog::new()));
        seed_unread(&service, &["n1"]);

        service.mark_read(&eid("n1")).await.unwrap();

        let n = service.get(&eid("n1")).unwrap();
        assert!(n.read);
        assert!(!n.optimistic);
        assert_eq!(service.unread_count(), 0);
    }

    #[tokio::test]
    async fn failed_confirmation_rolls_back_and_toasts_exactly_once() {
        // n2's confirmation times out while n1 and n3 succeed.
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.script(
            "/api/notifications/n2",
            Err(SyncError::Timeout("no response".into())),
        );
        let log = Arc::new(MemoryLog::new());
        let (service, notifier) = service(gateway, log.clone());
        let mut notices = notifier.subscribe();
        seed_unread(&service, &["n1", "n2", "n3"]);
        assert_eq!(service.unread_count(), 3);

        service.mark_read(&eid("n1")).await.unwrap();
        let n2_result = service.mark_read(&eid("n2")).await;
        service.mark_read(&eid("n3")).await.unwrap();

        assert!(n2_result.is_err());
        assert!(service.get(&eid("n1")).unwrap().read);
        assert!(!service.get(&eid("n2")).unwrap().read);
        assert!(service.get(&eid("n3")).unwrap().read);
        // reduced by 2, restored by 1
        assert_eq!(service.unread_count(), 1);
        // nothing was queued: the server was reachable, it just failed
        assert!(log.list_all().await.unwrap().is_empty());

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notices.try_recv().is_err(), "expected exactly one toast");
    }

    #[tokio::test]
    async fn offline_write_is_queued_and_state_kept() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.script(
            "/api/notifications/n1",
            Err(SyncError::Offline("no route".into())),
        );
        let log = Arc::new(MemoryLog::new());
        let (service, notifier) = service(gateway, log.clone());
        let mut notices = notifier.subscribe();
        seed_unread(&service, &["n1"]);

        service.mark_read(&eid("n1")).await.unwrap();

        // optimistic state stands, the request is captured for replay,
        // and no error surfaces at the moment of failure
        assert!(service.get(&eid("n1")).unwrap().read);
        let queued = log.list_all().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].method, "PATCH");
        assert_eq!(queued[0].url, "/api/notifications/n1");
        assert!(notices.try_recv().is_err());
        // unconfirmed until the record replays
        assert_eq!(service.store().pending_count(), 1);
    }

    #[tokio::test]
    async fn resync_does_not_cancel_a_queued_offline_change() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.script(
            "/api/notifications/n1",
            Err(SyncError::Offline("no route".into())),
        );
        let log = Arc::new(MemoryLog::new());
        let (service, _) = service(gateway, log.clone());
        seed_unread(&service, &["n1"]);

        service.mark_read(&eid("n1")).await.unwrap();

        // The server has not seen the queued change yet; its authoritative
        // list still says unread.
        service
            .store()
            .reconcile(&scope(), vec![notification("n1", false)], 2);

        let n = service.get(&eid("n1")).unwrap();
        assert!(n.read, "queued change must stay applied on top of a resync");
        assert!(n.optimistic);
        assert_eq!(service.store().pending_count(), 1);
        assert_eq!(log.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replay_confirms_the_queued_change() {
        use crate::application::services::replayer::MutationReplayer;
        use crate::shared::config::ReplayConfig;

        let gateway = Arc::new(ScriptedGateway::default());
        gateway.script(
            "/api/notifications/n1",
            Err(SyncError::Offline("no route".into())),
        );
        let log = Arc::new(MemoryLog::new());
        let (service, notifier) = service(gateway.clone(), log.clone());
        seed_unread(&service, &["n1"]);

        service.mark_read(&eid("n1")).await.unwrap();
        assert!(service.get(&eid("n1")).unwrap().optimistic);

        // Connectivity returns; the replay succeeds (no script left) and
        // resolves the operation through the store.
        let replayer = MutationReplayer::new(
            log.clone(),
            gateway,
            notifier,
            vec![service.resolver()],
            ReplayConfig {
                max_attempts: 3,
                request_timeout_secs: 5,
            },
        );
        let report = replayer.replay_pending().await.unwrap();

        assert_eq!(report.replayed, 1);
        let n = service.get(&eid("n1")).unwrap();
        assert!(n.read);
        assert!(!n.optimistic);
        assert_eq!(service.store().pending_count(), 0);
        assert!(log.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn canonical_response_replaces_local_guess() {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut canonical = notification("n1", true);
        canonical.title = "Server title".into();
        gateway.script(
            "/api/notifications/n1",
            Ok(GatewayResponse {
                status: 200,
                body: Some(serde_json::to_string(&canonical).unwrap()),
            }),
        );
        let (service, _) = service(gateway, Arc::new(MemoryLog::new()));
        seed_unread(&service, &["n1"]);

        service.mark_read(&eid("n1")).await.unwrap();

        let n = service.get(&eid("n1")).unwrap();
        assert_eq!(n.title, "Server title");
        assert!(!n.optimistic);
    }

    #[tokio::test]
    async fn delete_rolls_back_on_rejection() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.script(
            "/api/notifications/n1",
            Err(SyncError::Rejected {
                status: 403,
                message: "forbidden".into(),
            }),
        );
        let (service, _) = service(gateway, Arc::new(MemoryLog::new()));
        seed_unread(&service, &["n1", "n2"]);
        let before = service.list();

        assert!(service.delete(&eid("n1")).await.is_err());

        assert_eq!(service.list(), before);
    }

    #[tokio::test]
    async fn resync_replaces_scope_collection() {
        let gateway = Arc::new(ScriptedGateway::default());
        let fresh = vec![notification("n7", false), notification("n8", true)];
        gateway.script(
            "/api/scopes/board:1/notifications",
            Ok(GatewayResponse {
                status: 200,
                body: Some(serde_json::to_string(&fresh).unwrap()),
            }),
        );
        let (service, _) = service(gateway, Arc::new(MemoryLog::new()));
        seed_unread(&service, &["n1"]);

        service.resync(&scope(), 2).await.unwrap();

        assert!(service.get(&eid("n1")).is_none());
        assert_eq!(service.list().len(), 2);
        assert_eq!(service.unread_count(), 1);
    }

    #[tokio::test]
    async fn pushed_delete_removes_and_blocks_resurrection() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (service, _) = service(gateway, Arc::new(MemoryLog::new()));
        seed_unread(&service, &["n1"]);

        let change = RemoteChange {
            domain: DomainKind::Notification,
            kind: ChangeKind::Deleted,
            scope: scope(),
            entity_id: eid("n1"),
            payload: serde_json::Value::Null,
        };
        service.apply_remote(&change);

        assert!(service.get(&eid("n1")).is_none());
        assert_eq!(service.unread_count(), 0);
    }

    #[tokio::test]
    async fn pushed_create_is_deduplicated_by_identity() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (service, _) = service(gateway, Arc::new(MemoryLog::new()));
        seed_unread(&service, &["n1"]);

        let change = RemoteChange {
            domain: DomainKind::Notification,
            kind: ChangeKind::Created,
            scope: scope(),
            entity_id: eid("n1"),
            payload: serde_json::to_value(notification("n1", false)).unwrap(),
        };
        service.apply_remote(&change);
        service.apply_remote(&change);

        assert_eq!(service.list().len(), 1);
    }
}
