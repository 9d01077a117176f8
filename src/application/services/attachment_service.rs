use crate::application::ports::{GatewayRequest, MutationLog, Notifier, RequestGateway};
use crate::application::services::optimistic::{
    run_optimistic, OptimisticEntity, OptimisticStore, QueuedOpResolver,
};
use crate::application::services::reconciliation::DomainSync;
use crate::domain::entities::{Attachment, RemoteChange};
use crate::domain::value_objects::{ChangeKind, DomainKind, EntityId, ScopeId};
use crate::shared::error::{Result, SyncError};
use async_trait::async_trait;
use std::sync::Arc;

impl OptimisticEntity for Attachment {
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

/// Attachment domain: cover selection and deletion apply optimistically;
/// finished uploads merge in through `merge_uploaded`.
pub struct AttachmentService {
    store: Arc<OptimisticStore<Attachment>>,
    gateway: Arc<dyn RequestGateway>,
    log: Arc<dyn MutationLog>,
    notifier: Arc<dyn Notifier>,
    base_url: String,
}

impl AttachmentService {
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

    pub fn list(&self, scope: &ScopeId) -> Vec<Attachment> {
        let mut items = self.store.snapshot();
        items.retain(|a| &a.scope == scope);
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items
    }

    pub fn get(&self, id: &EntityId) -> Option<Attachment> {
        self.store.get(id)
    }

    pub fn cover(&self, scope: &ScopeId) -> Option<Attachment> {
        self.store
            .snapshot()
            .into_iter()
            .find(|a| &a.scope == scope && a.is_cover)
    }

    pub fn store(&self) -> &OptimisticStore<Attachment> {
        &self.store
    }

    pub fn resolver(&self) -> Arc<dyn QueuedOpResolver> {
        self.store.clone()
    }

    /// Make `id` the scope's cover image. The previously selected cover is
    /// cleared locally as part of the same optimistic step; the server
    /// response (or the next resync) is authoritative for both.
    pub async fn set_cover(&self, id: &EntityId) -> Result<()> {
        let target = self
            .store
            .get(id)
            .ok_or_else(|| SyncError::Validation(format!("Unknown attachment {id}")))?;

        let clear_operation = match self
            .store
            .snapshot()
            .into_iter()
            .find(|a| a.scope == target.scope && a.is_cover && &a.id != id)
        {
            Some(previous) => Some(self.store.apply(&previous.id, |current| {
                current.map(|a| {
                    let mut a = a.clone();
                    a.is_cover = false;
                    a
                })
            })?),
            None => None,
        };

        let set_operation = self.store.apply(id, |current| {
            current.map(|a| {
                let mut a = a.clone();
                a.is_cover = true;
                a
            })
        })?;

        let request = GatewayRequest::new(
            "PUT",
            format!("{}/attachments/{}/cover", self.base_url, id),
        );
        let result = run_optimistic(
            &self.store,
            self.gateway.as_ref(),
            self.log.as_ref(),
            self.notifier.as_ref(),
            set_operation,
            request,
            |canonical| serde_json::from_str(canonical).ok(),
        )
        .await;

        // The cleared cover shares the target's fate; run_optimistic already
        // emitted the single failure notice when it rolled back.
        if let Some(operation) = clear_operation {
            match &result {
                Ok(_) => self.store.confirm(operation, None),
                Err(_) => self.store.rollback(operation),
            }
        }
        result
    }

    pub async fn delete(&self, id: &EntityId) -> Result<()> {
        let operation = self.store.apply(id, |_| None)?;
        let request =
            GatewayRequest::new("DELETE", format!("{}/attachments/{}", self.base_url, id));
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

    /// Entry point for the upload tracker: the registered attachment is
    /// server-confirmed state.
    pub fn merge_uploaded(&self, attachment: Attachment) {
        self.store.upsert_remote(attachment);
    }
}

#[async_trait]
impl DomainSync for AttachmentService {
    fn domain(&self) -> DomainKind {
        DomainKind::Attachment
    }

    async fn resync(&self, scope: &ScopeId, generation: u64) -> Result<()> {
        let request = GatewayRequest::new(
            "GET",
            format!("{}/scopes/{}/attachments", self.base_url, scope),
        );
        let response = self.gateway.send(request).await?;
        let body = response
            .body
            .ok_or_else(|| SyncError::Serialization("Empty resync response".to_string()))?;
        let fresh: Vec<Attachment> = serde_json::from_str(&body)?;
        self.store.reconcile(scope, fresh, generation);
        Ok(())
    }

    fn apply_remote(&self, change: &RemoteChange) {
        match change.kind {
            ChangeKind::Created | ChangeKind::Updated | ChangeKind::Moved => {
                match serde_json::from_value::<Attachment>(change.payload.clone()) {
                    Ok(attachment) => self.store.upsert_remote(attachment),
                    Err(e) => {
                        tracing::warn!("Ignoring malformed {} payload: {}", change.event_name(), e)
                    }
                }
            }
            ChangeKind::Deleted => self.store.remove_remote(&change.entity_id),
        }
    }
}
