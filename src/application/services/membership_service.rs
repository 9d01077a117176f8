use crate::application::ports::{GatewayRequest, MutationLog, Notifier, RequestGateway};
use crate::application::services::optimistic::{
    run_optimistic, OptimisticEntity, OptimisticStore, QueuedOpResolver,
};
use crate::application::services::reconciliation::DomainSync;
use crate::domain::entities::{Membership, RemoteChange};
use crate::domain::value_objects::{ChangeKind, DomainKind, EntityId, ScopeId};
use crate::shared::error::{Result, SyncError};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

impl OptimisticEntity for Membership {
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

/// Department/team membership domain. Assignments are created with a
/// client-generated id so a replayed create stays idempotent server-side.
pub struct MembershipService {
    store: Arc<OptimisticStore<Membership>>,
    gateway: Arc<dyn RequestGateway>,
    log: Arc<dyn MutationLog>,
    notifier: Arc<dyn Notifier>,
    base_url: String,
}

impl MembershipService {
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

    pub fn list(&self, scope: &ScopeId) -> Vec<Membership> {
        let mut items = self.store.snapshot();
        items.retain(|m| &m.scope == scope);
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items
    }

    pub fn get(&self, id: &EntityId) -> Option<Membership> {
        self.store.get(id)
    }

    pub fn store(&self) -> &OptimisticStore<Membership> {
        &self.store
    }

    pub fn resolver(&self) -> Arc<dyn QueuedOpResolver> {
        self.store.clone()
    }

    pub async fn assign(
        &self,
        scope: &ScopeId,
        member_id: &EntityId,
        role: impl Into<String>,
    ) -> Result<EntityId> {
        let duplicate = self
            .store
            .snapshot()
            .into_iter()
            .any(|m| &m.scope == scope && &m.member_id == member_id);
        if duplicate {
            return Err(SyncError::Validation(format!(
                "Member {member_id} is already assigned to {scope}"
            )));
        }

        let membership = Membership {
            id: EntityId::new(Uuid::new_v4().to_string()).map_err(SyncError::Validation)?,
            scope: scope.clone(),
            member_id: member_id.clone(),
            role: role.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
            optimistic: false,
        };
        let id = membership.id.clone();

        let body = serde_json::to_string(&membership)?;
        let operation = self
            .store
            .apply(&id, move |_| Some(membership.clone()))?;
        let request = GatewayRequest::new(
            "POST",
            format!("{}/scopes/{}/memberships", self.base_url, scope),
        )
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
        .await?;
        Ok(id)
    }

    pub async fn unassign(&self, id: &EntityId) -> Result<()> {
        let operation = self.store.apply(id, |_| None)?;
        let request =
            GatewayRequest::new("DELETE", format!("{}/memberships/{}", self.base_url, id));
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
}

#[async_trait]
impl DomainSync for MembershipService {
    fn domain(&self) -> DomainKind {
        DomainKind::Membership
    }

    async fn resync(&self, scope: &ScopeId, generation: u64) -> Result<()> {
        let request = GatewayRequest::new(
            "GET",
            format!("{}/scopes/{}/memberships", self.base_url, scope),
        );
        let response = self.gateway.send(request).await?;
        let body = response
            .body
            .ok_or_else(|| SyncError::Serialization("Empty resync response".to_string()))?;
        let fresh: Vec<Membership> = serde_json::from_str(&body)?;
        self.store.reconcile(scope, fresh, generation);
        Ok(())
    }

    fn apply_remote(&self, change: &RemoteChange) {
        match change.kind {
            ChangeKind::Created | ChangeKind::Updated | ChangeKind::Moved => {
                match serde_json::from_value::<Membership>(change.payload.clone()) {
                    Ok(membership) => self.store.upsert_remote(membership),
                    Err(e) => {
                        tracing::warn!("Ignoring malformed {} payload: {}", change.event_name(), e)
                    }
                }
            }
            ChangeKind::Deleted => self.store.remove_remote(&change.entity_id),
        }
    }
}
