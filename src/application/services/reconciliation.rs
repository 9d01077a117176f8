use crate::application::ports::{ChannelEvent, ChannelState, EventChannel};
use crate::domain::entities::RemoteChange;
use crate::domain::value_objects::{DomainKind, ScopeId};
use crate::shared::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One data domain's view of reconciliation: a full authoritative refetch
/// plus routing for individual push events.
#[async_trait]
pub trait DomainSync: Send + Sync {
    fn domain(&self) -> DomainKind;

    /// Refetch the scope's authoritative collection. `generation` orders
    /// competing resyncs; the store discards responses that lost the race.
    async fn resync(&self, scope: &ScopeId, generation: u64) -> Result<()>;

    fn apply_remote(&self, change: &RemoteChange);
}

/// Keeps local state aligned with changes from other clients.
///
/// On every successful (re)connection of the push channel, including the
/// very first, all joined scopes are resynced across every domain, covering
/// the gap during which events may have been missed. Leaving a scope never
/// discards pending optimistic operations for entities in it.
pub struct ReconciliationController {
    channel: Arc<dyn EventChannel>,
    domains: Vec<Arc<dyn DomainSync>>,
    scopes: RwLock<HashSet<ScopeId>>,
    generation: AtomicU64,
}

impl ReconciliationController {
    pub fn new(channel: Arc<dyn EventChannel>, domains: Vec<Arc<dyn DomainSync>>) -> Self {
        Self {
            channel,
            domains,
            scopes: RwLock::new(HashSet::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Subscribe a UI surface's scope. When the channel is already up the
    /// scope is resynced immediately so the surface starts from
    /// authoritative state.
    pub async fn join(&self, scope: &ScopeId) -> Result<()> {
        self.channel.join(scope).await?;
        self.scopes.write().await.insert(scope.clone());

        if *self.channel.state().borrow() == ChannelState::Connected {
            self.resync_scope(scope).await;
        }
        Ok(())
    }

    pub async fn leave(&self, scope: &ScopeId) -> Result<()> {
        self.channel.leave(scope).await?;
        self.scopes.write().await.remove(scope);
        Ok(())
    }

    pub async fn joined_scopes(&self) -> Vec<ScopeId> {
        self.scopes.read().await.iter().cloned().collect()
    }

    async fn resync_scope(&self, scope: &ScopeId) {
        let generation = self.next_generation();
        for domain in &self.domains {
            if let Err(e) = domain.resync(scope, generation).await {
                tracing::warn!(
                    "Resync of {} in scope {} failed: {}",
                    domain.domain(),
                    scope,
                    e
                );
            }
        }
    }

    async fn resync_all(&self) {
        let scopes = self.joined_scopes().await;
        tracing::info!("Channel connected, resyncing {} scope(s)", scopes.len());
        for scope in scopes {
            self.resync_scope(&scope).await;
        }
    }

    fn route(&self, change: &RemoteChange) {
        match self.domains.iter().find(|d| d.domain() == change.domain) {
            Some(domain) => domain.apply_remote(change),
            None => tracing::debug!("No handler for pushed {} event", change.event_name()),
        }
    }

    /// Consume channel events until the channel closes.
    pub fn spawn(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        let mut events = controller.channel.events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ChannelEvent::Connected) => controller.resync_all().await,
                    Ok(ChannelEvent::Disconnected) => {
                        tracing::debug!("Push channel dropped, awaiting reconnect");
                    }
                    Ok(ChannelEvent::Change(change)) => controller.route(&change),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        // Missed events are covered by the next resync.
                        tracing::warn!("Channel consumer lagged by {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
