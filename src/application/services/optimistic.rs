use crate::application::ports::{GatewayRequest, MutationLog, Notifier, RequestGateway, UserNotice};
use crate::domain::value_objects::{EntityId, ScopeId};
use crate::shared::error::{Result, SyncError};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Capabilities the generic store needs from a domain entity.
///
/// The optimistic flag distinguishes locally-applied-but-unconfirmed state
/// from server-confirmed state; it only lives in memory.
pub trait OptimisticEntity: Clone + PartialEq + Send + Sync + 'static {
    fn entity_id(&self) -> &EntityId;
    fn scope_id(&self) -> &ScopeId;
    fn set_optimistic(&mut self, flag: bool);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct OperationId(u64);

/// Bookkeeping for one in-flight optimistic update: the snapshot to restore
/// on failure and the state the caller intended.
struct PendingOp<E> {
    id: OperationId,
    entity_id: EntityId,
    scope: ScopeId,
    previous: Option<E>,
    /// Where the entity sat in the collection at apply time, so a rolled
    /// back delete returns to its original slot.
    position: usize,
    intended: Option<E>,
    /// Durable log record replaying this operation, when the request could
    /// not reach the server.
    queued_record: Option<i64>,
}

struct StoreInner<E> {
    items: Vec<E>,
    pending: Vec<PendingOp<E>>,
    /// Entities confirmed deleted; a rollback must never resurrect these.
    tombstones: HashSet<EntityId>,
    /// Highest resync generation applied per scope; stale responses are
    /// discarded.
    generations: HashMap<ScopeId, u64>,
    next_op: u64,
}

/// In-memory collection with apply-first/rollback-on-failure discipline.
///
/// All transitions run synchronously under one lock so readers never observe
/// a torn state between "apply" and a concurrently scheduled read. The lock
/// is never held across a suspension point.
pub struct OptimisticStore<E: OptimisticEntity> {
    inner: RwLock<StoreInner<E>>,
}

impl<E: OptimisticEntity> Default for OptimisticStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: OptimisticEntity> OptimisticStore<E> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                items: Vec::new(),
                pending: Vec::new(),
                tombstones: HashSet::new(),
                generations: HashMap::new(),
                next_op: 0,
            }),
        }
    }

    pub fn snapshot(&self) -> Vec<E> {
        self.inner.read().unwrap().items.clone()
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<E> {
        self.inner
            .read()
            .unwrap()
            .items
            .iter()
            .find(|e| e.entity_id() == entity_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Derived aggregates (e.g. unread count) are recomputed from the
    /// collection instead of delta-maintained, so they cannot drift.
    pub fn count_where(&self, predicate: impl Fn(&E) -> bool) -> usize {
        self.inner
            .read()
            .unwrap()
            .items
            .iter()
            .filter(|e| predicate(e))
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.read().unwrap().pending.len()
    }

    pub fn has_pending(&self, entity_id: &EntityId) -> bool {
        self.inner
            .read()
            .unwrap()
            .pending
            .iter()
            .any(|op| &op.entity_id == entity_id)
    }

    /// Apply a mutation locally and register the pending operation backing
    /// it. `mutate` receives the current value (`None` when absent) and
    /// returns the intended value (`None` to delete).
    ///
    /// Operations on one entity chain in application order; a later apply
    /// snapshots the optimistic state produced by the earlier one.
    pub fn apply(
        &self,
        entity_id: &EntityId,
        mutate: impl FnOnce(Option<&E>) -> Option<E>,
    ) -> Result<OperationId> {
        let mut inner = self.inner.write().unwrap();

        let position = inner
            .items
            .iter()
            .position(|e| e.entity_id() == entity_id);
        let previous = position.map(|i| inner.items[i].clone());
        let position = position.unwrap_or(inner.items.len());
        let intended = mutate(previous.as_ref());

        let scope = match intended.as_ref().or(previous.as_ref()) {
            Some(entity) => entity.scope_id().clone(),
            None => {
                return Err(SyncError::Validation(format!(
                    "No local state to mutate for entity {entity_id}"
                )));
            }
        };

        match &intended {
            Some(entity) => {
                let mut applied = entity.clone();
                applied.set_optimistic(true);
                upsert(&mut inner.items, applied);
                inner.tombstones.remove(entity_id);
            }
            None => inner.items.retain(|e| e.entity_id() != entity_id),
        }

        let id = OperationId(inner.next_op);
        inner.next_op += 1;
        inner.pending.push(PendingOp {
            id,
            entity_id: entity_id.clone(),
            scope,
            previous,
            position,
            intended,
            queued_record: None,
        });
        Ok(id)
    }

    /// Resolve a pending operation on request success. A canonical server
    /// representation, when provided, replaces the optimistic guess.
    /// Confirming a delete tombstones the entity. Idempotent.
    pub fn confirm(&self, operation: OperationId, canonical: Option<E>) {
        let mut inner = self.inner.write().unwrap();

        let Some(index) = inner.pending.iter().position(|op| op.id == operation) else {
            return;
        };
        let op = inner.pending.remove(index);
        let has_later = inner.pending.iter().any(|p| p.entity_id == op.entity_id);

        if op.intended.is_none() {
            inner.tombstones.insert(op.entity_id.clone());
            return;
        }

        if let Some(mut confirmed) = canonical {
            confirmed.set_optimistic(false);
            if has_later {
                // A newer operation owns the visible state; the canonical
                // value becomes its rollback snapshot instead.
                if let Some(later) = inner
                    .pending
                    .iter_mut()
                    .find(|p| p.entity_id == op.entity_id)
                {
                    later.previous = Some(confirmed);
                }
            } else {
                upsert(&mut inner.items, confirmed);
            }
        } else if !has_later {
            if let Some(entity) = inner
                .items
                .iter_mut()
                .find(|e| e.entity_id() == &op.entity_id)
            {
                entity.set_optimistic(false);
            }
        }
    }

    /// Tie a pending operation to the durable log record that captured its
    /// request. The operation stays pending, and the entity optimistic,
    /// until the replayer reports the record's outcome.
    pub fn mark_queued(&self, operation: OperationId, record_id: i64) {
        let mut inner = self.inner.write().unwrap();
        if let Some(op) = inner.pending.iter_mut().find(|op| op.id == operation) {
            op.queued_record = Some(record_id);
        }
    }

    /// Restore the snapshot captured at apply time, exactly. Operations
    /// stacked on the rolled-back one are discarded with it since the state
    /// they were built on never got confirmed. Idempotent.
    pub fn rollback(&self, operation: OperationId) {
        let mut inner = self.inner.write().unwrap();

        let Some(index) = inner.pending.iter().position(|op| op.id == operation) else {
            return;
        };
        let op = inner.pending.remove(index);
        inner.pending.retain(|p| p.entity_id != op.entity_id);

        match op.previous {
            Some(previous) => {
                if !inner.tombstones.contains(&op.entity_id) {
                    if let Some(slot) = inner
                        .items
                        .iter_mut()
                        .find(|e| e.entity_id() == &op.entity_id)
                    {
                        *slot = previous;
                    } else {
                        // A rolled-back delete returns to its original slot
                        // so the collection matches the pre-apply state.
                        let at = op.position.min(inner.items.len());
                        inner.items.insert(at, previous);
                    }
                }
            }
            None => inner.items.retain(|e| e.entity_id() != &op.entity_id),
        }
    }

    /// Apply a server-pushed create/update. Deduplicated by identity; an
    /// entity with a pending local operation keeps its optimistic state
    /// until that operation resolves.
    pub fn upsert_remote(&self, mut entity: E) {
        let mut inner = self.inner.write().unwrap();
        let entity_id = entity.entity_id().clone();
        if inner.pending.iter().any(|op| op.entity_id == entity_id) {
            return;
        }
        entity.set_optimistic(false);
        inner.tombstones.remove(&entity_id);
        upsert(&mut inner.items, entity);
    }

    /// Apply a server-pushed delete. This is a confirmed deletion by another
    /// client: it supersedes pending local operations on the entity and
    /// tombstones the id so no rollback resurrects it.
    pub fn remove_remote(&self, entity_id: &EntityId) {
        let mut inner = self.inner.write().unwrap();
        inner.pending.retain(|op| &op.entity_id != entity_id);
        inner.items.retain(|e| e.entity_id() != entity_id);
        inner.tombstones.insert(entity_id.clone());
    }

    /// Replace a scope's collection with the authoritative server state.
    ///
    /// Returns false when `generation` is not newer than the last applied
    /// one for the scope (a stale, slow response losing to a fresher one).
    /// Pending operations are not cancelled: each surviving operation
    /// re-captures its rollback snapshot from the fresh state and is
    /// reapplied on top, or dropped when the server already reflects its
    /// intended outcome.
    pub fn reconcile(&self, scope: &ScopeId, fresh: Vec<E>, generation: u64) -> bool {
        let mut inner = self.inner.write().unwrap();

        let applied = inner.generations.get(scope).copied().unwrap_or(0);
        if generation <= applied {
            return false;
        }
        inner.generations.insert(scope.clone(), generation);

        inner.items.retain(|e| e.scope_id() != scope);
        for mut entity in fresh {
            entity.set_optimistic(false);
            let entity_id = entity.entity_id().clone();
            inner.tombstones.remove(&entity_id);
            upsert(&mut inner.items, entity);
        }

        let op_ids: Vec<OperationId> = inner
            .pending
            .iter()
            .filter(|op| &op.scope == scope)
            .map(|op| op.id)
            .collect();

        for op_id in op_ids {
            let Some(index) = inner.pending.iter().position(|op| op.id == op_id) else {
                continue;
            };
            let entity_id = inner.pending[index].entity_id.clone();
            let current = inner
                .items
                .iter()
                .find(|e| e.entity_id() == &entity_id)
                .cloned();

            let resolved = {
                let op = &mut inner.pending[index];
                op.previous = current.clone();
                match &op.intended {
                    Some(intended) => {
                        let mut want = intended.clone();
                        want.set_optimistic(false);
                        current.as_ref() == Some(&want)
                    }
                    None => current.is_none(),
                }
            };

            if resolved {
                // The authoritative state already reflects the intent; the
                // in-flight request resolves as a no-op later.
                inner.pending.remove(index);
                continue;
            }

            let intended = inner.pending[index].intended.clone();
            match intended {
                Some(entity) => {
                    let mut applied = entity;
                    applied.set_optimistic(true);
                    upsert(&mut inner.items, applied);
                }
                None => inner.items.retain(|e| e.entity_id() != &entity_id),
            }
        }

        true
    }
}

/// Replay outcomes feed back into the stores through this seam: a replayed
/// record confirms the operation it was queued for, a dropped record rolls
/// it back.
pub trait QueuedOpResolver: Send + Sync {
    fn resolve_queued(&self, record_id: i64, replayed: bool);
}

impl<E: OptimisticEntity> QueuedOpResolver for OptimisticStore<E> {
    fn resolve_queued(&self, record_id: i64, replayed: bool) {
        let operation = self
            .inner
            .read()
            .unwrap()
            .pending
            .iter()
            .find(|op| op.queued_record == Some(record_id))
            .map(|op| op.id);
        if let Some(operation) = operation {
            if replayed {
                self.confirm(operation, None);
            } else {
                self.rollback(operation);
            }
        }
    }
}

fn upsert<E: OptimisticEntity>(items: &mut Vec<E>, entity: E) {
    if let Some(slot) = items
        .iter_mut()
        .find(|e| e.entity_id() == entity.entity_id())
    {
        *slot = entity;
    } else {
        items.push(entity);
    }
}

/// Drive the network half of one optimistic operation, uniformly for every
/// domain: a 2xx confirms (with the canonical body when the server returns
/// one), an unreachable network queues the request for replay and keeps the
/// operation pending until the replayer resolves it, and a rejected request
/// rolls back with exactly one user-visible notice.
pub async fn run_optimistic<E, F>(
    store: &OptimisticStore<E>,
    gateway: &dyn RequestGateway,
    log: &dyn MutationLog,
    notifier: &dyn Notifier,
    operation: OperationId,
    request: GatewayRequest,
    parse_canonical: F,
) -> Result<()>
where
    E: OptimisticEntity,
    F: FnOnce(&str) -> Option<E>,
{
    match gateway.send(request.clone()).await {
        Ok(response) => {
            let canonical = response.body.as_deref().and_then(|b| parse_canonical(b));
            store.confirm(operation, canonical);
            Ok(())
        }
        Err(err) if err.is_offline() => match log.enqueue(request.to_draft()).await {
            Ok(record) => {
                tracing::debug!(
                    "Queued offline mutation {} {} as record {}",
                    request.method,
                    request.url,
                    record.id
                );
                store.mark_queued(operation, record.id);
                Ok(())
            }
            Err(enqueue_err) => {
                store.rollback(operation);
                notifier.notify(UserNotice::warning(format!(
                    "Could not save change for later sync: {enqueue_err}"
                )));
                Err(enqueue_err)
            }
        },
        Err(err) => {
            store.rollback(operation);
            notifier.notify(UserNotice::error(format!(
                "Change could not be saved: {err}"
            )));
            Err(err)
        }
    }
}
