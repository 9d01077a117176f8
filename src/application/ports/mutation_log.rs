use crate::domain::entities::{MutationDraft, MutationRecord};
use crate::shared::error::Result;
use async_trait::async_trait;

/// Durable, append-only log of write requests that could not reach the
/// server. Single-writer, single-reader (this client and its replayer).
#[async_trait]
pub trait MutationLog: Send + Sync {
    /// Persist a failed write. Fails only with `SyncError::StorageQuota`
    /// when the backing store is full.
    async fn enqueue(&self, draft: MutationDraft) -> Result<MutationRecord>;

    /// All queued records in insertion order.
    async fn list_all(&self) -> Result<Vec<MutationRecord>>;

    /// Delete a successfully replayed record. Removing an absent id is a
    /// no-op.
    async fn remove(&self, id: i64) -> Result<()>;

    /// Bump the rejected-attempt counter for a record and return the new
    /// count.
    async fn record_attempt(&self, id: i64) -> Result<u32>;
}
