use crate::application::ports::{GatewayRequest, MutationLog, Notifier, RequestGateway, UserNotice};
use crate::application::services::optimistic::QueuedOpResolver;
use crate::shared::config::ReplayConfig;
use crate::shared::error::{Result, SyncError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub replayed: u32,
    pub dropped: u32,
    pub remaining: u32,
}

/// Drains the durable mutation log through the live request path when
/// connectivity returns.
///
/// Records replay strictly in insertion order because later mutations may
/// depend on earlier ones (create-then-update of the same entity). A record
/// is removed only after a 2xx response, so delivery is at-least-once.
pub struct MutationReplayer {
    log: Arc<dyn MutationLog>,
    gateway: Arc<dyn RequestGateway>,
    notifier: Arc<dyn Notifier>,
    /// Stores holding operations queued against log records; each record's
    /// outcome resolves the operation it was queued for.
    resolvers: Vec<Arc<dyn QueuedOpResolver>>,
    config: ReplayConfig,
}

impl MutationReplayer {
    pub fn new(
        log: Arc<dyn MutationLog>,
        gateway: Arc<dyn RequestGateway>,
        notifier: Arc<dyn Notifier>,
        resolvers: Vec<Arc<dyn QueuedOpResolver>>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            log,
            gateway,
            notifier,
            resolvers,
            config,
        }
    }

    fn resolve(&self, record_id: i64, replayed: bool) {
        for resolver in &self.resolvers {
            resolver.resolve_queued(record_id, replayed);
        }
    }

    /// One sequential pass over the queue.
    ///
    /// A connectivity failure or timeout stops the pass with the record left
    /// in place, so ordering is preserved for the next "online" transition.
    /// A rejected record bumps its attempt counter; once the counter reaches
    /// the configured maximum the record is dropped with a warning notice
    /// instead of retrying forever.
    pub async fn replay_pending(&self) -> Result<ReplayReport> {
        let records = self.log.list_all().await?;
        let total = records.len() as u32;
        let mut report = ReplayReport::default();

        for record in records {
            let request = GatewayRequest::from(&record);
            let timeout = Duration::from_secs(self.config.request_timeout_secs);

            let outcome = match tokio::time::timeout(timeout, self.gateway.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(format!(
                    "replay of {} {} exceeded {}s",
                    record.method, record.url, self.config.request_timeout_secs
                ))),
            };

            match outcome {
                Ok(_) => {
                    self.log.remove(record.id).await?;
                    self.resolve(record.id, true);
                    report.replayed += 1;
                }
                Err(err) if matches!(err, SyncError::Rejected { .. }) => {
                    let attempts = self.log.record_attempt(record.id).await?;
                    if attempts >= self.config.max_attempts {
                        self.log.remove(record.id).await?;
                        self.resolve(record.id, false);
                        report.dropped += 1;
                        tracing::warn!(
                            "Dropping queued mutation {} {} after {} rejected attempts: {}",
                            record.method,
                            record.url,
                            attempts,
                            err
                        );
                        self.notifier.notify(UserNotice::warning(format!(
                            "A queued change ({} {}) was rejected by the server and has been discarded",
                            record.method, record.url
                        )));
                        // The record is gone; later records no longer depend
                        // on it succeeding, continue the pass.
                    } else {
                        tracing::debug!(
                            "Queued mutation {} rejected (attempt {}), stopping pass",
                            record.id,
                            attempts
                        );
                        break;
                    }
                }
                Err(err) => {
                    // Still unreachable (or hung); retry from the front on
                    // the next online transition.
                    tracing::debug!("Replay pass interrupted: {}", err);
                    break;
                }
            }
        }

        report.remaining = total - report.replayed - report.dropped;
        Ok(report)
    }

    /// Watch the connectivity signal and run a replay pass on every
    /// offline-to-online transition.
    pub fn spawn(self: &Arc<Self>, mut online_rx: watch::Receiver<bool>) {
        let replayer = Arc::clone(self);
        // Baseline taken before the task is scheduled; a transition landing
        // between spawn and the first poll still reads as an edge.
        let mut was_online = *online_rx.borrow();
        tokio::spawn(async move {
            loop {
                if online_rx.changed().await.is_err() {
                    break;
                }
                let online = *online_rx.borrow();
                if online && !was_online {
                    match replayer.replay_pending().await {
                        Ok(report) => tracing::info!(
                            "Replay pass complete: {} replayed, {} dropped, {} remaining",
                            report.replayed,
                            report.dropped,
                            report.remaining
                        ),
                        Err(e) => tracing::error!("Replay pass failed: {}", e),
                    }
                }
                was_online = online;
            }
        });
    }
}
