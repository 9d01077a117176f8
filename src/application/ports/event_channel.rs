use crate::domain::entities::RemoteChange;
use crate::domain::value_objects::ScopeId;
use crate::shared::error::Result;
use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect ceiling exceeded; manual reload required.
    Failed,
}

#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Emitted on every successful (re)connection, the first included.
    Connected,
    Disconnected,
    Change(RemoteChange),
}

/// The single logical push connection for the authenticated session.
/// UI surfaces subscribe to dispatched events; only join/leave write to the
/// connection.
#[async_trait]
pub trait EventChannel: Send + Sync {
    async fn join(&self, scope: &ScopeId) -> Result<()>;
    async fn leave(&self, scope: &ScopeId) -> Result<()>;
    fn events(&self) -> broadcast::Receiver<ChannelEvent>;
    fn state(&self) -> watch::Receiver<ChannelState>;
}
