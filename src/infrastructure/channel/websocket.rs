use crate::application::ports::{
    ChannelEvent, ChannelState, EventChannel, Notifier, UserNotice,
};
use crate::domain::entities::RemoteChange;
use crate::domain::value_objects::{EntityId, ScopeId};
use crate::shared::config::ChannelConfig;
use crate::shared::error::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Serialize)]
struct OutboundFrame<'a> {
    action: &'a str,
    scope: &'a str,
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    scope: String,
    entity: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// WebSocket push channel.
///
/// One logical connection per session. Dropped connections reconnect with
/// capped exponential backoff; after the configured ceiling the channel
/// enters `Failed` and stays there until `connect` is called again. Scope
/// subscriptions are re-sent on every successful (re)connection, so a
/// reconnect restores the previous subscription set without caller help.
pub struct WebSocketEventChannel {
    config: ChannelConfig,
    events_tx: broadcast::Sender<ChannelEvent>,
    state_tx: watch::Sender<ChannelState>,
    joined: Arc<RwLock<HashSet<ScopeId>>>,
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
    notifier: Arc<dyn Notifier>,
}

impl WebSocketEventChannel {
    pub fn new(config: ChannelConfig, notifier: Arc<dyn Notifier>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        Self {
            config,
            events_tx,
            state_tx,
            joined: Arc::new(RwLock::new(HashSet::new())),
            outbound: Arc::new(Mutex::new(None)),
            notifier,
        }
    }

    /// Open the connection and keep it open until the reconnect ceiling is
    /// exceeded.
    pub fn connect(self: &Arc<Self>) {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            channel.run().await;
        });
    }

    async fn run(&self) {
        let mut attempt: u32 = 0;
        loop {
            self.state_tx.send_replace(ChannelState::Connecting);
            match connect_async(&self.config.url).await {
                Ok((stream, _)) => {
                    attempt = 0;
                    tracing::info!("Push channel connected to {}", self.config.url);
                    self.serve_connection(stream).await;
                    self.state_tx.send_replace(ChannelState::Disconnected);
                    let _ = self.events_tx.send(ChannelEvent::Disconnected);
                }
                Err(e) => {
                    tracing::warn!("Push channel connection failed: {}", e);
                }
            }

            attempt += 1;
            if attempt >= self.config.max_reconnect_attempts {
                tracing::error!(
                    "Push channel gave up after {} reconnect attempts",
                    attempt
                );
                self.state_tx.send_replace(ChannelState::Failed);
                self.notifier.notify(UserNotice::error(
                    "Live updates are unavailable; reload to reconnect",
                ));
                return;
            }
            let delay = backoff_delay(attempt, &self.config);
            tracing::debug!("Reconnecting push channel in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn serve_connection(
        &self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) {
        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound.lock().unwrap() = Some(outbound_tx);

        self.state_tx.send_replace(ChannelState::Connected);
        let _ = self.events_tx.send(ChannelEvent::Connected);

        // Restore the subscription set lost with the previous connection.
        for scope in self.joined.read().await.iter() {
            self.send_frame("join", scope);
        }

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if write.send(message).await.is_err() {
                    break;
                }
            }
        });

        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => match parse_frame(&text) {
                    Ok(change) => {
                        let _ = self.events_tx.send(ChannelEvent::Change(change));
                    }
                    Err(e) => tracing::debug!("Ignoring unparseable push frame: {}", e),
                },
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
                Ok(Message::Close(_)) => break,
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    tracing::warn!("Push channel read error: {}", e);
                    break;
                }
            }
        }

        *self.outbound.lock().unwrap() = None;
        writer.abort();
    }

    fn send_frame(&self, action: &str, scope: &ScopeId) {
        let guard = self.outbound.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            let frame = OutboundFrame {
                action,
                scope: scope.as_str(),
            };
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    let _ = tx.send(Message::Text(json));
                }
                Err(e) => tracing::error!("Failed to encode {} frame: {}", action, e),
            }
        }
    }
}

#[async_trait]
impl EventChannel for WebSocketEventChannel {
    async fn join(&self, scope: &ScopeId) -> Result<()> {
        self.joined.write().await.insert(scope.clone());
        // When disconnected the subscription is sent on the next connect.
        self.send_frame("join", scope);
        Ok(())
    }

    async fn leave(&self, scope: &ScopeId) -> Result<()> {
        self.joined.write().await.remove(scope);
        self.send_frame("leave", scope);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events_tx.subscribe()
    }

    fn state(&self) -> watch::Receiver<ChannelState> {
        self.state_tx.subscribe()
    }
}

fn backoff_delay(attempt: u32, config: &ChannelConfig) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay = config
        .reconnect_base_delay_ms
        .saturating_mul(1u64 << exp)
        .min(config.reconnect_max_delay_ms);
    Duration::from_millis(delay)
}

fn parse_frame(text: &str) -> std::result::Result<RemoteChange, String> {
    let frame: InboundFrame =
        serde_json::from_str(text).map_err(|e| format!("invalid frame: {e}"))?;
    let (domain, kind) = RemoteChange::parse_event_name(&frame.event)?;
    Ok(RemoteChange {
        domain,
        kind,
        scope: ScopeId::new(frame.scope)?,
        entity_id: EntityId::new(frame.entity)?,
        payload: frame.payload,
    })
}
