//! One upstream connection per STT URL, multiplexing many `client_id` "room"
//! subscriptions over it. Reconnects transparently and re-subscribes every
//! wanted room before a link is considered ready again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use relay_domain::{Error, Result};
use relay_protocol::{SttOutbound, SttTranscription};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::reconnect::ReconnectBackoff;

const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Invoked once per inbound transcript: `(client_id, text, duration, stt_url)`.
pub type TranscriptHandler = Arc<dyn Fn(String, String, f32, String) + Send + Sync>;

struct LinkState {
    outbound: Option<mpsc::Sender<SttOutbound>>,
    wanted: HashSet<String>,
}

/// A single upstream connection. Owns the set of `client_id` rooms it is
/// joined to; re-subscribes them all on every reconnect.
pub struct SttLink {
    url: String,
    on_transcript: TranscriptHandler,
    connect_lock: Mutex<()>,
    state: SyncMutex<LinkState>,
}

impl SttLink {
    fn new(url: String, on_transcript: TranscriptHandler) -> Self {
        Self {
            url,
            on_transcript,
            connect_lock: Mutex::new(()),
            state: SyncMutex::new(LinkState {
                outbound: None,
                wanted: HashSet::new(),
            }),
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().outbound.is_some()
    }

    /// Idempotent. Connects if needed, then re-sends `subscribe_transcripts`
    /// for every wanted room before returning.
    async fn ensure_connected(self: &Arc<Self>) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        tokio::time::timeout(CONNECT_TIMEOUT, self.dial())
            .await
            .map_err(|_| Error::SttConnect(format!("{}: connect timed out", self.url)))??;

        let wanted: Vec<String> = self.state.lock().wanted.iter().cloned().collect();
        for client_id in wanted {
            self.send(SttOutbound::SubscribeTranscripts {
                client_id: client_id.clone(),
            })
            .await?;
            tracing::debug!(url = %self.url, client_id, "resubscribed after reconnect");
        }
        Ok(())
    }

    async fn dial(self: &Arc<Self>) -> Result<()> {
        let (ws, _resp) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| Error::SttConnect(format!("{}: {e}", self.url)))?;
        let (mut sink, mut stream) = ws.split();

        let (tx, mut rx) = mpsc::channel::<SttOutbound>(64);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode STT outbound frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        let link = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                if let Message::Text(text) = msg {
                    link.handle_frame(&text);
                }
            }
            tracing::info!(url = %link.url, "STT link disconnected");
            link.state.lock().outbound = None;
            if !link.state.lock().wanted.is_empty() {
                tokio::spawn(reconnect_loop(link));
            }
        });

        self.state.lock().outbound = Some(tx);
        Ok(())
    }

    fn handle_frame(&self, text: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
            return;
        };
        if value.get("event").and_then(|e| e.as_str()) != Some("transcription") {
            return;
        }
        let Some(data) = value.get("data") else {
            return;
        };
        let Ok(t) = serde_json::from_value::<SttTranscription>(data.clone()) else {
            return;
        };
        let text = t.text.trim().to_string();
        let client_id = t.client_id.trim().to_string();
        if text.is_empty() || client_id.is_empty() {
            return;
        }
        (self.on_transcript)(client_id, text, t.duration, self.url.clone());
    }

    async fn send(&self, msg: SttOutbound) -> Result<()> {
        let tx = self.state.lock().outbound.clone();
        match tx {
            Some(tx) => tx
                .send(msg)
                .await
                .map_err(|_| Error::SttConnect(format!("{}: link closed", self.url))),
            None => Err(Error::SttConnect(format!("{}: not connected", self.url))),
        }
    }

    async fn subscribe(self: &Arc<Self>, client_id: &str) -> Result<()> {
        self.ensure_connected().await?;
        self.state.lock().wanted.insert(client_id.to_string());
        self.send(SttOutbound::SubscribeTranscripts {
            client_id: client_id.to_string(),
        })
        .await
    }

    async fn unsubscribe(&self, client_id: &str) {
        self.state.lock().wanted.remove(client_id);
        if self.is_connected() {
            let _ = self
                .send(SttOutbound::UnsubscribeTranscripts {
                    client_id: client_id.to_string(),
                })
                .await;
        }
    }
}

/// Retries `ensure_connected` with jittered backoff until it succeeds or
/// nobody wants this link anymore.
async fn reconnect_loop(link: Arc<SttLink>) {
    let backoff = ReconnectBackoff::default();
    let mut attempt = 0;
    loop {
        if link.state.lock().wanted.is_empty() {
            return;
        }
        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
        match link.ensure_connected().await {
            Ok(()) => {
                tracing::info!(url = %link.url, "STT link reconnected");
                return;
            }
            Err(e) => {
                tracing::warn!(url = %link.url, error = %e, attempt, "STT reconnect attempt failed");
                attempt += 1;
            }
        }
    }
}

/// Holds one [`SttLink`] per upstream URL.
pub struct SttManager {
    links: Mutex<HashMap<String, Arc<SttLink>>>,
    on_transcript: TranscriptHandler,
}

impl SttManager {
    pub fn new(on_transcript: TranscriptHandler) -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            on_transcript,
        }
    }

    async fn ensure(&self, url: &str) -> Arc<SttLink> {
        let mut links = self.links.lock().await;
        links
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(SttLink::new(url.to_string(), self.on_transcript.clone())))
            .clone()
    }

    pub async fn subscribe(&self, url: &str, client_id: &str) -> Result<()> {
        let link = self.ensure(url).await;
        link.subscribe(client_id).await
    }

    pub async fn unsubscribe(&self, url: &str, client_id: &str) {
        let link = self.ensure(url).await;
        link.unsubscribe(client_id).await;
    }
}
