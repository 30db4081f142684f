//! Single upstream connection to the text-to-speech service, dialled as an
//! `agent_server` peer. Lazily connects on first use and stays connected;
//! every operation is safe to call concurrently and repeatedly.

use futures_util::{SinkExt, StreamExt};
use relay_domain::{Error, Result};
use relay_protocol::{TtsOutbound, TTS_HANDSHAKE_QUERY};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

pub struct TtsManager {
    url: String,
    outbound: Mutex<Option<mpsc::Sender<TtsOutbound>>>,
}

impl TtsManager {
    pub fn new(url: String) -> Self {
        Self {
            url,
            outbound: Mutex::new(None),
        }
    }

    async fn ensure_connected(&self) -> Result<mpsc::Sender<TtsOutbound>> {
        let mut guard = self.outbound.lock().await;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let dial_url = format!("{}/?{}", self.url.trim_end_matches('/'), TTS_HANDSHAKE_QUERY);
        let (ws, _resp) = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(&dial_url))
            .await
            .map_err(|_| Error::SttConnect(format!("TTS connect to {dial_url} timed out")))?
            .map_err(|e| Error::SttConnect(format!("TTS connect to {dial_url} failed: {e}")))?;

        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::channel::<TtsOutbound>(64);

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode TTS outbound frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        // Drain inbound frames; the TTS service has nothing to tell us back.
        tokio::spawn(async move { while stream.next().await.is_some() {} });

        *guard = Some(tx.clone());
        Ok(tx)
    }

    async fn send(&self, msg: TtsOutbound) -> Result<()> {
        let tx = self.ensure_connected().await?;
        tx.send(msg)
            .await
            .map_err(|_| Error::SttConnect(format!("{}: TTS link closed", self.url)))
    }

    /// Empty `chunk` with `is_final=true` requests a flush of any buffered
    /// partial sentence.
    pub async fn send_text_chunk(&self, target_client_id: &str, chunk: &str, is_final: bool) {
        let result = self
            .send(TtsOutbound::TtsTextChunk {
                target_client_id: target_client_id.to_string(),
                chunk: chunk.to_string(),
                is_final,
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(client_id = target_client_id, error = %e, "TTS chunk send failed");
        }
    }

    /// Takes precedence over any pending flush. Safe to call repeatedly even
    /// when no playback is active.
    pub async fn stop_generation(&self, client_id: &str) {
        let result = self
            .send(TtsOutbound::StopGeneration {
                client_id: client_id.to_string(),
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(client_id, error = %e, "TTS stop_generation failed");
        }
    }

    pub async fn configure_client(&self, client_id: &str, voice: Option<String>, speed: Option<f32>) {
        if voice.is_none() && speed.is_none() {
            return;
        }
        let result = self
            .send(TtsOutbound::TtsConfigureClient {
                client_id: client_id.to_string(),
                voice,
                speed,
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(client_id, error = %e, "TTS configure_client failed");
        }
    }
}
