use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use relay_domain::config::ModelConfig;
use relay_domain::{AgentPreset, Config};
use relay_memory::MemoryRegistry;
use relay_pool::WorkerPool;
use relay_protocol::ServerEvent;
use relay_sessions::SessionRegistry;
use tokio::sync::mpsc;

use crate::router_dispatcher::RouterDispatcher;
use crate::stt_manager::SttManager;
use crate::tts_manager::TtsManager;

/// A live `JoinSTT` subscription. Indexed globally by *client_id*.
#[derive(Clone)]
pub struct SttSubscription {
    pub client_id: String,
    pub sid: String,
    pub agent: String,
    pub thread_id: Option<String>,
    pub stt_url: String,
}

/// A live `JoinTTS` binding. Indexed globally by *client_id*.
#[derive(Clone)]
pub struct TtsBinding {
    pub sid: String,
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

/// Shared application state passed to every connection handler and
/// background task.
///
/// Ownership follows the design's summary: the Session Registry
/// exclusively owns Sessions, the Pool exclusively owns Workers, the
/// Memory Registry exclusively owns thread storage, and the STT/TTS
/// Managers exclusively own their upstream links.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ───────────────────────────────────────────────
    pub config: Arc<Config>,
    pub pool: Arc<WorkerPool>,
    pub agents: Arc<HashMap<String, AgentPreset>>,
    /// The single `active: true` model entry, kept for its baseline
    /// sampling params and weights path.
    pub active_model: Arc<ModelConfig>,
    /// `active_model.system_prompt` resolved to an absolute path relative to
    /// the config file's directory.
    pub default_system_prompt_path: std::path::PathBuf,

    // ── Session management ──────────────────────────────────────────
    pub sessions: Arc<SessionRegistry>,
    pub memory: Arc<MemoryRegistry>,

    // ── Upstream links ───────────────────────────────────────────────
    pub stt: Arc<SttManager>,
    /// `None` when no `tts.url` is configured — `JoinTTS` then fails fast.
    pub tts: Option<Arc<TtsManager>>,
    pub router: Arc<RouterDispatcher>,

    // ── Global subscription indices ──────────────────────────────────
    pub client_index: Arc<RwLock<HashMap<String, SttSubscription>>>,
    pub client_tts_index: Arc<RwLock<HashMap<String, TtsBinding>>>,

    // ── Per-connection outbound channels ──────────────────────────────
    /// sid -> sender for events destined for that connection. Populated on
    /// connect, removed on disconnect.
    pub sid_senders: Arc<RwLock<HashMap<String, mpsc::Sender<ServerEvent>>>>,
}

impl AppState {
    /// Sends an event to `sid` if its connection is still registered.
    /// Silently drops the event otherwise — a benign race with disconnect.
    pub fn send_to(&self, sid: &str, event: ServerEvent) {
        let sender = self.sid_senders.read().get(sid).cloned();
        if let Some(sender) = sender {
            if sender.try_send(event).is_err() {
                tracing::debug!(sid, "dropped event — connection outbound buffer full or closed");
            }
        }
    }

    /// The `client_id` bound to TTS for this `sid`, if any. A *sid* owns at
    /// most one binding in practice, but the index doesn't enforce it, so
    /// the first match wins.
    pub fn tts_client_for_sid(&self, sid: &str) -> Option<String> {
        self.client_tts_index
            .read()
            .iter()
            .find(|(_, binding)| binding.sid == sid)
            .map(|(client_id, _)| client_id.clone())
    }
}
