//! Wire protocol types for the gateway's three boundaries: the downstream
//! browser client, the upstream STT service, and the upstream TTS service.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Downstream client protocol — inbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    Chat {
        agent: String,
        text: String,
        #[serde(default)]
        memory: Option<MemorySelector>,
        #[serde(default)]
        thread_id: Option<String>,
    },
    Interrupt,
    JoinSTT {
        #[serde(rename = "sttUrl")]
        stt_url: String,
        #[serde(rename = "clientId")]
        client_id: String,
        agent: String,
        #[serde(rename = "threadId", default)]
        thread_id: Option<String>,
    },
    LeaveSTT {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    JoinTTS {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(default)]
        voice: Option<String>,
        #[serde(default)]
        speed: Option<f32>,
    },
    LeaveTTS {
        #[serde(rename = "clientId")]
        client_id: String,
    },
}

/// The `memory` field of a `Chat` event: either a bare mode string or an
/// object carrying per-request overrides for the chosen strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MemorySelector {
    Mode(String),
    Detailed {
        mode: String,
        #[serde(default)]
        thread_window: Option<ThreadWindowOverride>,
    },
}

impl MemorySelector {
    pub fn mode(&self) -> &str {
        match self {
            MemorySelector::Mode(m) => m,
            MemorySelector::Detailed { mode, .. } => mode,
        }
    }

    pub fn max_context_tokens(&self) -> Option<u32> {
        match self {
            MemorySelector::Mode(_) => None,
            MemorySelector::Detailed { thread_window, .. } => {
                thread_window.as_ref().and_then(|w| w.max_context_tokens)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadWindowOverride {
    #[serde(default)]
    pub max_context_tokens: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Downstream client protocol — outbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    RunStarted {
        #[serde(rename = "runId")]
        run_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    ChatChunk {
        #[serde(rename = "runId")]
        run_id: String,
        chunk: String,
    },
    ChatDone {
        #[serde(rename = "runId")]
        run_id: String,
    },
    /// `run_id` is `None` when this is the direct ack of an `Interrupt`
    /// event rather than the termination of a specific run.
    Interrupted {
        #[serde(rename = "runId")]
        run_id: Option<String>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<&'static str>,
        #[serde(rename = "runId", skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        message: String,
    },
    #[serde(rename = "STTSubscribed")]
    SttSubscribed {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "sttUrl")]
        stt_url: String,
        agent: String,
    },
    #[serde(rename = "STTUnsubscribed")]
    SttUnsubscribed {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    #[serde(rename = "TTSSubscribed")]
    TtsSubscribed {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    #[serde(rename = "TTSUnsubscribed")]
    TtsUnsubscribed {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    UserTranscript {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "threadId", skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
        text: String,
        #[serde(rename = "final")]
        is_final: bool,
        duration: f32,
        ts: chrono::DateTime<chrono::Utc>,
    },
    /// An arbitrary JSON object returned by the router agent, emitted
    /// verbatim alongside the envelope tag. On router failure the object
    /// is always `{"Operation": "ERROR", "Reason": <message>}`.
    RouterResult {
        #[serde(flatten)]
        payload: serde_json::Map<String, serde_json::Value>,
    },
}

impl ServerEvent {
    pub fn router_error(reason: impl Into<String>) -> Self {
        let mut payload = serde_json::Map::new();
        payload.insert("Operation".into(), serde_json::Value::String("ERROR".into()));
        payload.insert("Reason".into(), serde_json::Value::String(reason.into()));
        ServerEvent::RouterResult { payload }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT upstream protocol (gateway is the client)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum SttOutbound {
    #[serde(rename = "subscribe_transcripts")]
    SubscribeTranscripts { #[serde(rename = "clientId")] client_id: String },
    #[serde(rename = "unsubscribe_transcripts")]
    UnsubscribeTranscripts { #[serde(rename = "clientId")] client_id: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SttTranscription {
    pub text: String,
    pub client_id: String,
    pub duration: f32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTS upstream protocol (gateway is the client)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum TtsOutbound {
    #[serde(rename = "tts_text_chunk")]
    TtsTextChunk {
        target_client_id: String,
        chunk: String,
        #[serde(rename = "final", skip_serializing_if = "std::ops::Not::not")]
        is_final: bool,
    },
    #[serde(rename = "stop_generation")]
    StopGeneration { client_id: String },
    #[serde(rename = "tts_configure_client")]
    TtsConfigureClient {
        client_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        speed: Option<f32>,
    },
}

/// Handshake query parameters the gateway attaches when dialing the TTS
/// upstream socket: `type=agent_server&format=binary`.
pub const TTS_HANDSHAKE_QUERY: &str = "type=agent_server&format=binary";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_event_parses_string_memory() {
        let raw = r#"{"type":"Chat","agent":"router","text":"hi","memory":"thread_window","thread_id":"t1"}"#;
        let ev: ClientEvent = serde_json::from_str(raw).unwrap();
        match ev {
            ClientEvent::Chat { memory: Some(m), thread_id, .. } => {
                assert_eq!(m.mode(), "thread_window");
                assert_eq!(thread_id.as_deref(), Some("t1"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn chat_event_parses_detailed_memory() {
        let raw = r#"{"type":"Chat","agent":"router","text":"hi","memory":{"mode":"thread_window","thread_window":{"max_context_tokens":256}}}"#;
        let ev: ClientEvent = serde_json::from_str(raw).unwrap();
        match ev {
            ClientEvent::Chat { memory: Some(m), .. } => {
                assert_eq!(m.mode(), "thread_window");
                assert_eq!(m.max_context_tokens(), Some(256));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn join_stt_uses_camel_case_fields() {
        let raw = r#"{"type":"JoinSTT","sttUrl":"ws://x","clientId":"c1","agent":"topic","threadId":"t1"}"#;
        let ev: ClientEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(ev, ClientEvent::JoinSTT { .. }));
    }

    #[test]
    fn interrupted_ack_serializes_null_run_id() {
        let ev = ServerEvent::Interrupted { run_id: None };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["runId"], serde_json::Value::Null);
    }

    #[test]
    fn router_result_flattens_payload() {
        let ev = ServerEvent::router_error("boom");
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "RouterResult");
        assert_eq!(v["Operation"], "ERROR");
        assert_eq!(v["Reason"], "boom");
    }

    #[test]
    fn user_transcript_renames_final() {
        let ev = ServerEvent::UserTranscript {
            client_id: "c1".into(),
            thread_id: Some("t1".into()),
            text: "hi".into(),
            is_final: true,
            duration: 0.5,
            ts: chrono::Utc::now(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["final"], true);
        assert!(v.get("is_final").is_none());
    }
}
