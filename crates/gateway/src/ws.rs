//! Gateway Event Layer: the downstream WebSocket boundary. Validates every
//! inbound event against the client protocol before any side effect runs,
//! then binds it to the Session Registry, the Run Orchestrator, or the
//! STT/TTS subscription indices.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;

use crate::orchestrator::{self, ChatRequest};
use crate::state::{AppState, SttSubscription, TtsBinding};

const OUTBOUND_BUFFER: usize = 64;

pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let sid = uuid::Uuid::new_v4().to_string();
    let session = state.sessions.connect(&sid);

    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);
    state.sid_senders.write().insert(sid.clone(), tx);

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode outbound event");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    tracing::info!(sid, "client connected");

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_text(&state, &session, &sid, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    tracing::info!(sid, "client disconnected");
    cleanup(&state, &sid).await;
    writer.abort();
}

async fn handle_text(state: &Arc<AppState>, session: &Arc<relay_sessions::Session>, sid: &str, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            state.send_to(
                sid,
                ServerEvent::Error {
                    code: Some("BAD_REQUEST"),
                    run_id: None,
                    message: format!("malformed event: {e}"),
                },
            );
            return;
        }
    };

    match event {
        ClientEvent::Chat {
            agent,
            text,
            memory,
            thread_id,
        } => handle_chat(state, session, sid, agent, text, memory, thread_id),
        ClientEvent::Interrupt => handle_interrupt(state, session, sid).await,
        ClientEvent::JoinSTT {
            stt_url,
            client_id,
            agent,
            thread_id,
        } => handle_join_stt(state, sid, stt_url, client_id, agent, thread_id).await,
        ClientEvent::LeaveSTT { client_id } => handle_leave_stt(state, &client_id).await,
        ClientEvent::JoinTTS {
            client_id,
            voice,
            speed,
        } => handle_join_tts(state, sid, client_id, voice, speed).await,
        ClientEvent::LeaveTTS { client_id } => handle_leave_tts(state, &client_id),
    }
}

fn handle_chat(
    state: &Arc<AppState>,
    session: &Arc<relay_sessions::Session>,
    sid: &str,
    agent: String,
    text: String,
    memory: Option<relay_protocol::MemorySelector>,
    thread_id: Option<String>,
) {
    let text = text.trim().to_string();
    if text.is_empty() {
        state.send_to(
            sid,
            ServerEvent::Error {
                code: Some("EMPTY"),
                run_id: None,
                message: "text must not be empty".into(),
            },
        );
        return;
    }

    let preset = match state.agents.get(&agent.trim().to_ascii_lowercase()) {
        Some(p) => p.clone(),
        None => {
            state.send_to(
                sid,
                ServerEvent::Error {
                    code: Some("AGENT_INVALID"),
                    run_id: None,
                    message: format!("unknown agent \"{agent}\""),
                },
            );
            return;
        }
    };

    orchestrator::spawn_run(
        Arc::clone(state),
        Arc::clone(session),
        preset,
        ChatRequest {
            sid: sid.to_string(),
            text,
            memory,
            thread_id,
        },
    );
}

async fn handle_interrupt(state: &Arc<AppState>, session: &Arc<relay_sessions::Session>, sid: &str) {
    session.interrupt().await;
    state.send_to(sid, ServerEvent::Interrupted { run_id: None });
}

async fn handle_join_stt(
    state: &Arc<AppState>,
    sid: &str,
    stt_url: String,
    client_id: String,
    agent: String,
    thread_id: Option<String>,
) {
    let stt_url = stt_url.trim().to_string();
    let client_id = client_id.trim().to_string();
    if stt_url.is_empty() || client_id.is_empty() {
        state.send_to(
            sid,
            ServerEvent::Error {
                code: Some("MISSING_PARAMS"),
                run_id: None,
                message: "sttUrl and clientId are required".into(),
            },
        );
        return;
    }

    let preset = match state.agents.get(&agent.trim().to_ascii_lowercase()) {
        Some(p) => p,
        None => {
            state.send_to(
                sid,
                ServerEvent::Error {
                    code: Some("AGENT_INVALID"),
                    run_id: None,
                    message: format!("unknown agent \"{agent}\""),
                },
            );
            return;
        }
    };
    if preset.memory_policy == relay_domain::agent::MemoryPolicy::ThreadWindow && thread_id.is_none() {
        state.send_to(
            sid,
            ServerEvent::Error {
                code: Some("THREAD_REQUIRED"),
                run_id: None,
                message: format!("agent \"{agent}\" requires threadId"),
            },
        );
        return;
    }

    // Last-writer-wins: a second JoinSTT for the same client_id replaces the
    // prior subscription in the index, per spec.
    state.client_index.write().insert(
        client_id.clone(),
        SttSubscription {
            client_id: client_id.clone(),
            sid: sid.to_string(),
            agent: agent.clone(),
            thread_id,
            stt_url: stt_url.clone(),
        },
    );

    if let Err(e) = state.stt.subscribe(&stt_url, &client_id).await {
        state.client_index.write().remove(&client_id);
        state.send_to(
            sid,
            ServerEvent::Error {
                code: Some(e.code()),
                run_id: None,
                message: e.to_string(),
            },
        );
        return;
    }

    state.send_to(
        sid,
        ServerEvent::SttSubscribed {
            client_id,
            stt_url,
            agent,
        },
    );
}

async fn handle_leave_stt(state: &Arc<AppState>, client_id: &str) {
    let subscription = state.client_index.write().remove(client_id);
    if let Some(sub) = &subscription {
        state.stt.unsubscribe(&sub.stt_url, client_id).await;
    }
    if let Some(sub) = subscription {
        state.send_to(
            &sub.sid,
            ServerEvent::SttUnsubscribed {
                client_id: client_id.to_string(),
            },
        );
    }
}

async fn handle_join_tts(
    state: &Arc<AppState>,
    sid: &str,
    client_id: String,
    voice: Option<String>,
    speed: Option<f32>,
) {
    let client_id = client_id.trim().to_string();
    if client_id.is_empty() {
        state.send_to(
            sid,
            ServerEvent::Error {
                code: Some("MISSING_PARAMS"),
                run_id: None,
                message: "clientId is required".into(),
            },
        );
        return;
    }

    let tts = match &state.tts {
        Some(tts) => tts,
        None => {
            state.send_to(
                sid,
                ServerEvent::Error {
                    code: Some("STT_CONNECT"),
                    run_id: None,
                    message: "TTS is not configured".into(),
                },
            );
            return;
        }
    };

    state.client_tts_index.write().insert(
        client_id.clone(),
        TtsBinding {
            sid: sid.to_string(),
            voice: voice.clone(),
            speed,
        },
    );
    tts.configure_client(&client_id, voice, speed).await;
    state.send_to(sid, ServerEvent::TtsSubscribed { client_id });
}

fn handle_leave_tts(state: &Arc<AppState>, client_id: &str) {
    let binding = state.client_tts_index.write().remove(client_id);
    if let Some(binding) = binding {
        state.send_to(
            &binding.sid,
            ServerEvent::TtsUnsubscribed {
                client_id: client_id.to_string(),
            },
        );
    }
}

/// Drops every trace of `sid`: its outbound channel, its STT/TTS
/// subscriptions, and its Session.
async fn cleanup(state: &Arc<AppState>, sid: &str) {
    state.sid_senders.write().remove(sid);

    let stale_stt: Vec<(String, String)> = state
        .client_index
        .read()
        .values()
        .filter(|s| s.sid == sid)
        .map(|s| (s.stt_url.clone(), s.client_id.clone()))
        .collect();
    for (url, client_id) in stale_stt {
        state.client_index.write().remove(&client_id);
        state.stt.unsubscribe(&url, &client_id).await;
    }

    let stale_tts: Vec<String> = state
        .client_tts_index
        .read()
        .iter()
        .filter(|(_, b)| b.sid == sid)
        .map(|(cid, _)| cid.clone())
        .collect();
    for client_id in stale_tts {
        state.client_tts_index.write().remove(&client_id);
    }

    state.sessions.disconnect(sid).await;
}
