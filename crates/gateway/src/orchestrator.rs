//! Drives one generation end to end: memory resolution, the busy check,
//! worker rental, delta fan-out to the session and to TTS, and the terminal
//! disposition. One call to [`spawn_run`] owns exactly one [`Run`].

use std::sync::Arc;
use std::time::Duration;

use relay_domain::agent::MemoryPolicy;
use relay_domain::{AgentPreset, Error};
use relay_engine::{spawn_bridge, EngineStream, GenerateRequest};
use relay_protocol::{MemorySelector, ServerEvent};
use relay_sessions::Session;

use crate::state::AppState;

pub struct ChatRequest {
    pub sid: String,
    pub text: String,
    pub memory: Option<MemorySelector>,
    pub thread_id: Option<String>,
}

enum MemoryMode {
    None,
    ThreadWindow {
        thread_id: String,
        max_context_tokens_override: Option<u32>,
    },
}

fn resolve_memory_mode(state: &AppState, preset: &AgentPreset, req: &ChatRequest) -> Result<MemoryMode, Error> {
    let mode = req
        .memory
        .as_ref()
        .map(|m| m.mode().trim().to_ascii_lowercase())
        .unwrap_or_else(|| match preset.memory_policy {
            MemoryPolicy::None => "none".to_string(),
            MemoryPolicy::ThreadWindow => "thread_window".to_string(),
        });

    match mode.as_str() {
        "none" => Ok(MemoryMode::None),
        "thread_window" => {
            if state.memory.get("thread_window").is_none() {
                return Err(Error::validation(
                    "MEM_DISABLED",
                    "thread_window memory is not configured",
                ));
            }
            let thread_id = req.thread_id.clone().ok_or_else(|| {
                Error::validation("MEM_THREAD_REQUIRED", "thread_window memory requires thread_id")
            })?;
            let max_context_tokens_override = req.memory.as_ref().and_then(|m| m.max_context_tokens());
            Ok(MemoryMode::ThreadWindow {
                thread_id,
                max_context_tokens_override,
            })
        }
        other => Err(Error::validation("MEM_UNKNOWN", format!("unknown memory mode \"{other}\""))),
    }
}

/// Validates, accepts, and spawns one Run for `preset` against `req`.
/// Validation failures are reported as `Error` events on `req.sid` and do
/// not spawn anything.
pub fn spawn_run(state: Arc<AppState>, session: Arc<Session>, preset: AgentPreset, req: ChatRequest) {
    let mode = match resolve_memory_mode(&state, &preset, &req) {
        Ok(m) => m,
        Err(e) => {
            state.send_to(
                &req.sid,
                ServerEvent::Error {
                    code: Some(e.code()),
                    run_id: None,
                    message: e.to_string(),
                },
            );
            return;
        }
    };

    let guard = match session.try_begin_run() {
        Ok(g) => g,
        Err(_) => {
            state.send_to(
                &req.sid,
                ServerEvent::Error {
                    code: Some("BUSY"),
                    run_id: None,
                    message: "a run is already active".into(),
                },
            );
            return;
        }
    };

    let run_id = uuid::Uuid::new_v4().to_string();
    state.send_to(
        &req.sid,
        ServerEvent::RunStarted {
            run_id: run_id.clone(),
            agent: Some(preset.name.clone()),
        },
    );

    let session_for_task = Arc::clone(&session);
    let state_for_task = Arc::clone(&state);
    let handle = tokio::spawn(async move {
        run_inner(&state_for_task, &session_for_task, preset, req, mode, run_id, guard).await;
        session_for_task.clear_current_task();
    });
    session.set_current_task(handle);
}

async fn run_inner(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    preset: AgentPreset,
    req: ChatRequest,
    mode: MemoryMode,
    run_id: String,
    _guard: relay_sessions::RunGuard,
) {
    let tts_client_id = state.tts_client_for_sid(&req.sid);
    if let (Some(tts), Some(client_id)) = (&state.tts, &tts_client_id) {
        tts.stop_generation(client_id).await;
    }

    let preamble = match &mode {
        MemoryMode::None => None,
        MemoryMode::ThreadWindow {
            thread_id,
            max_context_tokens_override,
        } => {
            let strategy = state
                .memory
                .get("thread_window")
                .expect("validated present in resolve_memory_mode");
            let preamble = strategy.preamble(thread_id, *max_context_tokens_override);
            strategy.on_user_message(thread_id, &req.text);
            preamble
        }
    };

    let request = GenerateRequest {
        user_text: req.text.clone(),
        preamble,
        system_prompt_path: Some(preset.system_prompt_path.clone()),
        default_system_prompt_path: state.default_system_prompt_path.clone(),
        sampling_overrides: preset.params_override.clone(),
        baseline_params: state.active_model.params.clone(),
    };

    let worker = state.pool.acquire().await;
    let cancel = session.cancel.clone();
    let rx = spawn_bridge(Arc::clone(&worker.engine), request, cancel.clone());
    let mut stream = EngineStream::new(rx, cancel.clone());

    let mut assistant_text = String::new();
    let timeout_s = state.config.runtime.per_request_timeout_s;
    let stream_fut = drive_stream(state, &req.sid, &run_id, &mut stream, &mut assistant_text, tts_client_id.as_deref());

    let outcome = if timeout_s > 0 {
        match tokio::time::timeout(Duration::from_secs(timeout_s), stream_fut).await {
            Ok(r) => r,
            Err(_) => {
                cancel.cancel();
                Err(Error::Timeout(timeout_s))
            }
        }
    } else {
        stream_fut.await
    };

    match outcome {
        Ok(()) if cancel.is_cancelled() => {
            if let (Some(tts), Some(client_id)) = (&state.tts, &tts_client_id) {
                tts.stop_generation(client_id).await;
            }
            state.send_to(
                &req.sid,
                ServerEvent::Interrupted {
                    run_id: Some(run_id),
                },
            );
        }
        Ok(()) => {
            if let (Some(tts), Some(client_id)) = (&state.tts, &tts_client_id) {
                tts.send_text_chunk(client_id, "", true).await;
            }
            if let MemoryMode::ThreadWindow { thread_id, .. } = &mode {
                let strategy = state
                    .memory
                    .get("thread_window")
                    .expect("validated present in resolve_memory_mode");
                strategy.on_assistant_message(thread_id, &assistant_text);
            }
            state.send_to(&req.sid, ServerEvent::ChatDone { run_id });
        }
        Err(Error::Timeout(s)) => {
            if let (Some(tts), Some(client_id)) = (&state.tts, &tts_client_id) {
                tts.stop_generation(client_id).await;
            }
            state.send_to(
                &req.sid,
                ServerEvent::Error {
                    code: None,
                    run_id: Some(run_id),
                    message: format!("Timeout after {s}s"),
                },
            );
        }
        Err(e) => {
            if let (Some(tts), Some(client_id)) = (&state.tts, &tts_client_id) {
                tts.stop_generation(client_id).await;
            }
            state.send_to(
                &req.sid,
                ServerEvent::Error {
                    code: Some(e.code()),
                    run_id: Some(run_id),
                    message: e.to_string(),
                },
            );
        }
    }
}

/// Streams every delta to the session and, if bound, to TTS, in arrival
/// order. Returns as soon as the stream ends, errors, or is cancelled.
async fn drive_stream(
    state: &Arc<AppState>,
    sid: &str,
    run_id: &str,
    stream: &mut EngineStream,
    assistant_text: &mut String,
    tts_client_id: Option<&str>,
) -> Result<(), Error> {
    while let Some(item) = stream.next().await {
        let chunk = item?;
        if chunk.is_empty() {
            continue;
        }
        assistant_text.push_str(&chunk);
        state.send_to(
            sid,
            ServerEvent::ChatChunk {
                run_id: run_id.to_string(),
                chunk: chunk.clone(),
            },
        );
        if let (Some(tts), Some(client_id)) = (&state.tts, tts_client_id) {
            tts.send_text_chunk(client_id, &chunk, false).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use relay_domain::config::MemoryConfig;
    use relay_domain::Config;
    use relay_engine::MockEngine;
    use relay_memory::MemoryRegistry;
    use relay_pool::WorkerPool;

    use super::*;
    use crate::router_dispatcher::RouterDispatcher;
    use crate::stt_manager::SttManager;

    fn test_state(memory: MemoryConfig) -> AppState {
        let config = Arc::new(Config {
            memory,
            ..Config::default()
        });
        let pool = Arc::new(
            WorkerPool::new(1, |_| Ok(Arc::new(MockEngine::new(vec!["ok".into()])) as Arc<dyn relay_engine::EngineBackend>))
                .unwrap(),
        );
        let agents = Arc::new(HashMap::new());
        let sid_senders = Arc::new(parking_lot::RwLock::new(HashMap::new()));
        AppState {
            config: Arc::clone(&config),
            pool: Arc::clone(&pool),
            agents: Arc::clone(&agents),
            active_model: Arc::new(relay_domain::config::ModelConfig {
                name: "test".into(),
                path: PathBuf::new(),
                system_prompt: String::new(),
                active: true,
                params: Default::default(),
            }),
            default_system_prompt_path: PathBuf::new(),
            sessions: Arc::new(relay_sessions::SessionRegistry::new()),
            memory: Arc::new(MemoryRegistry::from_config(&config.memory)),
            stt: Arc::new(SttManager::new(Arc::new(|_, _, _, _| {}))),
            tts: None,
            router: Arc::new(RouterDispatcher::new(pool, agents, Default::default(), Arc::clone(&sid_senders))),
            client_index: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            client_tts_index: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            sid_senders,
        }
    }

    fn test_preset(memory_policy: MemoryPolicy) -> AgentPreset {
        AgentPreset {
            name: "default".into(),
            system_prompt_path: PathBuf::new(),
            params_override: Default::default(),
            memory_policy,
        }
    }

    fn test_req(memory: Option<MemorySelector>, thread_id: Option<String>) -> ChatRequest {
        ChatRequest {
            sid: "sid-1".into(),
            text: "hi".into(),
            memory,
            thread_id,
        }
    }

    #[test]
    fn defaults_to_preset_policy_when_client_is_silent() {
        let state = test_state(MemoryConfig::default());
        let preset = test_preset(MemoryPolicy::None);
        let req = test_req(None, None);
        assert!(matches!(resolve_memory_mode(&state, &preset, &req), Ok(MemoryMode::None)));
    }

    #[test]
    fn thread_window_requested_but_not_configured_is_mem_disabled() {
        let state = test_state(MemoryConfig::default());
        let preset = test_preset(MemoryPolicy::ThreadWindow);
        let req = test_req(None, Some("t1".into()));
        let err = resolve_memory_mode(&state, &preset, &req).unwrap_err();
        assert_eq!(err.code(), "MEM_DISABLED");
    }

    #[test]
    fn thread_window_configured_but_missing_thread_id_is_mem_thread_required() {
        let mut memory = MemoryConfig::default();
        memory.strategies.thread_window = Some(relay_domain::config::ThreadWindowConfig { max_context_tokens: 512 });
        let state = test_state(memory);
        let preset = test_preset(MemoryPolicy::ThreadWindow);
        let req = test_req(None, None);
        let err = resolve_memory_mode(&state, &preset, &req).unwrap_err();
        assert_eq!(err.code(), "MEM_THREAD_REQUIRED");
    }

    #[test]
    fn unknown_client_supplied_mode_is_mem_unknown() {
        let state = test_state(MemoryConfig::default());
        let preset = test_preset(MemoryPolicy::None);
        let req = test_req(Some(MemorySelector::Mode("bogus".into())), None);
        let err = resolve_memory_mode(&state, &preset, &req).unwrap_err();
        assert_eq!(err.code(), "MEM_UNKNOWN");
    }

    #[test]
    fn client_supplied_mode_overrides_preset_policy() {
        let mut memory = MemoryConfig::default();
        memory.strategies.thread_window = Some(relay_domain::config::ThreadWindowConfig { max_context_tokens: 512 });
        let state = test_state(memory);
        // Preset defaults to no memory, but the client explicitly asks for
        // thread_window — the client's choice wins.
        let preset = test_preset(MemoryPolicy::None);
        let req = test_req(Some(MemorySelector::Mode("thread_window".into())), Some("t1".into()));
        assert!(matches!(
            resolve_memory_mode(&state, &preset, &req),
            Ok(MemoryMode::ThreadWindow { .. })
        ));
    }
}
