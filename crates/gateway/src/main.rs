mod cli;
mod orchestrator;
mod reconnect;
mod router_dispatcher;
mod state;
mod stt_manager;
mod tts_manager;
mod ws;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use clap::Parser;
use parking_lot::RwLock;
use relay_domain::agent::load_agent_presets;
use relay_domain::config::{Config, ConfigSeverity};
use relay_engine::{EngineBackend, LlamaCppEngine};
use relay_memory::MemoryRegistry;
use relay_pool::WorkerPool;
use relay_sessions::SessionRegistry;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ConfigCommand};
use router_dispatcher::RouterDispatcher;
use state::AppState;
use stt_manager::{SttManager, TranscriptHandler};
use tts_manager::TtsManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _path) = cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = cli::load_config()?;
            if !cli::validate_config(&config, &path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = cli::load_config()?;
            cli::show_config(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("relay-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,relay_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("gateway starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let active_model = config
        .models
        .iter()
        .find(|m| m.active)
        .cloned()
        .context("no active model in config (should have been caught by validate())")?;
    let active_model = Arc::new(active_model);
    let default_system_prompt_path = std::path::Path::new(&active_model.system_prompt).to_path_buf();

    let pool = {
        let active_model = Arc::clone(&active_model);
        Arc::new(WorkerPool::new(config.runtime.pool_size, move |id| {
            tracing::info!(id, path = %active_model.path.display(), "loading engine");
            let engine = LlamaCppEngine::load(&active_model.path, active_model.params.clone())?;
            Ok(Arc::new(engine) as Arc<dyn EngineBackend>)
        })?)
    };
    tracing::info!(size = pool.size(), "worker pool ready");

    let agents = if config.agents.router_enabled || config.agents.dir.exists() {
        Arc::new(load_agent_presets(&config.agents.dir).context("loading agent presets")?)
    } else {
        Arc::new(HashMap::new())
    };
    tracing::info!(count = agents.len(), "agent presets loaded");
    if config.agents.router_enabled && !agents.contains_key("router") {
        tracing::warn!("agents.router_enabled is true but no \"router\" preset was found");
    }

    let sessions = Arc::new(SessionRegistry::new());
    let memory = Arc::new(MemoryRegistry::from_config(&config.memory));
    let sid_senders = Arc::new(RwLock::new(HashMap::new()));
    let client_index = Arc::new(RwLock::new(HashMap::new()));
    let client_tts_index = Arc::new(RwLock::new(HashMap::new()));

    let router = Arc::new(RouterDispatcher::new(
        Arc::clone(&pool),
        Arc::clone(&agents),
        active_model.params.clone(),
        Arc::clone(&sid_senders),
    ));

    let tts = config.tts.url.clone().map(|url| Arc::new(TtsManager::new(url)));

    // The STT transcript handler needs the fully-assembled `AppState` (to
    // spawn orchestrator runs), but `AppState` owns the `SttManager` that
    // needs the handler. Broken via a cell filled in immediately after
    // construction — no transcript can arrive before the server is serving.
    let state_cell: Arc<OnceLock<Arc<AppState>>> = Arc::new(OnceLock::new());
    let on_transcript: TranscriptHandler = {
        let state_cell = Arc::clone(&state_cell);
        Arc::new(move |client_id, text, duration, stt_url| {
            let Some(state) = state_cell.get().cloned() else {
                return;
            };
            tokio::spawn(dispatch_transcript(state, client_id, text, duration, stt_url));
        })
    };
    let stt = Arc::new(SttManager::new(on_transcript));

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        pool,
        agents,
        active_model,
        default_system_prompt_path,
        sessions,
        memory,
        stt,
        tts,
        router,
        client_index,
        client_tts_index,
        sid_senders,
    });
    state_cell
        .set(Arc::clone(&state))
        .ok()
        .expect("state_cell set exactly once, before any connection is accepted");

    let cors_layer = build_cors_layer(&config.server.cors);
    let app = axum::Router::new()
        .route("/ws", get(ws::ws_handler))
        .layer(cors_layer)
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "gateway listening");

    axum::serve(listener, app).await.context("axum server error")?;
    Ok(())
}

/// Turns one upstream transcript into a `UserTranscript` event plus an
/// independent router classification and Run Orchestrator dispatch, per the
/// subscription recorded at `JoinSTT` time. Silently drops transcripts for
/// an unknown or already-disconnected client.
async fn dispatch_transcript(state: Arc<AppState>, client_id: String, text: String, duration: f32, _stt_url: String) {
    let subscription = state.client_index.read().get(&client_id).cloned();
    let Some(subscription) = subscription else {
        return;
    };

    state.send_to(
        &subscription.sid,
        relay_protocol::ServerEvent::UserTranscript {
            client_id,
            thread_id: subscription.thread_id.clone(),
            text: text.clone(),
            is_final: true,
            duration,
            ts: chrono::Utc::now(),
        },
    );

    if state.config.agents.router_enabled {
        state.router.dispatch(subscription.sid.clone(), text.clone());
    }

    let Some(preset) = state.agents.get(&subscription.agent).cloned() else {
        tracing::warn!(agent = %subscription.agent, "transcript references an agent preset that no longer exists");
        return;
    };
    let Some(session) = state.sessions.get(&subscription.sid) else {
        return;
    };

    orchestrator::spawn_run(
        state,
        session,
        preset,
        orchestrator::ChatRequest {
            sid: subscription.sid,
            text,
            memory: None,
            thread_id: subscription.thread_id,
        },
    );
}

/// Origins may carry a trailing `:*` wildcard for the port segment. A bare
/// `"*"` allows everything.
fn build_cors_layer(cors: &relay_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
