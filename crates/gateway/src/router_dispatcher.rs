//! Fire-and-forget secondary generation using the `router` agent preset with
//! memory disabled. Deliberately decoupled from the main Run's cancel flag
//! so a user interrupt can never poison a classification already in flight.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use relay_domain::config::ModelParams;
use relay_domain::{AgentPreset, CancelToken, Error, Result};
use relay_engine::{spawn_bridge, EngineStream, GenerateRequest};
use relay_pool::WorkerPool;
use relay_protocol::ServerEvent;
use tokio::sync::mpsc;

pub struct RouterDispatcher {
    pool: Arc<WorkerPool>,
    agents: Arc<HashMap<String, AgentPreset>>,
    baseline_params: ModelParams,
    sid_senders: Arc<RwLock<HashMap<String, mpsc::Sender<ServerEvent>>>>,
}

impl RouterDispatcher {
    pub fn new(
        pool: Arc<WorkerPool>,
        agents: Arc<HashMap<String, AgentPreset>>,
        baseline_params: ModelParams,
        sid_senders: Arc<RwLock<HashMap<String, mpsc::Sender<ServerEvent>>>>,
    ) -> Self {
        Self {
            pool,
            agents,
            baseline_params,
            sid_senders,
        }
    }

    /// Schedules an independent classification run and returns immediately.
    /// A blank `text` is silently ignored.
    pub fn dispatch(self: &Arc<Self>, sid: String, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(sid, text).await });
    }

    async fn run(&self, sid: String, text: String) {
        let event = match self.generate(&text).await {
            Ok(raw) => match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&raw) {
                Ok(payload) => ServerEvent::RouterResult { payload },
                Err(e) => {
                    tracing::warn!(error = %e, raw, "router output was not a JSON object");
                    ServerEvent::router_error(format!("invalid router output: {e}"))
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "router run failed");
                ServerEvent::router_error(e.to_string())
            }
        };
        self.send_to(&sid, event);
    }

    async fn generate(&self, text: &str) -> Result<String> {
        let preset = self
            .agents
            .get("router")
            .ok_or_else(|| Error::Config("agent preset \"router\" not found".into()))?;

        let worker = self.pool.acquire().await;
        let request = GenerateRequest {
            user_text: text.to_string(),
            preamble: None,
            system_prompt_path: Some(preset.system_prompt_path.clone()),
            default_system_prompt_path: preset.system_prompt_path.clone(),
            sampling_overrides: preset.params_override.clone(),
            baseline_params: self.baseline_params.clone(),
        };

        let cancel = CancelToken::never();
        let rx = spawn_bridge(Arc::clone(&worker.engine), request, cancel.clone());
        let mut stream = EngineStream::new(rx, cancel);

        let mut buf = String::new();
        while let Some(item) = stream.next().await {
            buf.push_str(&item?);
        }
        Ok(buf.trim().to_string())
    }

    fn send_to(&self, sid: &str, event: ServerEvent) {
        let sender = self.sid_senders.read().get(sid).cloned();
        if let Some(sender) = sender {
            let _ = sender.try_send(event);
        }
    }
}
