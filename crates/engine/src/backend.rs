//! The engine backend contract: a blocking, cancellable producer of text
//! deltas. Implementations run entirely on the dedicated OS thread that
//! [`spawn_bridge`](crate::bridge::spawn_bridge) allocates for them — they
//! must never be called from async context directly.

use std::path::PathBuf;

use relay_domain::config::ModelParams;
use relay_domain::CancelToken;

use crate::bridge::BridgeItem;

/// One generation request resolved and ready to hand to a backend.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub user_text: String,
    pub preamble: Option<String>,
    /// Overrides the model's default system prompt file for this call.
    pub system_prompt_path: Option<PathBuf>,
    pub default_system_prompt_path: PathBuf,
    pub sampling_overrides: serde_json::Map<String, serde_json::Value>,
    pub baseline_params: ModelParams,
}

impl GenerateRequest {
    /// `preamble + "\n\n" + user_text` when a preamble is present, else
    /// `user_text` verbatim.
    pub fn composed_user_text(&self) -> String {
        match &self.preamble {
            Some(p) if !p.is_empty() => format!("{p}\n\n{}", self.user_text),
            _ => self.user_text.clone(),
        }
    }

    /// Resolves the effective system prompt: `system_prompt_path` wins when
    /// set and readable, else the model's default.
    pub fn resolve_system_prompt(&self) -> Option<String> {
        let path = self
            .system_prompt_path
            .as_ref()
            .unwrap_or(&self.default_system_prompt_path);
        let text = std::fs::read_to_string(path).ok()?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Implemented once per loaded model. A `Worker` owns one instance.
pub trait EngineBackend: Send + Sync + 'static {
    /// Runs entirely on a dedicated OS thread. Pushes one [`BridgeItem`] per
    /// emitted delta via `tx.blocking_send`, checking `cancel` between
    /// emissions, and finishes with exactly one `Done` or `Error` item.
    fn run_blocking(
        &self,
        request: GenerateRequest,
        cancel: CancelToken,
        tx: tokio::sync::mpsc::Sender<BridgeItem>,
    );
}
