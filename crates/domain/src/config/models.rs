use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One entry of the `models[]` config array. Exactly one entry must have
/// `active: true` — that is the model the Worker Pool's factory loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub path: PathBuf,
    /// Path to the default system prompt text file, relative to the config
    /// file's directory. Used when a run omits `system_prompt_path`.
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub params: ModelParams,
}

/// Recognized engine construction params and baseline sampling defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelParams {
    #[serde(default)]
    pub n_threads: Option<u32>,
    #[serde(default)]
    pub n_gpu_layers: Option<u32>,
    #[serde(default)]
    pub n_ctx: Option<u32>,
    #[serde(default)]
    pub n_batch: Option<u32>,
    #[serde(default)]
    pub n_ubatch: Option<u32>,
    #[serde(default)]
    pub flash_attn: Option<bool>,
    #[serde(default)]
    pub chat_format: Option<String>,
    #[serde(default)]
    pub verbose: Option<bool>,

    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_k: Option<i32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub min_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
}
