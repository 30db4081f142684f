//! `llama.cpp`-backed implementation of [`EngineBackend`], grounded on the
//! same model/sampling contract as the original Python binding: load once,
//! resolve a two-message conversation per call, decode token-by-token on a
//! dedicated thread, and stop generating at the cancel flag or a stop
//! sequence.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Mutex;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;

use relay_domain::config::ModelParams;
use relay_domain::{CancelToken, Error};

use crate::backend::{EngineBackend, GenerateRequest};
use crate::bridge::BridgeItem;
use crate::sampling::merge_sampling;

pub struct LlamaCppEngine {
    backend: LlamaBackend,
    model: LlamaModel,
    n_ctx: u32,
    n_batch: u32,
    baseline: ModelParams,
    /// `llama.cpp` contexts are not `Sync`; serialise access. The Worker
    /// Pool already guarantees at most one caller at a time, so this never
    /// contends — it exists to satisfy the `Send + Sync` bound the
    /// backend trait requires.
    guard: Mutex<()>,
}

impl LlamaCppEngine {
    pub fn load(model_path: &Path, params: ModelParams) -> relay_domain::Result<Self> {
        if !model_path.is_file() {
            return Err(Error::EngineInit(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let backend = LlamaBackend::init()
            .map_err(|e| Error::EngineInit(format!("backend init failed: {e}")))?;

        let mut model_params = LlamaModelParams::default();
        if let Some(layers) = params.n_gpu_layers {
            model_params = model_params.with_n_gpu_layers(layers);
        }

        let model = LlamaModel::load_from_file(&backend, model_path, &model_params)
            .map_err(|e| Error::EngineInit(format!("failed to load model: {e}")))?;

        let n_ctx = params.n_ctx.unwrap_or(4096);
        let n_batch = params.n_batch.unwrap_or(512);

        Ok(Self {
            backend,
            model,
            n_ctx,
            n_batch,
            baseline: params,
            guard: Mutex::new(()),
        })
    }

    fn build_context(&self) -> relay_domain::Result<LlamaContext<'_>> {
        let mut ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.n_ctx))
            .with_n_batch(self.n_batch);
        if let Some(ubatch) = self.baseline.n_ubatch {
            ctx_params = ctx_params.with_n_ubatch(ubatch);
        }
        if let Some(threads) = self.baseline.n_threads {
            ctx_params = ctx_params.with_n_threads(threads as i32);
        }
        if self.baseline.flash_attn.unwrap_or(false) {
            ctx_params = ctx_params.with_flash_attention(true);
        }

        self.model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| Error::EngineInit(format!("failed to create context: {e}")))
    }
}

impl EngineBackend for LlamaCppEngine {
    fn run_blocking(
        &self,
        request: GenerateRequest,
        cancel: CancelToken,
        tx: tokio::sync::mpsc::Sender<BridgeItem>,
    ) {
        let _held = self.guard.lock().unwrap();

        let result = self.generate(&request, &cancel, &tx);
        if let Err(e) = result {
            let _ = tx.blocking_send(BridgeItem::Error(e));
            return;
        }
        let _ = tx.blocking_send(BridgeItem::Done);
    }
}

impl LlamaCppEngine {
    fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancelToken,
        tx: &tokio::sync::mpsc::Sender<BridgeItem>,
    ) -> relay_domain::Result<()> {
        let sampling = merge_sampling(&self.baseline, &request.sampling_overrides);
        let system_text = request.resolve_system_prompt();
        let user_text = request.composed_user_text();

        let mut messages = Vec::new();
        if let Some(system) = system_text.filter(|s| !s.is_empty()) {
            messages.push(
                LlamaChatMessage::new("system".to_string(), system)
                    .map_err(|e| Error::StreamDecode(format!("bad system message: {e}")))?,
            );
        }
        messages.push(
            LlamaChatMessage::new("user".to_string(), user_text)
                .map_err(|e| Error::StreamDecode(format!("bad user message: {e}")))?,
        );

        let prompt = self
            .model
            .apply_chat_template(None, &messages, true)
            .map_err(|e| Error::StreamDecode(format!("chat template error: {e}")))?;

        let mut ctx = self.build_context()?;
        let tokens = self
            .model
            .str_to_token(&prompt, AddBos::Always)
            .map_err(|e| Error::StreamDecode(format!("tokenize error: {e}")))?;

        let mut batch = LlamaBatch::new(self.n_batch as usize, 1);
        for (i, token) in tokens.iter().enumerate() {
            let is_last = i == tokens.len() - 1;
            batch
                .add(*token, i as i32, &[0], is_last)
                .map_err(|e| Error::StreamDecode(format!("batch add error: {e}")))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| Error::StreamDecode(format!("decode error: {e}")))?;

        let mut sampler = LlamaSampler::chain_simple([
            LlamaSampler::top_k(sampling.top_k),
            LlamaSampler::top_p(sampling.top_p, 1),
            LlamaSampler::min_p(sampling.min_p, 1),
            LlamaSampler::temp(sampling.temperature),
            LlamaSampler::dist(0),
        ]);

        let mut n_cur = batch.n_tokens();
        let mut emitted_tokens = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if emitted_tokens >= sampling.max_tokens {
                return Ok(());
            }

            let next_token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(next_token);

            if self.model.is_eog_token(next_token) {
                return Ok(());
            }

            let piece = self
                .model
                .token_to_str(next_token, Special::Tokenize)
                .map_err(|e| Error::StreamDecode(format!("detokenize error: {e}")))?;

            if !piece.is_empty() {
                if sampling.stop.iter().any(|s| piece.contains(s.as_str())) {
                    return Ok(());
                }
                if cancel.is_cancelled() {
                    return Ok(());
                }
                if tx.blocking_send(BridgeItem::Delta(piece)).is_err() {
                    return Ok(());
                }
            }

            batch.clear();
            batch
                .add(next_token, n_cur, &[0], true)
                .map_err(|e| Error::StreamDecode(format!("batch add error: {e}")))?;
            n_cur += 1;
            emitted_tokens += 1;

            ctx.decode(&mut batch)
                .map_err(|e| Error::StreamDecode(format!("decode error: {e}")))?;
        }
    }
}
