//! llama.cpp engine for GGUF artifacts.
//!
//! Models stay loaded between calls; each `generate` builds a fresh context
//! sized from the request's `context_window`.

use std::collections::HashMap;
use std::num::NonZero;
use std::path::Path;
use std::sync::Arc;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use parking_lot::RwLock;

use super::local::LocalEngine;
use crate::types::InferenceParams;

struct LoadedModel(LlamaModel);

// SAFETY: the model is read-only after load; contexts are created per call
// on the blocking thread that runs the generation.
unsafe impl Send for LoadedModel {}
unsafe impl Sync for LoadedModel {}

pub struct LlamaEngine {
    backend: LlamaBackend,
    gpu_layers: u32,
    models: RwLock<HashMap<String, Arc<LoadedModel>>>,
}

impl LlamaEngine {
    /// Initialize llama.cpp. Fails if the runtime was already initialized in
    /// this process.
    pub fn new(gpu_layers: u32) -> Result<Self, String> {
        let backend = LlamaBackend::init().map_err(|e| format!("llama.cpp init failed: {e:?}"))?;
        Ok(Self {
            backend,
            gpu_layers,
            models: RwLock::new(HashMap::new()),
        })
    }

    fn model(&self, model_id: &str) -> Result<Arc<LoadedModel>, String> {
        self.models
            .read()
            .get(model_id)
            .cloned()
            .ok_or_else(|| format!("model '{model_id}' is not loaded"))
    }
}

impl LocalEngine for LlamaEngine {
    fn name(&self) -> &str {
        "llama.cpp"
    }

    fn load(&self, model_id: &str, path: &Path) -> Result<(), String> {
        let path_str = path
            .to_str()
            .ok_or_else(|| format!("{} is not valid UTF-8", path.display()))?;
        let params = LlamaModelParams::default().with_n_gpu_layers(self.gpu_layers);
        let model = LlamaModel::load_from_file(&self.backend, path_str, &params)
            .map_err(|e| format!("llama.cpp rejected {path_str}: {e:?}"))?;

        tracing::debug!(model = %model_id, gpu_layers = self.gpu_layers, "llama.cpp model loaded");
        self.models
            .write()
            .insert(model_id.to_string(), Arc::new(LoadedModel(model)));
        Ok(())
    }

    fn unload(&self, model_id: &str) {
        self.models.write().remove(model_id);
    }

    fn generate(&self, model_id: &str, prompt: &str, params: &InferenceParams) -> Result<String, String> {
        let loaded = self.model(model_id)?;
        let model = &loaded.0;

        let ctx_params = LlamaContextParams::default().with_n_ctx(NonZero::new(params.context_window));
        let mut ctx = model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| format!("context creation failed: {e:?}"))?;

        let tokens = model
            .str_to_token(prompt, AddBos::Always)
            .map_err(|e| format!("tokenization failed: {e:?}"))?;
        if tokens.len() >= params.context_window as usize {
            return Err(format!(
                "prompt of {} tokens does not fit a {} token context",
                tokens.len(),
                params.context_window
            ));
        }

        let mut batch = LlamaBatch::new(params.context_window as usize, 1);
        let last = tokens.len().saturating_sub(1);
        for (i, token) in tokens.iter().enumerate() {
            batch
                .add(*token, i as i32, &[0], i == last)
                .map_err(|e| format!("batch overflow: {e:?}"))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| format!("prompt decode failed: {e:?}"))?;

        let mut sampler = if params.temperature <= 0.0 {
            LlamaSampler::chain_simple([LlamaSampler::greedy()])
        } else {
            LlamaSampler::chain_simple([
                LlamaSampler::temp(params.temperature),
                LlamaSampler::dist(rand_seed()),
            ])
        };

        let budget = (params.context_window as usize - tokens.len()).min(params.max_tokens as usize);
        let mut out = String::new();
        let mut pos = tokens.len();
        for _ in 0..budget {
            let token = sampler.sample(&ctx, -1);
            if model.is_eog_token(token) {
                break;
            }
            let piece = model
                .token_to_str(token, Special::Tokenize)
                .map_err(|e| format!("detokenization failed: {e:?}"))?;
            out.push_str(&piece);

            batch.clear();
            batch
                .add(token, pos as i32, &[0], true)
                .map_err(|e| format!("batch overflow: {e:?}"))?;
            pos += 1;
            ctx.decode(&mut batch)
                .map_err(|e| format!("decode failed: {e:?}"))?;
        }
        Ok(out)
    }
}

fn rand_seed() -> u32 {
    uuid::Uuid::new_v4().as_u128() as u32
}
