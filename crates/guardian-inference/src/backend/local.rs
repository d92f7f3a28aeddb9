//! In-process backend for model artifacts on the local filesystem.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncReadExt;

use super::InferenceBackend;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::{ArtifactLocation, BackendKind, InferenceParams, ModelDescriptor};

/// Leading bytes of every GGUF file.
const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// Native runtime behind the local backend.
///
/// Every method runs on a blocking thread and is bounded by the backend
/// timeout. `load` is called once per residency, `generate` only between
/// `load` and `unload`.
pub trait LocalEngine: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// False for engines that describe a call instead of running a model.
    /// Their answers are reported as degraded.
    fn is_generative(&self) -> bool {
        true
    }

    fn load(&self, model_id: &str, path: &Path) -> Result<(), String>;

    fn unload(&self, model_id: &str);

    fn generate(&self, model_id: &str, prompt: &str, params: &InferenceParams) -> Result<String, String>;
}

/// Engine that describes the call it would make instead of generating.
///
/// Lets the load/evict/fallback machinery run end to end on machines without
/// a native runtime. Weights are still read into memory.
#[derive(Default)]
pub struct DryRunEngine {
    weights: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

impl LocalEngine for DryRunEngine {
    fn name(&self) -> &str {
        "dry-run"
    }

    fn is_generative(&self) -> bool {
        false
    }

    fn load(&self, model_id: &str, path: &Path) -> Result<(), String> {
        let bytes = std::fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
        self.weights.write().insert(model_id.to_string(), Arc::new(bytes));
        Ok(())
    }

    fn unload(&self, model_id: &str) {
        self.weights.write().remove(model_id);
    }

    fn generate(&self, model_id: &str, prompt: &str, params: &InferenceParams) -> Result<String, String> {
        let weights_bytes = self
            .weights
            .read()
            .get(model_id)
            .map(|w| w.len())
            .ok_or_else(|| format!("model '{model_id}' has no weights"))?;
        Ok(format!(
            "[local dry-run] model={model_id} weights_bytes={weights_bytes} input_tokens={} max_tokens={} temperature={:.2}",
            prompt.split_whitespace().count(),
            params.max_tokens,
            params.temperature,
        ))
    }
}

/// The engine production builds run with: llama.cpp when compiled with the
/// `llama` feature, the dry-run engine otherwise.
pub fn default_engine(gpu_layers: u32) -> Arc<dyn LocalEngine> {
    #[cfg(feature = "llama")]
    {
        match super::llama::LlamaEngine::new(gpu_layers) {
            Ok(engine) => return Arc::new(engine),
            Err(reason) => {
                tracing::warn!(reason = %reason, "llama.cpp unavailable, using dry-run engine");
            }
        }
    }
    #[cfg(not(feature = "llama"))]
    {
        tracing::warn!(gpu_layers, "built without the llama feature, local answers are simulated");
    }
    Arc::new(DryRunEngine::default())
}

/// Validates artifacts and hands them to a [`LocalEngine`]; `unload` releases
/// them.
pub struct LocalInferenceBackend {
    timeout: Duration,
    engine: Arc<dyn LocalEngine>,
    /// Artifact size per resident model
    resident: RwLock<HashMap<String, u64>>,
}

impl LocalInferenceBackend {
    pub fn new(timeout: Duration) -> Self {
        Self::with_engine(timeout, Arc::new(DryRunEngine::default()))
    }

    pub fn with_engine(timeout: Duration, engine: Arc<dyn LocalEngine>) -> Self {
        Self {
            timeout,
            engine,
            resident: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn is_resident(&self, model_id: &str) -> bool {
        self.resident.read().contains_key(model_id)
    }

    /// Bytes currently held for resident models.
    pub fn resident_bytes(&self) -> u64 {
        self.resident.read().values().sum()
    }

    fn load_error(model_id: &str, reason: impl Into<String>) -> OrchestratorError {
        OrchestratorError::ModelLoad {
            model_id: model_id.to_string(),
            reason: reason.into(),
        }
    }
}

fn is_gguf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gguf"))
}

/// Size of the artifact at `path` after checking it is non-empty and, for
/// GGUF files, carries the format header.
async fn check_artifact(model_id: &str, path: &Path) -> OrchestratorResult<u64> {
    let unreadable = |e: std::io::Error| {
        LocalInferenceBackend::load_error(model_id, format!("{}: {e}", path.display()))
    };

    let mut file = tokio::fs::File::open(path).await.map_err(unreadable)?;
    let size = file.metadata().await.map_err(unreadable)?.len();
    if size == 0 {
        return Err(LocalInferenceBackend::load_error(model_id, "artifact is empty"));
    }
    if is_gguf(path) {
        let mut magic = [0u8; 4];
        if file.read_exact(&mut magic).await.is_err() || &magic != GGUF_MAGIC {
            return Err(LocalInferenceBackend::load_error(model_id, "missing GGUF header"));
        }
    }
    Ok(size)
}

#[async_trait]
impl InferenceBackend for LocalInferenceBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_simulated(&self) -> bool {
        !self.engine.is_generative()
    }

    async fn load(&self, descriptor: &ModelDescriptor) -> OrchestratorResult<()> {
        let id = descriptor.id.as_str();
        if self.is_resident(id) {
            return Ok(());
        }

        let ArtifactLocation::LocalPath { path } = &descriptor.location else {
            return Err(Self::load_error(id, "not a local artifact"));
        };

        tracing::info!(model = %id, path = %path.display(), engine = self.engine.name(), "loading model");
        let size = check_artifact(id, path).await?;

        let engine = self.engine.clone();
        let model_id = id.to_string();
        let artifact = path.clone();
        tokio::task::spawn_blocking(move || engine.load(&model_id, &artifact))
            .await
            .map_err(|e| Self::load_error(id, format!("load task aborted: {e}")))?
            .map_err(|reason| Self::load_error(id, reason))?;

        tracing::info!(model = %id, bytes = size, "model resident");
        self.resident.write().insert(id.to_string(), size);
        Ok(())
    }

    async fn unload(&self, model_id: &str) -> OrchestratorResult<()> {
        if self.resident.write().remove(model_id).is_some() {
            let engine = self.engine.clone();
            let id = model_id.to_string();
            if let Err(e) = tokio::task::spawn_blocking(move || engine.unload(&id)).await {
                tracing::warn!(model = %model_id, error = %e, "unload task aborted");
            }
            tracing::info!(model = %model_id, "model unloaded");
        }
        Ok(())
    }

    async fn infer(
        &self,
        descriptor: &ModelDescriptor,
        prompt: &str,
        params: &InferenceParams,
    ) -> OrchestratorResult<String> {
        if !self.is_resident(&descriptor.id) {
            return Err(OrchestratorError::BackendUnavailable {
                backend: self.name().to_string(),
                reason: format!("model '{}' is not resident", descriptor.id),
            });
        }

        tracing::debug!(
            model = %descriptor.id,
            input_len = prompt.len(),
            "running local inference"
        );

        let engine = self.engine.clone();
        let model_id = descriptor.id.clone();
        let prompt = prompt.to_string();
        let params = *params;

        tokio::task::spawn_blocking(move || engine.generate(&model_id, &prompt, &params))
            .await
            .map_err(|e| OrchestratorError::Inference {
                model_id: descriptor.id.clone(),
                reason: format!("generation task aborted: {e}"),
            })?
            .map_err(|reason| OrchestratorError::Inference {
                model_id: descriptor.id.clone(),
                reason,
            })
    }
}
