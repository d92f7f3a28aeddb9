//! Scripted backend for orchestrator integration tests.
//!
//! [`ScriptedBackend`] implements [`InferenceBackend`] with per-model
//! behaviour fixed at construction time, and records every load, unload and
//! inference so tests can assert on residency.
//!
//! | Goal | Mechanism |
//! |------|-----------|
//! | Deterministic | Per-model FIFO of steps, then a default step |
//! | Observable | `load_count()`, `unload_count()`, `max_loaded()`, … |
//! | Holdable | `gate()` parks a call on a semaphore until the test releases it |
//! | Thread-safe | State behind `Arc<Mutex<…>>`; never locked across `.await` |
//!
//! # Example
//!
//! ```rust,ignore
//! let backend = ScriptedBackend::builder()
//!     .fail_once("a")
//!     .always_fail("c")
//!     .build();
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use guardian_inference::{
    BackendKind, InferenceBackend, InferenceParams, ModelDescriptor, OrchestratorError,
    OrchestratorResult,
};

// ─────────────────────────────────────────────────────────────────────────────
// Steps
// ─────────────────────────────────────────────────────────────────────────────

/// What one `infer` call does.
#[derive(Clone)]
pub enum Step {
    /// Return this text.
    Reply(String),
    /// Fail with `InferenceError`.
    Fail,
    /// Sleep, then return the model's default answer.
    Sleep(Duration),
    /// Wait for a permit, then return the model's default answer.
    Gate(Arc<Semaphore>),
}

#[derive(Default)]
struct ModelScript {
    queue: VecDeque<Step>,
    default: Option<Step>,
}

#[derive(Default)]
struct State {
    scripts: HashMap<String, ModelScript>,
    failing_loads: HashSet<String>,
    loads: HashMap<String, u32>,
    unloads: HashMap<String, u32>,
    infers: HashMap<String, u32>,
    loaded: HashSet<String>,
    max_loaded: usize,
}

/// The canned answer for `model_id` when no reply is scripted.
pub fn default_answer(model_id: &str) -> String {
    format!("answer from {model_id}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

pub struct ScriptedBackendBuilder {
    timeout: Duration,
    state: State,
}

impl ScriptedBackendBuilder {
    fn script(&mut self, model_id: &str) -> &mut ModelScript {
        self.state.scripts.entry(model_id.to_string()).or_default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Queue one step for `model_id`.
    pub fn then(mut self, model_id: &str, step: Step) -> Self {
        self.script(model_id).queue.push_back(step);
        self
    }

    /// Step used once the queue for `model_id` is drained.
    pub fn by_default(mut self, model_id: &str, step: Step) -> Self {
        self.script(model_id).default = Some(step);
        self
    }

    pub fn reply(self, model_id: &str, text: &str) -> Self {
        self.by_default(model_id, Step::Reply(text.to_string()))
    }

    pub fn fail_once(self, model_id: &str) -> Self {
        self.then(model_id, Step::Fail)
    }

    pub fn always_fail(self, model_id: &str) -> Self {
        self.by_default(model_id, Step::Fail)
    }

    pub fn always_sleep(self, model_id: &str, duration: Duration) -> Self {
        self.by_default(model_id, Step::Sleep(duration))
    }

    pub fn gate(self, model_id: &str, gate: Arc<Semaphore>) -> Self {
        self.then(model_id, Step::Gate(gate))
    }

    pub fn fail_load(mut self, model_id: &str) -> Self {
        self.state.failing_loads.insert(model_id.to_string());
        self
    }

    pub fn build(self) -> Arc<ScriptedBackend> {
        Arc::new(ScriptedBackend {
            timeout: self.timeout,
            state: Arc::new(Mutex::new(self.state)),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

pub struct ScriptedBackend {
    timeout: Duration,
    state: Arc<Mutex<State>>,
}

impl ScriptedBackend {
    pub fn builder() -> ScriptedBackendBuilder {
        ScriptedBackendBuilder {
            timeout: Duration::from_secs(5),
            state: State::default(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("scripted backend state poisoned")
    }

    pub fn load_count(&self, model_id: &str) -> u32 {
        self.state().loads.get(model_id).copied().unwrap_or(0)
    }

    pub fn unload_count(&self, model_id: &str) -> u32 {
        self.state().unloads.get(model_id).copied().unwrap_or(0)
    }

    pub fn infer_count(&self, model_id: &str) -> u32 {
        self.state().infers.get(model_id).copied().unwrap_or(0)
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.state().loaded.contains(model_id)
    }

    pub fn loaded_count(&self) -> usize {
        self.state().loaded.len()
    }

    /// Highest number of simultaneously loaded models seen so far.
    pub fn max_loaded(&self) -> usize {
        self.state().max_loaded
    }

    fn next_step(&self, model_id: &str) -> Step {
        let mut state = self.state();
        *state.infers.entry(model_id.to_string()).or_default() += 1;
        let script = state.scripts.entry(model_id.to_string()).or_default();
        script
            .queue
            .pop_front()
            .or_else(|| script.default.clone())
            .unwrap_or_else(|| Step::Reply(default_answer(model_id)))
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn load(&self, descriptor: &ModelDescriptor) -> OrchestratorResult<()> {
        let mut state = self.state();
        *state.loads.entry(descriptor.id.clone()).or_default() += 1;
        if state.failing_loads.contains(&descriptor.id) {
            return Err(OrchestratorError::ModelLoad {
                model_id: descriptor.id.clone(),
                reason: "scripted load failure".into(),
            });
        }
        state.loaded.insert(descriptor.id.clone());
        state.max_loaded = state.max_loaded.max(state.loaded.len());
        Ok(())
    }

    async fn unload(&self, model_id: &str) -> OrchestratorResult<()> {
        let mut state = self.state();
        *state.unloads.entry(model_id.to_string()).or_default() += 1;
        state.loaded.remove(model_id);
        Ok(())
    }

    async fn infer(
        &self,
        descriptor: &ModelDescriptor,
        _prompt: &str,
        _params: &InferenceParams,
    ) -> OrchestratorResult<String> {
        let id = descriptor.id.as_str();
        match self.next_step(id) {
            Step::Reply(text) => Ok(text),
            Step::Fail => Err(OrchestratorError::Inference {
                model_id: id.to_string(),
                reason: "scripted failure".into(),
            }),
            Step::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(default_answer(id))
            }
            Step::Gate(gate) => {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
                Ok(default_answer(id))
            }
        }
    }
}
