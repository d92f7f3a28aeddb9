//! Backend adapters.
//!
//! A closed set of execution strategies behind [`InferenceBackend`]:
//!
//! - [`LocalInferenceBackend`]: weights loaded into process memory through a
//!   [`LocalEngine`] (llama.cpp with the `llama` feature)
//! - [`RemoteServiceBackend`]: a single pre-authorized local-network service
//! - [`DeterministicStubBackend`]: canned answers, used only as last resort
//!
//! The orchestrator resolves a backend from a descriptor's
//! [`BackendKind`](crate::types::BackendKind) through a [`BackendSet`].

pub mod local;
#[cfg(feature = "llama")]
pub mod llama;
pub mod remote;
pub mod stub;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::GuardianConfig;
use crate::error::OrchestratorResult;
use crate::types::{BackendKind, InferenceParams, ModelDescriptor};

pub use local::{DryRunEngine, LocalEngine, LocalInferenceBackend, default_engine};
pub use remote::RemoteServiceBackend;
pub use stub::DeterministicStubBackend;

/// Uniform interface over inference execution strategies.
///
/// `load` and `unload` bracket the residency of one model; `infer` is only
/// called between them. Implementations report failures as
/// `ModelLoad`, `BackendUnavailable`, `InferenceTimeout` or `Inference`.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Upper bound for a single `infer` call.
    fn timeout(&self) -> Duration;

    /// True when answers are not produced by a real model.
    fn is_simulated(&self) -> bool {
        false
    }

    async fn load(&self, descriptor: &ModelDescriptor) -> OrchestratorResult<()>;

    async fn unload(&self, model_id: &str) -> OrchestratorResult<()>;

    async fn infer(
        &self,
        descriptor: &ModelDescriptor,
        prompt: &str,
        params: &InferenceParams,
    ) -> OrchestratorResult<String>;
}

/// The three backend variants available to an orchestrator.
#[derive(Clone)]
pub struct BackendSet {
    pub local: Arc<dyn InferenceBackend>,
    pub remote: Arc<dyn InferenceBackend>,
    pub stub: Arc<DeterministicStubBackend>,
}

impl BackendSet {
    /// Build the production backends from configuration.
    pub fn from_config(config: &GuardianConfig) -> OrchestratorResult<Self> {
        let local = LocalInferenceBackend::with_engine(
            Duration::from_millis(config.backends.local_timeout_ms),
            default_engine(config.backends.local_gpu_layers),
        );
        let remote = RemoteServiceBackend::new(
            config.backends.authorized_endpoint.clone(),
            Duration::from_millis(config.backends.remote_timeout_ms),
        )?;
        Ok(Self {
            local: Arc::new(local),
            remote: Arc::new(remote),
            stub: Arc::new(DeterministicStubBackend::new()),
        })
    }

    pub fn with_local(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.local = backend;
        self
    }

    pub fn with_remote(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.remote = backend;
        self
    }

    pub fn for_kind(&self, kind: BackendKind) -> Arc<dyn InferenceBackend> {
        match kind {
            BackendKind::Local => self.local.clone(),
            BackendKind::Remote => self.remote.clone(),
            BackendKind::Stub => self.stub.clone(),
        }
    }

    pub fn for_descriptor(&self, descriptor: &ModelDescriptor) -> Arc<dyn InferenceBackend> {
        self.for_kind(descriptor.backend_kind())
    }
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSet")
            .field("local", &self.local.name())
            .field("remote", &self.remote.name())
            .field("stub", &self.stub.name())
            .finish()
    }
}
