//! Common test utilities shared across `guardian-inference` integration tests.
//!
//! This module is **not** a standalone test binary. It is declared with
//! `mod common;` inside each integration test file that needs it.

#![allow(dead_code)]

pub mod scripted_backend;

use std::sync::Arc;
use std::time::Duration;

use guardian_inference::{BackendSet, GuardianConfig, ModelDescriptor, ModelOrchestrator};

use scripted_backend::ScriptedBackend;

/// Orchestrator whose local backend is `backend`, with `models` registered in
/// order.
pub fn orchestrator_with(
    config: GuardianConfig,
    backend: Arc<ScriptedBackend>,
    models: Vec<ModelDescriptor>,
) -> ModelOrchestrator {
    let backends = BackendSet::from_config(&config)
        .expect("default backends")
        .with_local(backend);
    let orchestrator =
        ModelOrchestrator::with_backends(config, backends).expect("valid configuration");
    for model in models {
        orchestrator
            .registry()
            .register(model)
            .expect("unique model id");
    }
    orchestrator
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
