//! Guardian inference orchestration.
//!
//! Discovers local model artifacts, keeps a bounded number of them resident,
//! ranks them by live performance (or benchmark score before any history
//! exists), and answers requests through a fallback chain that ends in a
//! deterministic stub, so a caller always gets text back.
//!
//! - **Backends** (`backend`): local, remote and stub execution behind one trait
//! - **Registry** (`registry`): artifact discovery and the model catalog
//! - **Benchmark** (`benchmark`): cold-start quality and latency scores
//! - **Performance** (`performance`): live success rate and latency per model
//! - **Orchestrator** (`orchestrator`): slots, eviction, selection, fallback

pub mod backend;
pub mod benchmark;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod performance;
pub mod registry;
pub mod types;

// Re-export primary public API
pub use backend::{
    BackendSet, DeterministicStubBackend, InferenceBackend, LocalInferenceBackend,
    RemoteServiceBackend,
};
pub use benchmark::{BenchmarkEngine, BenchmarkPrompt};
pub use config::{ConfigError, GuardianConfig};
pub use error::{OrchestratorError, OrchestratorReport, OrchestratorResult};
pub use orchestrator::ModelOrchestrator;
pub use performance::{PerformanceRecord, PerformanceStats, PerformanceTracker};
pub use registry::ModelRegistry;
pub use types::{
    AgeGroup, ArtifactLocation, BackendKind, BenchmarkScore, ExecutionResult, InferenceParams,
    ModelDescriptor, ModelStatus, QueryCategory, RequestContext, ResidencyState, STUB_MODEL_ID,
};
