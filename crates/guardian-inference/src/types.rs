//! Shared types for the Guardian orchestration core.
//!
//! These types describe what the orchestrator knows about a model
//! (`ModelDescriptor`), what a caller asks for (`RequestContext`) and what
//! comes back (`ExecutionResult`). None of them carry backend state; resident
//! handles are private to the orchestrator.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Model id reported on results produced by the deterministic stub.
pub const STUB_MODEL_ID: &str = "deterministic-stub";

/// Audience the answer is written for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AgeGroup {
    Child,
    Teen,
    Adult,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 3] = [AgeGroup::Child, AgeGroup::Teen, AgeGroup::Adult];
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Child => write!(f, "child"),
            Self::Teen => write!(f, "teen"),
            Self::Adult => write!(f, "adult"),
        }
    }
}

impl FromStr for AgeGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "child" | "kid" | "kids" => Ok(Self::Child),
            "teen" | "teenager" => Ok(Self::Teen),
            "adult" => Ok(Self::Adult),
            other => Err(format!("unknown age group '{other}'")),
        }
    }
}

/// Coarse topic of a request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum QueryCategory {
    General,
    Security,
    Education,
    Threat,
}

impl QueryCategory {
    pub const ALL: [QueryCategory; 4] = [
        QueryCategory::General,
        QueryCategory::Security,
        QueryCategory::Education,
        QueryCategory::Threat,
    ];
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Security => write!(f, "security"),
            Self::Education => write!(f, "education"),
            Self::Threat => write!(f, "threat"),
        }
    }
}

impl FromStr for QueryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "security" => Ok(Self::Security),
            "education" => Ok(Self::Education),
            "threat" => Ok(Self::Threat),
            other => Err(format!("unknown query category '{other}'")),
        }
    }
}

/// A classified request, produced upstream of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub age_group: AgeGroup,
    pub query_category: QueryCategory,
    pub prompt: String,
}

impl RequestContext {
    pub fn new(age_group: AgeGroup, query_category: QueryCategory, prompt: impl Into<String>) -> Self {
        Self {
            age_group,
            query_category,
            prompt: prompt.into(),
        }
    }
}

/// Generation parameters attached to a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceParams {
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Maximum number of generated tokens
    pub max_tokens: u32,
    /// Context window in tokens
    pub context_window: u32,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 512,
            context_window: 4096,
        }
    }
}

impl InferenceParams {
    /// Set temperature (0.0 - 2.0)
    pub fn with_temperature(mut self, temperature: f32) -> Result<Self, &'static str> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err("temperature must be between 0.0 and 2.0");
        }
        self.temperature = temperature;
        Ok(self)
    }

    /// Set max generated tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Result<Self, &'static str> {
        if max_tokens == 0 {
            return Err("max_tokens must be greater than 0");
        }
        self.max_tokens = max_tokens;
        Ok(self)
    }

    /// Set the context window
    pub fn with_context_window(mut self, context_window: u32) -> Result<Self, &'static str> {
        if context_window == 0 {
            return Err("context_window must be greater than 0");
        }
        self.context_window = context_window;
        Ok(self)
    }
}

/// Where a model's weights live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactLocation {
    /// Weights file on the local filesystem.
    LocalPath { path: PathBuf },
    /// A model served by a local-network inference service.
    Endpoint { base_url: String, model: String },
    /// Compiled into the process; nothing to load.
    Builtin,
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalPath { path } => write!(f, "{}", path.display()),
            Self::Endpoint { base_url, model } => write!(f, "{base_url}#{model}"),
            Self::Builtin => write!(f, "builtin"),
        }
    }
}

/// Which backend variant serves a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
    Stub,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
            Self::Stub => write!(f, "stub"),
        }
    }
}

/// Cold-start score produced by the benchmark engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkScore {
    /// Mean wall-clock latency per evaluation prompt
    pub latency_ms: u64,
    /// Heuristic quality in `[0, 1]`
    pub quality_score: f64,
}

impl BenchmarkScore {
    /// Best first: higher quality wins, lower latency breaks ties.
    pub fn ranking_cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .quality_score
            .total_cmp(&self.quality_score)
            .then_with(|| self.latency_ms.cmp(&other.latency_ms))
    }
}

/// Catalog entry for one model. Metadata only; never holds weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Stable identifier derived from the artifact name
    pub id: String,
    pub location: ArtifactLocation,
    /// Artifact size in bytes (0 for remote models)
    pub size_bytes: u64,
    pub age_groups: BTreeSet<AgeGroup>,
    pub categories: BTreeSet<QueryCategory>,
    pub params: InferenceParams,
    pub benchmark: Option<BenchmarkScore>,
    pub last_used: Option<DateTime<Utc>>,
}

impl ModelDescriptor {
    /// Descriptor for a local artifact, tagged for every audience and topic.
    pub fn local(id: impl Into<String>, path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            id: id.into(),
            location: ArtifactLocation::LocalPath { path: path.into() },
            size_bytes,
            age_groups: AgeGroup::ALL.into_iter().collect(),
            categories: QueryCategory::ALL.into_iter().collect(),
            params: InferenceParams::default(),
            benchmark: None,
            last_used: None,
        }
    }

    /// Descriptor for a model served by a network endpoint.
    pub fn remote(
        id: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            location: ArtifactLocation::Endpoint {
                base_url: base_url.into(),
                model: model.into(),
            },
            size_bytes: 0,
            age_groups: AgeGroup::ALL.into_iter().collect(),
            categories: QueryCategory::ALL.into_iter().collect(),
            params: InferenceParams::default(),
            benchmark: None,
            last_used: None,
        }
    }

    pub fn with_age_groups(mut self, groups: impl IntoIterator<Item = AgeGroup>) -> Self {
        self.age_groups = groups.into_iter().collect();
        self
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = QueryCategory>) -> Self {
        self.categories = categories.into_iter().collect();
        self
    }

    pub fn with_params(mut self, params: InferenceParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_benchmark(mut self, score: BenchmarkScore) -> Self {
        self.benchmark = Some(score);
        self
    }

    pub fn supports(&self, age: AgeGroup, category: QueryCategory) -> bool {
        self.supports_age(age) && self.categories.contains(&category)
    }

    pub fn supports_age(&self, age: AgeGroup) -> bool {
        self.age_groups.contains(&age)
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self.location {
            ArtifactLocation::LocalPath { .. } => BackendKind::Local,
            ArtifactLocation::Endpoint { .. } => BackendKind::Remote,
            ArtifactLocation::Builtin => BackendKind::Stub,
        }
    }
}

/// Slot lifecycle of a model inside the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidencyState {
    Unloaded,
    Loading,
    Loaded,
    Evicting,
}

impl fmt::Display for ResidencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Loading => write!(f, "loading"),
            Self::Loaded => write!(f, "loaded"),
            Self::Evicting => write!(f, "evicting"),
        }
    }
}

/// One row of `list_models`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub descriptor: ModelDescriptor,
    pub residency: ResidencyState,
    pub in_flight: u32,
}

/// Outcome of `execute_with_fallback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Generated text, never empty
    pub text: String,
    /// True when only the deterministic stub could answer
    pub degraded: bool,
    /// Model that produced `text`
    pub model_id: String,
    /// Latency of the successful call
    pub latency_ms: u64,
    /// Real-backend attempts made before this result
    pub attempts: u32,
}
