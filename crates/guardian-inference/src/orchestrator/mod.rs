//! Model manager.
//!
//! Owns the bounded set of resident models and runs selection, eviction and
//! the fallback chain on top of the registry, the performance tracker and
//! the backends.
//!
//! ```rust,no_run
//! use guardian_inference::{AgeGroup, GuardianConfig, ModelOrchestrator, QueryCategory, RequestContext};
//!
//! # async fn run() -> guardian_inference::OrchestratorResult<()> {
//! let orchestrator = ModelOrchestrator::new(GuardianConfig::default().with_models_dir("/app/models"))?;
//! let ctx = RequestContext::new(AgeGroup::Child, QueryCategory::Security, "Why do I need a password?");
//!
//! let result = orchestrator.execute_with_fallback(&ctx).await;
//! println!("{} (degraded: {})", result.text, result.degraded);
//! # Ok(())
//! # }
//! ```

mod slots;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use error_stack::ResultExt;
use tracing::Instrument;
use uuid::Uuid;

use crate::backend::{BackendSet, InferenceBackend};
use crate::benchmark::BenchmarkEngine;
use crate::config::GuardianConfig;
use crate::error::{IntoOrchestratorReport, OrchestratorError, OrchestratorReport, OrchestratorResult};
use crate::performance::{PerformanceRecord, PerformanceTracker};
use crate::registry::ModelRegistry;
use crate::types::{
    BenchmarkScore, ExecutionResult, ModelDescriptor, ModelStatus, RequestContext, STUB_MODEL_ID,
};

use slots::{InFlightGuard, PendingLoad, Plan, Slots, Victim};

/// A load that did not complete. `latency_ms` covers the backend load only,
/// not time spent waiting for a slot.
struct LoadFailure {
    model_id: String,
    error: OrchestratorError,
    latency_ms: u64,
}

/// A pinned resident model, released on drop.
struct Acquired {
    descriptor: ModelDescriptor,
    backend: Arc<dyn InferenceBackend>,
    _guard: InFlightGuard,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub struct ModelOrchestrator {
    config: GuardianConfig,
    registry: Arc<ModelRegistry>,
    tracker: Arc<PerformanceTracker>,
    backends: BackendSet,
    benchmark: BenchmarkEngine,
    slots: Arc<Slots>,
}

impl ModelOrchestrator {
    /// Build with the production backends.
    pub fn new(config: GuardianConfig) -> OrchestratorResult<Self> {
        config.validate()?;
        let backends = BackendSet::from_config(&config)?;
        Self::with_backends(config, backends)
    }

    /// Build with explicit backends, then discover and register models.
    ///
    /// Only invalid configuration fails; an unusable models directory leaves
    /// the registry empty.
    pub fn with_backends(config: GuardianConfig, backends: BackendSet) -> OrchestratorResult<Self> {
        config.validate()?;

        let registry = ModelRegistry::from_config(&config)?;
        if let Some(dir) = &config.discovery.models_dir {
            registry.discover(dir);
        }
        if let Some(endpoint) = &config.backends.authorized_endpoint {
            for remote in &config.remote_models {
                if let Err(e) = registry.register_remote(endpoint, remote) {
                    tracing::warn!(model = %remote.id, error = %e, "skipping remote model");
                }
            }
        }

        let budget = config.orchestrator.max_model_bytes();
        for oversized in registry.list().iter().filter(|d| d.size_bytes > budget) {
            tracing::warn!(
                model = %oversized.id,
                size_bytes = oversized.size_bytes,
                max_memory_mb = config.orchestrator.max_memory_mb,
                "model exceeds memory budget and will not be selected"
            );
        }

        tracing::info!(
            models = registry.len(),
            capacity = config.orchestrator.capacity,
            max_attempts = config.orchestrator.max_attempts,
            backends = ?backends,
            "orchestrator ready"
        );

        Ok(Self {
            slots: Arc::new(Slots::new(config.orchestrator.capacity)),
            benchmark: BenchmarkEngine::new(config.benchmark.prompts.clone()),
            registry: Arc::new(registry),
            tracker: Arc::new(PerformanceTracker::new()),
            backends,
            config,
        })
    }

    /// Load configuration from `path` and build with the production backends.
    pub fn from_config_file(path: impl AsRef<Path>) -> OrchestratorReport<Self> {
        let path = path.as_ref();
        let config = GuardianConfig::load(path)
            .map_err(|e| OrchestratorError::from(e).into_report())
            .attach(format!("loading {}", path.display()))?;
        Self::new(config)
            .map_err(IntoOrchestratorReport::into_report)
            .attach("building orchestrator")
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    /// Number of occupied slots, including models being loaded or evicted.
    pub fn resident_count(&self) -> usize {
        self.slots.table.lock().occupied()
    }

    /// Registry entries with their residency, in declaration order.
    pub fn list_models(&self) -> Vec<ModelStatus> {
        let descriptors = self.registry.list();
        let table = self.slots.table.lock();
        descriptors
            .into_iter()
            .map(|descriptor| {
                let (residency, in_flight) = table.residency(&descriptor.id);
                ModelStatus {
                    descriptor,
                    residency,
                    in_flight,
                }
            })
            .collect()
    }

    pub fn get_stats(&self) -> BTreeMap<String, PerformanceRecord> {
        self.tracker.snapshot()
    }

    /// Models eligible for `ctx`, fixed for the whole request.
    ///
    /// Models over the memory budget are dropped first. The rest is narrowed
    /// to exact matches, else to the age group, else kept whole. Fallback
    /// only ever removes models from this pool.
    fn candidate_pool(&self, ctx: &RequestContext) -> Vec<ModelDescriptor> {
        let budget = self.config.orchestrator.max_model_bytes();
        let pool: Vec<ModelDescriptor> = self
            .registry
            .list()
            .into_iter()
            .filter(|d| d.size_bytes <= budget)
            .collect();

        let exact: Vec<_> = pool
            .iter()
            .filter(|d| d.supports(ctx.age_group, ctx.query_category))
            .cloned()
            .collect();
        if !exact.is_empty() {
            return exact;
        }
        let by_age: Vec<_> = pool
            .iter()
            .filter(|d| d.supports_age(ctx.age_group))
            .cloned()
            .collect();
        if by_age.is_empty() { pool } else { by_age }
    }

    /// Members of `pool` not in `excluded`, best first.
    fn rank_candidates(&self, pool: &[ModelDescriptor], excluded: &HashSet<String>) -> Vec<ModelDescriptor> {
        let remaining = pool
            .iter()
            .filter(|d| !excluded.contains(&d.id))
            .cloned()
            .collect();
        self.order(remaining)
    }

    /// Live history first, then benchmark score, then declaration order.
    fn order(&self, candidates: Vec<ModelDescriptor>) -> Vec<ModelDescriptor> {
        let (known, mut unknown): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|d| self.tracker.has_history(&d.id));

        unknown.sort_by(|a, b| match (&a.benchmark, &b.benchmark) {
            (Some(x), Some(y)) => x.ranking_cmp(y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        if known.is_empty() {
            return unknown;
        }

        let ids: Vec<String> = known.iter().map(|d| d.id.clone()).collect();
        let mut ranked: Vec<ModelDescriptor> = self
            .tracker
            .rank(&ids)
            .into_iter()
            .filter_map(|id| known.iter().find(|d| d.id == id).cloned())
            .collect();
        ranked.extend(unknown);
        ranked
    }

    /// Pin a model for `ranked`, loading and evicting as needed.
    async fn acquire(&self, ranked: &[ModelDescriptor]) -> Result<Acquired, LoadFailure> {
        loop {
            let notified = self.slots.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let plan = self
                .slots
                .table
                .lock()
                .plan(ranked, |d| self.backends.for_descriptor(d));

            match plan {
                Plan::Use {
                    descriptor,
                    backend,
                } => {
                    return Ok(Acquired {
                        _guard: InFlightGuard::new(self.slots.clone(), descriptor.id.clone()),
                        descriptor,
                        backend,
                    });
                }
                Plan::Load {
                    descriptor,
                    backend,
                    victim,
                } => return self.load(descriptor, backend, victim).await,
                Plan::Wait => {
                    tracing::debug!("no slot available, waiting for a transition");
                    notified.await;
                }
            }
        }
    }

    async fn load(
        &self,
        descriptor: ModelDescriptor,
        backend: Arc<dyn InferenceBackend>,
        victim: Option<Victim>,
    ) -> Result<Acquired, LoadFailure> {
        let id = descriptor.id.clone();
        let mut pending = PendingLoad::new(
            self.slots.clone(),
            id.clone(),
            victim.as_ref().map(|v| v.model_id.clone()),
        );

        if let Some(victim) = victim {
            tracing::info!(model = %victim.model_id, replacement = %id, "evicting model");
            if let Err(e) = victim.backend.unload(&victim.model_id).await {
                tracing::warn!(model = %victim.model_id, error = %e, "unload reported an error");
            }
            let slot_backend = backend.clone();
            self.slots
                .update(|t| t.swap_in(&victim.model_id, &descriptor, slot_backend));
            pending.victim_swapped();
        }

        tracing::info!(model = %id, backend = backend.name(), "loading model");
        let started = Instant::now();
        match backend.load(&descriptor).await {
            Ok(()) => {
                self.slots.update(|t| t.mark_loaded(&id));
                pending.disarm();
                tracing::info!(model = %id, "model loaded");
                Ok(Acquired {
                    _guard: InFlightGuard::new(self.slots.clone(), id),
                    descriptor,
                    backend,
                })
            }
            Err(e) => {
                tracing::warn!(model = %id, error = %e, "model load failed");
                // dropping `pending` frees the reserved slot
                drop(pending);
                Err(LoadFailure {
                    model_id: id,
                    error: e,
                    latency_ms: elapsed_ms(started),
                })
            }
        }
    }

    /// Acquire the best remaining member of `pool`, recording load failures
    /// against the attempt budget.
    async fn next_candidate(
        &self,
        pool: &[ModelDescriptor],
        excluded: &mut HashSet<String>,
        attempts: &mut u32,
    ) -> Option<Acquired> {
        while *attempts < self.config.orchestrator.max_attempts {
            let ranked = self.rank_candidates(pool, excluded);
            if ranked.is_empty() {
                return None;
            }

            *attempts += 1;
            match self.acquire(&ranked).await {
                Ok(acquired) => return Some(acquired),
                Err(failure) => {
                    self.tracker.record(&failure.model_id, failure.latency_ms, false);
                    tracing::warn!(
                        model = %failure.model_id,
                        attempt = *attempts,
                        error = %failure.error,
                        "attempt failed"
                    );
                    excluded.insert(failure.model_id);
                }
            }
        }
        None
    }

    /// Pick, and make resident, the model that would serve `ctx`.
    pub async fn select_model(&self, ctx: &RequestContext) -> Option<ModelDescriptor> {
        let pool = self.candidate_pool(ctx);
        let mut excluded = HashSet::new();
        let mut attempts = 0;
        self.next_candidate(&pool, &mut excluded, &mut attempts)
            .await
            .map(|acquired| acquired.descriptor)
    }

    /// Answer `ctx`, falling back through candidates and finally the stub.
    ///
    /// Never fails: when no real backend succeeds within
    /// `max_attempts`, the deterministic stub answers and the result is
    /// marked `degraded`. Answers from a simulated backend are degraded too.
    pub async fn execute_with_fallback(&self, ctx: &RequestContext) -> ExecutionResult {
        let span = tracing::info_span!(
            "execute",
            request_id = %Uuid::new_v4(),
            age = %ctx.age_group,
            category = %ctx.query_category,
        );
        self.execute_inner(ctx).instrument(span).await
    }

    async fn execute_inner(&self, ctx: &RequestContext) -> ExecutionResult {
        let pool = self.candidate_pool(ctx);
        let mut excluded = HashSet::new();
        let mut attempts = 0;

        while let Some(acquired) = self.next_candidate(&pool, &mut excluded, &mut attempts).await {
            let model_id = acquired.descriptor.id.clone();
            let timeout = acquired.backend.timeout();
            let started = Instant::now();

            let outcome = match tokio::time::timeout(
                timeout,
                acquired
                    .backend
                    .infer(&acquired.descriptor, &ctx.prompt, &acquired.descriptor.params),
            )
            .await
            {
                Err(_) => Err(OrchestratorError::InferenceTimeout {
                    model_id: model_id.clone(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
                Ok(Ok(text)) if text.trim().is_empty() => Err(OrchestratorError::Inference {
                    model_id: model_id.clone(),
                    reason: "empty output".to_string(),
                }),
                Ok(other) => other,
            };
            let latency_ms = elapsed_ms(started);
            let simulated = acquired.backend.is_simulated();
            drop(acquired);

            match outcome {
                Ok(text) => {
                    self.tracker.record(&model_id, latency_ms, true);
                    self.registry.touch(&model_id, Utc::now());
                    tracing::info!(model = %model_id, latency_ms, attempts, simulated, "request served");
                    return ExecutionResult {
                        text,
                        degraded: simulated,
                        model_id,
                        latency_ms,
                        attempts,
                    };
                }
                Err(error) => {
                    self.tracker.record(&model_id, latency_ms, false);
                    tracing::warn!(model = %model_id, attempt = attempts, error = %error, "attempt failed");
                    excluded.insert(model_id);
                }
            }
        }

        self.degraded(ctx, attempts).await
    }

    async fn degraded(&self, ctx: &RequestContext, attempts: u32) -> ExecutionResult {
        let stub = &self.backends.stub;
        let descriptor = stub.descriptor_for(ctx);
        let started = Instant::now();
        let text = stub
            .infer(&descriptor, &ctx.prompt, &descriptor.params)
            .await
            .unwrap_or_else(|_| stub.respond(ctx));

        tracing::warn!(attempts, "no model answered, serving degraded response");
        ExecutionResult {
            text,
            degraded: true,
            model_id: STUB_MODEL_ID.to_string(),
            latency_ms: elapsed_ms(started),
            attempts,
        }
    }

    /// Benchmark every registered model and store the scores on the registry.
    ///
    /// Models are made resident through the normal slot machinery. Live
    /// statistics are not touched. Returns scores best first; models that
    /// could not be loaded are skipped.
    pub async fn refresh_benchmarks(&self) -> Vec<(String, BenchmarkScore)> {
        let mut scores = Vec::new();
        let budget = self.config.orchestrator.max_model_bytes();
        for descriptor in self.registry.list() {
            if descriptor.size_bytes > budget {
                tracing::debug!(model = %descriptor.id, "over memory budget, not benchmarked");
                continue;
            }
            let acquired = match self.acquire(std::slice::from_ref(&descriptor)).await {
                Ok(acquired) => acquired,
                Err(failure) => {
                    tracing::warn!(model = %failure.model_id, error = %failure.error, "skipping benchmark");
                    continue;
                }
            };
            let score = self
                .benchmark
                .benchmark(&acquired.descriptor, acquired.backend.as_ref())
                .await;
            drop(acquired);

            if let Err(e) = self.registry.set_benchmark(&descriptor.id, score) {
                tracing::warn!(model = %descriptor.id, error = %e, "could not store benchmark");
                continue;
            }
            scores.push((descriptor.id, score));
        }
        BenchmarkEngine::rank(&mut scores);
        scores
    }

    /// Run benchmarks now if the configuration asks for it at startup.
    pub async fn warm_up(&self) {
        if self.config.benchmark.run_on_startup {
            self.refresh_benchmarks().await;
        }
    }

    /// Re-scan discovery directories, returning newly found models.
    pub fn rescan(&self) -> Vec<ModelDescriptor> {
        self.registry.rescan()
    }

    /// Unload every resident model with no call in flight.
    pub async fn evict_idle(&self) -> usize {
        let victims = self.slots.update(|t| t.begin_evict_idle());
        for victim in &victims {
            tracing::info!(model = %victim.model_id, "evicting idle model");
            if let Err(e) = victim.backend.unload(&victim.model_id).await {
                tracing::warn!(model = %victim.model_id, error = %e, "unload reported an error");
            }
            self.slots.update(|t| t.finish_evict(&victim.model_id));
        }
        victims.len()
    }

    /// Release resident models. Calls still in flight keep their model.
    pub async fn shutdown(&self) {
        let evicted = self.evict_idle().await;
        let remaining = self.resident_count();
        if remaining > 0 {
            tracing::warn!(evicted, remaining, "shutdown left busy models resident");
        } else {
            tracing::info!(evicted, "orchestrator shut down");
        }
    }
}
