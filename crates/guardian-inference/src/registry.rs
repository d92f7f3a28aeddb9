//! Model catalog.
//!
//! Discovery scans a directory (non-recursively) for model artifacts and
//! turns each into a [`ModelDescriptor`]. Nothing is loaded here. Entries
//! keep insertion order, which is the final tie-break for selection.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;

use crate::config::{CapabilityRule, GuardianConfig, RemoteModelConfig};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::{
    AgeGroup, ArtifactLocation, BenchmarkScore, InferenceParams, ModelDescriptor, QueryCategory,
};

/// A capability rule with its pattern compiled.
#[derive(Debug, Clone)]
struct CompiledRule {
    pattern: Regex,
    age_groups: Vec<AgeGroup>,
    categories: Vec<QueryCategory>,
    params: Option<InferenceParams>,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: Vec<ModelDescriptor>,
    /// Canonical paths of every discovered artifact
    seen_paths: HashSet<PathBuf>,
    /// Directories passed to `discover`, for `rescan`
    scanned_dirs: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct ModelRegistry {
    rules: Vec<CompiledRule>,
    defaults: InferenceParams,
    extensions: Vec<String>,
    state: RwLock<RegistryState>,
}

/// Stable id from a file stem: lowercase, runs of anything that is not
/// alphanumeric collapsed to a single `-`.
///
/// Stems with no alphanumeric character at all become `model-<hex of the
/// stem>`, so distinct artifacts never share an empty id.
pub fn model_id_from_path(path: &Path) -> String {
    let raw = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = raw.to_lowercase();

    let mut id = String::with_capacity(stem.len());
    let mut pending_dash = false;
    for c in stem.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !id.is_empty() {
                id.push('-');
            }
            pending_dash = false;
            id.push(c);
        } else {
            pending_dash = true;
        }
    }
    if id.is_empty() {
        return format!("model-{}", hex::encode(raw.as_bytes()));
    }
    id
}

impl ModelRegistry {
    pub fn new(
        rules: &[CapabilityRule],
        defaults: InferenceParams,
        extensions: &[String],
    ) -> OrchestratorResult<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    pattern: Regex::new(&rule.pattern).map_err(|e| {
                        OrchestratorError::Config(crate::config::ConfigError::Invalid(format!(
                            "capability rule '{}': {e}",
                            rule.pattern
                        )))
                    })?,
                    age_groups: rule.age_groups.clone(),
                    categories: rule.categories.clone(),
                    params: rule.params,
                })
            })
            .collect::<OrchestratorResult<Vec<_>>>()?;

        Ok(Self {
            rules,
            defaults,
            extensions: extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            state: RwLock::new(RegistryState::default()),
        })
    }

    pub fn from_config(config: &GuardianConfig) -> OrchestratorResult<Self> {
        Self::new(
            &config.capability_rules,
            config.defaults,
            &config.discovery.extensions,
        )
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
    }

    fn describe(&self, path: &Path, size_bytes: u64) -> ModelDescriptor {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let descriptor = ModelDescriptor::local(model_id_from_path(path), path, size_bytes)
            .with_params(self.defaults);

        match self.rules.iter().find(|r| r.pattern.is_match(&file_name)) {
            Some(rule) => descriptor
                .with_age_groups(rule.age_groups.iter().copied())
                .with_categories(rule.categories.iter().copied())
                .with_params(rule.params.unwrap_or(self.defaults)),
            None => descriptor,
        }
    }

    /// Scan `dir` for artifacts and register the new ones.
    ///
    /// A missing or unreadable directory logs a warning and yields nothing.
    /// Returns the descriptors added by this call.
    pub fn discover(&self, dir: &Path) -> Vec<ModelDescriptor> {
        {
            let mut state = self.state.write();
            if !state.scanned_dirs.iter().any(|d| d == dir) {
                state.scanned_dirs.push(dir.to_path_buf());
            }
        }

        let read_dir = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) => {
                let err = OrchestratorError::ModelDiscovery {
                    path: dir.display().to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(error = %err, "models directory unavailable");
                return Vec::new();
            }
        };

        // Sorted so ids and declaration order do not depend on readdir order.
        let mut paths: Vec<PathBuf> = read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && self.accepts(p))
            .collect();
        paths.sort();

        let mut added = Vec::new();
        for path in paths {
            let canonical = match std::fs::canonicalize(&path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable artifact");
                    continue;
                }
            };
            let size = std::fs::metadata(&canonical).map(|m| m.len()).unwrap_or(0);
            let descriptor = self.describe(&path, size);

            let mut state = self.state.write();
            if state.seen_paths.contains(&canonical) {
                continue;
            }
            if state.entries.iter().any(|d| d.id == descriptor.id) {
                tracing::warn!(
                    model = %descriptor.id,
                    path = %path.display(),
                    "another artifact already uses this id, skipping"
                );
                continue;
            }
            state.seen_paths.insert(canonical);
            state.entries.push(descriptor.clone());
            drop(state);

            tracing::debug!(model = %descriptor.id, size_bytes = size, "discovered model");
            added.push(descriptor);
        }

        tracing::info!(
            dir = %dir.display(),
            discovered = added.len(),
            total = self.len(),
            "model discovery complete"
        );
        added
    }

    /// Re-run discovery on every directory scanned so far.
    pub fn rescan(&self) -> Vec<ModelDescriptor> {
        let dirs = self.state.read().scanned_dirs.clone();
        dirs.iter().flat_map(|dir| self.discover(dir)).collect()
    }

    pub fn register(&self, descriptor: ModelDescriptor) -> OrchestratorResult<()> {
        let mut state = self.state.write();
        if state.entries.iter().any(|d| d.id == descriptor.id) {
            return Err(OrchestratorError::DuplicateModel(descriptor.id));
        }
        if let ArtifactLocation::LocalPath { path } = &descriptor.location
            && let Ok(canonical) = std::fs::canonicalize(path)
        {
            state.seen_paths.insert(canonical);
        }
        tracing::debug!(model = %descriptor.id, location = %descriptor.location, "model registered");
        state.entries.push(descriptor);
        Ok(())
    }

    /// Register a model served by the authorized endpoint.
    pub fn register_remote(&self, endpoint: &str, remote: &RemoteModelConfig) -> OrchestratorResult<()> {
        let descriptor = ModelDescriptor::remote(&remote.id, endpoint, &remote.model)
            .with_age_groups(remote.age_groups.iter().copied())
            .with_categories(remote.categories.iter().copied())
            .with_params(remote.params.unwrap_or(self.defaults));
        self.register(descriptor)
    }

    pub fn list(&self) -> Vec<ModelDescriptor> {
        self.state.read().entries.clone()
    }

    pub fn get(&self, model_id: &str) -> Option<ModelDescriptor> {
        self.state
            .read()
            .entries
            .iter()
            .find(|d| d.id == model_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn touch(&self, model_id: &str, at: DateTime<Utc>) {
        if let Some(d) = self
            .state
            .write()
            .entries
            .iter_mut()
            .find(|d| d.id == model_id)
        {
            d.last_used = Some(at);
        }
    }

    pub fn set_benchmark(&self, model_id: &str, score: BenchmarkScore) -> OrchestratorResult<()> {
        let mut state = self.state.write();
        let descriptor = state
            .entries
            .iter_mut()
            .find(|d| d.id == model_id)
            .ok_or_else(|| OrchestratorError::UnknownModel(model_id.to_string()))?;
        descriptor.benchmark = Some(score);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(rules: &[CapabilityRule]) -> ModelRegistry {
        ModelRegistry::new(rules, InferenceParams::default(), &["gguf".to_string()]).unwrap()
    }

    fn touch_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn ids_are_stable_slugs() {
        assert_eq!(model_id_from_path(Path::new("/m/TinyLlama-1.1B_Q4.gguf")), "tinyllama-1-1b-q4");
        assert_eq!(model_id_from_path(Path::new("phi 2 (chat).gguf")), "phi-2-chat");
        assert_eq!(model_id_from_path(Path::new("__odd__.gguf")), "odd");
        assert_eq!(model_id_from_path(Path::new("Qwen-日本語.gguf")), "qwen-日本語");
    }

    #[test]
    fn symbol_only_stems_get_distinct_ids() {
        assert_eq!(model_id_from_path(Path::new("___.gguf")), "model-5f5f5f");
        assert_eq!(model_id_from_path(Path::new("+.gguf")), "model-2b");
    }

    #[test]
    fn non_latin_artifacts_are_all_discovered() {
        let dir = tempfile::tempdir().unwrap();
        touch_file(dir.path(), "日本.gguf", b"GGUF1");
        touch_file(dir.path(), "中文.gguf", b"GGUF2");
        touch_file(dir.path(), "---.gguf", b"GGUF3");

        let r = registry(&[]);
        let found = r.discover(dir.path());

        assert_eq!(found.len(), 3);
        let mut ids: Vec<_> = found.iter().map(|d| d.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, ["model-2d2d2d", "中文", "日本"]);
    }

    #[test]
    fn missing_directory_yields_nothing() {
        let r = registry(&[]);
        assert!(r.discover(Path::new("/definitely/not/here")).is_empty());
        assert!(r.is_empty());
    }

    #[test]
    fn discovers_matching_files_only() {
        let dir = tempfile::tempdir().unwrap();
        touch_file(dir.path(), "b-model.gguf", b"GGUF1");
        touch_file(dir.path(), "a-model.GGUF", b"GGUF22");
        touch_file(dir.path(), "notes.txt", b"hello");
        std::fs::create_dir(dir.path().join("nested.gguf")).unwrap();

        let r = registry(&[]);
        let found = r.discover(dir.path());

        let ids: Vec<_> = found.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["a-model", "b-model"]);
        assert_eq!(found[0].size_bytes, 6);
        assert_eq!(found[0].age_groups.len(), 3);
        assert_eq!(found[0].categories.len(), 4);
    }

    #[test]
    fn rediscovery_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        touch_file(dir.path(), "one.gguf", b"GGUF");

        let r = registry(&[]);
        assert_eq!(r.discover(dir.path()).len(), 1);
        assert!(r.discover(dir.path()).is_empty());

        touch_file(dir.path(), "two.gguf", b"GGUF");
        let added = r.rescan();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].id, "two");
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn first_matching_rule_sets_tags() {
        let rules = vec![
            CapabilityRule {
                pattern: "(?i)kids".into(),
                age_groups: vec![AgeGroup::Child],
                categories: vec![QueryCategory::General, QueryCategory::Education],
                params: Some(InferenceParams::default().with_max_tokens(128).unwrap()),
            },
            CapabilityRule {
                pattern: ".*".into(),
                age_groups: vec![AgeGroup::Adult],
                categories: QueryCategory::ALL.to_vec(),
                params: None,
            },
        ];
        let dir = tempfile::tempdir().unwrap();
        touch_file(dir.path(), "Kids-Tutor.gguf", b"GGUF");
        touch_file(dir.path(), "sec-analyst.gguf", b"GGUF");

        let r = registry(&rules);
        r.discover(dir.path());

        let kids = r.get("kids-tutor").unwrap();
        assert!(kids.supports(AgeGroup::Child, QueryCategory::Education));
        assert!(!kids.supports_age(AgeGroup::Adult));
        assert_eq!(kids.params.max_tokens, 128);

        let analyst = r.get("sec-analyst").unwrap();
        assert!(analyst.supports(AgeGroup::Adult, QueryCategory::Threat));
        assert_eq!(analyst.params.max_tokens, 512);
    }

    #[test]
    fn register_rejects_duplicates_and_keeps_order() {
        let r = registry(&[]);
        r.register(ModelDescriptor::remote("z", "http://10.0.0.2:11434", "z")).unwrap();
        r.register(ModelDescriptor::local("a", "/m/a.gguf", 1)).unwrap();

        let err = r.register(ModelDescriptor::local("z", "/m/z.gguf", 1)).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateModel(_)));

        let ids: Vec<_> = r.list().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, ["z", "a"]);
    }

    #[test]
    fn touch_and_benchmark_update_in_place() {
        let r = registry(&[]);
        r.register(ModelDescriptor::local("a", "/m/a.gguf", 1)).unwrap();

        let now = Utc::now();
        r.touch("a", now);
        r.set_benchmark("a", BenchmarkScore { latency_ms: 12, quality_score: 0.9 })
            .unwrap();

        let d = r.get("a").unwrap();
        assert_eq!(d.last_used, Some(now));
        assert_eq!(d.benchmark.unwrap().latency_ms, 12);
        assert!(r.set_benchmark("missing", d.benchmark.unwrap()).is_err());
    }
}
