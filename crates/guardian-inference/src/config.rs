//! Orchestrator configuration.
//!
//! Files may be YAML, TOML, JSON, INI, RON or JSON5; the format is taken from
//! the extension. `${VAR}` and `$VAR` references are substituted before
//! parsing, then `GUARDIAN_`-prefixed environment variables override file
//! values, using `__` for nesting:
//!
//! ```text
//! GUARDIAN_ORCHESTRATOR__CAPACITY=3
//! GUARDIAN_BACKENDS__AUTHORIZED_ENDPOINT=http://10.0.0.5:11434
//! ```

use std::path::{Path, PathBuf};

use config::{Config as Cfg, Environment, File, FileFormat};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::benchmark::{BenchmarkPrompt, default_prompts};
use crate::types::{AgeGroup, InferenceParams, QueryCategory};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "GUARDIAN";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Slot and fallback limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Maximum number of resident models
    pub capacity: usize,
    /// Real-backend attempts per request before the stub answers
    pub max_attempts: u32,
    /// Largest artifact, in MiB, that may be loaded
    pub max_memory_mb: u64,
}

impl OrchestratorSettings {
    pub fn max_model_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            capacity: 2,
            max_attempts: 3,
            max_memory_mb: 2048,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Directory scanned for model artifacts. Nothing is discovered when unset.
    pub models_dir: Option<PathBuf>,
    /// Accepted artifact extensions, compared case-insensitively
    pub extensions: Vec<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            models_dir: None,
            extensions: vec!["gguf".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub local_timeout_ms: u64,
    pub remote_timeout_ms: u64,
    /// Layers offloaded to the GPU by the llama engine
    pub local_gpu_layers: u32,
    /// The only network endpoint the remote backend may contact
    pub authorized_endpoint: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            local_timeout_ms: 30_000,
            remote_timeout_ms: 10_000,
            local_gpu_layers: 0,
            authorized_endpoint: None,
        }
    }
}

fn all_age_groups() -> Vec<AgeGroup> {
    AgeGroup::ALL.to_vec()
}

fn all_categories() -> Vec<QueryCategory> {
    QueryCategory::ALL.to_vec()
}

/// Maps discovered artifact file names to capability tags.
///
/// Rules are tried in declaration order; the first whose `pattern` matches
/// the file name wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRule {
    /// Regular expression matched against the artifact file name
    pub pattern: String,
    #[serde(default = "all_age_groups")]
    pub age_groups: Vec<AgeGroup>,
    #[serde(default = "all_categories")]
    pub categories: Vec<QueryCategory>,
    /// Overrides the global defaults for matching models
    #[serde(default)]
    pub params: Option<InferenceParams>,
}

/// A model served by the authorized endpoint, registered at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteModelConfig {
    pub id: String,
    /// Model name as known by the remote service
    pub model: String,
    #[serde(default = "all_age_groups")]
    pub age_groups: Vec<AgeGroup>,
    #[serde(default = "all_categories")]
    pub categories: Vec<QueryCategory>,
    #[serde(default)]
    pub params: Option<InferenceParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkSettings {
    pub prompts: Vec<BenchmarkPrompt>,
    /// Benchmark every registered model while the orchestrator is built
    pub run_on_startup: bool,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            prompts: default_prompts(),
            run_on_startup: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    pub orchestrator: OrchestratorSettings,
    pub discovery: DiscoverySettings,
    pub backends: BackendSettings,
    pub defaults: InferenceParams,
    pub capability_rules: Vec<CapabilityRule>,
    pub remote_models: Vec<RemoteModelConfig>,
    pub benchmark: BenchmarkSettings,
}

impl GuardianConfig {
    /// Load from a file with environment overrides, then validate.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&content)?;

        let config: Self = Cfg::builder()
            .add_source(File::from_str(&substituted, format))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Serialization(e.to_string()))?;

        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse from a string with an explicit format, then validate.
    pub fn from_str(content: &str, format: FileFormat) -> ConfigResult<Self> {
        let substituted = substitute_env_vars(content)?;
        let config: Self = Cfg::builder()
            .add_source(File::from_str(&substituted, format))
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Serialization(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.orchestrator.capacity = capacity;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.orchestrator.max_attempts = max_attempts;
        self
    }

    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.discovery.models_dir = Some(dir.into());
        self
    }

    pub fn with_authorized_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.backends.authorized_endpoint = Some(endpoint.into());
        self
    }

    /// Reject configurations the orchestrator cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.orchestrator.capacity == 0 {
            return Err(invalid("orchestrator.capacity must be greater than 0"));
        }
        if self.orchestrator.max_attempts == 0 {
            return Err(invalid("orchestrator.max_attempts must be greater than 0"));
        }
        if self.orchestrator.max_memory_mb == 0 {
            return Err(invalid("orchestrator.max_memory_mb must be greater than 0"));
        }
        if self.backends.local_timeout_ms == 0 || self.backends.remote_timeout_ms == 0 {
            return Err(invalid("backend timeouts must be greater than 0"));
        }
        if self.discovery.extensions.iter().all(|e| e.trim().is_empty()) {
            return Err(invalid("discovery.extensions must name at least one format"));
        }
        if let Some(endpoint) = &self.backends.authorized_endpoint {
            let url = reqwest::Url::parse(endpoint)
                .map_err(|e| invalid(format!("authorized_endpoint '{endpoint}': {e}")))?;
            if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                return Err(invalid(format!(
                    "authorized_endpoint '{endpoint}' must be an http(s) URL with a host"
                )));
            }
        }
        if !self.remote_models.is_empty() && self.backends.authorized_endpoint.is_none() {
            return Err(invalid(
                "remote_models are declared but backends.authorized_endpoint is not set",
            ));
        }
        if self.benchmark.prompts.is_empty() {
            return Err(invalid("benchmark.prompts must not be empty"));
        }

        validate_params("defaults", &self.defaults)?;
        for rule in &self.capability_rules {
            Regex::new(&rule.pattern)
                .map_err(|e| invalid(format!("capability rule '{}': {e}", rule.pattern)))?;
            if let Some(params) = &rule.params {
                validate_params(&rule.pattern, params)?;
            }
        }
        for remote in &self.remote_models {
            if remote.id.trim().is_empty() || remote.model.trim().is_empty() {
                return Err(invalid("remote model entries need an id and a model name"));
            }
            if let Some(params) = &remote.params {
                validate_params(&remote.id, params)?;
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn validate_params(scope: &str, params: &InferenceParams) -> ConfigResult<()> {
    InferenceParams::default()
        .with_temperature(params.temperature)
        .and_then(|p| p.with_max_tokens(params.max_tokens))
        .and_then(|p| p.with_context_window(params.context_window))
        .map(|_| ())
        .map_err(|e| invalid(format!("{scope}: {e}")))
}

/// Detect configuration format from file extension.
pub fn detect_format(path: &Path) -> ConfigResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Replace `${VAR}` and `$VAR` with environment values. Unknown variables are
/// left untouched.
pub fn substitute_env_vars(content: &str) -> ConfigResult<String> {
    let braced = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    let simple = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b")
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    let lookup = |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    };
    let result = braced.replace_all(content, lookup).to_string();
    Ok(simple.replace_all(&result, lookup).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GuardianConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestrator.capacity, 2);
        assert_eq!(config.orchestrator.max_attempts, 3);
        assert_eq!(config.orchestrator.max_memory_mb, 2048);
        assert_eq!(config.orchestrator.max_model_bytes(), 2048 * 1024 * 1024);
        assert_eq!(config.backends.local_timeout_ms, 30_000);
        assert_eq!(config.backends.remote_timeout_ms, 10_000);
        assert_eq!(config.discovery.extensions, vec!["gguf"]);
    }

    #[test]
    fn detects_formats() {
        assert_eq!(detect_format(Path::new("g.yaml")).unwrap(), FileFormat::Yaml);
        assert_eq!(detect_format(Path::new("g.TOML")).unwrap(), FileFormat::Toml);
        assert!(detect_format(Path::new("g.txt")).is_err());
        assert!(detect_format(Path::new("guardian")).is_err());
    }

    #[test]
    fn zero_capacity_is_fatal() {
        let err = GuardianConfig::default().with_capacity(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_attempts_is_fatal() {
        assert!(GuardianConfig::default().with_max_attempts(0).validate().is_err());
    }

    #[test]
    fn zero_memory_budget_is_fatal() {
        let mut config = GuardianConfig::default();
        config.orchestrator.max_memory_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_rule_regex_is_fatal() {
        let mut config = GuardianConfig::default();
        config.capability_rules.push(CapabilityRule {
            pattern: "(unclosed".into(),
            age_groups: all_age_groups(),
            categories: all_categories(),
            params: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn endpoint_must_be_http() {
        let config = GuardianConfig::default().with_authorized_endpoint("ftp://10.0.0.2");
        assert!(config.validate().is_err());
        let config = GuardianConfig::default().with_authorized_endpoint("http://10.0.0.2:11434");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn remote_models_need_an_endpoint() {
        let mut config = GuardianConfig::default();
        config.remote_models.push(RemoteModelConfig {
            id: "lan-llama".into(),
            model: "llama3".into(),
            age_groups: all_age_groups(),
            categories: all_categories(),
            params: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_toml_with_rules() {
        let toml = r#"
[orchestrator]
capacity = 3

[discovery]
models_dir = "/srv/models"

[[capability_rules]]
pattern = "(?i)tiny"
age_groups = ["child"]
categories = ["general", "education"]

[capability_rules.params]
temperature = 0.3
max_tokens = 128
context_window = 2048
"#;
        let config = GuardianConfig::from_str(toml, FileFormat::Toml).unwrap();
        assert_eq!(config.orchestrator.capacity, 3);
        assert_eq!(config.orchestrator.max_attempts, 3);
        assert_eq!(config.discovery.models_dir, Some(PathBuf::from("/srv/models")));
        let rule = &config.capability_rules[0];
        assert_eq!(rule.age_groups, vec![AgeGroup::Child]);
        assert_eq!(rule.params.unwrap().max_tokens, 128);
    }

    #[test]
    fn parses_json() {
        let json = r#"{ "backends": { "local_timeout_ms": 500 } }"#;
        let config = GuardianConfig::from_str(json, FileFormat::Json).unwrap();
        assert_eq!(config.backends.local_timeout_ms, 500);
        assert_eq!(config.backends.remote_timeout_ms, 10_000);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guardian.yaml");
        std::fs::write(&path, "orchestrator:\n  max_attempts: 5\n").unwrap();

        let config = GuardianConfig::load(&path).unwrap();
        assert_eq!(config.orchestrator.max_attempts, 5);
    }

    #[test]
    fn load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guardian.json");
        std::fs::write(&path, r#"{ "orchestrator": { "capacity": 0 } }"#).unwrap();

        assert!(matches!(
            GuardianConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn unknown_variables_are_left_alone() {
        let out = substitute_env_vars("dir: ${GUARDIAN_TEST_SURELY_UNSET_VAR}").unwrap();
        assert_eq!(out, "dir: ${GUARDIAN_TEST_SURELY_UNSET_VAR}");
    }
}
