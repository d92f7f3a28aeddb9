//! Error taxonomy for the orchestration core.
//!
//! Runtime backend failures (`ModelLoad`, `BackendUnavailable`,
//! `InferenceTimeout`, `Inference`) never reach callers of
//! `execute_with_fallback`; they are absorbed into the fallback chain.
//! Startup paths return [`OrchestratorReport`] so that configuration problems
//! carry context as they propagate.

use error_stack::Report;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// The discovery directory could not be scanned. Non-fatal.
    #[error("model discovery failed for '{path}': {reason}")]
    ModelDiscovery { path: String, reason: String },

    /// The artifact is missing, corrupt or incompatible.
    #[error("failed to load model '{model_id}': {reason}")]
    ModelLoad { model_id: String, reason: String },

    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("inference on '{model_id}' timed out after {timeout_ms}ms")]
    InferenceTimeout { model_id: String, timeout_ms: u64 },

    #[error("inference on '{model_id}' failed: {reason}")]
    Inference { model_id: String, reason: String },

    #[error("model '{0}' is already registered")]
    DuplicateModel(String),

    #[error("model '{0}' is not registered")]
    UnknownModel(String),

    /// Invalid static configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    /// Whether this error moves the fallback chain on to the next candidate.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            Self::ModelLoad { .. }
                | Self::BackendUnavailable { .. }
                | Self::InferenceTimeout { .. }
                | Self::Inference { .. }
        )
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Convenience result alias using [`error_stack::Report`].
pub type OrchestratorReport<T> = Result<T, Report<OrchestratorError>>;

/// Extension trait for converting an `OrchestratorError` into a `Report`.
pub trait IntoOrchestratorReport {
    fn into_report(self) -> Report<OrchestratorError>;
}

impl IntoOrchestratorReport for OrchestratorError {
    #[inline]
    fn into_report(self) -> Report<OrchestratorError> {
        Report::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_stack::ResultExt;

    #[test]
    fn runtime_errors_trigger_fallback() {
        let errors = [
            OrchestratorError::ModelLoad {
                model_id: "a".into(),
                reason: "bad magic".into(),
            },
            OrchestratorError::BackendUnavailable {
                backend: "remote".into(),
                reason: "refused".into(),
            },
            OrchestratorError::InferenceTimeout {
                model_id: "a".into(),
                timeout_ms: 10,
            },
            OrchestratorError::Inference {
                model_id: "a".into(),
                reason: "boom".into(),
            },
        ];
        assert!(errors.iter().all(OrchestratorError::triggers_fallback));
    }

    #[test]
    fn static_errors_do_not_trigger_fallback() {
        assert!(!OrchestratorError::DuplicateModel("a".into()).triggers_fallback());
        let cfg = OrchestratorError::from(ConfigError::Invalid("capacity must be positive".into()));
        assert!(!cfg.triggers_fallback());
        assert!(cfg.to_string().contains("capacity"));
    }

    #[test]
    fn report_carries_context() {
        let result: OrchestratorReport<()> = Err(OrchestratorError::UnknownModel("ghost".into())
            .into_report())
        .attach("while refreshing benchmarks");

        let rendered = format!("{:?}", result.unwrap_err());
        assert!(rendered.contains("ghost"));
        assert!(rendered.contains("while refreshing benchmarks"));
    }
}
