//! Cold-start benchmarking.
//!
//! Runs a fixed prompt set against a resident model and scores the output
//! with cheap structural checks. This is not semantic grading; it only
//! separates models that answer in the expected shape from ones that don't.
//! Never run on the path of a live request.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::backend::InferenceBackend;
use crate::types::{BenchmarkScore, ModelDescriptor};

fn default_min_chars() -> usize {
    1
}

fn default_max_chars() -> usize {
    2_000
}

/// One evaluation prompt and the shape its answer should have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkPrompt {
    pub prompt: String,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Case-insensitive substrings a good answer contains
    #[serde(default)]
    pub required_markers: Vec<String>,
    /// Case-insensitive substrings that must not appear
    #[serde(default)]
    pub disallowed_tokens: Vec<String>,
}

impl BenchmarkPrompt {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            min_chars: default_min_chars(),
            max_chars: default_max_chars(),
            required_markers: Vec::new(),
            disallowed_tokens: Vec::new(),
        }
    }

    pub fn with_length(mut self, min_chars: usize, max_chars: usize) -> Self {
        self.min_chars = min_chars;
        self.max_chars = max_chars;
        self
    }

    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_disallowed<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disallowed_tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Score an answer in `[0, 1]`: the mean of the length, marker and
    /// disallowed-token checks.
    pub fn score(&self, output: &str) -> f64 {
        let len = output.chars().count();
        let length_ok = if (self.min_chars..=self.max_chars).contains(&len) {
            1.0
        } else {
            0.0
        };

        let lowered = output.to_lowercase();
        let markers = if self.required_markers.is_empty() {
            1.0
        } else {
            let hits = self
                .required_markers
                .iter()
                .filter(|m| lowered.contains(&m.to_lowercase()))
                .count();
            hits as f64 / self.required_markers.len() as f64
        };

        let clean = if self
            .disallowed_tokens
            .iter()
            .any(|t| lowered.contains(&t.to_lowercase()))
        {
            0.0
        } else {
            1.0
        };

        (length_ok + markers + clean) / 3.0
    }
}

/// Built-in evaluation set used when none is configured.
pub fn default_prompts() -> Vec<BenchmarkPrompt> {
    vec![
        BenchmarkPrompt::new("Explain to a ten year old why they should not share their password.")
            .with_length(40, 800)
            .with_markers(["password"])
            .with_disallowed(["kill", "hate"]),
        BenchmarkPrompt::new("List three signs that an email might be a phishing attempt.")
            .with_length(60, 1_200)
            .with_markers(["link", "sender"]),
        BenchmarkPrompt::new("What should a family do if a device on the home network behaves strangely?")
            .with_length(60, 1_200)
            .with_markers(["network", "device"]),
    ]
}

pub struct BenchmarkEngine {
    prompts: Vec<BenchmarkPrompt>,
}

impl BenchmarkEngine {
    pub fn new(prompts: Vec<BenchmarkPrompt>) -> Self {
        Self { prompts }
    }

    pub fn prompts(&self) -> &[BenchmarkPrompt] {
        &self.prompts
    }

    /// Run every prompt against `backend`. The model must already be loaded.
    ///
    /// Failed or timed out calls score 0 and their elapsed time still counts
    /// toward latency.
    pub async fn benchmark(
        &self,
        descriptor: &ModelDescriptor,
        backend: &dyn InferenceBackend,
    ) -> BenchmarkScore {
        if self.prompts.is_empty() {
            return BenchmarkScore {
                latency_ms: 0,
                quality_score: 0.0,
            };
        }

        let mut total_latency = Duration::ZERO;
        let mut total_quality = 0.0;
        let mut failures = 0usize;

        for case in &self.prompts {
            let started = Instant::now();
            let outcome = tokio::time::timeout(
                backend.timeout(),
                backend.infer(descriptor, &case.prompt, &descriptor.params),
            )
            .await;
            total_latency += started.elapsed();

            match outcome {
                Ok(Ok(text)) => total_quality += case.score(&text),
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::debug!(model = %descriptor.id, error = %e, "benchmark prompt failed");
                }
                Err(_) => {
                    failures += 1;
                    tracing::debug!(model = %descriptor.id, "benchmark prompt timed out");
                }
            }
        }

        let count = self.prompts.len();
        let score = BenchmarkScore {
            latency_ms: u64::try_from(total_latency.as_millis() / count as u128)
                .unwrap_or(u64::MAX),
            quality_score: total_quality / count as f64,
        };

        tracing::info!(
            model = %descriptor.id,
            latency_ms = score.latency_ms,
            quality = score.quality_score,
            failures,
            "benchmark complete"
        );
        score
    }

    /// Sort best first by [`BenchmarkScore::ranking_cmp`].
    pub fn rank(scores: &mut [(String, BenchmarkScore)]) {
        scores.sort_by(|(_, a), (_, b)| a.ranking_cmp(b));
    }
}

impl Default for BenchmarkEngine {
    fn default() -> Self {
        Self::new(default_prompts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OrchestratorError, OrchestratorResult};
    use crate::types::{BackendKind, InferenceParams};
    use async_trait::async_trait;

    struct Echo(&'static str);

    #[async_trait]
    impl InferenceBackend for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn kind(&self) -> BackendKind {
            BackendKind::Local
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
        async fn load(&self, _: &ModelDescriptor) -> OrchestratorResult<()> {
            Ok(())
        }
        async fn unload(&self, _: &str) -> OrchestratorResult<()> {
            Ok(())
        }
        async fn infer(&self, d: &ModelDescriptor, _: &str, _: &InferenceParams) -> OrchestratorResult<String> {
            if self.0.is_empty() {
                return Err(OrchestratorError::Inference {
                    model_id: d.id.clone(),
                    reason: "no output".into(),
                });
            }
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn score_combines_three_checks() {
        let p = BenchmarkPrompt::new("q")
            .with_length(5, 50)
            .with_markers(["alpha", "beta"])
            .with_disallowed(["forbidden"]);

        assert_eq!(p.score("Alpha and BETA here"), 1.0);
        // one of two markers
        assert!((p.score("alpha only") - (1.0 + 0.5 + 1.0) / 3.0).abs() < 1e-9);
        // too short, no markers, but clean
        assert!((p.score("hi") - 1.0 / 3.0).abs() < 1e-9);
        // disallowed token present
        assert!((p.score("alpha beta FORBIDDEN") - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn good_output_outscores_failures() {
        let engine = BenchmarkEngine::new(vec![
            BenchmarkPrompt::new("one").with_markers(["safe"]),
            BenchmarkPrompt::new("two").with_markers(["safe"]),
        ]);
        let d = ModelDescriptor::local("m", "/m.gguf", 1);

        let good = engine.benchmark(&d, &Echo("stay safe online")).await;
        let broken = engine.benchmark(&d, &Echo("")).await;

        assert_eq!(good.quality_score, 1.0);
        assert_eq!(broken.quality_score, 0.0);
        assert_eq!(good.ranking_cmp(&broken), std::cmp::Ordering::Less);
    }

    #[test]
    fn rank_prefers_quality_then_latency() {
        let mut scores = vec![
            ("slow".to_string(), BenchmarkScore { latency_ms: 900, quality_score: 0.8 }),
            ("poor".to_string(), BenchmarkScore { latency_ms: 10, quality_score: 0.2 }),
            ("quick".to_string(), BenchmarkScore { latency_ms: 100, quality_score: 0.8 }),
        ];
        BenchmarkEngine::rank(&mut scores);
        let order: Vec<_> = scores.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, ["quick", "slow", "poor"]);
    }

    #[test]
    fn default_set_is_not_empty() {
        assert_eq!(BenchmarkEngine::default().prompts().len(), 3);
    }
}
