//! Last-resort backend with canned, audience-appropriate answers.

use std::time::Duration;

use async_trait::async_trait;

use super::InferenceBackend;
use crate::error::OrchestratorResult;
use crate::types::{
    AgeGroup, ArtifactLocation, BackendKind, InferenceParams, ModelDescriptor, QueryCategory,
    RequestContext, STUB_MODEL_ID,
};

/// Always succeeds. The answer depends only on age group and category.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeterministicStubBackend;

impl DeterministicStubBackend {
    pub fn new() -> Self {
        Self
    }

    /// Canned answer for a context. Never empty.
    pub fn respond(&self, ctx: &RequestContext) -> String {
        canned(ctx.age_group, ctx.query_category)
    }

    /// Synthetic descriptor tagged with exactly the context's age group and
    /// category, for calling the stub through [`InferenceBackend`].
    pub fn descriptor_for(&self, ctx: &RequestContext) -> ModelDescriptor {
        ModelDescriptor {
            id: STUB_MODEL_ID.to_string(),
            location: ArtifactLocation::Builtin,
            size_bytes: 0,
            age_groups: [ctx.age_group].into_iter().collect(),
            categories: [ctx.query_category].into_iter().collect(),
            params: InferenceParams::default(),
            benchmark: None,
            last_used: None,
        }
    }
}

fn canned(age: AgeGroup, category: QueryCategory) -> String {
    let lead = match age {
        AgeGroup::Child => "I can't think of a full answer right now, but here is something helpful.",
        AgeGroup::Teen => "I'm running in a limited mode right now, so here's a short answer.",
        AgeGroup::Adult => "Guardian is in a degraded mode and cannot reach a language model.",
    };
    let body = match (age, category) {
        (AgeGroup::Child, QueryCategory::General) => {
            "Try asking a parent or teacher, and we can look it up together later!"
        }
        (AgeGroup::Child, QueryCategory::Security) => {
            "Keep your passwords secret, like a treasure, and only share them with your grown-ups."
        }
        (AgeGroup::Child, QueryCategory::Education) => {
            "Learning is an adventure! Write your question down and explore it with a grown-up."
        }
        (AgeGroup::Child, QueryCategory::Threat) => {
            "If something online feels scary or strange, stop and tell a grown-up you trust right away."
        }
        (AgeGroup::Teen, QueryCategory::General) => {
            "Check a trusted source or ask again in a few minutes."
        }
        (AgeGroup::Teen, QueryCategory::Security) => {
            "Use a unique password for every account and turn on two-factor authentication."
        }
        (AgeGroup::Teen, QueryCategory::Education) => {
            "Break the topic into smaller questions and look each one up in your course material."
        }
        (AgeGroup::Teen, QueryCategory::Threat) => {
            "Don't click unknown links or reply to strangers. Screenshot anything suspicious and tell a trusted adult."
        }
        (AgeGroup::Adult, QueryCategory::General) => "Please retry the request shortly.",
        (AgeGroup::Adult, QueryCategory::Security) => {
            "General guidance: keep devices patched, use a password manager and enable multi-factor authentication."
        }
        (AgeGroup::Adult, QueryCategory::Education) => {
            "Consult the Guardian documentation or retry once a model is available."
        }
        (AgeGroup::Adult, QueryCategory::Threat) => {
            "Isolate the affected device from the network, preserve logs, and review recent connection activity."
        }
    };
    format!("{lead} {body}")
}

#[async_trait]
impl InferenceBackend for DeterministicStubBackend {
    fn name(&self) -> &str {
        STUB_MODEL_ID
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Stub
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn is_simulated(&self) -> bool {
        true
    }

    async fn load(&self, _descriptor: &ModelDescriptor) -> OrchestratorResult<()> {
        Ok(())
    }

    async fn unload(&self, _model_id: &str) -> OrchestratorResult<()> {
        Ok(())
    }

    async fn infer(
        &self,
        descriptor: &ModelDescriptor,
        _prompt: &str,
        _params: &InferenceParams,
    ) -> OrchestratorResult<String> {
        let age = descriptor
            .age_groups
            .iter()
            .next()
            .copied()
            .unwrap_or(AgeGroup::Adult);
        let category = descriptor
            .categories
            .iter()
            .next()
            .copied()
            .unwrap_or(QueryCategory::General);
        Ok(canned(age, category))
    }
}
