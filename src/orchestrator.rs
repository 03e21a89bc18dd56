//! The three-stage plan generation: draft, critique, improved plan.

use std::fmt;

use thiserror::Error;

use crate::backend::Backend;
use crate::error::BackendError;
use crate::plan::parse_plan;

/// Text appended to the conversation when any stage fails.
pub const GENERATION_FAILED: &str = "Error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationStage {
    #[default]
    Idle,
    AwaitingInitial,
    AwaitingCritique,
    AwaitingImproved,
    Done,
    Error,
}

impl GenerationStage {
    /// The stage after a successful call. Terminal stages stay put.
    pub fn advance(self) -> Self {
        match self {
            GenerationStage::Idle => GenerationStage::AwaitingInitial,
            GenerationStage::AwaitingInitial => GenerationStage::AwaitingCritique,
            GenerationStage::AwaitingCritique => GenerationStage::AwaitingImproved,
            GenerationStage::AwaitingImproved => GenerationStage::Done,
            GenerationStage::Done => GenerationStage::Done,
            GenerationStage::Error => GenerationStage::Error,
        }
    }

    pub fn is_awaiting(self) -> bool {
        matches!(
            self,
            GenerationStage::AwaitingInitial
                | GenerationStage::AwaitingCritique
                | GenerationStage::AwaitingImproved
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            GenerationStage::Idle => "idle",
            GenerationStage::AwaitingInitial => "drafting plan",
            GenerationStage::AwaitingCritique => "reviewing draft",
            GenerationStage::AwaitingImproved => "improving plan",
            GenerationStage::Done => "done",
            GenerationStage::Error => "failed",
        }
    }
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
#[error("generation failed while {stage}: {source}")]
pub struct GenerationError {
    pub stage: GenerationStage,
    #[source]
    pub source: BackendError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub initial: String,
    pub improved: String,
}

/// What started a generation; decides which text becomes the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOrigin {
    Form,
    InlineEdit,
}

impl GenerationOutcome {
    /// The text to show. An inline edit keeps the first draft when the improved
    /// answer has no usable plan in it.
    pub fn plan_text(&self, origin: GenerationOrigin) -> &str {
        match origin {
            GenerationOrigin::Form => &self.improved,
            GenerationOrigin::InlineEdit => {
                if parse_plan(&self.improved).is_some() || parse_plan(&self.initial).is_none() {
                    &self.improved
                } else {
                    &self.initial
                }
            }
        }
    }
}

/// Runs the stages strictly in order. `on_stage` sees every stage entered,
/// including the terminal one. The first failure ends the run; nothing is
/// retried.
pub async fn run_generation<F>(
    backend: &dyn Backend,
    participant: &str,
    message: &str,
    mut on_stage: F,
) -> Result<GenerationOutcome, GenerationError>
where
    F: FnMut(GenerationStage) + Send,
{
    let mut stage = GenerationStage::Idle.advance();
    on_stage(stage);

    let fail = |stage: GenerationStage, source: BackendError| {
        tracing::warn!(%stage, endpoint = source.endpoint(), error = %source, "generation stage failed");
        GenerationError { stage, source }
    };

    let initial = match backend.respond(participant, message).await {
        Ok(text) => text,
        Err(e) => {
            on_stage(GenerationStage::Error);
            return Err(fail(stage, e));
        }
    };
    stage = stage.advance();
    on_stage(stage);

    if let Err(e) = backend.critique(participant).await {
        on_stage(GenerationStage::Error);
        return Err(fail(stage, e));
    }
    stage = stage.advance();
    on_stage(stage);

    let improved = match backend.improve(participant).await {
        Ok(text) => text,
        Err(e) => {
            on_stage(GenerationStage::Error);
            return Err(fail(stage, e));
        }
    };
    stage = stage.advance();
    on_stage(stage);
    tracing::info!(participant, "generation finished");

    Ok(GenerationOutcome { initial, improved })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CheckedResource, SearchItem, VideoStats};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    const PLAN: &str = "```json\n{\"studyPlan\": {\"Week 1\": []}}\n```";

    /// Records every call and fails the configured endpoint.
    struct ScriptedBackend {
        fail_on: Option<&'static str>,
        improved: &'static str,
        calls: Mutex<Vec<&'static str>>,
    }

    impl ScriptedBackend {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                fail_on,
                improved: PLAN,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call(&self, endpoint: &'static str, text: &str) -> Result<String, BackendError> {
            self.calls.lock().unwrap().push(endpoint);
            if self.fail_on == Some(endpoint) {
                Err(BackendError::Empty { endpoint })
            } else {
                Ok(text.to_string())
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn respond(&self, _: &str, _: &str) -> Result<String, BackendError> {
            self.call("/response", PLAN)
        }
        async fn critique(&self, _: &str) -> Result<String, BackendError> {
            self.call("/response/critique", "could be better")
        }
        async fn improve(&self, _: &str) -> Result<String, BackendError> {
            self.call("/response/improved", self.improved)
        }
        async fn info(&self, _: &str) -> Result<String, BackendError> {
            unimplemented!()
        }
        async fn search(&self, _: &str, _: Option<&str>) -> Result<Vec<SearchItem>, BackendError> {
            unimplemented!()
        }
        async fn check_resource(&self, _: &str, _: &str, _: &str) -> Result<CheckedResource, BackendError> {
            unimplemented!()
        }
        async fn thumbnail(&self, _: &str) -> Result<String, BackendError> {
            unimplemented!()
        }
        async fn video_stats(&self, _: &str) -> Result<VideoStats, BackendError> {
            unimplemented!()
        }
        async fn topic_explanation(&self, _: &str, _: &str) -> Result<Option<String>, BackendError> {
            unimplemented!()
        }
        async fn objectives(&self, _: &str, _: &str) -> Result<Option<String>, BackendError> {
            unimplemented!()
        }
        async fn plan_reasoning(&self, _: &str, _: &str) -> Result<Value, BackendError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn stages_run_in_order() {
        let backend = ScriptedBackend::new(None);
        let mut seen = Vec::new();
        let outcome = run_generation(&backend, "p", "make a plan", |s| seen.push(s))
            .await
            .unwrap();

        assert_eq!(
            backend.calls(),
            vec!["/response", "/response/critique", "/response/improved"]
        );
        assert_eq!(
            seen,
            vec![
                GenerationStage::AwaitingInitial,
                GenerationStage::AwaitingCritique,
                GenerationStage::AwaitingImproved,
                GenerationStage::Done,
            ]
        );
        assert_eq!(outcome.improved, PLAN);
    }

    #[tokio::test]
    async fn critique_failure_skips_improvement() {
        let backend = ScriptedBackend::new(Some("/response/critique"));
        let mut seen = Vec::new();
        let err = run_generation(&backend, "p", "make a plan", |s| seen.push(s))
            .await
            .unwrap_err();

        assert_eq!(err.stage, GenerationStage::AwaitingCritique);
        assert_eq!(backend.calls(), vec!["/response", "/response/critique"]);
        assert_eq!(seen.last(), Some(&GenerationStage::Error));
        assert_eq!(
            seen.iter().filter(|s| **s == GenerationStage::Error).count(),
            1
        );
    }

    #[tokio::test]
    async fn initial_failure_stops_immediately() {
        let backend = ScriptedBackend::new(Some("/response"));
        let err = run_generation(&backend, "p", "m", |_| {}).await.unwrap_err();
        assert_eq!(err.stage, GenerationStage::AwaitingInitial);
        assert_eq!(backend.calls(), vec!["/response"]);
    }

    #[test]
    fn inline_edit_falls_back_to_draft() {
        let outcome = GenerationOutcome {
            initial: PLAN.to_string(),
            improved: "I could not improve this plan.".to_string(),
        };
        assert_eq!(outcome.plan_text(GenerationOrigin::InlineEdit), PLAN);
        assert_eq!(
            outcome.plan_text(GenerationOrigin::Form),
            "I could not improve this plan."
        );
    }

    #[test]
    fn terminal_stages_do_not_advance() {
        assert_eq!(GenerationStage::Done.advance(), GenerationStage::Done);
        assert_eq!(GenerationStage::Error.advance(), GenerationStage::Error);
        assert!(!GenerationStage::Idle.is_awaiting());
        assert!(GenerationStage::AwaitingImproved.is_awaiting());
    }
}
