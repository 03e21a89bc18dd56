use std::collections::HashMap;

use crate::backend::Backend;

use super::parser;

pub const NO_REASONS: &str = "No reasons available for this topic.";
pub const NO_OBJECTIVES: &str = "No objectives available for this topic.";
pub const EXPLANATION_FAILED: &str =
    "Error fetching information for this topic. Please try again later.";

pub const REASONING_PROMPT: &str = "You have suggested a study plan of a sequence of topics. Please give explanations of why you divided the topics this way. Start directly with the explanation of each week, using bullet points.";

/// Why to study `topic` and what to get out of it, as markdown. Both halves
/// are requested together; if either request fails the whole explanation is
/// replaced by an error text, which is cached like any other answer.
pub async fn day_explanation(backend: &dyn Backend, participant: &str, topic: &str) -> String {
    let (reasons, objectives) = tokio::join!(
        backend.topic_explanation(participant, topic),
        backend.objectives(participant, topic),
    );
    match (reasons, objectives) {
        (Ok(reasons), Ok(objectives)) => compose(topic, reasons, objectives),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(topic, endpoint = e.endpoint(), error = %e, "explanation fetch failed");
            EXPLANATION_FAILED.to_string()
        }
    }
}

fn compose(topic: &str, reasons: Option<String>, objectives: Option<String>) -> String {
    format!(
        "### Reason for studying '{topic}':\n{}\n\n### Learning Objectives for '{topic}':\n{}\n\n",
        reasons.as_deref().unwrap_or(NO_REASONS),
        objectives.as_deref().unwrap_or(NO_OBJECTIVES),
    )
}

/// Week-by-week reasoning for the current plan, keyed by normalized week
/// label. Failures give an empty map so every week shows the fallback text.
pub async fn week_reasoning(backend: &dyn Backend, participant: &str) -> HashMap<String, String> {
    match backend.plan_reasoning(participant, REASONING_PROMPT).await {
        Ok(payload) => parser::parse_week_reasoning(&payload),
        Err(e) => {
            tracing::warn!(error = %e, "plan reasoning unavailable");
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_uses_fallbacks_for_missing_halves() {
        let text = compose("Loops", Some("They repeat work.".into()), None);
        assert_eq!(
            text,
            "### Reason for studying 'Loops':\nThey repeat work.\n\n### Learning Objectives for 'Loops':\nNo objectives available for this topic.\n\n"
        );
        let text = compose("Loops", None, Some("- write a loop".into()));
        assert!(text.contains(NO_REASONS));
        assert!(text.contains("- write a loop"));
    }
}
