use crate::counters::ParticipantCounters;
use crate::orchestrator::{GenerationOrigin, GenerationOutcome, GenerationStage};
use crate::resources::{ResourceUpdate, SearchResult};

use std::collections::HashMap;

/// Where a picked search result goes in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickTarget {
    pub week: String,
    pub day_index: usize,
    pub kind: String,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    Input(crossterm::event::KeyEvent),
    Mouse(crossterm::event::MouseEvent),

    CountersLoaded(ParticipantCounters),

    // Generation events carry the id of the run that produced them; anything
    // from a superseded run is dropped.
    GenerationStage {
        id: u64,
        stage: GenerationStage,
    },
    GenerationFinished {
        id: u64,
        origin: GenerationOrigin,
        result: Result<GenerationOutcome, String>,
    },

    ChatReply(Result<String, String>),
    InfoLoaded(Result<String, String>),
    /// `target` is `None` for a topic-wide search opened from the form.
    SearchLoaded {
        target: Option<PickTarget>,
        result: Result<Vec<SearchResult>, String>,
    },

    // Per-plan lookups carry the plan load id they were issued for.
    ExplanationLoaded {
        load_id: u64,
        week: String,
        day: String,
        text: String,
    },
    WeekReasoningLoaded {
        load_id: u64,
        reasoning: HashMap<String, String>,
    },
    ResourceUpdated {
        load_id: u64,
        update: ResourceUpdate,
    },
}
