use std::collections::{HashMap, HashSet};

use crate::counters::CounterField;
use crate::resources::{Availability, ResourceJob, ResourceUpdate, VideoStatus};

use super::model::{PlanDocument, Resource, StudyPlan};
use super::parser;

/// (week label, day label)
pub type DayKey = (String, String);

pub const EXPLANATION_LOADING: &str = "Loading explanation...";

/// Side effects a tree operation asks the caller to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEffect {
    Count(CounterField),
    FetchExplanation {
        week: String,
        day: String,
        topic: String,
    },
    FetchWeekReasoning,
}

/// One selectable line of the rendered plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanRow {
    Overview { week: String },
    Week { week: String },
    Day { week: String, day_index: usize },
    Resource {
        week: String,
        day_index: usize,
        kind: String,
        item: usize,
    },
}

/// The live plan together with everything the UI has learned about it.
///
/// This is the only owner of plan state. Views read from it and every change
/// goes through one of its operations.
#[derive(Debug, Default)]
pub struct PlanTree {
    document: Option<PlanDocument>,
    load_id: u64,
    open_overview: HashSet<String>,
    open_weeks: HashSet<String>,
    open_days: HashSet<DayKey>,
    completed: HashSet<(String, usize)>,
    explanations: HashMap<DayKey, String>,
    explanations_pending: HashSet<DayKey>,
    week_reasoning: Option<HashMap<String, String>>,
    reasoning_pending: bool,
    video_status: HashMap<String, VideoStatus>,
    availability: HashMap<String, Availability>,
}

impl PlanTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole tree. Per-plan caches start empty again. Returns the
    /// new load id; async results tagged with an older id are ignored.
    pub fn load(&mut self, document: PlanDocument) -> u64 {
        let load_id = self.load_id + 1;
        *self = Self {
            document: Some(document),
            load_id,
            ..Self::default()
        };
        tracing::info!(load_id, weeks = self.plan().map(|p| p.weeks.len()).unwrap_or(0), "plan loaded");
        load_id
    }

    pub fn load_id(&self) -> u64 {
        self.load_id
    }

    pub fn document(&self) -> Option<&PlanDocument> {
        self.document.as_ref()
    }

    pub fn plan(&self) -> Option<&StudyPlan> {
        self.document.as_ref().map(|d| &d.plan)
    }

    pub fn is_loaded(&self) -> bool {
        self.document.is_some()
    }

    pub fn is_week_open(&self, week: &str) -> bool {
        self.open_weeks.contains(week)
    }

    pub fn is_overview_open(&self, week: &str) -> bool {
        self.open_overview.contains(week)
    }

    pub fn is_day_open(&self, week: &str, day: &str) -> bool {
        self.open_days.contains(&(week.to_string(), day.to_string()))
    }

    pub fn is_completed(&self, week: &str, day_index: usize) -> bool {
        self.completed.contains(&(week.to_string(), day_index))
    }

    pub fn toggle_week(&mut self, week: &str) -> Vec<PlanEffect> {
        if self.open_weeks.remove(week) {
            return Vec::new();
        }
        self.open_weeks.insert(week.to_string());
        vec![PlanEffect::Count(CounterField::ToggleWeek)]
    }

    /// Opens or closes a week in the overview. The first opening per plan
    /// also asks for the week-by-week reasoning.
    pub fn toggle_overview(&mut self, week: &str) -> Vec<PlanEffect> {
        if self.open_overview.remove(week) {
            return Vec::new();
        }
        self.open_overview.insert(week.to_string());
        let mut effects = vec![PlanEffect::Count(CounterField::ToggleWeek)];
        if self.week_reasoning.is_none() && !self.reasoning_pending {
            self.reasoning_pending = true;
            effects.push(PlanEffect::FetchWeekReasoning);
        }
        effects
    }

    /// Opening a day counts the interaction and, unless the explanation is
    /// cached or already on its way, asks for it.
    pub fn toggle_day(&mut self, week: &str, day_index: usize) -> Vec<PlanEffect> {
        let Some(entry) = self.plan().and_then(|p| p.day(week, day_index)).cloned() else {
            tracing::warn!(week, day_index, "toggle for a day that is not in the plan");
            return Vec::new();
        };
        let key = (week.to_string(), entry.day.clone());
        if self.open_days.remove(&key) {
            return Vec::new();
        }
        self.open_days.insert(key.clone());

        let mut effects = vec![PlanEffect::Count(CounterField::ToggleDay)];
        if !self.explanations.contains_key(&key) && !self.explanations_pending.contains(&key) {
            self.explanations_pending.insert(key);
            effects.push(PlanEffect::FetchExplanation {
                week: week.to_string(),
                day: entry.day.clone(),
                topic: entry.topic.clone(),
            });
        }
        effects
    }

    pub fn toggle_completed(&mut self, week: &str, day_index: usize) -> bool {
        let key = (week.to_string(), day_index);
        if self.completed.remove(&key) {
            false
        } else {
            self.completed.insert(key);
            true
        }
    }

    /// Swaps the `resource_type` resources of one day for `resource`. A bad
    /// week or day reference is logged and leaves the tree as it was.
    pub fn replace_resource(
        &mut self,
        week: &str,
        day_index: usize,
        resource_type: &str,
        resource: Resource,
    ) -> bool {
        let Some(doc) = self.document.as_mut() else {
            tracing::warn!("replace_resource with no plan loaded");
            return false;
        };
        match doc.plan.replace_resource(week, day_index, resource_type, resource) {
            Ok(plan) => {
                doc.plan = plan;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "resource replacement rejected");
                false
            }
        }
    }

    pub fn explanation(&self, week: &str, day: &str) -> Option<&str> {
        self.explanations
            .get(&(week.to_string(), day.to_string()))
            .map(String::as_str)
    }

    pub fn set_explanation(&mut self, week: &str, day: &str, text: String) {
        let key = (week.to_string(), day.to_string());
        self.explanations_pending.remove(&key);
        self.explanations.insert(key, text);
    }

    pub fn is_reasoning_pending(&self) -> bool {
        self.reasoning_pending
    }

    pub fn week_reasoning(&self, week: &str) -> Option<String> {
        self.week_reasoning
            .as_ref()
            .map(|m| parser::week_explanation(m, week))
    }

    pub fn set_week_reasoning(&mut self, reasoning: HashMap<String, String>) {
        self.reasoning_pending = false;
        self.week_reasoning = Some(reasoning);
    }

    pub fn video_status(&self, link: &str) -> Option<&VideoStatus> {
        self.video_status.get(link)
    }

    pub fn availability(&self, link: &str) -> Option<&Availability> {
        self.availability.get(link)
    }

    pub fn apply_resource_update(&mut self, update: ResourceUpdate) {
        match update {
            ResourceUpdate::Status { link, status } => {
                self.video_status.insert(link, status);
            }
            ResourceUpdate::Availability { link, availability } => {
                self.availability.insert(link, availability);
            }
        }
    }

    /// Resource lookups still needed for the current plan, one per link.
    pub fn resource_jobs(&self, research_query: impl Fn(&str) -> String) -> Vec<ResourceJob> {
        let Some(plan) = self.plan() else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        plan.resources()
            .filter(|(_, r)| !r.link.is_empty() && !self.video_status.contains_key(&r.link))
            .filter(|(_, r)| seen.insert(r.link.clone()))
            .map(|(day, r)| ResourceJob {
                link: r.link.clone(),
                research_query: research_query(&day.topic),
                has_thumbnail: r.thumbnail.as_deref().is_some_and(|t| !t.is_empty()),
            })
            .collect()
    }

    /// Rows in display order given what is currently expanded.
    pub fn visible_rows(&self) -> Vec<PlanRow> {
        let Some(doc) = self.document.as_ref() else {
            return Vec::new();
        };
        let mut rows = Vec::new();
        for (week, _) in &doc.overview {
            rows.push(PlanRow::Overview { week: week.clone() });
        }
        for week in &doc.plan.weeks {
            rows.push(PlanRow::Week {
                week: week.label.clone(),
            });
            if !self.is_week_open(&week.label) {
                continue;
            }
            for (day_index, day) in week.days.iter().enumerate() {
                rows.push(PlanRow::Day {
                    week: week.label.clone(),
                    day_index,
                });
                for group in &day.resources {
                    for item in 0..group.items.len() {
                        rows.push(PlanRow::Resource {
                            week: week.label.clone(),
                            day_index,
                            kind: group.kind.clone(),
                            item,
                        });
                    }
                }
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::parser::parse_plan;
    use std::sync::Arc;

    fn tree() -> PlanTree {
        let doc = parse_plan(
            r#"```json
{
  "studyPlan_Overview": {"Week 1": "Foundations", "Week 2": "Practice"},
  "studyPlan": {
    "Week 1": [
      {"day": "Day 1", "topic": "Syntax", "Time": "2 hours",
       "resources": {"YouTube": {"link": "https://youtu.be/one", "title": "One"}}},
      {"day": "Day 2", "topic": "Types", "Time": "2 hours",
       "resources": {"YouTube": [{"link": "https://youtu.be/two", "title": "Two"},
                                 {"link": "https://youtu.be/one", "title": "One again"}]}}
    ],
    "Week 2": [
      {"day": "Day 1", "topic": "Projects", "Time": "3 hours", "resources": {}}
    ]
  }
}
```"#,
        )
        .unwrap();
        let mut t = PlanTree::new();
        t.load(doc);
        t
    }

    fn explanation_fetches(effects: &[PlanEffect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, PlanEffect::FetchExplanation { .. }))
            .count()
    }

    #[test]
    fn opening_a_day_fetches_its_explanation_once() {
        let mut t = tree();

        let first = t.toggle_day("Week 1", 1);
        assert_eq!(explanation_fetches(&first), 1);
        assert!(first.contains(&PlanEffect::Count(CounterField::ToggleDay)));
        assert!(first.contains(&PlanEffect::FetchExplanation {
            week: "Week 1".into(),
            day: "Day 2".into(),
            topic: "Types".into(),
        }));

        // Close and reopen while the first fetch is still in flight.
        assert!(t.toggle_day("Week 1", 1).is_empty());
        assert_eq!(explanation_fetches(&t.toggle_day("Week 1", 1)), 0);

        t.set_explanation("Week 1", "Day 2", "because".into());
        t.toggle_day("Week 1", 1);
        let again = t.toggle_day("Week 1", 1);
        assert_eq!(explanation_fetches(&again), 0);
        assert_eq!(again, vec![PlanEffect::Count(CounterField::ToggleDay)]);
        assert_eq!(t.explanation("Week 1", "Day 2"), Some("because"));
    }

    #[test]
    fn same_day_label_in_another_week_is_a_separate_entry() {
        let mut t = tree();
        t.toggle_day("Week 1", 0);
        let effects = t.toggle_day("Week 2", 0);
        assert_eq!(explanation_fetches(&effects), 1);
    }

    #[test]
    fn week_toggle_counts_only_on_open() {
        let mut t = tree();
        assert_eq!(
            t.toggle_week("Week 1"),
            vec![PlanEffect::Count(CounterField::ToggleWeek)]
        );
        assert!(t.is_week_open("Week 1"));
        assert!(t.toggle_week("Week 1").is_empty());
        assert!(!t.is_week_open("Week 1"));
    }

    #[test]
    fn overview_requests_reasoning_once_per_plan() {
        let mut t = tree();
        assert!(t.toggle_overview("Week 1").contains(&PlanEffect::FetchWeekReasoning));
        assert!(!t.toggle_overview("Week 2").contains(&PlanEffect::FetchWeekReasoning));
        assert!(t.week_reasoning("Week 1").is_none());

        t.set_week_reasoning(HashMap::from([("week1".to_string(), "why".to_string())]));
        assert_eq!(t.week_reasoning("Week 1").as_deref(), Some("why"));
        assert_eq!(
            t.week_reasoning("Week 2").as_deref(),
            Some(parser::NO_WEEK_EXPLANATION)
        );
    }

    #[test]
    fn bad_day_reference_is_a_no_op() {
        let mut t = tree();
        assert!(t.toggle_day("Week 1", 9).is_empty());
        assert!(t.toggle_day("Week 7", 0).is_empty());

        let before = t.plan().unwrap().clone();
        assert!(!t.replace_resource("Week 1", 9, "YouTube", Resource::new("l", "t")));
        assert_eq!(t.plan().unwrap(), &before);
    }

    #[test]
    fn replace_resource_updates_only_the_target_day() {
        let mut t = tree();
        let before = t.plan().unwrap().clone();
        assert!(t.replace_resource("Week 1", 0, "YouTube", Resource::new("https://youtu.be/new", "New")));
        let after = t.plan().unwrap();
        assert!(Arc::ptr_eq(&before.weeks[1], &after.weeks[1]));
        assert!(Arc::ptr_eq(&before.weeks[0].days[1], &after.weeks[0].days[1]));
        assert_eq!(
            after.day("Week 1", 0).unwrap().group("YouTube").unwrap().items[0].link,
            "https://youtu.be/new"
        );
    }

    #[test]
    fn resource_jobs_are_unique_per_link() {
        let mut t = tree();
        let jobs = t.resource_jobs(|topic| format!("q:{topic}"));
        let links: Vec<&str> = jobs.iter().map(|j| j.link.as_str()).collect();
        assert_eq!(links, vec!["https://youtu.be/one", "https://youtu.be/two"]);
        assert_eq!(jobs[0].research_query, "q:Syntax");

        t.apply_resource_update(ResourceUpdate::Status {
            link: "https://youtu.be/one".into(),
            status: VideoStatus::unknown(),
        });
        assert_eq!(t.resource_jobs(|topic| topic.to_string()).len(), 1);
    }

    #[test]
    fn reload_clears_caches_and_bumps_load_id() {
        let mut t = tree();
        let first = t.load_id();
        t.toggle_week("Week 1");
        t.set_explanation("Week 1", "Day 1", "x".into());
        let doc = t.document().unwrap().clone();
        let second = t.load(doc);
        assert!(second > first);
        assert!(!t.is_week_open("Week 1"));
        assert!(t.explanation("Week 1", "Day 1").is_none());
    }

    #[test]
    fn visible_rows_follow_expansion() {
        let mut t = tree();
        assert_eq!(t.visible_rows().len(), 4);
        t.toggle_week("Week 1");
        let rows = t.visible_rows();
        // 2 overview + 2 weeks + 2 days + 3 resources
        assert_eq!(rows.len(), 9);
        assert_eq!(
            rows[4],
            PlanRow::Resource {
                week: "Week 1".into(),
                day_index: 0,
                kind: "YouTube".into(),
                item: 0
            }
        );
    }
}
