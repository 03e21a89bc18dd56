//! Study plan tree: week → day → resource.
//!
//! Weeks and days are held behind `Arc` so an edit can rebuild only the path
//! from the root to the changed leaf; every other node is shared with the
//! previous tree.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::PlanError;

/// Sentinel for a statistic that has not been (or could not be) fetched.
pub const NOT_AVAILABLE: &str = "N/A";

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

/// Accepts `"1234"`, `1234` or `null` and keeps the value as display text.
fn stat_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(match v {
        Value::String(s) if !s.trim().is_empty() => s,
        Value::Number(n) => n.to_string(),
        _ => not_available(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default = "not_available", deserialize_with = "stat_text")]
    pub views: String,
    #[serde(default = "not_available", deserialize_with = "stat_text")]
    pub likes: String,
}

impl Resource {
    pub fn new(link: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            title: title.into(),
            thumbnail: None,
            views: not_available(),
            likes: not_available(),
        }
    }
}

/// All resources of one type ("YouTube", "Blog", ...) for a day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroup {
    pub kind: String,
    pub items: Vec<Resource>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayEntry {
    pub day: String,
    pub topic: String,
    pub time: String,
    pub resources: Vec<ResourceGroup>,
}

impl DayEntry {
    pub fn group(&self, kind: &str) -> Option<&ResourceGroup> {
        self.resources.iter().find(|g| g.kind == kind)
    }

    fn from_value(index: usize, value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let text = |key: &str| -> Option<String> {
            obj.get(key).and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };

        let day = text("day").unwrap_or_else(|| format!("Day {}", index + 1));
        let topic = text("topic").unwrap_or_default();
        let time = text("Time").or_else(|| text("time")).unwrap_or_default();

        let mut resources = Vec::new();
        if let Some(map) = obj.get("resources").and_then(|v| v.as_object()) {
            for (kind, raw) in map {
                // A single resource and a list of resources are both accepted.
                let raw_items: Vec<&Value> = match raw {
                    Value::Array(arr) => arr.iter().collect(),
                    other => vec![other],
                };
                let items = raw_items
                    .into_iter()
                    .filter(|v| v.is_object())
                    .filter_map(|v| match serde_json::from_value::<Resource>(v.clone()) {
                        Ok(r) => Some(r),
                        Err(e) => {
                            tracing::debug!(kind = %kind, error = %e, "skipping malformed resource");
                            None
                        }
                    })
                    .collect();
                resources.push(ResourceGroup {
                    kind: kind.clone(),
                    items,
                });
            }
        }

        Some(Self {
            day,
            topic,
            time,
            resources,
        })
    }

    fn to_value(&self) -> Value {
        let mut resources = Map::new();
        for group in &self.resources {
            let items = group
                .items
                .iter()
                .filter_map(|r| serde_json::to_value(r).ok())
                .collect();
            resources.insert(group.kind.clone(), Value::Array(items));
        }
        let mut obj = Map::new();
        obj.insert("day".into(), Value::String(self.day.clone()));
        obj.insert("topic".into(), Value::String(self.topic.clone()));
        obj.insert("Time".into(), Value::String(self.time.clone()));
        obj.insert("resources".into(), Value::Object(resources));
        Value::Object(obj)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Week {
    pub label: String,
    pub days: Vec<Arc<DayEntry>>,
}

/// Weeks in generation order. Labels are display text ("Week 1"), not keys
/// normalized in any way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudyPlan {
    pub weeks: Vec<Arc<Week>>,
}

impl StudyPlan {
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let mut weeks = Vec::with_capacity(obj.len());
        for (label, days_raw) in obj {
            let Some(arr) = days_raw.as_array() else {
                tracing::debug!(week = %label, "week entry is not a list; skipping");
                continue;
            };
            let days = arr
                .iter()
                .enumerate()
                .filter_map(|(i, v)| DayEntry::from_value(i, v))
                .map(Arc::new)
                .collect();
            weeks.push(Arc::new(Week {
                label: label.clone(),
                days,
            }));
        }
        Some(Self { weeks })
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        for week in &self.weeks {
            let days = week.days.iter().map(|d| d.to_value()).collect();
            obj.insert(week.label.clone(), Value::Array(days));
        }
        Value::Object(obj)
    }

    pub fn week(&self, label: &str) -> Option<&Arc<Week>> {
        self.weeks.iter().find(|w| w.label == label)
    }

    pub fn day(&self, week: &str, day_index: usize) -> Option<&Arc<DayEntry>> {
        self.week(week).and_then(|w| w.days.get(day_index))
    }

    pub fn is_empty(&self) -> bool {
        self.weeks.is_empty()
    }

    /// Returns a new plan where the `resource_type` group of one day holds
    /// exactly `resource`. Sibling weeks and days are shared with `self`.
    pub fn replace_resource(
        &self,
        week: &str,
        day_index: usize,
        resource_type: &str,
        resource: Resource,
    ) -> Result<StudyPlan, PlanError> {
        let week_pos = self
            .weeks
            .iter()
            .position(|w| w.label == week)
            .ok_or_else(|| PlanError::UnknownWeek(week.to_string()))?;
        let old_week = &self.weeks[week_pos];
        let old_day = old_week
            .days
            .get(day_index)
            .ok_or_else(|| PlanError::DayOutOfRange {
                week: week.to_string(),
                index: day_index,
                len: old_week.days.len(),
            })?;

        let mut day = DayEntry::clone(old_day);
        match day.resources.iter_mut().find(|g| g.kind == resource_type) {
            Some(group) => group.items = vec![resource],
            None => day.resources.push(ResourceGroup {
                kind: resource_type.to_string(),
                items: vec![resource],
            }),
        }

        let mut days = old_week.days.clone();
        days[day_index] = Arc::new(day);

        let mut weeks = self.weeks.clone();
        weeks[week_pos] = Arc::new(Week {
            label: old_week.label.clone(),
            days,
        });
        Ok(StudyPlan { weeks })
    }

    /// Every resource in display order with the topic of the day it belongs to.
    pub fn resources(&self) -> impl Iterator<Item = (&DayEntry, &Resource)> + '_ {
        self.weeks.iter().flat_map(|w| {
            w.days.iter().flat_map(|d| {
                d.resources
                    .iter()
                    .flat_map(move |g| g.items.iter().map(move |r| (d.as_ref(), r)))
            })
        })
    }
}

/// A parsed plan response: the per-week overview, the detailed plan and any
/// other top-level fields the backend sent along.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanDocument {
    pub overview: Vec<(String, String)>,
    pub plan: StudyPlan,
    pub extra: Map<String, Value>,
}

impl PlanDocument {
    /// Requires a top-level object with a `studyPlan` object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let plan = StudyPlan::from_value(obj.get("studyPlan")?)?;

        let overview = obj
            .get("studyPlan_Overview")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .map(|(k, v)| {
                        let text = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), text)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let extra = obj
            .iter()
            .filter(|(k, _)| k.as_str() != "studyPlan" && k.as_str() != "studyPlan_Overview")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Some(Self {
            overview,
            plan,
            extra,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        if !self.overview.is_empty() {
            let overview = self
                .overview
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            obj.insert("studyPlan_Overview".into(), Value::Object(overview));
        }
        obj.insert("studyPlan".into(), self.plan.to_value());
        for (k, v) in &self.extra {
            obj.insert(k.clone(), v.clone());
        }
        Value::Object(obj)
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.to_value()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> StudyPlan {
        StudyPlan::from_value(&json!({
            "Week 1": [
                {"day": "Day 1", "topic": "Variables", "Time": "2 hours",
                 "resources": {"YouTube": {"link": "https://youtu.be/aaaaaaaaaaa", "title": "Vars"}}},
                {"day": "Day 2", "topic": "Loops", "Time": "2 hours",
                 "resources": {"YouTube": [
                    {"link": "https://youtu.be/bbbbbbbbbbb", "title": "Loops", "views": 1200, "likes": "30"}
                 ]}}
            ],
            "Week 2": [
                {"day": "Day 1", "topic": "Functions", "Time": "1 hour", "resources": {}}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn single_resource_is_normalized_to_list() {
        let plan = sample();
        let day = plan.day("Week 1", 0).unwrap();
        let group = day.group("YouTube").unwrap();
        assert_eq!(group.items.len(), 1);
        assert_eq!(group.items[0].views, NOT_AVAILABLE);
        assert_eq!(group.items[0].likes, NOT_AVAILABLE);

        let day2 = plan.day("Week 1", 1).unwrap();
        assert_eq!(day2.group("YouTube").unwrap().items[0].views, "1200");
    }

    #[test]
    fn week_order_follows_the_source() {
        let plan = StudyPlan::from_value(&json!({"Week 10": [], "Week 2": [], "Week 1": []})).unwrap();
        let labels: Vec<&str> = plan.weeks.iter().map(|w| w.label.as_str()).collect();
        assert_eq!(labels, vec!["Week 10", "Week 2", "Week 1"]);
    }

    #[test]
    fn replace_resource_shares_untouched_nodes() {
        let plan = sample();
        let picked = Resource::new("https://youtu.be/ccccccccccc", "Better loops");
        let next = plan
            .replace_resource("Week 1", 1, "YouTube", picked.clone())
            .unwrap();

        assert_eq!(next.day("Week 1", 1).unwrap().group("YouTube").unwrap().items, vec![picked.clone()]);
        assert!(Arc::ptr_eq(&plan.weeks[1], &next.weeks[1]));
        assert!(Arc::ptr_eq(&plan.weeks[0].days[0], &next.weeks[0].days[0]));
        assert!(!Arc::ptr_eq(&plan.weeks[0], &next.weeks[0]));
        // The source tree is untouched.
        assert_eq!(plan.day("Week 1", 1).unwrap().group("YouTube").unwrap().items[0].title, "Loops");

        let again = next.replace_resource("Week 1", 1, "YouTube", picked).unwrap();
        assert_eq!(again, next);
    }

    #[test]
    fn replace_resource_adds_missing_group() {
        let plan = sample();
        let next = plan
            .replace_resource("Week 2", 0, "YouTube", Resource::new("l", "t"))
            .unwrap();
        assert_eq!(next.day("Week 2", 0).unwrap().resources.len(), 1);
    }

    #[test]
    fn replace_resource_rejects_bad_references() {
        let plan = sample();
        let r = Resource::new("l", "t");
        assert!(matches!(
            plan.replace_resource("Week 9", 0, "YouTube", r.clone()),
            Err(PlanError::UnknownWeek(_))
        ));
        assert!(matches!(
            plan.replace_resource("Week 1", 5, "YouTube", r),
            Err(PlanError::DayOutOfRange { index: 5, len: 2, .. })
        ));
    }

    #[test]
    fn document_round_trips_through_json() {
        let doc = PlanDocument::from_value(&json!({
            "studyPlan_Overview": {"Week 1": "Basics"},
            "studyPlan": {"Week 1": [{"day": "Day 1", "topic": "Intro", "Time": "1h", "resources": {}}]},
            "notes": "keep me"
        }))
        .unwrap();
        let back = PlanDocument::from_value(&doc.to_value()).unwrap();
        assert_eq!(back, doc);
        assert_eq!(back.extra.get("notes"), Some(&json!("keep me")));
    }
}
