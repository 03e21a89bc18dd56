//! Pulls structured data out of free-form model output.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::model::PlanDocument;

pub const NO_WEEK_EXPLANATION: &str = "No explanation available for this week.";

fn fenced_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*(?i:json)?[ \t]*\r?\n?(.*?)```").expect("static regex")
    })
}

/// Returns the first top-level `{...}` run, honouring string literals so a
/// brace inside a value does not end the object early.
fn first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Locates the JSON payload in `text`: the first fenced block that holds an
/// object, otherwise the first brace-delimited run. Only that first candidate
/// is tried.
pub fn extract_json(text: &str) -> Option<&str> {
    for caps in fenced_re().captures_iter(text) {
        let Some(body) = caps.get(1) else { continue };
        let body = body.as_str().trim();
        if body.starts_with('{') {
            return first_object(body).or(Some(body));
        }
    }
    first_object(text)
}

/// Parses the embedded JSON object, or `None` when there is none or it does
/// not parse. Never panics.
pub fn parse_json_object(text: &str) -> Option<Value> {
    let raw = extract_json(text)?;
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => Some(v),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "embedded JSON did not parse");
            None
        }
    }
}

/// A plan response, or `None` when the text should be shown as markdown.
pub fn parse_plan(text: &str) -> Option<PlanDocument> {
    parse_json_object(text).and_then(|v| PlanDocument::from_value(&v))
}

/// Week labels are matched loosely: "Week 1", "week1" and "WEEK 1" agree.
pub fn normalize_week_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("static regex"))
}

fn bare_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([{,])\s*([A-Za-z_][\w ]*?)\s*:"#).expect("static regex"))
}

fn lenient_object(raw: &str) -> Option<serde_json::Map<String, Value>> {
    let cleaned = raw
        .replace("```json", "")
        .replace("```", "")
        .replace(|c: char| c == '\r' || c == '\n', " ");
    let cleaned = trailing_comma_re().replace_all(&cleaned, "$1");
    let candidate = first_object(&cleaned).unwrap_or(&*cleaned);

    if let Ok(Value::Object(m)) = serde_json::from_str::<Value>(candidate) {
        return Some(m);
    }
    // Last resort: quote bare keys. Only tried after a strict parse fails since
    // it can also touch text inside values.
    let quoted = bare_key_re().replace_all(candidate, r#"$1"$2":"#);
    match serde_json::from_str::<Value>(&quoted) {
        Ok(Value::Object(m)) => Some(m),
        _ => None,
    }
}

fn format_week_text(text: &str) -> String {
    text.replace("Content selection:", "\n- Content selection:")
        .replace("Connection:", "\n- Connection:")
        .trim()
        .to_string()
}

/// Turns a `/plan-reasoning` payload into per-week explanations keyed by
/// [`normalize_week_key`].
pub fn parse_week_reasoning(payload: &Value) -> HashMap<String, String> {
    let map = match payload {
        Value::Object(m) => Some(m.clone()),
        Value::String(s) => lenient_object(s),
        _ => None,
    };
    let Some(map) = map else {
        tracing::debug!("plan reasoning payload is not an object");
        return HashMap::new();
    };

    map.into_iter()
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (normalize_week_key(&k), format_week_text(&text))
        })
        .collect()
}

pub fn week_explanation(reasoning: &HashMap<String, String>, week: &str) -> String {
    reasoning
        .get(&normalize_week_key(week))
        .cloned()
        .unwrap_or_else(|| NO_WEEK_EXPLANATION.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_fenced_block() {
        let text = "Here is your plan:\n```json\n{\"studyPlan\": {\"Week 1\": []}}\n```\nEnjoy!";
        assert_eq!(extract_json(text), Some("{\"studyPlan\": {\"Week 1\": []}}"));
        let v = parse_json_object(text).unwrap();
        assert_eq!(v, json!({"studyPlan": {"Week 1": []}}));
    }

    #[test]
    fn extracts_raw_braces() {
        let text = "Sure. {\"a\": {\"b\": \"x } y\"}} trailing";
        assert_eq!(parse_json_object(text), Some(json!({"a": {"b": "x } y"}})));
    }

    #[test]
    fn first_match_wins() {
        let text = "{\"first\": 1} and later {\"second\": 2}";
        assert_eq!(parse_json_object(text), Some(json!({"first": 1})));

        // A broken first candidate is not rescued by a later one.
        let text = "{\"first\": } then {\"second\": 2}";
        assert_eq!(parse_json_object(text), None);
    }

    #[test]
    fn no_json_yields_none() {
        assert_eq!(parse_json_object("Just some **markdown** here."), None);
        assert!(parse_plan("Just some **markdown** here.").is_none());
        assert!(parse_plan("{ unterminated").is_none());
    }

    #[test]
    fn plan_requires_study_plan_key() {
        assert!(parse_plan("{\"summary\": \"no plan\"}").is_none());
        let doc = parse_plan(
            "```json\n{\"studyPlan_Overview\": {\"Week 1\": \"Basics\"}, \"studyPlan\": {\"Week 1\": []}}\n```",
        )
        .unwrap();
        assert_eq!(doc.overview, vec![("Week 1".to_string(), "Basics".to_string())]);
        assert_eq!(doc.plan.weeks.len(), 1);
    }

    #[test]
    fn week_reasoning_from_lenient_text() {
        let payload = json!(
            "```json\n{\n  Week 1: \"Start simple. Content selection: short videos. Connection: builds up.\",\n  \"Week 2\": \"More\",\n}\n```"
        );
        let map = parse_week_reasoning(&payload);
        let w1 = week_explanation(&map, "Week 1");
        assert!(w1.starts_with("Start simple."));
        assert!(w1.contains("\n- Content selection: short videos."));
        assert!(w1.contains("\n- Connection: builds up."));
        assert_eq!(week_explanation(&map, "WEEK2"), "More");
        assert_eq!(week_explanation(&map, "Week 3"), NO_WEEK_EXPLANATION);
    }

    #[test]
    fn week_reasoning_from_object() {
        let map = parse_week_reasoning(&json!({"Week 1": "Why this week"}));
        assert_eq!(week_explanation(&map, "week 1"), "Why this week");
        assert!(parse_week_reasoning(&json!(42)).is_empty());
    }
}
