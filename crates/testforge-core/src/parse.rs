//! Model response parsing.
//!
//! Turns raw generative-model output into validated [`TestCaseDraft`]s.
//! The outcome is a tagged [`ParseOutcome`]: either the reply yielded a
//! list of items (possibly with per-item warnings) or it was rejected as a
//! whole.
//!
//! # Extraction
//!
//! 1. Markdown code fences are removed.
//! 2. The remaining text is parsed as JSON; if that fails, the slice
//!    between the first `[` and the last `]` is parsed instead.
//! 3. A top-level array is the item list. An object wrapper of the form
//!    `{"test_cases": [...]}` is also accepted.
//!
//! # Validation
//!
//! Each item must be an object with a non-empty step list, an expected
//! result, and (when given) a priority and status from the closed enums.
//! Items that fail are dropped with a warning; the reply is rejected as
//! empty only when nothing valid remains.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{Priority, Provenance, TestCase, TestCaseStatus};

/// A validated item, not yet attached to an id or provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseDraft {
    pub title: String,
    pub description: String,
    pub preconditions: Option<String>,
    pub steps: Vec<String>,
    pub expected_result: String,
    pub priority: Priority,
    pub status: TestCaseStatus,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

impl TestCaseDraft {
    pub fn into_test_case(self, id: String, provenance: Provenance, now: i64) -> TestCase {
        TestCase {
            id,
            title: self.title,
            description: self.description,
            preconditions: self.preconditions,
            steps: self.steps,
            expected_result: self.expected_result,
            priority: self.priority,
            status: self.status,
            category: self.category,
            tags: self.tags,
            provenance,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCases {
    pub items: Vec<TestCaseDraft>,
    /// One entry per dropped item.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No item list could be extracted.
    Malformed(String),
    /// An item list was found but every item failed validation.
    Empty { warnings: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Parsed(ParsedCases),
    Rejected(Rejection),
}

impl ParseOutcome {
    /// Collapse into the error taxonomy: `MalformedResponse` or `EmptyResult`.
    pub fn into_result(self) -> Result<ParsedCases> {
        match self {
            ParseOutcome::Parsed(cases) => Ok(cases),
            ParseOutcome::Rejected(Rejection::Malformed(reason)) => {
                Err(Error::MalformedResponse(reason))
            }
            ParseOutcome::Rejected(Rejection::Empty { .. }) => Err(Error::EmptyResult),
        }
    }
}

/// Parse a raw model reply. Items without a priority get `default_priority`.
pub fn parse_response(raw: &str, default_priority: Priority) -> ParseOutcome {
    let items = match extract_items(raw) {
        Ok(items) => items,
        Err(reason) => return ParseOutcome::Rejected(Rejection::Malformed(reason)),
    };

    let mut drafts = Vec::with_capacity(items.len());
    let mut warnings = Vec::new();
    for (i, item) in items.iter().enumerate() {
        match validate_item(i + 1, item, default_priority) {
            Ok(draft) => drafts.push(draft),
            Err(warning) => warnings.push(warning),
        }
    }

    if drafts.is_empty() {
        ParseOutcome::Rejected(Rejection::Empty { warnings })
    } else {
        ParseOutcome::Parsed(ParsedCases {
            items: drafts,
            warnings,
        })
    }
}

fn extract_items(raw: &str) -> std::result::Result<Vec<Value>, String> {
    let text = strip_fences(raw);
    let text = text.trim();
    if text.is_empty() {
        return Err("empty response".to_string());
    }

    let value = match serde_json::from_str::<Value>(text) {
        Ok(v) => v,
        Err(_) => {
            let (start, end) = match (text.find('['), text.rfind(']')) {
                (Some(s), Some(e)) if s < e => (s, e),
                _ => return Err("no JSON array found in response".to_string()),
            };
            serde_json::from_str::<Value>(&text[start..=end])
                .map_err(|e| format!("invalid JSON array: {}", e))?
        }
    };

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => match obj.remove("test_cases") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err("expected a JSON array or an object with a \"test_cases\" array".to_string()),
        },
        _ => Err("expected a JSON array of test cases".to_string()),
    }
}

fn strip_fences(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn validate_item(
    n: usize,
    item: &Value,
    default_priority: Priority,
) -> std::result::Result<TestCaseDraft, String> {
    let obj = item
        .as_object()
        .ok_or_else(|| format!("item {}: not an object", n))?;

    let title = text_field(obj.get("title")).unwrap_or_else(|| format!("Test Case {}", n));
    let label = format!("item {} ({:?})", n, title);

    let steps: Vec<String> = match obj.get("steps") {
        Some(Value::Array(raw_steps)) => raw_steps.iter().filter_map(step_text).collect(),
        Some(Value::String(s)) => s
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    if steps.is_empty() {
        return Err(format!("{}: no steps", label));
    }

    let expected_result = text_field(obj.get("expected_result"))
        .ok_or_else(|| format!("{}: missing expected_result", label))?;

    let priority = match obj.get("priority") {
        None | Some(Value::Null) => default_priority,
        Some(Value::String(s)) => s
            .parse::<Priority>()
            .map_err(|_| format!("{}: unknown priority '{}'", label, s))?,
        Some(other) => return Err(format!("{}: priority must be a string, got {}", label, other)),
    };

    let status = match obj.get("status") {
        None | Some(Value::Null) => TestCaseStatus::Draft,
        Some(Value::String(s)) => s
            .parse::<TestCaseStatus>()
            .map_err(|_| format!("{}: unknown status '{}'", label, s))?,
        Some(other) => return Err(format!("{}: status must be a string, got {}", label, other)),
    };

    let preconditions = match obj.get("preconditions") {
        Some(Value::Array(lines)) => {
            let joined = lines
                .iter()
                .filter_map(|l| text_field(Some(l)))
                .collect::<Vec<_>>()
                .join("\n");
            (!joined.is_empty()).then_some(joined)
        }
        other => text_field(other),
    };

    let tags = match obj.get("tags") {
        Some(Value::Array(tags)) => tags.iter().filter_map(|t| text_field(Some(t))).collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    Ok(TestCaseDraft {
        title,
        description: text_field(obj.get("description")).unwrap_or_default(),
        preconditions,
        steps,
        expected_result,
        priority,
        status,
        category: text_field(obj.get("category")),
        tags,
    })
}

/// Non-blank string field, trimmed.
fn text_field(v: Option<&Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// A step is either a string or `{action, expected_result}`.
fn step_text(v: &Value) -> Option<String> {
    match v {
        Value::String(_) => text_field(Some(v)),
        Value::Object(obj) => {
            let action = text_field(obj.get("action"))?;
            match text_field(obj.get("expected_result")).or_else(|| text_field(obj.get("expected"))) {
                Some(expected) => Some(format!("{} → {}", action, expected)),
                None => Some(action),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, priority: &str) -> String {
        format!(
            r#"{{"title":"{}","description":"d","steps":["open","submit"],"expected_result":"ok","priority":"{}"}}"#,
            title, priority
        )
    }

    #[test]
    fn test_one_bad_priority_out_of_five() {
        let raw = format!(
            "[{},{},{},{},{}]",
            item("a", "low"),
            item("b", "medium"),
            item("c", "urgent"),
            item("d", "high"),
            item("e", "critical")
        );
        let parsed = parse_response(&raw, Priority::Medium).into_result().unwrap();
        assert_eq!(parsed.items.len(), 4);
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.warnings[0].contains("urgent"));
        assert!(parsed.items.iter().all(|d| d.title != "c"));
    }

    #[test]
    fn test_fenced_block_with_prose() {
        let raw = format!(
            "Here are your test cases:\n```json\n[{}]\n```\nLet me know!",
            item("Login works", "HIGH")
        );
        let parsed = parse_response(&raw, Priority::Low).into_result().unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].priority, Priority::High);
        assert_eq!(parsed.items[0].status, TestCaseStatus::Draft);
    }

    #[test]
    fn test_object_wrapper_and_object_steps() {
        let raw = r#"{"test_cases":[{"steps":[{"step_number":1,"action":"Click login","expected_result":"Form shows"}],"expected_result":"done","tags":["auth"]}]}"#;
        let parsed = parse_response(raw, Priority::Critical).into_result().unwrap();
        let d = &parsed.items[0];
        assert_eq!(d.title, "Test Case 1");
        assert_eq!(d.steps, vec!["Click login → Form shows".to_string()]);
        assert_eq!(d.priority, Priority::Critical);
        assert_eq!(d.tags, vec!["auth".to_string()]);
    }

    #[test]
    fn test_malformed_is_rejected() {
        let out = parse_response("I could not produce test cases, sorry.", Priority::Medium);
        assert!(matches!(out, ParseOutcome::Rejected(Rejection::Malformed(_))));
        assert!(matches!(out.into_result(), Err(Error::MalformedResponse(_))));

        let out = parse_response("[{\"title\": ", Priority::Medium);
        assert!(matches!(out.into_result(), Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn test_all_items_invalid_is_empty_result() {
        let raw = r#"[{"title":"x","steps":[],"expected_result":"y"}, 42]"#;
        match parse_response(raw, Priority::Medium) {
            ParseOutcome::Rejected(Rejection::Empty { warnings }) => assert_eq!(warnings.len(), 2),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(
            parse_response("[]", Priority::Medium).into_result(),
            Err(Error::EmptyResult)
        );
    }

    #[test]
    fn test_unknown_status_dropped() {
        let raw = r#"[{"title":"x","steps":["a"],"expected_result":"y","status":"published"}]"#;
        assert_eq!(
            parse_response(raw, Priority::Medium).into_result(),
            Err(Error::EmptyResult)
        );
    }
}
