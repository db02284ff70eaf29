//! Prompt assembly for test case generation.
//!
//! [`assemble_prompt`] is a pure function: the same inputs always produce
//! the same prompt. The configuration is validated first so that an
//! unsupported request fails with [`Error::InvalidConfig`] before any
//! external call is made.
//!
//! The prompt always ends with the canonical output schema
//! ([`output_schema`]), whose fields and enumerations match what
//! [`parse_response`](crate::parse::parse_response) accepts.

use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::models::{
    Complexity, GenerationConfig, Priority, ScoredChunk, TestCaseStatus, TestType,
};

/// Everything the assembler needs for one prompt.
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    pub scenario: Option<&'a str>,
    pub requirement: Option<&'a str>,
    pub passages: &'a [ScoredChunk],
    pub config: &'a GenerationConfig,
    /// Append a stricter formatting reminder (used after a malformed reply).
    pub strict: bool,
}

/// Build the model prompt.
///
/// # Errors
///
/// [`Error::InvalidConfig`] if the configuration is out of bounds, and
/// [`Error::InvalidInput`] if there is neither context, scenario, nor
/// requirement to generate from.
pub fn assemble_prompt(input: &PromptInput<'_>) -> Result<String> {
    input.config.validate()?;

    let scenario = non_blank(input.scenario);
    let requirement = non_blank(input.requirement);
    if input.passages.is_empty() && scenario.is_none() && requirement.is_none() {
        return Err(Error::InvalidInput(
            "nothing to generate from: no context, scenario, or requirement".to_string(),
        ));
    }

    let cfg = input.config;
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "You are a senior QA engineer. Generate exactly {} {} test case{} of {} complexity.",
        cfg.count,
        cfg.test_type,
        if cfg.count == 1 { "" } else { "s" },
        cfg.complexity
    );
    let _ = writeln!(prompt, "{}", focus_for(cfg.test_type));
    let _ = writeln!(prompt, "{}", depth_for(cfg.complexity));
    prompt.push('\n');

    if !input.passages.is_empty() {
        prompt.push_str("DOCUMENT CONTEXT:\n");
        for p in input.passages {
            let _ = writeln!(
                prompt,
                "[document {} · passage {}]\n{}\n",
                p.chunk.document_id, p.chunk.chunk_index, p.chunk.text
            );
        }
    }

    if let Some(s) = scenario {
        let _ = writeln!(prompt, "SCENARIO:\n{}\n", s);
    }
    if let Some(r) = requirement {
        let _ = writeln!(prompt, "SPECIFIC REQUIREMENTS:\n{}\n", r);
    }

    prompt.push_str(&output_schema(cfg.default_priority));

    if input.strict {
        prompt.push_str(
            "\nIMPORTANT: your previous reply could not be parsed. Reply with the JSON array \
             only. Do not wrap it in prose. Every item must contain a non-empty \"steps\" \
             array and a \"priority\" taken from the allowed values.\n",
        );
    }

    Ok(prompt)
}

/// The canonical instruction block describing the required reply format.
pub fn output_schema(default_priority: Priority) -> String {
    let priorities = join_values(Priority::ALL.iter().map(|p| p.as_str()));
    let statuses = join_values(TestCaseStatus::ALL.iter().map(|s| s.as_str()));

    format!(
        r#"OUTPUT FORMAT:
Respond with a JSON array. Each element is an object with these fields:
  "title":           string, required
  "description":     string, what is being tested
  "preconditions":   string, optional
  "steps":           array of strings, required, at least one step, in execution order
  "expected_result": string, required, the overall measurable outcome
  "priority":        one of {priorities}; use "{default_priority}" when unsure
  "status":          optional, one of {statuses}; omit to mean "draft"
  "category":        string, optional
  "tags":            array of strings, optional

Example:
[
  {{
    "title": "Reject login with wrong password",
    "description": "Verifies the login form refuses invalid credentials",
    "preconditions": "A registered user exists",
    "steps": ["Open the login page", "Enter a valid email and a wrong password", "Submit the form"],
    "expected_result": "An error message is shown and no session is created",
    "priority": "{default_priority}",
    "category": "authentication",
    "tags": ["login", "negative"]
  }}
]

Respond with only the JSON array, no additional text.
"#
    )
}

fn join_values<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values
        .map(|v| format!("\"{}\"", v))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn focus_for(test_type: TestType) -> &'static str {
    match test_type {
        TestType::Functional => {
            "Focus on observable behaviour: valid flows, invalid input, boundary values, and error handling."
        }
        TestType::Performance => {
            "Focus on throughput, latency, concurrency limits, and behaviour under sustained or peak load."
        }
        TestType::Security => {
            "Focus on authentication, authorization, input validation, data exposure, and abuse cases."
        }
    }
}

fn depth_for(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Low => "Keep each case short: two to four steps.",
        Complexity::Medium => "Use realistic multi-step flows with clear checkpoints.",
        Complexity::High => {
            "Cover multi-stage flows, interacting features, and edge cases; steps may be numerous."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn passage(text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: "c".into(),
                document_id: "doc-9".into(),
                chunk_index: 2,
                start_char: 0,
                char_len: text.chars().count(),
                text: text.into(),
                hash: String::new(),
            },
            score: 0.5,
        }
    }

    #[test]
    fn test_prompt_contains_context_scenario_and_schema() {
        let cfg = GenerationConfig {
            test_type: TestType::Security,
            count: 3,
            complexity: Complexity::High,
            default_priority: Priority::High,
        };
        let passages = vec![passage("Users sign in with email and password.")];
        let prompt = assemble_prompt(&PromptInput {
            scenario: Some("login"),
            requirement: Some("lock after 5 failures"),
            passages: &passages,
            config: &cfg,
            strict: false,
        })
        .unwrap();

        assert!(prompt.contains("exactly 3 security test cases"));
        assert!(prompt.contains("[document doc-9 · passage 2]"));
        assert!(prompt.contains("Users sign in with email and password."));
        assert!(prompt.contains("SCENARIO:\nlogin"));
        assert!(prompt.contains("lock after 5 failures"));
        assert!(prompt.contains("\"low\" | \"medium\" | \"high\" | \"critical\""));
        assert!(!prompt.contains("IMPORTANT"));
    }

    #[test]
    fn test_invalid_count_fails_before_assembly() {
        let cfg = GenerationConfig {
            count: 0,
            ..Default::default()
        };
        let err = assemble_prompt(&PromptInput {
            scenario: Some("x"),
            requirement: None,
            passages: &[],
            config: &cfg,
            strict: false,
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_nothing_to_generate_from() {
        let err = assemble_prompt(&PromptInput {
            scenario: Some("   "),
            requirement: None,
            passages: &[],
            config: &GenerationConfig::default(),
            strict: false,
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_strict_and_deterministic() {
        let cfg = GenerationConfig::default();
        let input = PromptInput {
            scenario: None,
            requirement: Some("checkout"),
            passages: &[],
            config: &cfg,
            strict: true,
        };
        let a = assemble_prompt(&input).unwrap();
        let b = assemble_prompt(&input).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("could not be parsed"));
    }
}
