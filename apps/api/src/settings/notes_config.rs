//! The notes repository's YAML config (`commit.yml`).
//!
//! Parsed with serde_yaml, checked, then split into the four JSON sections the
//! settings row stores.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{AppError, ValidationIssue};

const LLM_PROVIDERS: [&str; 4] = ["openai", "anthropic", "gemini", "none"];
const CHUNKING_MODES: [&str; 2] = ["auto", "off"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseConfig {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub deck: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub mode: String,
    pub max_chars: u32,
    pub overlap_lines: u32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            mode: "auto".into(),
            max_chars: 80_000,
            overlap_lines: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub enable_generated: bool,
    pub paraphrase_strength: f64,
    pub max_cards_per_block: u32,
    pub neighbor_context_lines: u32,
    pub full_diff: bool,
    pub chunking: ChunkingConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "none".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.2,
            max_output_tokens: 1200,
            enable_generated: false,
            paraphrase_strength: 0.6,
            max_cards_per_block: 3,
            neighbor_context_lines: 20,
            full_diff: false,
            chunking: ChunkingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotesConfig {
    pub courses: BTreeMap<String, CourseConfig>,
    #[serde(default = "default_envs")]
    pub envs_to_extract: Vec<String>,
    #[serde(default = "default_daily_new_limit")]
    pub daily_new_limit: u32,
    #[serde(default)]
    pub priorities: BTreeMap<String, i64>,
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_envs() -> Vec<String> {
    [
        "definition",
        "theorem",
        "proposition",
        "lemma",
        "corollary",
        "example",
        "remark",
    ]
    .map(String::from)
    .to_vec()
}

fn default_daily_new_limit() -> u32 {
    30
}

fn default_tags() -> Vec<String> {
    ["auto", "from-tex", "commit:{sha}", "file:{file}"]
        .map(String::from)
        .to_vec()
}

/// The stored form: one JSON value per settings column.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSections {
    pub courses: Value,
    pub llm: Value,
    pub parsing: Value,
    pub cards: Value,
}

impl NotesConfig {
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.courses.is_empty() {
            issues.push(ValidationIssue::new("courses", "at least one course is required"));
        }
        for (name, course) in &self.courses {
            if course.paths.iter().all(|p| p.trim().is_empty()) {
                issues.push(ValidationIssue::new(
                    format!("courses.{name}.paths"),
                    "at least one glob pattern is required",
                ));
            }
            if course.deck.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("courses.{name}.deck"),
                    "a deck name is required",
                ));
            }
        }

        if self.envs_to_extract.is_empty() {
            issues.push(ValidationIssue::new(
                "envs_to_extract",
                "at least one environment must be specified",
            ));
        }

        let llm = &self.llm;
        if !LLM_PROVIDERS.contains(&llm.provider.as_str()) {
            issues.push(ValidationIssue::new(
                "llm.provider",
                format!("must be one of {}", LLM_PROVIDERS.join(", ")),
            ));
        }
        if !(0.0..=2.0).contains(&llm.temperature) {
            issues.push(ValidationIssue::new("llm.temperature", "must be between 0 and 2"));
        }
        if !(0.0..=1.0).contains(&llm.paraphrase_strength) {
            issues.push(ValidationIssue::new(
                "llm.paraphrase_strength",
                "must be between 0 and 1",
            ));
        }
        if llm.max_output_tokens == 0 {
            issues.push(ValidationIssue::new(
                "llm.max_output_tokens",
                "must be greater than 0",
            ));
        }
        if !CHUNKING_MODES.contains(&llm.chunking.mode.as_str()) {
            issues.push(ValidationIssue::new(
                "llm.chunking.mode",
                "must be 'auto' or 'off'",
            ));
        }

        issues
    }

    pub fn into_sections(self) -> ConfigSections {
        let chunking = json!(self.llm.chunking);
        ConfigSections {
            courses: json!(self.courses),
            parsing: json!({
                "envs_to_extract": self.envs_to_extract,
                "chunking": chunking,
            }),
            cards: json!({
                "tags": self.tags,
                "daily_new_limit": self.daily_new_limit,
                "priorities": self.priorities,
            }),
            llm: json!(self.llm),
        }
    }
}

/// Parses and checks a config document. Syntax and schema problems are both
/// reported as validation issues.
pub fn parse_notes_config(yaml: &str) -> Result<NotesConfig, AppError> {
    if yaml.trim().is_empty() {
        return Err(AppError::invalid_fields(
            "Invalid notes config",
            vec![ValidationIssue::new("$", "config file is empty")],
        ));
    }

    let config: NotesConfig = serde_yaml::from_str(yaml).map_err(|e| {
        let path = e
            .location()
            .map(|l| format!("line {}, column {}", l.line(), l.column()))
            .unwrap_or_else(|| "$".to_string());
        AppError::invalid_fields(
            "Invalid notes config",
            vec![ValidationIssue::new(path, e.to_string())],
        )
    })?;

    let issues = config.validate();
    if issues.is_empty() {
        Ok(config)
    } else {
        Err(AppError::invalid_fields("Invalid notes config", issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
courses:
  math214:
    paths: ["math214/**/*.tex"]
    deck: "Real Analysis"
  cs101:
    paths: ["cs101/*.tex"]
    deck: "Intro CS"
tags: [auto, "commit:{sha}"]
llm:
  provider: anthropic
  temperature: 0.4
  chunking:
    mode: "off"
chat:
  enabled: true
"#;

    fn issue_paths(err: AppError) -> Vec<String> {
        match err {
            AppError::Validation { issues, .. } => issues.into_iter().map(|i| i.path).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_applies_defaults() {
        let config = parse_notes_config(SAMPLE).unwrap();
        assert_eq!(config.courses.len(), 2);
        assert_eq!(config.envs_to_extract.len(), 7);
        assert_eq!(config.daily_new_limit, 30);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.chunking.mode, "off");
        assert_eq!(config.llm.chunking.max_chars, 80_000);
    }

    #[test]
    fn test_sections_split() {
        let sections = parse_notes_config(SAMPLE).unwrap().into_sections();
        assert_eq!(sections.courses["math214"]["deck"], "Real Analysis");
        assert_eq!(sections.parsing["envs_to_extract"][0], "definition");
        assert_eq!(sections.parsing["chunking"]["mode"], "off");
        assert_eq!(sections.cards["tags"][1], "commit:{sha}");
        assert_eq!(sections.llm["provider"], "anthropic");
    }

    #[test]
    fn test_invalid_values_reported_together() {
        let yaml = r#"
courses:
  math214:
    paths: []
    deck: ""
envs_to_extract: []
llm:
  provider: mistral
  temperature: 3.5
  paraphrase_strength: -0.1
"#;
        let paths = issue_paths(parse_notes_config(yaml).unwrap_err());
        assert_eq!(
            paths,
            [
                "courses.math214.paths",
                "courses.math214.deck",
                "envs_to_extract",
                "llm.provider",
                "llm.temperature",
                "llm.paraphrase_strength",
            ]
        );
    }

    #[test]
    fn test_missing_courses_is_schema_error() {
        let paths = issue_paths(parse_notes_config("tags: [auto]\n").unwrap_err());
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(issue_paths(parse_notes_config("  \n").unwrap_err()), ["$"]);
    }
}
