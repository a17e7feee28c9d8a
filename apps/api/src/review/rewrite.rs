//! Card rewriting. `AppState` carries an `Arc<dyn CardRewriter>`; the default
//! backend asks the LLM for a clearer phrasing of the card.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AppError;
use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, PRESERVE_LATEX_INSTRUCTION};
use crate::llm_client::LlmClient;
use crate::models::card::CardSuggestionRow;
use crate::review::prompts::{REWRITE_PROMPT, REWRITE_SYSTEM};

/// Input for one rewrite: the card's current effective text plus context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewriteRequest {
    pub front: String,
    pub back: String,
    pub card_type: String,
    pub course: Option<String>,
    pub environment: Option<String>,
    /// Slot of the card within its source block, from the converter metadata.
    pub slot: Option<String>,
}

impl RewriteRequest {
    pub fn from_card(card: &CardSuggestionRow) -> Self {
        let slot = card.metadata.get("slot").and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        Self {
            front: card.effective_front().to_string(),
            back: card.effective_back().to_string(),
            card_type: card.card_type.clone(),
            course: card.course.clone(),
            environment: card.environment.clone(),
            slot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RewrittenCard {
    pub front: String,
    pub back: String,
}

#[async_trait]
pub trait CardRewriter: Send + Sync {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<RewrittenCard, AppError>;
}

pub struct LlmCardRewriter {
    llm: LlmClient,
}

impl LlmCardRewriter {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl CardRewriter for LlmCardRewriter {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<RewrittenCard, AppError> {
        let prompt = build_rewrite_prompt(request);
        let system = format!("{REWRITE_SYSTEM} {PRESERVE_LATEX_INSTRUCTION} {JSON_ONLY_SYSTEM}");

        let rewritten: RewrittenCard = self.llm.call_json(&prompt, &system).await?;
        debug!(
            "Rewrote {} card ({} -> {} chars on front)",
            request.card_type,
            request.front.len(),
            rewritten.front.len()
        );
        Ok(rewritten)
    }
}

fn build_rewrite_prompt(request: &RewriteRequest) -> String {
    fill_template(
        REWRITE_PROMPT,
        &[
            ("{course}", request.course.as_deref().unwrap_or("unknown")),
            (
                "{environment}",
                request.environment.as_deref().unwrap_or("unknown"),
            ),
            ("{card_type}", &request.card_type),
            ("{slot}", request.slot.as_deref().unwrap_or("none")),
            ("{front}", &request.front),
            ("{back}", &request.back),
        ],
    )
}

/// Substitutes placeholders in one pass over the template, so values that
/// themselves contain `{back}` and the like are copied verbatim.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        match values.iter().find(|(key, _)| rest.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &rest[key.len()..];
            }
            None => {
                out.push('{');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
