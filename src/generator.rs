//! SQL Proposal Generation
//!
//! One interface, two call variants: initial generation from the question and
//! schema context, and correction of a rejected candidate.

use crate::agent_prompts::{sql_correction_prompt, sql_generation_prompt, SQL_SYSTEM_PROMPT};
use crate::llm::ChatModel;
use crate::safety_guardrails::ViolationKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation transport failure: {0}")]
    Transport(String),

    #[error("generation timed out after {0} ms")]
    Timeout(u128),

    #[error("malformed proposal: {detail}")]
    Malformed { raw: String, detail: String },
}

impl GenerationError {
    /// Failures of the generation mechanism itself, as opposed to unusable output.
    pub fn is_hard_failure(&self) -> bool {
        !matches!(self, GenerationError::Malformed { .. })
    }
}

/// A candidate SQL statement with the rationale that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub explanation: String,
    pub sql_query: String,
}

#[derive(Debug, Clone, Copy)]
pub enum ProposalRequest<'a> {
    Initial {
        question: &'a str,
        schema_context: &'a str,
    },
    Correction {
        question: &'a str,
        schema_context: &'a str,
        failed_sql: &'a str,
        reason: ViolationKind,
    },
}

impl<'a> ProposalRequest<'a> {
    pub fn question(&self) -> &'a str {
        match *self {
            ProposalRequest::Initial { question, .. } => question,
            ProposalRequest::Correction { question, .. } => question,
        }
    }

    pub fn is_correction(&self) -> bool {
        matches!(self, ProposalRequest::Correction { .. })
    }

    pub fn to_prompt(&self) -> String {
        match self {
            ProposalRequest::Initial {
                question,
                schema_context,
            } => sql_generation_prompt(question, schema_context),
            ProposalRequest::Correction {
                question,
                schema_context,
                failed_sql,
                reason,
            } => sql_correction_prompt(question, schema_context, failed_sql, &reason.describe()),
        }
    }
}

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn propose(&self, request: ProposalRequest<'_>) -> Result<Proposal, GenerationError>;

    async fn generate(&self, question: &str, schema_context: &str) -> Result<Proposal, GenerationError> {
        self.propose(ProposalRequest::Initial {
            question,
            schema_context,
        })
        .await
    }

    async fn correct(
        &self,
        question: &str,
        schema_context: &str,
        failed_sql: &str,
        reason: ViolationKind,
    ) -> Result<Proposal, GenerationError> {
        self.propose(ProposalRequest::Correction {
            question,
            schema_context,
            failed_sql,
            reason,
        })
        .await
    }
}

/// Generator backed by a chat model returning strict JSON.
pub struct LlmSqlGenerator {
    model: Arc<dyn ChatModel>,
}

impl LlmSqlGenerator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl SqlGenerator for LlmSqlGenerator {
    async fn propose(&self, request: ProposalRequest<'_>) -> Result<Proposal, GenerationError> {
        let prompt = request.to_prompt();
        let raw = self.model.complete(SQL_SYSTEM_PROMPT, &prompt).await?;
        debug!(correction = request.is_correction(), "Model returned {} chars", raw.len());
        parse_proposal(&raw)
    }
}

#[derive(Deserialize)]
struct RawProposal {
    #[serde(default)]
    explanation: Option<serde_json::Value>,
    #[serde(default)]
    sql_query: Option<serde_json::Value>,
}

/// Parse a model response into a [`Proposal`], tolerating markdown fences and
/// chatter around the JSON object.
pub fn parse_proposal(raw: &str) -> Result<Proposal, GenerationError> {
    let malformed = |detail: &str| GenerationError::Malformed {
        raw: raw.to_string(),
        detail: detail.to_string(),
    };

    let block = extract_json_block(raw).ok_or_else(|| malformed("response did not contain a JSON object"))?;
    let parsed: RawProposal = serde_json::from_str(block)
        .map_err(|e| malformed(&format!("invalid JSON: {}", e)))?;

    let explanation = field_text(parsed.explanation);
    let sql_query = field_text(parsed.sql_query);
    if explanation.is_empty() || sql_query.is_empty() {
        return Err(malformed("structured output must include non-empty 'explanation' and 'sql_query'"));
    }

    Ok(Proposal {
        explanation,
        sql_query,
    })
}

fn field_text(value: Option<serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

fn extract_json_block(text: &str) -> Option<&str> {
    let stripped = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&stripped[start..=end])
}
