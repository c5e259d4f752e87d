//! Agent configuration
//!
//! Every tunable of the workflow lives in [`AgentConfig`], which is built once
//! (usually from the environment) and handed to constructors explicitly.

use crate::error::{AgentError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TOP_TABLES: usize = 4;
pub const DEFAULT_CONTEXT_BUDGET: usize = 6_000;
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_SCHEMA_PATH: &str = "schema/employees.json";

/// Connection settings for the OpenAI-compatible chat endpoint.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// What the controller does with a proposal it could not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedProposalPolicy {
    /// Treat it as a `NotASelect` rejection and route into correction.
    #[default]
    Correct,
    /// Stop immediately with a generation failure.
    Fail,
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Upper bound on correction attempts per question.
    pub max_retries: u32,
    /// Wall-clock limit applied to each generator call.
    pub generation_timeout: Duration,
    pub malformed_policy: MalformedProposalPolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            generation_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            malformed_policy: MalformedProposalPolicy::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_malformed_policy(mut self, policy: MalformedProposalPolicy) -> Self {
        self.malformed_policy = policy;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStrategy {
    FullDump,
    Ranked,
}

impl FromStr for ContextStrategy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "full" | "full-dump" | "full_dump" => Ok(ContextStrategy::FullDump),
            "ranked" | "rag" => Ok(ContextStrategy::Ranked),
            other => Err(AgentError::Config(format!(
                "Unknown context strategy '{}', expected 'full' or 'ranked'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub strategy: ContextStrategy,
    /// Tables kept by score before foreign-key expansion.
    pub top_tables: usize,
    /// Maximum rendered size in characters.
    pub char_budget: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            strategy: ContextStrategy::Ranked,
            top_tables: DEFAULT_TOP_TABLES,
            char_budget: DEFAULT_CONTEXT_BUDGET,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatorPolicy {
    /// When set, a top-level `GROUP BY` satisfies the row-bound rule on its own.
    pub group_by_counts_as_bound: bool,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub llm: LlmSettings,
    pub workflow: WorkflowConfig,
    pub context: ContextConfig,
    pub validator: ValidatorPolicy,
    pub schema_path: PathBuf,
    /// JSON-lines file receiving rejected candidates, if any.
    pub rejection_log: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            workflow: WorkflowConfig::default(),
            context: ContextConfig::default(),
            validator: ValidatorPolicy::default(),
            schema_path: PathBuf::from(DEFAULT_SCHEMA_PATH),
            rejection_log: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(api_key) = lookup("OPENAI_API_KEY") {
            config.llm.api_key = api_key;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            config.llm.model = model;
        }
        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            config.llm.base_url = base_url.trim_end_matches('/').to_string();
        }

        if let Some(raw) = lookup("QUERY_STAFF_MAX_RETRIES") {
            config.workflow.max_retries = parse_number("QUERY_STAFF_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("QUERY_STAFF_TIMEOUT_SECS") {
            let secs: u64 = parse_number("QUERY_STAFF_TIMEOUT_SECS", &raw)?;
            config.workflow.generation_timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup("QUERY_STAFF_CONTEXT_STRATEGY") {
            config.context.strategy = raw.parse()?;
        }
        if let Some(raw) = lookup("QUERY_STAFF_TOP_TABLES") {
            config.context.top_tables = parse_number("QUERY_STAFF_TOP_TABLES", &raw)?;
        }
        if let Some(raw) = lookup("QUERY_STAFF_CONTEXT_BUDGET") {
            config.context.char_budget = parse_number("QUERY_STAFF_CONTEXT_BUDGET", &raw)?;
        }

        if let Some(path) = lookup("QUERY_STAFF_SCHEMA") {
            config.schema_path = PathBuf::from(path);
        }
        config.rejection_log = lookup("QUERY_STAFF_REJECTION_LOG")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(config)
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| AgentError::Config(format!("{} must be a non-negative integer, got '{}'", key, raw)))
}
