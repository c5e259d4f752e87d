//! Workflow State Machine
//!
//! `transition` is the whole orchestration policy: a pure function from the
//! current state and one event to the next state. It performs no I/O, so every
//! routing rule can be exercised without a model or a database.

use crate::config::{MalformedProposalPolicy, WorkflowConfig};
use crate::error::{AgentError, Result};
use crate::execution_loop::messages;
use crate::generator::{GenerationError, Proposal};
use crate::safety_guardrails::{normalize, ValidationVerdict, ViolationKind};
use serde::{Deserialize, Serialize};

/// Longest raw model output kept in state when a proposal cannot be parsed.
const MAX_RAW_CANDIDATE_CHARS: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Start,
    Retrieving,
    Generating,
    Validating,
    Correcting,
    Accepted,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Accepted | Phase::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCause {
    /// The retry bound was reached with the candidate still rejected.
    ValidationExhausted(ViolationKind),
    GenerationFailed,
    TimedOut,
    EmptyQuestion,
    Internal,
}

#[derive(Debug, Clone)]
pub enum Event {
    Begin,
    ContextReady(String),
    Proposed(Proposal),
    GenerationFailed(GenerationError),
    Validated(ValidationVerdict),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Begin => "Begin",
            Event::ContextReady(_) => "ContextReady",
            Event::Proposed(_) => "Proposed",
            Event::GenerationFailed(_) => "GenerationFailed",
            Event::Validated(_) => "Validated",
        }
    }
}

/// Everything known about one question while it moves through the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub user_query: String,
    pub schema_context: String,
    pub generated_sql: String,
    pub explanation: String,
    pub validation_error: Option<ViolationKind>,
    pub iteration_count: u32,
    pub final_answer: Option<String>,
    pub phase: Phase,
    pub failure: Option<FailureCause>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowOutcome {
    Accepted {
        generated_sql: String,
        explanation: String,
        iteration_count: u32,
    },
    Failed {
        final_answer: String,
        cause: FailureCause,
    },
}

impl WorkflowState {
    pub fn new(user_query: &str) -> Self {
        Self {
            user_query: user_query.to_string(),
            schema_context: String::new(),
            generated_sql: String::new(),
            explanation: String::new(),
            validation_error: None,
            iteration_count: 0,
            final_answer: None,
            phase: Phase::Start,
            failure: None,
        }
    }

    /// The deliverable, once the loop has reached a terminal phase.
    pub fn outcome(&self) -> Option<WorkflowOutcome> {
        match self.phase {
            Phase::Accepted => Some(WorkflowOutcome::Accepted {
                generated_sql: self.generated_sql.clone(),
                explanation: self.explanation.clone(),
                iteration_count: self.iteration_count,
            }),
            Phase::Failed => Some(WorkflowOutcome::Failed {
                final_answer: self.final_answer.clone().unwrap_or_default(),
                cause: self.failure.unwrap_or(FailureCause::Internal),
            }),
            _ => None,
        }
    }

    pub(crate) fn fail(mut self, cause: FailureCause) -> Self {
        self.final_answer = Some(messages::failure_message(cause, self.iteration_count));
        self.failure = Some(cause);
        self.phase = Phase::Failed;
        self
    }

    fn adopt(&mut self, proposal: Proposal) {
        self.generated_sql = proposal.sql_query;
        self.explanation = proposal.explanation;
        self.phase = Phase::Validating;
    }

    fn reject(mut self, reason: ViolationKind, config: &WorkflowConfig) -> Self {
        self.validation_error = Some(reason);
        if self.iteration_count >= config.max_retries {
            self.fail(FailureCause::ValidationExhausted(reason))
        } else {
            self.phase = Phase::Correcting;
            self
        }
    }
}

/// Apply one event. Events that do not belong to the current phase are an error.
pub fn transition(mut state: WorkflowState, event: Event, config: &WorkflowConfig) -> Result<WorkflowState> {
    match (state.phase, event) {
        (Phase::Start, Event::Begin) => {
            if state.user_query.trim().is_empty() {
                return Ok(state.fail(FailureCause::EmptyQuestion));
            }
            state.phase = Phase::Retrieving;
            Ok(state)
        }
        (Phase::Retrieving, Event::ContextReady(context)) => {
            state.schema_context = context;
            state.phase = Phase::Generating;
            Ok(state)
        }
        (Phase::Generating, Event::Proposed(proposal)) => {
            state.adopt(proposal);
            Ok(state)
        }
        (Phase::Correcting, Event::Proposed(proposal)) => {
            state.iteration_count += 1;
            state.adopt(proposal);
            Ok(state)
        }
        (phase @ (Phase::Generating | Phase::Correcting), Event::GenerationFailed(error)) => {
            if phase == Phase::Correcting {
                state.iteration_count += 1;
            }
            let correctable =
                !error.is_hard_failure() && config.malformed_policy == MalformedProposalPolicy::Correct;
            Ok(match error {
                GenerationError::Malformed { raw, .. } if correctable => {
                    state.generated_sql = raw.chars().take(MAX_RAW_CANDIDATE_CHARS).collect();
                    state.explanation.clear();
                    state.reject(ViolationKind::NotASelect, config)
                }
                GenerationError::Timeout(_) => state.fail(FailureCause::TimedOut),
                _ => state.fail(FailureCause::GenerationFailed),
            })
        }
        (Phase::Validating, Event::Validated(ValidationVerdict::Accepted)) => {
            state.generated_sql = normalize(&state.generated_sql);
            state.validation_error = None;
            state.final_answer = Some(messages::success_message(state.iteration_count));
            state.phase = Phase::Accepted;
            Ok(state)
        }
        (Phase::Validating, Event::Validated(ValidationVerdict::Rejected { reason })) => {
            Ok(state.reject(reason, config))
        }
        (phase, event) => Err(AgentError::Workflow(format!(
            "event {} is not valid in phase {:?}",
            event.name(),
            phase
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(sql: &str) -> Proposal {
        Proposal {
            explanation: "because".to_string(),
            sql_query: sql.to_string(),
        }
    }

    fn rejected(reason: ViolationKind) -> Event {
        Event::Validated(ValidationVerdict::Rejected { reason })
    }

    fn at_validating(config: &WorkflowConfig) -> WorkflowState {
        let mut state = WorkflowState::new("List employees");
        for event in [
            Event::Begin,
            Event::ContextReady("Table employees".to_string()),
            Event::Proposed(proposal("SELECT * FROM employees")),
        ] {
            state = transition(state, event, config).unwrap();
        }
        state
    }

    #[test]
    fn test_happy_path_reaches_accepted() {
        let config = WorkflowConfig::default();
        let state = at_validating(&config);
        assert_eq!(state.phase, Phase::Validating);
        assert_eq!(state.schema_context, "Table employees");

        let state = transition(state, Event::Validated(ValidationVerdict::Accepted), &config).unwrap();
        assert_eq!(state.phase, Phase::Accepted);
        assert_eq!(state.iteration_count, 0);
        assert!(state.final_answer.is_some());
        assert!(matches!(state.outcome(), Some(WorkflowOutcome::Accepted { .. })));
    }

    #[test]
    fn test_rejection_routes_to_correction_then_counts_attempt() {
        let config = WorkflowConfig::default();
        let state = transition(at_validating(&config), rejected(ViolationKind::MissingBound), &config).unwrap();
        assert_eq!(state.phase, Phase::Correcting);
        assert_eq!(state.validation_error, Some(ViolationKind::MissingBound));
        assert_eq!(state.iteration_count, 0);

        let state = transition(state, Event::Proposed(proposal("SELECT * FROM employees LIMIT 5")), &config).unwrap();
        assert_eq!(state.phase, Phase::Validating);
        assert_eq!(state.iteration_count, 1);
        assert_eq!(state.generated_sql, "SELECT * FROM employees LIMIT 5");
    }

    #[test]
    fn test_bound_is_enforced() {
        let config = WorkflowConfig::default().with_max_retries(2);
        let mut state = at_validating(&config);
        for _ in 0..2 {
            state = transition(state, rejected(ViolationKind::MissingBound), &config).unwrap();
            state = transition(state, Event::Proposed(proposal("SELECT * FROM employees")), &config).unwrap();
        }
        assert_eq!(state.iteration_count, 2);
        let state = transition(state, rejected(ViolationKind::MissingBound), &config).unwrap();
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.failure, Some(FailureCause::ValidationExhausted(ViolationKind::MissingBound)));
        assert_eq!(state.iteration_count, 2);
    }

    #[test]
    fn test_zero_retries_fails_on_first_rejection() {
        let config = WorkflowConfig::default().with_max_retries(0);
        let state = transition(at_validating(&config), rejected(ViolationKind::NotASelect), &config).unwrap();
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.iteration_count, 0);
    }

    #[test]
    fn test_accepted_sql_is_normalized_and_error_cleared() {
        let config = WorkflowConfig::default();
        let mut state = transition(at_validating(&config), rejected(ViolationKind::MissingBound), &config).unwrap();
        state = transition(state, Event::Proposed(proposal("  SELECT * FROM employees LIMIT 5; ")), &config).unwrap();
        state = transition(state, Event::Validated(ValidationVerdict::Accepted), &config).unwrap();
        assert_eq!(state.generated_sql, "SELECT * FROM employees LIMIT 5");
        assert_eq!(state.validation_error, None);
    }

    #[test]
    fn test_hard_generation_failure_is_terminal() {
        let config = WorkflowConfig::default();
        let mut state = WorkflowState::new("q");
        state = transition(state, Event::Begin, &config).unwrap();
        state = transition(state, Event::ContextReady(String::new()), &config).unwrap();
        let failed = transition(
            state.clone(),
            Event::GenerationFailed(GenerationError::Transport("connection refused".to_string())),
            &config,
        )
        .unwrap();
        assert_eq!(failed.failure, Some(FailureCause::GenerationFailed));

        let timed_out = transition(state, Event::GenerationFailed(GenerationError::Timeout(50)), &config).unwrap();
        assert_eq!(timed_out.failure, Some(FailureCause::TimedOut));
    }

    #[test]
    fn test_malformed_proposal_follows_policy() {
        let malformed = || {
            Event::GenerationFailed(GenerationError::Malformed {
                raw: "Sure! Here is your query".to_string(),
                detail: "no JSON".to_string(),
            })
        };
        let prepare = |config: &WorkflowConfig| {
            let state = transition(WorkflowState::new("q"), Event::Begin, config).unwrap();
            transition(state, Event::ContextReady(String::new()), config).unwrap()
        };

        let correcting = WorkflowConfig::default();
        let state = transition(prepare(&correcting), malformed(), &correcting).unwrap();
        assert_eq!(state.phase, Phase::Correcting);
        assert_eq!(state.validation_error, Some(ViolationKind::NotASelect));
        assert_eq!(state.generated_sql, "Sure! Here is your query");
        assert_eq!(state.iteration_count, 0);

        let state = transition(state, malformed(), &correcting).unwrap();
        assert_eq!(state.phase, Phase::Correcting);
        assert_eq!(state.iteration_count, 1);

        let failing = WorkflowConfig::default().with_malformed_policy(MalformedProposalPolicy::Fail);
        let state = transition(prepare(&failing), malformed(), &failing).unwrap();
        assert_eq!(state.failure, Some(FailureCause::GenerationFailed));
    }

    #[test]
    fn test_empty_question_fails_before_retrieval() {
        let state = transition(WorkflowState::new("   "), Event::Begin, &WorkflowConfig::default()).unwrap();
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.failure, Some(FailureCause::EmptyQuestion));
    }

    #[test]
    fn test_generating_is_never_reentered() {
        let config = WorkflowConfig::default();
        let state = transition(at_validating(&config), rejected(ViolationKind::MissingBound), &config).unwrap();
        assert_ne!(state.phase, Phase::Generating);
        let err = transition(state, Event::ContextReady("again".to_string()), &config).unwrap_err();
        assert!(matches!(err, AgentError::Workflow(_)));
    }

    #[test]
    fn test_terminal_states_accept_no_events() {
        let config = WorkflowConfig::default();
        let state = transition(at_validating(&config), Event::Validated(ValidationVerdict::Accepted), &config).unwrap();
        assert!(transition(state, Event::Begin, &config).is_err());
    }
}
