//! Query Workflow
//!
//! Drives one question through the state machine: performs the effect each
//! phase asks for (context build, generator call, validation), turns its result
//! into an [`Event`] and feeds it to [`transition`] until a terminal phase.

use crate::config::{AgentConfig, MalformedProposalPolicy, WorkflowConfig};
use crate::execution_loop::state::{transition, Event, FailureCause, Phase, WorkflowState};
use crate::generator::{GenerationError, ProposalRequest, SqlGenerator};
use crate::metadata::SchemaCatalog;
use crate::observability::{RejectedCandidate, RejectionLogger, RejectionSink};
use crate::safety_guardrails::{SafetyValidator, ValidationVerdict, ViolationKind};
use crate::schema_rag::{provider_for, SchemaContextProvider};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

const IN_MEMORY_REJECTIONS: usize = 256;

pub struct QueryWorkflow {
    config: WorkflowConfig,
    provider: Arc<dyn SchemaContextProvider>,
    generator: Arc<dyn SqlGenerator>,
    validator: SafetyValidator,
    sink: Arc<dyn RejectionSink>,
}

impl QueryWorkflow {
    pub fn new(
        config: WorkflowConfig,
        provider: Arc<dyn SchemaContextProvider>,
        generator: Arc<dyn SqlGenerator>,
        validator: SafetyValidator,
        sink: Arc<dyn RejectionSink>,
    ) -> Self {
        Self {
            config,
            provider,
            generator,
            validator,
            sink,
        }
    }

    /// Wire a workflow from a full agent configuration.
    pub fn from_config(
        config: &AgentConfig,
        catalog: Arc<SchemaCatalog>,
        generator: Arc<dyn SqlGenerator>,
    ) -> Self {
        Self::new(
            config.workflow.clone(),
            provider_for(catalog, &config.context),
            generator,
            SafetyValidator::new(config.validator),
            Arc::new(RejectionLogger::new(config.rejection_log.clone(), IN_MEMORY_REJECTIONS)),
        )
    }

    /// Run the loop for one question. Always returns a terminal state; every
    /// internal failure is folded into a `Failed` outcome.
    pub async fn run(&self, question: &str) -> WorkflowState {
        let run_id = Uuid::new_v4();
        let span = info_span!("query_workflow", %run_id);
        self.drive(run_id, question).instrument(span).await
    }

    async fn drive(&self, run_id: Uuid, question: &str) -> WorkflowState {
        info!("Workflow started for question: {}", question);
        let mut state = WorkflowState::new(question);

        while let Some(event) = self.next_event(&state).await {
            let rejection = self.rejection_of(&state, &event);
            let snapshot = state.clone();
            let from = state.phase;

            state = match transition(state, event, &self.config) {
                Ok(next) => next,
                Err(e) => {
                    error!("Workflow aborted: {}", e);
                    snapshot.fail(FailureCause::Internal)
                }
            };
            debug!("{:?} -> {:?}", from, state.phase);

            if let Some((sql, kind)) = rejection {
                self.sink
                    .record(&RejectedCandidate::new(run_id, &sql, kind, state.iteration_count));
            }
        }

        match state.phase {
            Phase::Accepted => info!(
                "Workflow accepted SQL after {} correction(s)",
                state.iteration_count
            ),
            _ => info!(
                "Workflow failed ({:?}) after {} correction(s)",
                state.failure, state.iteration_count
            ),
        }
        state
    }

    /// Perform the effect the current phase calls for. `None` once terminal.
    async fn next_event(&self, state: &WorkflowState) -> Option<Event> {
        let event = match state.phase {
            Phase::Start => Event::Begin,
            Phase::Retrieving => Event::ContextReady(self.provider.build_context(&state.user_query).await),
            Phase::Generating => {
                self.call_generator(ProposalRequest::Initial {
                    question: &state.user_query,
                    schema_context: &state.schema_context,
                })
                .await
            }
            Phase::Correcting => {
                self.call_generator(ProposalRequest::Correction {
                    question: &state.user_query,
                    schema_context: &state.schema_context,
                    failed_sql: &state.generated_sql,
                    reason: state.validation_error.unwrap_or(ViolationKind::NotASelect),
                })
                .await
            }
            Phase::Validating => Event::Validated(self.validator.validate(&state.generated_sql)),
            Phase::Accepted | Phase::Failed => return None,
        };
        Some(event)
    }

    async fn call_generator(&self, request: ProposalRequest<'_>) -> Event {
        let timeout = self.config.generation_timeout;
        match tokio::time::timeout(timeout, self.generator.propose(request)).await {
            Ok(Ok(proposal)) => Event::Proposed(proposal),
            Ok(Err(e)) => {
                error!("Generator call failed: {}", e);
                Event::GenerationFailed(e)
            }
            Err(_) => {
                error!("Generator call timed out after {:?}", timeout);
                Event::GenerationFailed(GenerationError::Timeout(timeout.as_millis()))
            }
        }
    }

    /// Candidate text and reason for events that count as a rejection.
    fn rejection_of(&self, state: &WorkflowState, event: &Event) -> Option<(String, ViolationKind)> {
        match event {
            Event::Validated(ValidationVerdict::Rejected { reason }) => {
                Some((state.generated_sql.clone(), *reason))
            }
            Event::GenerationFailed(GenerationError::Malformed { raw, .. })
                if self.config.malformed_policy == MalformedProposalPolicy::Correct =>
            {
                Some((raw.clone(), ViolationKind::NotASelect))
            }
            _ => None,
        }
    }
}
