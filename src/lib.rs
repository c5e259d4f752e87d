//! # Query Staff
//!
//! Turns a natural-language question into a safe, bounded SQL query through a
//! generate → validate → correct loop. Nothing is executed here: the output is
//! either a vetted `SELECT` for a human to review or a plain-language failure.
//!
//! ```text
//! question ─► schema_rag ─► generator ─► safety_guardrails ─┬─► Accepted
//!                                ▲                           │
//!                                └──── correction ◄──────────┴─► Failed (bound reached)
//! ```

pub mod agent_prompts;
pub mod config;
pub mod error;
pub mod execution_loop;
pub mod generator;
pub mod llm;
pub mod metadata;
pub mod observability;
pub mod safety_guardrails;
pub mod schema_rag;

pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use execution_loop::{QueryWorkflow, WorkflowOutcome, WorkflowState};
pub use generator::{Proposal, SqlGenerator};
pub use safety_guardrails::{validate, ValidationVerdict, ViolationKind};
