//! User-facing `final_answer` text. Short, non-technical, never raw validator codes.

use crate::execution_loop::state::FailureCause;

pub fn success_message(corrections: u32) -> String {
    match corrections {
        0 => "Generated a read-only SQL query for your question. Review it before running.".to_string(),
        1 => "Generated a read-only SQL query for your question after 1 correction. Review it before running."
            .to_string(),
        n => format!(
            "Generated a read-only SQL query for your question after {} corrections. Review it before running.",
            n
        ),
    }
}

pub fn failure_message(cause: FailureCause, corrections: u32) -> String {
    match cause {
        FailureCause::ValidationExhausted(kind) => format!(
            "I couldn't produce a safe query for this question after {} {}: {}. {}",
            corrections,
            if corrections == 1 { "correction attempt" } else { "correction attempts" },
            kind.user_summary(),
            kind.rephrase_hint()
        ),
        FailureCause::GenerationFailed => "Query generation failed: the language model could not produce a usable answer, \
             so no SQL was created. Please try again in a moment."
            .to_string(),
        FailureCause::TimedOut => "Query generation timed out before the language model responded, so no SQL was created. \
             Please try again, or ask a simpler question."
            .to_string(),
        FailureCause::EmptyQuestion => "Please enter a question first.".to_string(),
        FailureCause::Internal => {
            "Something went wrong while preparing your query, so no SQL was created. Please try again.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety_guardrails::ViolationKind;

    #[test]
    fn test_exhaustion_message_carries_reason_and_guidance() {
        let message = failure_message(FailureCause::ValidationExhausted(ViolationKind::MissingBound), 3);
        assert!(message.contains("after 3 correction attempts"));
        assert!(message.contains("missing LIMIT"));
        assert!(message.contains("row bound"));
        assert!(message.contains("rephrase"));
        assert!(!message.contains("MissingBound"));
    }

    #[test]
    fn test_generation_failure_is_distinguishable_from_exhaustion() {
        let generation = failure_message(FailureCause::GenerationFailed, 0);
        let timeout = failure_message(FailureCause::TimedOut, 0);
        let exhausted = failure_message(FailureCause::ValidationExhausted(ViolationKind::NotASelect), 3);
        assert!(generation.contains("generation failed"));
        assert!(timeout.contains("timed out"));
        assert!(!exhausted.contains("generation failed"));
    }

    #[test]
    fn test_success_message_mentions_corrections() {
        assert!(!success_message(0).contains("correction"));
        assert!(success_message(1).contains("after 1 correction."));
        assert!(success_message(2).contains("after 2 corrections"));
    }
}
