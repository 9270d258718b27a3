//! Retry handler with simple and self-correcting strategies.
//!
//! - **Simple**: re-invoke the agent with the identical request.
//! - **Self-correct**: re-invoke with one extra instruction describing what
//!   was wrong with the previous answer (malformed JSON, schema violations,
//!   agent error), so the agent can fix it.

use taskloom_types::process::{RetryConfig, RetryStrategy};

use super::error::TaskError;

// ---------------------------------------------------------------------------
// RetryAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Re-send the same request.
    Rerun,
    /// Re-send with `instruction` appended to the agent instructions.
    SelfCorrect { instruction: String },
}

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

/// Stateless retry policy; all logic is in associated functions.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt should be made after `attempt` (1-based) failed
    /// with `error`.
    pub fn should_retry(config: &RetryConfig, attempt: u32, error: &TaskError) -> bool {
        error.is_retryable() && attempt < config.max_attempts
    }

    pub fn prepare_retry(config: &RetryConfig, error: &TaskError, attempt: u32) -> RetryAction {
        match config.strategy {
            RetryStrategy::Simple => RetryAction::Rerun,
            RetryStrategy::SelfCorrect => RetryAction::SelfCorrect {
                instruction: Self::build_correction(error, attempt, config.max_attempts),
            },
        }
    }

    /// Instruction telling the agent what went wrong with attempt `attempt`.
    pub fn build_correction(error: &TaskError, attempt: u32, max_attempts: u32) -> String {
        let problem = match error {
            TaskError::MalformedOutput { message, .. } => format!(
                "Your previous answer was not valid JSON ({message}). Reply with a single JSON document and nothing else."
            ),
            TaskError::SchemaViolation { violations, .. } => {
                let list: Vec<String> = violations.iter().map(|v| format!("- {v}")).collect();
                format!(
                    "Your previous answer did not match the required output schema:\n{}\nReturn a corrected JSON document that satisfies every constraint.",
                    list.join("\n")
                )
            }
            other => format!("Your previous attempt failed: {other}. Try again."),
        };
        format!(
            "Correction (attempt {next} of {max_attempts}): {problem}",
            next = attempt + 1
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloom_types::task::EffectId;

    fn config(max_attempts: u32, strategy: RetryStrategy) -> RetryConfig {
        RetryConfig {
            max_attempts,
            strategy,
        }
    }

    fn malformed() -> TaskError {
        TaskError::MalformedOutput {
            effect_id: EffectId::new("e"),
            message: "expected value at line 1".to_string(),
        }
    }

    #[test]
    fn test_should_retry_within_limit() {
        let config = config(3, RetryStrategy::Simple);
        assert!(RetryHandler::should_retry(&config, 1, &malformed()));
        assert!(RetryHandler::should_retry(&config, 2, &malformed()));
        assert!(!RetryHandler::should_retry(&config, 3, &malformed()));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let config = config(1, RetryStrategy::Simple);
        assert!(!RetryHandler::should_retry(&config, 1, &malformed()));
    }

    #[test]
    fn test_non_retryable_errors() {
        let config = config(5, RetryStrategy::Simple);
        let err = TaskError::Record("disk full".to_string());
        assert!(!RetryHandler::should_retry(&config, 1, &err));
    }

    #[test]
    fn test_simple_strategy_reruns() {
        let action = RetryHandler::prepare_retry(&config(3, RetryStrategy::Simple), &malformed(), 1);
        assert_eq!(action, RetryAction::Rerun);
    }

    #[test]
    fn test_self_correct_lists_violations() {
        let err = TaskError::SchemaViolation {
            effect_id: EffectId::new("e"),
            violations: vec!["/: \"summary\" is a required property".to_string()],
        };
        let action = RetryHandler::prepare_retry(&config(3, RetryStrategy::SelfCorrect), &err, 1);
        match action {
            RetryAction::SelfCorrect { instruction } => {
                assert!(instruction.contains("attempt 2 of 3"));
                assert!(instruction.contains("- /: \"summary\" is a required property"));
            }
            other => panic!("expected self-correct, got {other:?}"),
        }
    }

    #[test]
    fn test_self_correct_malformed_output() {
        let text = RetryHandler::build_correction(&malformed(), 2, 3);
        assert!(text.contains("not valid JSON"));
        assert!(text.contains("attempt 3 of 3"));
    }
}
