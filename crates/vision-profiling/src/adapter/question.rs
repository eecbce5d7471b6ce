//! Interactive boundary of heuristic resolution.
//!
//! When the resolver cannot determine an extraction path automatically it
//! emits a structured [`Question`] (prompt text plus enumerated options) and
//! blocks for a single discrete answer. This is the only user-facing
//! interaction point of the core; the actual prompt rendering lives in the
//! [`Answerer`] collaborator supplied by the caller, which keeps the matching
//! logic testable without I/O.

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// One selectable answer: a candidate access path plus a hint describing the
/// tensor found there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    /// Access expression, e.g. `[0]["image"]`.
    pub label: String,
    /// Shape hint, e.g. `tensor [8, 3, 64, 64]`.
    pub hint: String,
}

/// A structured multiple-choice question emitted by the resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub prompt: String,
    pub options: Vec<QuestionOption>,
}

/// Collaborator answering resolution questions.
///
/// Implementations must be `Send + Sync`; the returned index selects one of
/// `question.options`.
pub trait Answerer: Send + Sync {
    fn ask(&self, question: &Question) -> Result<usize>;
}

/// Wrapper that implements [`Answerer`] using a closure.
pub struct ClosureAnswerer<F>
where
    F: Fn(&Question) -> usize + Send + Sync,
{
    callback: F,
}

impl<F> ClosureAnswerer<F>
where
    F: Fn(&Question) -> usize + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Answerer for ClosureAnswerer<F>
where
    F: Fn(&Question) -> usize + Send + Sync,
{
    fn ask(&self, question: &Question) -> Result<usize> {
        let answer = (self.callback)(question);
        if answer >= question.options.len() {
            return Err(AnalysisError::Interaction(format!(
                "answer {} out of range for {} options",
                answer,
                question.options.len()
            )));
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> Question {
        Question {
            prompt: "Which tensor represents your images?".to_string(),
            options: vec![
                QuestionOption {
                    label: "[0]".to_string(),
                    hint: "tensor [8, 3, 64, 64]".to_string(),
                },
                QuestionOption {
                    label: "[1]".to_string(),
                    hint: "tensor [8]".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_closure_answerer() {
        let answerer = ClosureAnswerer::new(|_q| 1);
        assert_eq!(answerer.ask(&question()).unwrap(), 1);
    }

    #[test]
    fn test_out_of_range_answer_is_rejected() {
        let answerer = ClosureAnswerer::new(|_q| 5);
        let err = answerer.ask(&question()).unwrap_err();
        assert_eq!(err.error_code(), "INTERACTION_FAILED");
    }

    #[test]
    fn test_question_serializes() {
        let json = serde_json::to_string(&question()).unwrap();
        assert!(json.contains("\"prompt\""));
        assert!(json.contains("[0]"));
    }
}
