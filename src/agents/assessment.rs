//! Assessment Agent
//!
//! Generates one practice question per concept and difficulty, with a
//! naive expected-answer heuristic used to flag off-topic responses.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{i64_field, str_field, Agent};

/// Shortest answer accepted as a real attempt
const MIN_ANSWER_LEN: usize = 8;

pub struct AssessmentAgent;

impl AssessmentAgent {
    /// Expected-answer token: the concept's leading word
    fn expected_answer(concept: &str) -> String {
        let token = if concept.contains('_') {
            concept.split('_').next().unwrap_or(concept)
        } else {
            concept.split_whitespace().next().unwrap_or(concept)
        };
        token.to_lowercase()
    }

    /// Score a learner answer against the expected token.
    ///
    /// The answer must contain the token and exceed the minimum length;
    /// anything else is flagged as a concept mismatch.
    pub fn evaluate(&self, answer: &str, expected_answer: &str) -> Value {
        let normalized = answer.trim().to_lowercase();
        let ok = normalized.contains(expected_answer) && normalized.len() > MIN_ANSWER_LEN;
        json!({
            "score": if ok { 1.0 } else { 0.35 },
            "error_type": if ok { "none" } else { "concept_mismatch" },
        })
    }
}

#[async_trait]
impl Agent for AssessmentAgent {
    async fn run(&self, input: Value) -> Result<Value> {
        let concept = str_field(&input, "concept", "fractions");
        let difficulty = i64_field(&input, "difficulty", 1);

        Ok(json!({
            "generated_question": format!(
                "Solve one practice question for '{concept}' at difficulty level {difficulty}."
            ),
            "expected_answer": Self::expected_answer(concept),
        }))
    }
}
