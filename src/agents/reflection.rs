//! Reflection Agent
//!
//! Closes the learning loop after an assessment: folds the latest score
//! into the concept's mastery estimate and nudges the engagement and
//! retention-decay signals in the direction the attempt suggests.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{f64_field, str_field, Agent};

/// Attempts at or above this score count as a pass
const PASS_THRESHOLD: f64 = 0.6;

pub struct ReflectionAgent;

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[async_trait]
impl Agent for ReflectionAgent {
    async fn run(&self, input: Value) -> Result<Value> {
        let concept = str_field(&input, "concept", "unknown").to_string();
        let current_score = f64_field(&input, "current_score", 0.0);
        let engagement = f64_field(&input, "engagement_score", 0.5);
        let retention = f64_field(&input, "retention_decay", 0.1);
        let old_mastery = input["mastery_map"][concept.as_str()].as_f64().unwrap_or(0.0);

        // Exponential moving average keeps mastery stable across noisy
        // single attempts.
        let new_mastery = 0.7 * old_mastery + 0.3 * current_score;

        let passed = current_score >= PASS_THRESHOLD;
        let new_engagement = if passed {
            (engagement + 0.05).min(1.0)
        } else {
            (engagement - 0.03).max(0.0)
        };
        let new_retention = if passed {
            (retention * 0.97).max(0.02)
        } else {
            (retention * 1.03).min(0.5)
        };

        Ok(json!({
            "concept": concept,
            "new_mastery": round4(new_mastery),
            "engagement_score": round4(new_engagement),
            "retention_decay": round4(new_retention),
        }))
    }
}
