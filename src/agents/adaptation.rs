//! Difficulty Adaptation Agent
//!
//! Deterministic, no I/O. Blends rolling error rate, response-time
//! deviation and consecutive failures into an adaptation score, then
//! shifts difficulty inside a cooldown window so the learner is not
//! whipsawed by single data points.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{f64_field, i64_field, Agent};

pub struct AdaptationAgent;

#[async_trait]
impl Agent for AdaptationAgent {
    async fn run(&self, input: Value) -> Result<Value> {
        let error_rate = f64_field(&input, "rolling_error_rate", 0.0);
        let time_deviation = f64_field(&input, "response_time_deviation", 0.0);
        let consecutive_failures = f64_field(&input, "consecutive_failures", 0.0);
        let difficulty = i64_field(&input, "difficulty", 1);
        let mut cooldown_remaining = i64_field(&input, "cooldown_remaining", 0);

        let adaptation_score =
            0.4 * error_rate + 0.3 * time_deviation + 0.3 * consecutive_failures;

        let mut new_difficulty = difficulty;
        let mut granularity = "normal";
        let mut analogy_flag = false;

        if cooldown_remaining <= 0 {
            if adaptation_score > 0.6 {
                new_difficulty = (difficulty - 1).max(1);
                granularity = "high";
                analogy_flag = true;
                cooldown_remaining = 2;
            } else if adaptation_score < 0.3 {
                new_difficulty = (difficulty + 1).min(3);
                granularity = "compact";
                cooldown_remaining = 2;
            }
        } else {
            cooldown_remaining -= 1;
        }

        Ok(json!({
            "adaptation_score": adaptation_score,
            "new_difficulty": new_difficulty,
            "explanation_granularity_level": granularity,
            "analogy_injection_flag": analogy_flag,
            "cooldown_remaining": cooldown_remaining,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_struggling_learner_gets_easier_material() {
        let output = AdaptationAgent
            .run(json!({
                "rolling_error_rate": 0.8,
                "response_time_deviation": 0.5,
                "consecutive_failures": 1,
                "difficulty": 2,
                "cooldown_remaining": 0,
            }))
            .await
            .unwrap();

        let score = output["adaptation_score"].as_f64().unwrap();
        assert!((score - 0.77).abs() < 1e-9);
        assert_eq!(output["new_difficulty"], 1);
        assert_eq!(output["explanation_granularity_level"], "high");
        assert_eq!(output["analogy_injection_flag"], true);
        assert_eq!(output["cooldown_remaining"], 2);
    }

    #[tokio::test]
    async fn test_thriving_learner_gets_harder_material() {
        let output = AdaptationAgent
            .run(json!({
                "rolling_error_rate": 0.1,
                "response_time_deviation": 0.1,
                "consecutive_failures": 0,
                "difficulty": 2,
                "cooldown_remaining": 0,
            }))
            .await
            .unwrap();

        assert_eq!(output["new_difficulty"], 3);
        assert_eq!(output["explanation_granularity_level"], "compact");
        assert_eq!(output["analogy_injection_flag"], false);
        assert_eq!(output["cooldown_remaining"], 2);
    }

    #[tokio::test]
    async fn test_difficulty_clamped_to_bounds() {
        let floor = AdaptationAgent
            .run(json!({"rolling_error_rate": 1.0, "consecutive_failures": 1, "difficulty": 1}))
            .await
            .unwrap();
        assert_eq!(floor["new_difficulty"], 1);

        let ceiling = AdaptationAgent
            .run(json!({"difficulty": 3}))
            .await
            .unwrap();
        assert_eq!(ceiling["new_difficulty"], 3);
    }

    #[tokio::test]
    async fn test_active_cooldown_only_decrements() {
        let output = AdaptationAgent
            .run(json!({
                "rolling_error_rate": 0.9,
                "response_time_deviation": 0.9,
                "consecutive_failures": 2,
                "difficulty": 3,
                "cooldown_remaining": 2,
            }))
            .await
            .unwrap();

        assert_eq!(output["new_difficulty"], 3);
        assert_eq!(output["cooldown_remaining"], 1);
        assert_eq!(output["explanation_granularity_level"], "normal");
    }

    #[tokio::test]
    async fn test_middle_band_changes_nothing() {
        let output = AdaptationAgent
            .run(json!({
                "rolling_error_rate": 1.0,
                "response_time_deviation": 0.0,
                "consecutive_failures": 0,
                "difficulty": 2,
                "cooldown_remaining": 0,
            }))
            .await
            .unwrap();

        // score = 0.4: inside the hold band
        assert_eq!(output["new_difficulty"], 2);
        assert_eq!(output["cooldown_remaining"], 0);
    }
}
