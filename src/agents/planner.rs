//! Curriculum Planner Agent
//!
//! Picks the next concept to work on: lowest mastery first, avoiding the
//! three most recently seen concepts so sessions do not loop on one
//! topic. Target difficulty follows the mastery level.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::Agent;

/// Concepts excluded from selection after recent exposure
const RECENCY_WINDOW: usize = 3;

pub struct CurriculumPlannerAgent;

#[async_trait]
impl Agent for CurriculumPlannerAgent {
    async fn run(&self, input: Value) -> Result<Value> {
        let empty = serde_json::Map::new();
        let mastery_map = input["mastery_map"].as_object().unwrap_or(&empty);
        let recent: Vec<&str> = input["recent_concepts"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .rev()
                    .take(RECENCY_WINDOW)
                    .filter_map(Value::as_str)
                    .collect()
            })
            .unwrap_or_default();

        let mut candidates: Vec<(&String, f64)> = mastery_map
            .iter()
            .map(|(concept, score)| (concept, score.as_f64().unwrap_or(0.0)))
            .collect();
        candidates.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        let picked = candidates
            .iter()
            .find(|(concept, _)| !recent.contains(&concept.as_str()))
            .or_else(|| candidates.first());

        let Some((concept, mastery)) = picked else {
            return Ok(json!({
                "next_concept": Value::Null,
                "target_difficulty": 1,
                "reasoning": "empty mastery map",
            }));
        };

        let target_difficulty = if *mastery < 0.4 { 1 } else { 2 };
        Ok(json!({
            "next_concept": concept,
            "target_difficulty": target_difficulty,
            "reasoning": format!("lowest mastery {mastery:.2} outside recency window"),
        }))
    }
}
