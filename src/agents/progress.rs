//! Progress Revision Agent
//!
//! Applies time-based decay to completed material and builds a bounded
//! revision queue ordered by urgency, so stale-but-important concepts
//! resurface before they are forgotten.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{f64_field, Agent};

const QUEUE_LIMIT: usize = 5;
const REVISION_THRESHOLD: f64 = 0.50;

pub struct ProgressRevisionAgent;

#[async_trait]
impl Agent for ProgressRevisionAgent {
    async fn run(&self, input: Value) -> Result<Value> {
        let empty = Map::new();
        let mastery_map = input["mastery_map"].as_object().unwrap_or(&empty);
        let completed: Vec<&str> = input["completed_chapters"]
            .as_array()
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let weeks_elapsed = f64_field(&input, "weeks_elapsed", 0.0);

        // Linear forgetting curve, 15% per four weeks, floored at zero.
        let decay_factor = (1.0 - (weeks_elapsed / 4.0) * 0.15).max(0.0);

        let mut decayed = Map::new();
        let mut queue: Vec<(String, f64, &'static str)> = Vec::new();
        for (concept, score) in mastery_map {
            let mastery = score.as_f64().unwrap_or(0.0);
            if mastery <= 0.0 {
                continue;
            }
            let adjusted = mastery * decay_factor;
            decayed.insert(concept.clone(), json!(adjusted));
            if completed.contains(&concept.as_str()) && adjusted < REVISION_THRESHOLD {
                let urgency = if adjusted < 0.30 { "high" } else { "medium" };
                queue.push((concept.clone(), adjusted, urgency));
            }
        }

        // High urgency first, then lowest retained mastery.
        queue.sort_by(|a, b| {
            let rank = |u: &str| if u == "high" { 0 } else { 1 };
            rank(a.2)
                .cmp(&rank(b.2))
                .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.0.cmp(&b.0))
        });
        queue.truncate(QUEUE_LIMIT);

        let revision_queue: Vec<Value> = queue
            .into_iter()
            .map(|(concept, mastery, urgency)| {
                json!({"concept": concept, "decayed_mastery": mastery, "urgency": urgency})
            })
            .collect();

        Ok(json!({
            "decay_factor": decay_factor,
            "decayed_mastery_map": decayed,
            "revision_queue": revision_queue,
        }))
    }
}
