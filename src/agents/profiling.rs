//! Learner Profiling Agent
//!
//! Rolls a mastery map up into a cognitive profile: per-concept bands,
//! weak and strong sets, a blended confidence index and a short list of
//! recommended focus concepts.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{f64_field, Agent};

const FOCUS_COUNT: usize = 3;

pub struct LearnerProfilingAgent;

fn band(mastery: f64) -> &'static str {
    if mastery >= 0.80 {
        "mastered"
    } else if mastery >= 0.60 {
        "proficient"
    } else if mastery >= 0.30 {
        "developing"
    } else {
        "beginner"
    }
}

#[async_trait]
impl Agent for LearnerProfilingAgent {
    async fn run(&self, input: Value) -> Result<Value> {
        let empty = Map::new();
        let mastery_map = input["mastery_map"].as_object().unwrap_or(&empty);
        let cognitive_depth = f64_field(&input, "cognitive_depth", 0.5);
        let engagement = f64_field(&input, "engagement_score", 0.5);

        let mut scored: Vec<(&String, f64)> = mastery_map
            .iter()
            .map(|(concept, score)| (concept, score.as_f64().unwrap_or(0.0)))
            .collect();
        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        let average_mastery = if scored.is_empty() {
            0.0
        } else {
            scored.iter().map(|(_, s)| s).sum::<f64>() / scored.len() as f64
        };

        let weak: Vec<&str> = scored
            .iter()
            .filter(|(_, s)| *s < 0.40)
            .map(|(c, _)| c.as_str())
            .collect();
        let strong: Vec<&str> = scored
            .iter()
            .filter(|(_, s)| *s >= 0.80)
            .map(|(c, _)| c.as_str())
            .collect();
        let recommended_focus: Vec<&str> = scored
            .iter()
            .take(FOCUS_COUNT)
            .map(|(c, _)| c.as_str())
            .collect();

        let mut distribution = Map::new();
        for (concept, score) in &scored {
            distribution.insert(concept.to_string(), json!(band(*score)));
        }

        let confidence = 0.5 * average_mastery + 0.3 * cognitive_depth + 0.2 * engagement;

        Ok(json!({
            "average_mastery": average_mastery,
            "weak_concepts": weak,
            "strong_concepts": strong,
            "recommended_focus": recommended_focus,
            "mastery_distribution": distribution,
            "confidence_index": confidence,
            "mastery_map": mastery_map,
        }))
    }
}
