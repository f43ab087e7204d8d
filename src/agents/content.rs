//! Content Generation Agent
//!
//! The only agent with a model path. Derives an adaptive delivery policy
//! from the learner's blended mastery signal, grounds the explanation in
//! retrieved curriculum chunks with citations, and refuses to generate
//! when no grounded context exists. The model path runs through the
//! draft-critique-refine loop with a deterministic templated fallback.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{f64_field, i64_field, str_field, Agent};
use crate::provider::LanguageModel;
use crate::reasoning::ReasoningEngine;

/// Chunks carrying this prefix are learner-memory context, not curriculum
const MEMORY_PREFIX: &str = "[memory]";

const CITATION_LIMIT: usize = 3;
const CITATION_MAX_CHARS: usize = 180;

/// Model-path attempts before falling back to the template
const GENERATION_ATTEMPTS: usize = 2;

/// Delivery policy derived from the blended mastery signal
#[derive(Debug, Clone, PartialEq)]
pub struct ContentPolicy {
    pub band: &'static str,
    pub pace: &'static str,
    pub tone: &'static str,
    pub depth: &'static str,
    pub example_count: usize,
}

impl ContentPolicy {
    /// Blend: half mastery, weighted by cognitive depth and engagement
    pub fn from_signals(mastery: f64, cognitive_depth: f64, engagement: f64) -> Self {
        let blend = 0.5 * mastery + 0.3 * cognitive_depth + 0.2 * engagement;
        if blend >= 0.65 {
            Self {
                band: "advanced",
                pace: "fast",
                tone: "concise_challenging",
                depth: "compact",
                example_count: 1,
            }
        } else if blend < 0.45 {
            Self {
                band: "foundational",
                pace: "slow",
                tone: "simple_supportive",
                depth: "detailed",
                example_count: 3,
            }
        } else {
            Self {
                band: "intermediate",
                pace: "moderate",
                tone: "neutral_encouraging",
                depth: "balanced",
                example_count: 2,
            }
        }
    }

    fn as_json(&self) -> Value {
        json!({
            "band": self.band,
            "pace": self.pace,
            "tone": self.tone,
            "depth": self.depth,
            "example_count": self.example_count,
        })
    }
}

pub struct ContentGenerationAgent {
    engine: Arc<ReasoningEngine>,
    generator: Arc<dyn LanguageModel>,
}

impl ContentGenerationAgent {
    pub fn new(engine: Arc<ReasoningEngine>, generator: Arc<dyn LanguageModel>) -> Self {
        Self { engine, generator }
    }

    /// Curriculum chunks only; learner-memory context never grounds content
    fn grounded_chunks(input: &Value) -> Vec<String> {
        input["retrieved_chunks"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter(|chunk| !chunk.trim().is_empty() && !chunk.trim_start().starts_with(MEMORY_PREFIX))
            .map(str::to_string)
            .collect()
    }

    fn citations(chunks: &[String]) -> Vec<Value> {
        chunks
            .iter()
            .take(CITATION_LIMIT)
            .enumerate()
            .map(|(i, chunk)| {
                let text: String = chunk.chars().take(CITATION_MAX_CHARS).collect();
                json!({ "label": format!("C{}", i + 1), "text": text })
            })
            .collect()
    }

    fn mastery_for(input: &Value, concept: &str) -> f64 {
        let mastery = &input["profile_snapshot"]["concept_mastery"];
        mastery[concept]
            .as_f64()
            .or_else(|| mastery.as_f64())
            .unwrap_or(0.0)
    }

    fn prompt(concept: &str, difficulty: i64, policy: &ContentPolicy, citations: &[Value]) -> String {
        let context: Vec<String> = citations
            .iter()
            .map(|c| {
                format!(
                    "[{}] {}",
                    c["label"].as_str().unwrap_or("C?"),
                    c["text"].as_str().unwrap_or("")
                )
            })
            .collect();
        format!(
            "You are a curriculum tutor. Explain '{concept}' at difficulty {difficulty}.\n\
             Tone: {tone}. Pace: {pace}. Depth: {depth}. Include {examples} worked example(s).\n\
             Use ONLY the syllabus context below; do not introduce outside material.\n\
             Cite context passages by their labels.\n\nSYLLABUS CONTEXT:\n{context}",
            tone = policy.tone,
            pace = policy.pace,
            depth = policy.depth,
            examples = policy.example_count,
            context = context.join("\n"),
        )
    }

    fn templated_fallback(concept: &str, difficulty: i64, citations: &[Value]) -> String {
        let notes: Vec<&str> = citations
            .iter()
            .filter_map(|c| c["text"].as_str())
            .collect();
        format!(
            "Concept: {concept}\nDifficulty: {difficulty}\n\n\
             Grounded curriculum notes:\n{}\n\n\
             Step-by-step: identify the known values, apply the concept rule, \
             and verify the final answer.",
            notes.join("\n")
        )
    }

    fn examples(concept: &str, count: usize) -> Vec<String> {
        (1..=count)
            .map(|i| format!("Example {i} for {concept}"))
            .collect()
    }
}

#[async_trait]
impl Agent for ContentGenerationAgent {
    async fn run(&self, input: Value) -> Result<Value> {
        let concept = str_field(&input, "concept", "fractions").to_string();
        let difficulty = i64_field(&input, "difficulty", 1);

        let chunks = Self::grounded_chunks(&input);
        if chunks.is_empty() {
            debug!("no grounded context for '{}', refusing generation", concept);
            return Ok(json!({
                "explanation": format!(
                    "I could not find enough grounded curriculum context to explain \
                     '{concept}' reliably. Please add syllabus material for this concept."
                ),
                "citations": [],
                "grounding_status": "insufficient_context",
                "source": "grounding_guardrail",
                "examples": [],
            }));
        }

        let mastery = Self::mastery_for(&input, &concept);
        let cognitive_depth = f64_field(&input["profile_snapshot"], "cognitive_depth", 0.5);
        let engagement = f64_field(&input["profile_snapshot"], "engagement_score", 0.5);
        let policy = ContentPolicy::from_signals(mastery, cognitive_depth, engagement);

        let citations = Self::citations(&chunks);
        let prompt = Self::prompt(&concept, difficulty, &policy, &citations);
        let context = chunks.join("\n");

        let mut explanation = None;
        let mut trace = Vec::new();
        let mut source = "reasoning_loop";
        for attempt in 1..=GENERATION_ATTEMPTS {
            let generator = self.generator.clone();
            let prompt = prompt.clone();
            let result = self
                .engine
                .run_loop(
                    &concept,
                    move || async move {
                        let out = generator.generate(&prompt).await;
                        match out.text {
                            Some(text) => Ok(text),
                            None => {
                                let reason = out.meta["reason"].as_str().unwrap_or("unavailable");
                                bail!("generator unavailable: {reason}")
                            }
                        }
                    },
                    &context,
                    None,
                )
                .await;
            match result {
                Ok((draft, rounds)) => {
                    trace = rounds;
                    explanation = Some(draft);
                    break;
                }
                Err(e) => warn!("content generation attempt {} failed: {}", attempt, e),
            }
        }

        let explanation = explanation.unwrap_or_else(|| {
            source = "template_fallback";
            Self::templated_fallback(&concept, difficulty, &citations)
        });

        Ok(json!({
            "explanation": explanation,
            "citations": citations,
            "grounding_status": "grounded",
            "source": source,
            "adaptation_policy": policy.as_json(),
            "examples": Self::examples(&concept, policy.example_count),
            "_reasoning_trace": trace,
        }))
    }
}
