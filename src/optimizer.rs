//! Query Optimizer
//!
//! Rewrites a free-form user goal into a structured objective before the
//! graph is scheduled. Optimization is best-effort: any provider outage
//! or parse failure degrades to the original query and never blocks
//! downstream execution.

use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::provider::LanguageModel;
use crate::telemetry::FleetStats;

/// Outcome of a rewrite attempt. Failure handling is part of the
/// signature: callers see whether they got a rewrite or the original.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOptimization {
    Optimized {
        original: String,
        optimized: String,
        reasoning: String,
    },
    Fallback {
        original: String,
        reason: String,
    },
}

impl QueryOptimization {
    /// The query downstream nodes should use
    pub fn optimized_text(&self) -> &str {
        match self {
            Self::Optimized { optimized, .. } => optimized,
            Self::Fallback { original, .. } => original,
        }
    }

    pub fn reasoning(&self) -> &str {
        match self {
            Self::Optimized { reasoning, .. } => reasoning,
            Self::Fallback { reason, .. } => reason,
        }
    }
}

#[derive(Deserialize)]
struct RewritePayload {
    optimized_query: String,
    #[serde(default)]
    changes_made: String,
}

pub struct QueryOptimizer {
    provider: Arc<dyn LanguageModel>,
}

impl QueryOptimizer {
    pub fn new(provider: Arc<dyn LanguageModel>) -> Self {
        Self { provider }
    }

    /// Ask the model to rewrite the query as strict JSON
    /// `{optimized_query, changes_made}`.
    pub async fn optimize_query(&self, query: &str) -> QueryOptimization {
        let prompt = format!(
            "Rewrite the user request for an autonomous multi-agent tutor. \
             Return strict JSON with keys optimized_query and changes_made.\n\n\
             User query: {query}"
        );

        let reply = self.provider.generate(&prompt).await;
        let Some(text) = reply.text else {
            let reason = reply.meta["reason"].as_str().unwrap_or("no output").to_string();
            debug!("query optimization unavailable: {}", reason);
            return QueryOptimization::Fallback {
                original: query.to_string(),
                reason,
            };
        };

        let Some(json_str) = extract_json_object(&text) else {
            return QueryOptimization::Fallback {
                original: query.to_string(),
                reason: "no JSON object in output".to_string(),
            };
        };
        match serde_json::from_str::<RewritePayload>(json_str) {
            Ok(payload) if !payload.optimized_query.trim().is_empty() => {
                QueryOptimization::Optimized {
                    original: query.to_string(),
                    optimized: payload.optimized_query.trim().to_string(),
                    reasoning: if payload.changes_made.is_empty() {
                        "optimized".to_string()
                    } else {
                        payload.changes_made
                    },
                }
            }
            Ok(_) => QueryOptimization::Fallback {
                original: query.to_string(),
                reason: "empty rewrite".to_string(),
            },
            Err(e) => QueryOptimization::Fallback {
                original: query.to_string(),
                reason: format!("parse failure: {e}"),
            },
        }
    }
}

/// Derive advisory guidance lines from fleet telemetry. Pure text, no
/// side effects; consumed as prompt seasoning by callers.
pub fn jit_rules(stats: &FleetStats) -> Vec<String> {
    let mut rules = Vec::new();

    if stats.total_steps > 0 && stats.step_success_rate < 90.0 {
        rules.push(format!(
            "Step success rate is {:.1}%: prefer decomposing broad goals into smaller steps.",
            stats.step_success_rate
        ));
    }
    if stats.total_steps > 0 && stats.total_retries as usize * 10 > stats.total_steps {
        rules.push(format!(
            "{} retries across {} steps: keep prompts short, upstream calls are flaky.",
            stats.total_retries, stats.total_steps
        ));
    }
    if let Some((agent, count)) = stats.top_agents.first() {
        if stats.total_steps > 0 && *count * 2 > stats.total_steps {
            rules.push(format!(
                "'{agent}' dominates recent work: balance objectives across agents."
            ));
        }
    }
    if rules.is_empty() {
        rules.push("Fleet is healthy: no special handling required.".to_string());
    }
    rules
}

/// Extract the first balanced JSON object from free-form model output
fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0;
    for (i, c) in s[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedModel;

    #[tokio::test]
    async fn test_optimizes_with_strict_json() {
        let provider = Arc::new(ScriptedModel::always(
            "optimizer",
            r#"Here you go: {"optimized_query": "Teach equivalent fractions with visual models", "changes_made": "added scope"}"#,
        ));
        let optimizer = QueryOptimizer::new(provider);

        let outcome = optimizer.optimize_query("fractions help").await;
        assert_eq!(
            outcome.optimized_text(),
            "Teach equivalent fractions with visual models"
        );
        assert_eq!(outcome.reasoning(), "added scope");
    }

    #[tokio::test]
    async fn test_provider_outage_falls_back_to_original() {
        let optimizer = QueryOptimizer::new(Arc::new(ScriptedModel::offline("optimizer")));
        let outcome = optimizer.optimize_query("fractions help").await;

        assert!(matches!(outcome, QueryOptimization::Fallback { .. }));
        assert_eq!(outcome.optimized_text(), "fractions help");
    }

    #[tokio::test]
    async fn test_garbage_output_falls_back() {
        let optimizer = QueryOptimizer::new(Arc::new(ScriptedModel::always(
            "optimizer",
            "sure, optimized_query is better now",
        )));
        let outcome = optimizer.optimize_query("fractions help").await;
        assert!(matches!(outcome, QueryOptimization::Fallback { .. }));
    }

    #[tokio::test]
    async fn test_empty_rewrite_falls_back() {
        let optimizer = QueryOptimizer::new(Arc::new(ScriptedModel::always(
            "optimizer",
            r#"{"optimized_query": "  ", "changes_made": "nothing"}"#,
        )));
        let outcome = optimizer.optimize_query("fractions help").await;
        assert!(matches!(outcome, QueryOptimization::Fallback { .. }));
    }

    #[test]
    fn test_jit_rules_flag_low_success_rate() {
        let stats = FleetStats {
            total_steps: 100,
            failed_steps: 20,
            step_success_rate: 80.0,
            ..Default::default()
        };
        let rules = jit_rules(&stats);
        assert!(rules[0].contains("decomposing"));
    }

    #[test]
    fn test_jit_rules_healthy_fleet() {
        let stats = FleetStats {
            total_steps: 50,
            step_success_rate: 98.0,
            ..Default::default()
        };
        assert_eq!(jit_rules(&stats).len(), 1);
        assert!(jit_rules(&stats)[0].contains("healthy"));
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(extract_json_object(r#"x {"a": {"b": 1}} y"#), Some(r#"{"a": {"b": 1}}"#));
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{unclosed"), None);
    }
}
