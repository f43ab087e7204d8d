//! Reasoning & Verification Loop
//!
//! Bounds the blast radius of a single low-quality draft:
//! - Verifier scores each draft 0-100 with a critique
//! - Drafts below the acceptance bar are refined against the critique
//! - Verifier outages degrade to a fallback provider, then to a neutral
//!   score; the loop itself never fails
//! - The caller always receives a usable draft plus the full round history

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::provider::LanguageModel;

/// One round of the draft-critique-refine cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningRound {
    pub round: usize,
    pub draft: String,
    pub score: i64,
    pub critique: String,
}

/// Draft scorer with a secondary provider for outages
pub struct Verifier {
    primary: Arc<dyn LanguageModel>,
    fallback: Arc<dyn LanguageModel>,
    score_re: Regex,
    critique_re: Regex,
}

impl Verifier {
    pub fn new(primary: Arc<dyn LanguageModel>, fallback: Arc<dyn LanguageModel>) -> Self {
        Self {
            primary,
            fallback,
            score_re: Regex::new(r"(?i)SCORE:\s*(\d+)").expect("valid score pattern"),
            critique_re: Regex::new(r"(?is)CRITIQUE:\s*(.*)").expect("valid critique pattern"),
        }
    }

    fn prompt(query: &str, draft: &str, context: &str) -> String {
        format!(
            "You are a strict verifier.\n\
             Score the draft from 0-100 and provide critique.\n\
             Output exactly:\nSCORE: <number>\nCRITIQUE: <text>\n\n\
             QUERY: {query}\nCONTEXT: {context}\nDRAFT: {draft}"
        )
    }

    fn parse(&self, response: &str) -> (i64, String) {
        let score = self
            .score_re
            .captures(response)
            .and_then(|c| c[1].parse::<i64>().ok())
            .unwrap_or(50)
            .clamp(0, 100);
        let critique = self
            .critique_re
            .captures(response)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_else(|| response.trim().to_string());
        (score, critique)
    }

    /// Score a draft against the query and context.
    ///
    /// Never fails: a primary outage routes through the fallback provider,
    /// and a double outage synthesizes a neutral score with an
    /// error-annotated critique.
    pub async fn verify(&self, query: &str, draft: &str, context: &str) -> (i64, String) {
        let prompt = Self::prompt(query, draft, context);

        let primary = self.primary.generate(&prompt).await;
        if let Some(response) = primary.text {
            return self.parse(&response);
        }
        let primary_reason = primary.meta["reason"].as_str().unwrap_or("unavailable").to_string();
        debug!("verifier unavailable ({}), trying fallback", primary_reason);

        let secondary = self.fallback.generate(&prompt).await;
        if let Some(response) = secondary.text {
            return self.parse(&response);
        }
        let fallback_reason = secondary.meta["reason"].as_str().unwrap_or("unavailable");

        (
            50,
            format!("verification_failed: {primary_reason}; fallback_failed: {fallback_reason}"),
        )
    }
}

/// Draft-critique-refine engine
pub struct ReasoningEngine {
    verifier: Verifier,
    generator: Arc<dyn LanguageModel>,
    score_threshold: i64,
    max_refinements: usize,
}

impl ReasoningEngine {
    pub fn new(
        verifier: Verifier,
        generator: Arc<dyn LanguageModel>,
        score_threshold: i64,
        max_refinements: usize,
    ) -> Self {
        Self {
            verifier,
            generator,
            score_threshold,
            max_refinements,
        }
    }

    /// Run the loop: initial draft from `generate`, then up to
    /// `max_refinements` critique-driven rewrites.
    ///
    /// Returns the first draft meeting the acceptance bar, or the
    /// highest-scoring draft seen (earliest round wins ties) once the
    /// round budget is spent. Verifier-side failures never propagate;
    /// only the initial `generate` call may fail.
    pub async fn run_loop<F, Fut>(
        &self,
        query: &str,
        generate: F,
        context: &str,
        max_refinements: Option<usize>,
    ) -> anyhow::Result<(String, Vec<ReasoningRound>)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        let max_rounds = max_refinements.unwrap_or(self.max_refinements);
        let mut current = generate().await?;
        let mut history: Vec<ReasoningRound> = Vec::new();

        for idx in 0..=max_rounds {
            let (score, critique) = self.verifier.verify(query, &current, context).await;
            history.push(ReasoningRound {
                round: idx + 1,
                draft: current.clone(),
                score,
                critique: critique.clone(),
            });

            if score >= self.score_threshold {
                return Ok((current, history));
            }
            if idx == max_rounds {
                let best = history
                    .iter()
                    .max_by_key(|r| (r.score, std::cmp::Reverse(r.round)))
                    .map(|r| r.draft.clone())
                    .expect("history has at least one round");
                return Ok((best, history));
            }

            let refine_prompt = format!(
                "Improve this draft based on critique.\n\
                 QUERY: {query}\nDRAFT: {current}\nCRITIQUE: {critique}\n\
                 Return improved draft only."
            );
            if let Some(refined) = self.generator.generate(&refine_prompt).await.text {
                current = refined;
            }
        }

        Ok((current, history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedModel;

    fn engine_with(
        verifier_replies: Vec<Option<&str>>,
        fallback_replies: Vec<Option<&str>>,
        generator: Arc<ScriptedModel>,
        threshold: i64,
        max_refinements: usize,
    ) -> (ReasoningEngine, Arc<ScriptedModel>, Arc<ScriptedModel>) {
        let primary = Arc::new(ScriptedModel::new("verifier", verifier_replies));
        let fallback = Arc::new(ScriptedModel::new("verifier_fallback", fallback_replies));
        let engine = ReasoningEngine::new(
            Verifier::new(primary.clone(), fallback.clone()),
            generator,
            threshold,
            max_refinements,
        );
        (engine, primary, fallback)
    }

    #[tokio::test]
    async fn test_accepts_on_first_round_above_threshold() {
        let generator = Arc::new(ScriptedModel::always("gen", "unused refinement"));
        let (engine, primary, _) = engine_with(
            vec![Some("SCORE: 95\nCRITIQUE: solid")],
            vec![],
            generator.clone(),
            85,
            3,
        );

        let (draft, history) = engine
            .run_loop("explain fractions", || async { Ok("the draft".to_string()) }, "", None)
            .await
            .unwrap();

        assert_eq!(draft, "the draft");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].score, 95);
        assert_eq!(primary.call_count(), 1);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exhausts_budget_and_returns_best() {
        // Rounds score 10, 40, 20: exactly three verifications with
        // max_refinements=2, and round 2's draft wins.
        let generator = Arc::new(ScriptedModel::new("gen", vec![Some("draft-2"), Some("draft-3")]));
        let (engine, primary, _) = engine_with(
            vec![
                Some("SCORE: 10\nCRITIQUE: weak"),
                Some("SCORE: 40\nCRITIQUE: better"),
                Some("SCORE: 20\nCRITIQUE: regressed"),
            ],
            vec![],
            generator.clone(),
            85,
            2,
        );

        let (draft, history) = engine
            .run_loop("q", || async { Ok("draft-1".to_string()) }, "", Some(2))
            .await
            .unwrap();

        assert_eq!(primary.call_count(), 3);
        assert_eq!(history.len(), 3);
        assert_eq!(draft, "draft-2");
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_tie_breaks_to_earliest_round() {
        let generator = Arc::new(ScriptedModel::new("gen", vec![Some("draft-2")]));
        let (engine, _, _) = engine_with(
            vec![
                Some("SCORE: 30\nCRITIQUE: a"),
                Some("SCORE: 30\nCRITIQUE: b"),
            ],
            vec![],
            generator,
            85,
            1,
        );

        let (draft, _) = engine
            .run_loop("q", || async { Ok("draft-1".to_string()) }, "", None)
            .await
            .unwrap();
        assert_eq!(draft, "draft-1");
    }

    #[tokio::test]
    async fn test_verifier_outage_uses_fallback() {
        let generator = Arc::new(ScriptedModel::always("gen", "unused"));
        let (engine, _, fallback) = engine_with(
            vec![None],
            vec![Some("SCORE: 90\nCRITIQUE: fallback verified")],
            generator,
            85,
            1,
        );

        let (_, history) = engine
            .run_loop("q", || async { Ok("draft".to_string()) }, "", None)
            .await
            .unwrap();
        assert_eq!(history[0].score, 90);
        assert_eq!(fallback.call_count(), 1);
    }

    #[tokio::test]
    async fn test_double_outage_synthesizes_neutral_score() {
        let generator = Arc::new(ScriptedModel::new("gen", vec![]));
        let (engine, _, _) = engine_with(vec![], vec![], generator, 85, 0);

        let (draft, history) = engine
            .run_loop("q", || async { Ok("draft".to_string()) }, "", None)
            .await
            .unwrap();
        assert_eq!(draft, "draft");
        assert_eq!(history[0].score, 50);
        assert!(history[0].critique.starts_with("verification_failed"));
    }

    #[tokio::test]
    async fn test_unparseable_verdict_defaults_to_fifty() {
        let generator = Arc::new(ScriptedModel::new("gen", vec![]));
        let (engine, _, _) = engine_with(vec![Some("looks fine to me")], vec![], generator, 85, 0);

        let (_, history) = engine
            .run_loop("q", || async { Ok("draft".to_string()) }, "", None)
            .await
            .unwrap();
        assert_eq!(history[0].score, 50);
        assert_eq!(history[0].critique, "looks fine to me");
    }
}
