//! Configuration management

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for run snapshots, episodes and scheduled jobs
    pub data_dir: PathBuf,

    /// Ollama-compatible endpoint shared by all model roles
    pub model_url: String,

    /// Model used to rewrite user queries
    pub optimizer_model: String,

    /// Model used to score drafts
    pub verifier_model: String,

    /// Model used to generate and refine content
    pub generator_model: String,

    /// Acceptance bar for the reasoning loop (0-100)
    pub reasoning_score_threshold: i64,

    /// Maximum refinement rounds after the initial draft
    pub reasoning_max_refinements: usize,

    /// Scheduling-loop poll interval
    pub poll_interval: Duration,

    /// Scheduler tick interval
    pub scheduler_tick: Duration,

    /// Whether the periodic-job scheduler starts with the process
    pub scheduler_enabled: bool,

    /// Event bus replay-history capacity
    pub event_history_size: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let data_dir = std::env::var("MENTORIX_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/system"));

        let model_url = std::env::var("MENTORIX_MODEL_URL")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());

        let optimizer_model = std::env::var("MENTORIX_OPTIMIZER_MODEL")
            .unwrap_or_else(|_| "qwen2.5:3b".to_string());

        let verifier_model = std::env::var("MENTORIX_VERIFIER_MODEL")
            .unwrap_or_else(|_| "qwen2.5:3b".to_string());

        let generator_model = std::env::var("MENTORIX_GENERATOR_MODEL")
            .unwrap_or_else(|_| "llama3.2:3b".to_string());

        let reasoning_score_threshold = std::env::var("MENTORIX_REASONING_SCORE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(85);

        let reasoning_max_refinements = std::env::var("MENTORIX_REASONING_MAX_REFINEMENTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let poll_interval_ms = std::env::var("MENTORIX_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100u64);

        let scheduler_tick_seconds = std::env::var("MENTORIX_SCHEDULER_TICK_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2u64)
            .max(1);

        let scheduler_enabled = std::env::var("MENTORIX_SCHEDULER_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let event_history_size = std::env::var("MENTORIX_EVENT_HISTORY_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(200);

        Ok(Self {
            data_dir,
            model_url,
            optimizer_model,
            verifier_model,
            generator_model,
            reasoning_score_threshold,
            reasoning_max_refinements,
            poll_interval: Duration::from_millis(poll_interval_ms),
            scheduler_tick: Duration::from_secs(scheduler_tick_seconds),
            scheduler_enabled,
            event_history_size,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/system"),
            model_url: "http://localhost:11434".to_string(),
            optimizer_model: "qwen2.5:3b".to_string(),
            verifier_model: "qwen2.5:3b".to_string(),
            generator_model: "llama3.2:3b".to_string(),
            reasoning_score_threshold: 85,
            reasoning_max_refinements: 1,
            poll_interval: Duration::from_millis(100),
            scheduler_tick: Duration::from_secs(2),
            scheduler_enabled: false,
            event_history_size: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.reasoning_score_threshold, 85);
        assert_eq!(config.reasoning_max_refinements, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.event_history_size, 200);
        assert!(!config.scheduler_enabled);
    }
}
