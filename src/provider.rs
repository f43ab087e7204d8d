//! Language-Model Provider Contract
//!
//! The orchestrator consumes models through one narrow contract:
//! `generate(prompt) -> (text | none, metadata)`. A provider never fails
//! for ordinary non-availability; it returns no text plus a reason, and
//! the caller falls back to deterministic behavior.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::resilience::BreakerRegistry;

/// Result of one generation call
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Generated text, or none when the provider is unavailable
    pub text: Option<String>,
    /// Usage/diagnostic metadata (model name, token counts, failure reason)
    pub meta: Value,
}

impl ModelOutput {
    pub fn unavailable(reason: &str) -> Self {
        Self {
            text: None,
            meta: json!({ "reason": reason }),
        }
    }
}

/// Abstract model provider
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion. Must not fail for ordinary
    /// non-availability; return `text: None` with a reason instead.
    async fn generate(&self, prompt: &str) -> ModelOutput;

    /// Resource name, used for circuit-breaker lookup and logging
    fn name(&self) -> &str;
}

/// Ollama client configuration
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
}

/// Local-model provider over the Ollama HTTP API.
///
/// Every call goes through the named circuit breaker: an open breaker
/// short-circuits into a `circuit_open` reply without touching the
/// network, and call outcomes feed the breaker state back.
pub struct OllamaClient {
    name: String,
    config: OllamaConfig,
    client: reqwest::Client,
    breakers: Arc<BreakerRegistry>,
}

impl OllamaClient {
    pub fn new(name: &str, config: OllamaConfig, breakers: Arc<BreakerRegistry>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            name: name.to_string(),
            config,
            client,
            breakers,
        }
    }

    async fn call(&self, prompt: &str) -> Result<OllamaGenerateResponse, reqwest::Error> {
        let url = format!("{}/api/generate", self.config.url);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "model": self.config.model,
                "prompt": prompt,
                "stream": false,
            }))
            .send()
            .await?
            .error_for_status()?;
        response.json::<OllamaGenerateResponse>().await
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, prompt: &str) -> ModelOutput {
        let breaker = self.breakers.get(&self.name);
        if !breaker.can_execute() {
            debug!("provider '{}' rejected: circuit open", self.name);
            return ModelOutput::unavailable("circuit_open");
        }

        match self.call(prompt).await {
            Ok(reply) => {
                breaker.record_success();
                ModelOutput {
                    text: Some(reply.response),
                    meta: json!({
                        "model": self.config.model,
                        "prompt_eval_count": reply.prompt_eval_count,
                        "eval_count": reply.eval_count,
                    }),
                }
            }
            Err(e) => {
                breaker.record_failure();
                warn!("provider '{}' unavailable: {}", self.name, e);
                ModelOutput::unavailable(&e.to_string())
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Deterministic provider for tests and offline smoke runs.
///
/// Pops one scripted reply per call; `None` entries simulate provider
/// outages. An exhausted script falls back to the default reply, or to
/// unavailable when none is set.
pub struct ScriptedModel {
    name: String,
    replies: Mutex<VecDeque<Option<String>>>,
    default_reply: Option<String>,
    calls: Mutex<u32>,
}

impl ScriptedModel {
    pub fn new(name: &str, replies: Vec<Option<&str>>) -> Self {
        Self {
            name: name.to_string(),
            replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
            default_reply: None,
            calls: Mutex::new(0),
        }
    }

    /// Provider that answers every call with the same text
    pub fn always(name: &str, reply: &str) -> Self {
        Self {
            name: name.to_string(),
            replies: Mutex::new(VecDeque::new()),
            default_reply: Some(reply.to_string()),
            calls: Mutex::new(0),
        }
    }

    /// Provider that is down for every call
    pub fn offline(name: &str) -> Self {
        Self::new(name, vec![])
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().expect("script lock poisoned")
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, _prompt: &str) -> ModelOutput {
        *self.calls.lock().expect("script lock poisoned") += 1;
        let next = self
            .replies
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());
        match next {
            Some(text) => ModelOutput {
                text: Some(text),
                meta: json!({ "model": self.name }),
            },
            None => ModelOutput::unavailable("scripted_offline"),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Role-based provider set consumed by the orchestrator
#[derive(Clone)]
pub struct ProviderSet {
    pub optimizer: Arc<dyn LanguageModel>,
    pub verifier: Arc<dyn LanguageModel>,
    pub verifier_fallback: Arc<dyn LanguageModel>,
    pub generator: Arc<dyn LanguageModel>,
}

impl ProviderSet {
    /// Wire every role to Ollama models from the runtime config
    pub fn from_config(config: &crate::config::Config, breakers: Arc<BreakerRegistry>) -> Self {
        let make = |role: &str, model: &str| -> Arc<dyn LanguageModel> {
            Arc::new(OllamaClient::new(
                role,
                OllamaConfig {
                    url: config.model_url.clone(),
                    model: model.to_string(),
                    timeout: Duration::from_secs(60),
                },
                breakers.clone(),
            ))
        };

        Self {
            optimizer: make("optimizer", &config.optimizer_model),
            verifier: make("verifier", &config.verifier_model),
            verifier_fallback: make("verifier_fallback", &config.optimizer_model),
            generator: make("content_generator", &config.generator_model),
        }
    }
}
