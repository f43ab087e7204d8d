//! Mentorix Runtime
//!
//! Autonomous run orchestrator for an adaptive-learning tutor backend.
//!
//! # Features
//!
//! - **Execution Graph**: typed DAG of agent nodes over a shared blackboard
//! - **Run Manager**: cooperative scheduling loop with retry wrapping,
//!   snapshot persistence and mid-run replanning
//! - **Reasoning Loop**: draft-critique-refine cycle with verifier fallback
//! - **Agents**: seven single-responsibility async transforms
//! - **Resilience**: exponential-backoff retry and per-resource circuit
//!   breakers behind an injectable registry
//! - **Event Bus**: bounded-history publish/subscribe for live run streams
//! - **Scheduler**: persisted periodic jobs with skill-based query shaping
//! - **Telemetry**: fleet statistics aggregated from persisted snapshots
//!
//! # Architecture
//!
//! ```text
//! query ──► RunManager ──► GraphExecutionContext (DAG + blackboard)
//!               │
//!               ├── QueryOptimizer ──► replanning (clarification nodes)
//!               ├── Agents (profiling, planner, content, assessment, ...)
//!               │       └── ReasoningEngine ──► LanguageModel providers
//!               ├── Resilience (retry + circuit breakers)
//!               ├── EventBus (run/step/scheduler events)
//!               └── RunStore / EpisodeStore (snapshots + episodic skeletons)
//! ```

pub mod agents;
pub mod config;
pub mod events;
pub mod graph;
pub mod optimizer;
pub mod persistence;
pub mod provider;
pub mod reasoning;
pub mod resilience;
pub mod runtime;
pub mod scheduler;
pub mod telemetry;

pub use config::Config;
pub use events::{BusEvent, EventBus, Subscription};
pub use graph::{GraphExecutionContext, NodeStatus, RunStatus, RuntimeNode};
pub use optimizer::{jit_rules, QueryOptimization, QueryOptimizer};
pub use persistence::{skeletonize, EpisodeStore, RunStore};
pub use provider::{LanguageModel, ModelOutput, OllamaClient, OllamaConfig, ProviderSet, ScriptedModel};
pub use reasoning::{ReasoningEngine, ReasoningRound, Verifier};
pub use resilience::{
    retry_with_backoff, BreakerRegistry, BreakerStatus, CircuitBreaker, CircuitBreakerConfig,
    CircuitState, ErrorKind, RetryPolicy,
};
pub use runtime::{RunManager, RunSummary};
pub use scheduler::{
    JobUpdate, ScheduledJob, SchedulerError, SchedulerService, Skill, SkillMetadata, SkillRegistry,
};
pub use telemetry::{FleetStats, FleetTelemetry};
