//! Reasoning Agents
//!
//! Stateless single-responsibility transforms from an input record to an
//! output record. Agents know nothing about the graph or each other;
//! missing input keys resolve to documented defaults, and any failure is
//! surfaced to the run manager rather than swallowed.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub mod adaptation;
pub mod assessment;
pub mod content;
pub mod planner;
pub mod profiling;
pub mod progress;
pub mod reflection;

pub use adaptation::AdaptationAgent;
pub use assessment::AssessmentAgent;
pub use content::ContentGenerationAgent;
pub use planner::CurriculumPlannerAgent;
pub use profiling::LearnerProfilingAgent;
pub use progress::ProgressRevisionAgent;
pub use reflection::ReflectionAgent;

/// A stateless async transform over JSON records
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, input: Value) -> Result<Value>;
}

/// Field accessors: absent or mistyped keys resolve to the
/// caller-supplied default instead of failing the node.
pub(crate) fn f64_field(input: &Value, key: &str, default: f64) -> f64 {
    input[key].as_f64().unwrap_or(default)
}

pub(crate) fn i64_field(input: &Value, key: &str, default: i64) -> i64 {
    input[key].as_i64().or_else(|| input[key].as_f64().map(|f| f as i64)).unwrap_or(default)
}

pub(crate) fn str_field<'a>(input: &'a Value, key: &str, default: &'a str) -> &'a str {
    input[key].as_str().unwrap_or(default)
}
