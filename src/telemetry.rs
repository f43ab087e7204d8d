//! Fleet Telemetry
//!
//! Read-only aggregation over persisted run snapshots. Feeds the query
//! optimizer's heuristic rules and operator-facing stats.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Aggregate counters scanned from `run_*.json` snapshots
#[derive(Debug, Clone, Serialize, Default)]
pub struct FleetStats {
    pub total_runs: usize,
    pub outcomes: HashMap<String, usize>,
    pub total_steps: usize,
    pub failed_steps: usize,
    /// Percentage of non-failed steps; 100.0 when no steps were recorded
    pub step_success_rate: f64,
    pub total_retries: u64,
    /// Agent names with step counts, most frequent first
    pub top_agents: Vec<(String, usize)>,
    pub max_run_duration_sec: Option<f64>,
    pub p95_run_duration_sec: Option<f64>,
}

/// Scanner over the run-snapshot directory
pub struct FleetTelemetry {
    runs_dir: PathBuf,
}

impl FleetTelemetry {
    pub fn new(runs_dir: PathBuf) -> Self {
        Self { runs_dir }
    }

    fn scan_runs(&self) -> Vec<Value> {
        let Ok(entries) = std::fs::read_dir(&self.runs_dir) else {
            return Vec::new();
        };
        let mut runs = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("run_") || !name.ends_with(".json") {
                continue;
            }
            // Unreadable or truncated snapshots are skipped, not fatal.
            if let Ok(text) = std::fs::read_to_string(entry.path()) {
                if let Ok(value) = serde_json::from_str::<Value>(&text) {
                    runs.push(value);
                }
            }
        }
        runs
    }

    fn run_duration_sec(run: &Value) -> Option<f64> {
        let parse = |key: &str| -> Option<DateTime<Utc>> {
            run[key].as_str().and_then(|s| s.parse().ok())
        };
        let created = parse("created_at")?;
        let updated = parse("updated_at")?;
        let seconds = (updated - created).num_milliseconds() as f64 / 1000.0;
        Some(seconds.max(0.0))
    }

    /// Aggregate counters across every readable snapshot
    pub fn aggregate(&self) -> FleetStats {
        let runs = self.scan_runs();
        let mut stats = FleetStats {
            total_runs: runs.len(),
            ..Default::default()
        };
        let mut agents: HashMap<String, usize> = HashMap::new();
        let mut durations: Vec<f64> = Vec::new();

        for run in &runs {
            let outcome = run["status"].as_str().unwrap_or("unknown").to_string();
            *stats.outcomes.entry(outcome).or_default() += 1;
            if let Some(duration) = Self::run_duration_sec(run) {
                durations.push(duration);
            }
            for node in run["nodes"].as_array().into_iter().flatten() {
                stats.total_steps += 1;
                stats.total_retries += node["retries"].as_u64().unwrap_or(0);
                let agent = node["agent"].as_str().unwrap_or("unknown").to_string();
                *agents.entry(agent).or_default() += 1;
                if node["status"].as_str() == Some("failed") {
                    stats.failed_steps += 1;
                }
            }
        }

        stats.step_success_rate = if stats.total_steps > 0 {
            let ok = (stats.total_steps - stats.failed_steps) as f64;
            (ok / stats.total_steps as f64 * 1000.0).round() / 10.0
        } else {
            100.0
        };

        let mut top: Vec<(String, usize)> = agents.into_iter().collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(10);
        stats.top_agents = top;

        durations.sort_by(|a, b| a.partial_cmp(b).expect("durations are finite"));
        if let Some(max) = durations.last() {
            stats.max_run_duration_sec = Some(*max);
            let idx = ((durations.len() - 1) as f64 * 0.95) as usize;
            stats.p95_run_duration_sec = Some(durations[idx]);
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_run(dir: &std::path::Path, id: &str, status: &str, nodes: Value) {
        let snapshot = json!({
            "run_id": id,
            "status": status,
            "created_at": "2026-08-01T10:00:00Z",
            "updated_at": "2026-08-01T10:00:30Z",
            "nodes": nodes,
        });
        std::fs::write(
            dir.join(format!("run_{id}.json")),
            serde_json::to_string_pretty(&snapshot).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_aggregate_counts_steps_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        write_run(
            dir.path(),
            "a",
            "completed",
            json!([
                {"agent": "QueryOptimizer", "status": "completed", "retries": 0},
                {"agent": "ContentGenerationAgent", "status": "failed", "retries": 2},
            ]),
        );
        write_run(
            dir.path(),
            "b",
            "failed",
            json!([
                {"agent": "QueryOptimizer", "status": "completed", "retries": 1},
            ]),
        );

        let stats = FleetTelemetry::new(dir.path().to_path_buf()).aggregate();
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.total_steps, 3);
        assert_eq!(stats.failed_steps, 1);
        assert_eq!(stats.total_retries, 3);
        assert_eq!(stats.step_success_rate, 66.7);
        assert_eq!(stats.outcomes["completed"], 1);
        assert_eq!(stats.outcomes["failed"], 1);
        assert_eq!(stats.top_agents[0].0, "QueryOptimizer");
        assert_eq!(stats.max_run_duration_sec, Some(30.0));
    }

    #[test]
    fn test_empty_directory_is_all_green() {
        let dir = tempfile::tempdir().unwrap();
        let stats = FleetTelemetry::new(dir.path().join("missing")).aggregate();
        assert_eq!(stats.total_runs, 0);
        assert_eq!(stats.step_success_rate, 100.0);
        assert!(stats.max_run_duration_sec.is_none());
    }

    #[test]
    fn test_corrupt_snapshot_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run_bad.json"), "{not json").unwrap();
        write_run(dir.path(), "ok", "completed", json!([]));

        let stats = FleetTelemetry::new(dir.path().to_path_buf()).aggregate();
        assert_eq!(stats.total_runs, 1);
    }
}
