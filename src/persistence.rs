//! Durable Snapshot & Episode Stores
//!
//! JSON-file persistence for run contexts and their post-run episodic
//! skeletons. Snapshot writes are synchronous overwrites with
//! last-writer-wins semantics; they are a diagnostic/recovery aid, not a
//! consistency-critical store.

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

/// Output keys preserved verbatim in an episode's per-node logic record
const LOGIC_KEYS: &[&str] = &[
    "thought",
    "reasoning",
    "adaptation_score",
    "grounding_status",
    "_reasoning_trace",
];

/// Snapshot store for live run contexts (`runs/run_<id>.json`)
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            dir: base_dir.join("runs"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Overwrite the snapshot for a run
    pub fn save(&self, snapshot: &Value) -> Result<PathBuf> {
        let run_id = snapshot["run_id"]
            .as_str()
            .context("snapshot missing run_id")?;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let target = self.dir.join(format!("run_{run_id}.json"));
        let payload = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&target, payload)
            .with_context(|| format!("writing {}", target.display()))?;
        Ok(target)
    }

    /// Load one persisted snapshot by run id
    pub fn load(&self, run_id: &str) -> Result<Value> {
        let path = self.dir.join(format!("run_{run_id}.json"));
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Compress a terminal run snapshot into its episodic skeleton.
///
/// Full node payloads are not kept indefinitely: each node is stripped to
/// its identity, wiring and status, plus named logic fields drawn from
/// the output.
pub fn skeletonize(snapshot: &Value) -> Value {
    let mut compressed_nodes = Vec::new();
    for node in snapshot["nodes"].as_array().into_iter().flatten() {
        let mut compressed = Map::new();
        for key in ["id", "agent", "description", "status", "error", "reads", "writes"] {
            compressed.insert(key.to_string(), node[key].clone());
        }
        if let Some(output) = node["output"].as_object() {
            let mut logic = Map::new();
            for key in LOGIC_KEYS {
                if let Some(value) = output.get(*key) {
                    logic.insert(key.to_string(), value.clone());
                }
            }
            if !logic.is_empty() {
                compressed.insert("logic".to_string(), Value::Object(logic));
            }
        }
        compressed_nodes.push(Value::Object(compressed));
    }

    json!({
        "run_id": snapshot["run_id"],
        "query": snapshot["query"],
        "status": snapshot["status"],
        "updated_at": snapshot["updated_at"],
        "nodes": compressed_nodes,
        "edges": snapshot["edges"],
    })
}

/// Archive of episodic skeletons (`episodes/episode_<id>.json`)
pub struct EpisodeStore {
    dir: PathBuf,
}

impl EpisodeStore {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            dir: base_dir.join("episodes"),
        }
    }

    /// Skeletonize and durably archive a terminal run
    pub fn archive(&self, snapshot: &Value) -> Result<PathBuf> {
        let skeleton = skeletonize(snapshot);
        let run_id = skeleton["run_id"].as_str().context("episode missing run_id")?;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let target = self.dir.join(format!("episode_{run_id}.json"));
        std::fs::write(&target, serde_json::to_string_pretty(&skeleton)?)
            .with_context(|| format!("writing {}", target.display()))?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> Value {
        json!({
            "run_id": "r1",
            "query": "teach fractions",
            "status": "completed",
            "updated_at": "2026-08-01T10:00:30Z",
            "nodes": [{
                "id": "N04",
                "agent": "ContentGenerationAgent",
                "description": "Generate grounded content",
                "status": "completed",
                "error": null,
                "reads": ["next_concept"],
                "writes": ["explanation"],
                "output": {
                    "explanation": "a very long explanation body...",
                    "grounding_status": "grounded",
                    "_reasoning_trace": [{"round": 1, "score": 90}],
                },
            }],
            "edges": [{"source": "N03", "target": "N04"}],
        })
    }

    #[test]
    fn test_skeletonize_keeps_logic_drops_payload() {
        let skeleton = skeletonize(&sample_snapshot());
        let node = &skeleton["nodes"][0];

        assert_eq!(node["agent"], "ContentGenerationAgent");
        assert_eq!(node["logic"]["grounding_status"], "grounded");
        assert_eq!(node["logic"]["_reasoning_trace"][0]["score"], 90);
        assert!(node.get("output").is_none());
        assert_eq!(skeleton["edges"][0]["target"], "N04");
    }

    #[test]
    fn test_skeletonize_node_without_logic_fields() {
        let snapshot = json!({
            "run_id": "r2",
            "query": "q",
            "status": "failed",
            "updated_at": null,
            "nodes": [{
                "id": "N01", "agent": "QueryOptimizer", "description": "d",
                "status": "failed", "error": "timeout",
                "reads": [], "writes": [], "output": null,
            }],
            "edges": [],
        });
        let skeleton = skeletonize(&snapshot);
        assert!(skeleton["nodes"][0].get("logic").is_none());
        assert_eq!(skeleton["nodes"][0]["error"], "timeout");
    }

    #[test]
    fn test_run_store_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());

        let path = store.save(&sample_snapshot()).unwrap();
        assert!(path.ends_with("run_r1.json"));

        let loaded = store.load("r1").unwrap();
        assert_eq!(loaded["query"], "teach fractions");
    }

    #[test]
    fn test_run_store_overwrites_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());

        let mut snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();
        snapshot["status"] = json!("failed");
        store.save(&snapshot).unwrap();

        assert_eq!(store.load("r1").unwrap()["status"], "failed");
    }

    #[test]
    fn test_episode_store_archives_skeleton() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::new(dir.path());

        let path = store.archive(&sample_snapshot()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let episode: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(episode["run_id"], "r1");
        assert!(episode["nodes"][0].get("output").is_none());
    }
}
