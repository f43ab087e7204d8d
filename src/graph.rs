//! Execution Graph Context
//!
//! The mutable DAG behind one autonomous run:
//! - Typed nodes with declared blackboard reads/writes
//! - Readiness and terminality tracking
//! - A run-scoped key-value blackboard seeded with the query
//! - Atomic mid-run node injection for replanning

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Node lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Stopped,
}

impl NodeStatus {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped | Self::Stopped)
    }
}

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

/// One unit of work bound to one agent within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeNode {
    pub id: String,
    pub agent: String,
    pub description: String,
    /// Blackboard keys this node consumes
    pub reads: Vec<String>,
    /// Blackboard keys this node may produce
    pub writes: Vec<String>,
    pub status: NodeStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub retries: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl RuntimeNode {
    pub fn new(id: &str, agent: &str, description: &str, reads: &[&str], writes: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            agent: agent.to_string(),
            description: description.to_string(),
            reads: reads.iter().map(|s| s.to_string()).collect(),
            writes: writes.iter().map(|s| s.to_string()).collect(),
            status: NodeStatus::Pending,
            output: None,
            error: None,
            retries: 0,
            start_time: None,
            end_time: None,
        }
    }
}

/// One autonomous run: nodes, edges, blackboard, metadata.
///
/// Owned exclusively by the run manager's scheduling loop for its
/// lifetime; read access is exposed through snapshots.
pub struct GraphExecutionContext {
    pub run_id: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: RunStatus,
    pub stop_requested: bool,
    /// Keyed by node id; BTreeMap keeps scheduling and snapshots
    /// deterministic
    pub nodes: BTreeMap<String, RuntimeNode>,
    pub edges: Vec<(String, String)>,
    /// The blackboard, seeded with `{query}`
    pub globals: Map<String, Value>,
    pub metadata: Map<String, Value>,
}

impl GraphExecutionContext {
    pub fn new(query: &str, nodes: Vec<RuntimeNode>, edges: Vec<(String, String)>) -> Self {
        let now = Utc::now();
        let mut globals = Map::new();
        globals.insert("query".to_string(), Value::String(query.to_string()));

        Self {
            run_id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            created_at: now,
            updated_at: now,
            status: RunStatus::Running,
            stop_requested: false,
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            edges,
            globals,
            metadata: Map::new(),
        }
    }

    /// Node ids with an edge into `node_id`
    pub fn predecessors(&self, node_id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, to)| to == node_id)
            .map(|(from, _)| from.as_str())
            .collect()
    }

    /// Pending nodes whose every predecessor has completed. Nodes with
    /// no predecessors are ready immediately.
    pub fn ready_steps(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|node| node.status == NodeStatus::Pending)
            .filter(|node| {
                self.predecessors(&node.id)
                    .iter()
                    .all(|p| self.nodes.get(*p).map(|n| n.status == NodeStatus::Completed).unwrap_or(false))
            })
            .map(|node| node.id.clone())
            .collect()
    }

    /// True iff every node is in a terminal status
    pub fn all_done(&self) -> bool {
        self.nodes.values().all(|node| node.status.is_terminal())
    }

    pub fn mark_running(&mut self, node_id: &str) {
        let now = Utc::now();
        if let Some(node) = self.nodes.get_mut(node_id) {
            if node.status == NodeStatus::Pending {
                node.status = NodeStatus::Running;
                node.start_time = Some(now);
                self.updated_at = now;
            }
        }
    }

    /// Complete a node and project its declared `writes` that are present
    /// in the output onto the blackboard (partial writes allowed).
    pub fn mark_done(&mut self, node_id: &str, output: Value) {
        let now = Utc::now();
        let Some(node) = self.nodes.get_mut(node_id) else {
            return;
        };
        if node.status.is_terminal() {
            return;
        }
        node.status = NodeStatus::Completed;
        node.end_time = Some(now);
        self.updated_at = now;

        let writes = node.writes.clone();
        node.output = Some(output.clone());
        if let Value::Object(fields) = output {
            for key in writes {
                if let Some(value) = fields.get(&key) {
                    self.globals.insert(key, value.clone());
                }
            }
        }
    }

    pub fn mark_failed(&mut self, node_id: &str, error: &str) {
        let now = Utc::now();
        if let Some(node) = self.nodes.get_mut(node_id) {
            if !node.status.is_terminal() {
                node.status = NodeStatus::Failed;
                node.error = Some(error.to_string());
                node.end_time = Some(now);
                self.updated_at = now;
            }
        }
    }

    /// Project the blackboard onto a node's declared `reads`; missing
    /// keys resolve to null, never an error.
    pub fn inputs_for(&self, node_id: &str) -> Value {
        let mut inputs = Map::new();
        if let Some(node) = self.nodes.get(node_id) {
            for key in &node.reads {
                let value = self.globals.get(key).cloned().unwrap_or(Value::Null);
                inputs.insert(key.clone(), value);
            }
        }
        Value::Object(inputs)
    }

    /// Inject a node and its edges mid-run as one atomic command.
    ///
    /// Legal only from the owning scheduling loop while the run is
    /// active; a duplicate id is rejected so replanning stays idempotent.
    pub fn insert_node(&mut self, node: RuntimeNode, edges: Vec<(String, String)>) -> bool {
        if self.nodes.contains_key(&node.id) {
            return false;
        }
        self.nodes.insert(node.id.clone(), node);
        self.edges.extend(edges);
        self.updated_at = Utc::now();
        true
    }

    /// Full JSON snapshot for persistence and graph visualization
    pub fn to_snapshot(&self) -> Value {
        json!({
            "run_id": self.run_id,
            "query": self.query,
            "status": self.status,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
            "globals": Value::Object(self.globals.clone()),
            "nodes": self.nodes.values().collect::<Vec<_>>(),
            "edges": self.edges.iter()
                .map(|(s, t)| json!({"source": s, "target": t}))
                .collect::<Vec<_>>(),
            "metadata": Value::Object(self.metadata.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_context() -> GraphExecutionContext {
        let nodes = vec![
            RuntimeNode::new("N01", "A", "first", &[], &["a"]),
            RuntimeNode::new("N02", "B", "second", &["a"], &["b"]),
            RuntimeNode::new("N03", "C", "third", &["a", "b"], &[]),
        ];
        let edges = vec![
            ("N01".to_string(), "N02".to_string()),
            ("N02".to_string(), "N03".to_string()),
        ];
        GraphExecutionContext::new("test query", nodes, edges)
    }

    #[test]
    fn test_initial_ready_steps_are_roots() {
        let context = linear_context();
        assert_eq!(context.ready_steps(), vec!["N01"]);
    }

    #[test]
    fn test_ready_after_predecessor_completes() {
        let mut context = linear_context();
        context.mark_running("N01");
        context.mark_done("N01", json!({"a": 1}));
        assert_eq!(context.ready_steps(), vec!["N02"]);
    }

    #[test]
    fn test_parallel_siblings_both_ready() {
        let nodes = vec![
            RuntimeNode::new("N01", "A", "root", &[], &[]),
            RuntimeNode::new("N02", "B", "left", &[], &[]),
            RuntimeNode::new("N03", "C", "right", &[], &[]),
        ];
        let edges = vec![
            ("N01".to_string(), "N02".to_string()),
            ("N01".to_string(), "N03".to_string()),
        ];
        let mut context = GraphExecutionContext::new("q", nodes, edges);
        context.mark_done("N01", json!({}));
        assert_eq!(context.ready_steps(), vec!["N02", "N03"]);
    }

    #[test]
    fn test_mark_done_projects_declared_writes_only() {
        let mut context = linear_context();
        context.mark_done("N01", json!({"a": 7, "undeclared": true}));

        assert_eq!(context.globals["a"], 7);
        assert!(!context.globals.contains_key("undeclared"));
    }

    #[test]
    fn test_partial_writes_allowed() {
        let nodes = vec![RuntimeNode::new("N01", "A", "x", &[], &["a", "b"])];
        let mut context = GraphExecutionContext::new("q", nodes, vec![]);
        context.mark_done("N01", json!({"a": 1}));

        assert_eq!(context.globals["a"], 1);
        assert!(!context.globals.contains_key("b"));
    }

    #[test]
    fn test_inputs_for_missing_keys_resolve_to_null() {
        let context = linear_context();
        let inputs = context.inputs_for("N03");
        assert_eq!(inputs["a"], Value::Null);
        assert_eq!(inputs["b"], Value::Null);
    }

    #[test]
    fn test_blackboard_seeded_with_query() {
        let context = linear_context();
        assert_eq!(context.globals["query"], "test query");
    }

    #[test]
    fn test_all_done_requires_terminal_everywhere() {
        let mut context = linear_context();
        assert!(!context.all_done());

        context.mark_done("N01", json!({}));
        context.mark_failed("N02", "boom");
        assert!(!context.all_done());

        if let Some(node) = context.nodes.get_mut("N03") {
            node.status = NodeStatus::Skipped;
        }
        assert!(context.all_done());
        for node in context.nodes.values() {
            assert!(node.status.is_terminal());
        }
    }

    #[test]
    fn test_no_resurrection_from_terminal_state() {
        let mut context = linear_context();
        context.mark_failed("N01", "boom");
        context.mark_done("N01", json!({"a": 1}));

        assert_eq!(context.nodes["N01"].status, NodeStatus::Failed);
        assert!(!context.globals.contains_key("a"));
    }

    #[test]
    fn test_failed_predecessor_blocks_successor() {
        let mut context = linear_context();
        context.mark_failed("N01", "boom");
        assert!(context.ready_steps().is_empty());
    }

    #[test]
    fn test_insert_node_is_idempotent() {
        let mut context = linear_context();
        let inject = RuntimeNode::new("N00", "Clarifier", "clarify", &["query"], &["clarified"]);
        let edge = vec![("N00".to_string(), "N02".to_string())];

        assert!(context.insert_node(inject.clone(), edge.clone()));
        assert!(!context.insert_node(inject, edge));
        assert_eq!(context.edges.len(), 3);
        assert_eq!(context.predecessors("N02"), vec!["N01", "N00"]);
    }

    #[test]
    fn test_snapshot_round_trips_nodes() {
        let mut context = linear_context();
        context.mark_done("N01", json!({"a": 1}));
        let snapshot = context.to_snapshot();

        assert_eq!(snapshot["query"], "test query");
        assert_eq!(snapshot["status"], "running");
        assert_eq!(snapshot["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(snapshot["nodes"][0]["status"], "completed");
        assert_eq!(snapshot["edges"][0]["source"], "N01");
        assert_eq!(snapshot["globals"]["a"], 1);
    }
}
