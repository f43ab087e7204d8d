//! End-to-end run orchestration tests against the public crate API,
//! driving full runs with scripted model providers.

use std::sync::Arc;
use std::time::Duration;

use mentorix_runtime::{
    Config, EventBus, NodeStatus, ProviderSet, RunManager, RunStatus, RunStore, ScriptedModel,
    SchedulerService, SkillRegistry,
};

fn test_config(dir: &std::path::Path) -> Config {
    Config {
        data_dir: dir.to_path_buf(),
        poll_interval: Duration::from_millis(5),
        ..Config::default()
    }
}

fn scripted_providers() -> ProviderSet {
    ProviderSet {
        optimizer: Arc::new(ScriptedModel::always(
            "optimizer",
            r#"{"optimized_query": "Teach equivalent fractions with visual models", "changes_made": "scoped the goal"}"#,
        )),
        verifier: Arc::new(ScriptedModel::always(
            "verifier",
            "SCORE: 93\nCRITIQUE: grounded and well paced",
        )),
        verifier_fallback: Arc::new(ScriptedModel::offline("verifier_fallback")),
        generator: Arc::new(ScriptedModel::always(
            "generator",
            "Equivalent fractions name the same amount [C1].",
        )),
    }
}

fn offline_providers() -> ProviderSet {
    ProviderSet {
        optimizer: Arc::new(ScriptedModel::offline("optimizer")),
        verifier: Arc::new(ScriptedModel::offline("verifier")),
        verifier_fallback: Arc::new(ScriptedModel::offline("verifier_fallback")),
        generator: Arc::new(ScriptedModel::offline("generator")),
    }
}

#[tokio::test]
async fn full_run_completes_and_streams_events() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(EventBus::new(200));
    let manager = RunManager::new(test_config(dir.path()), bus.clone(), scripted_providers());

    let mut subscription = bus.subscribe(0).await;
    let run_id = manager.start_run("fractions help please").await;
    let status = manager.wait(&run_id).await.unwrap();
    assert_eq!(status, RunStatus::Completed);
    // Terminal status lands before the final event flush.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Event feed: started first, finished last, one step_start per node.
    let mut types = Vec::new();
    while let Ok(event) = subscription.rx.try_recv() {
        types.push(event.event_type);
    }
    assert_eq!(types.first().map(String::as_str), Some("run_started"));
    assert_eq!(types.last().map(String::as_str), Some("run_finished"));
    assert_eq!(types.iter().filter(|t| *t == "step_start").count(), 6);
    assert_eq!(types.iter().filter(|t| *t == "step_success").count(), 6);
    assert!(!types.iter().any(|t| t == "step_failed"));

    // The blackboard carries each stage's contribution.
    let context = manager.get_context(&run_id).await.unwrap();
    let ctx = context.read().await;
    assert_eq!(
        ctx.globals["optimized_query"],
        "Teach equivalent fractions with visual models"
    );
    assert!(ctx.globals["mastery_map"].is_object());
    assert!(ctx.globals["next_concept"].is_string());
    assert_eq!(
        ctx.globals["explanation"],
        "Equivalent fractions name the same amount [C1]."
    );
    assert!(ctx.globals["generated_question"].is_string());
    assert!(ctx.globals["run_summary"].is_string());
}

#[tokio::test]
async fn offline_providers_still_complete_via_fallbacks() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(EventBus::new(200));
    let manager = RunManager::new(test_config(dir.path()), bus, offline_providers());

    let run_id = manager.start_run("teach me equivalent fractions").await;
    assert_eq!(manager.wait(&run_id).await, Some(RunStatus::Completed));

    let context = manager.get_context(&run_id).await.unwrap();
    let ctx = context.read().await;
    // Optimizer degraded to the original query; content fell back to the
    // deterministic template.
    assert_eq!(ctx.globals["optimized_query"], "teach me equivalent fractions");
    let content = ctx.nodes["N04"].output.as_ref().unwrap();
    assert_eq!(content["source"], "template_fallback");
    assert_eq!(content["grounding_status"], "grounded");
}

#[tokio::test]
async fn ambiguous_query_injects_clarification_node() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(EventBus::new(200));
    let manager = RunManager::new(test_config(dir.path()), bus.clone(), offline_providers());

    let run_id = manager.start_run("fractions").await;
    manager.wait(&run_id).await.unwrap();

    let context = manager.get_context(&run_id).await.unwrap();
    let ctx = context.read().await;
    assert_eq!(ctx.nodes["N00"].status, NodeStatus::Completed);
    assert_eq!(ctx.globals["clarified_query"], "Please clarify: fractions");

    let replans = bus
        .history()
        .await
        .iter()
        .filter(|e| e.event_type == "run_replanned")
        .count();
    assert_eq!(replans, 1);
}

#[tokio::test]
async fn terminal_run_is_archived_and_reloadable() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(EventBus::new(200));
    let manager = RunManager::new(test_config(dir.path()), bus, scripted_providers());

    let run_id = manager.start_run("teach me decimals properly").await;
    manager.wait(&run_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = RunStore::new(dir.path()).load(&run_id).unwrap();
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["nodes"].as_array().unwrap().len(), 6);

    let episode_path = dir
        .path()
        .join("episodes")
        .join(format!("episode_{run_id}.json"));
    let episode: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(episode_path).unwrap()).unwrap();
    // Episodes keep the skeleton, not full payloads.
    for node in episode["nodes"].as_array().unwrap() {
        assert!(node.get("output").is_none());
    }
}

#[tokio::test]
async fn stop_run_is_idempotent_for_terminal_runs() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(EventBus::new(200));
    let manager = RunManager::new(test_config(dir.path()), bus.clone(), offline_providers());

    let run_id = manager.start_run("teach me equivalent fractions").await;
    manager.wait(&run_id).await.unwrap();

    assert!(!manager.stop_run(&run_id).await);
    assert!(!manager.stop_run(&run_id).await);
    let stops = bus
        .history()
        .await
        .iter()
        .filter(|e| e.event_type == "run_stopped")
        .count();
    assert_eq!(stops, 0);
}

#[tokio::test]
async fn scheduler_survives_restart_with_exact_state() {
    let dir = tempfile::tempdir().unwrap();

    let make_scheduler = || {
        let bus = Arc::new(EventBus::new(200));
        let manager = RunManager::new(test_config(dir.path()), bus.clone(), offline_providers());
        Arc::new(SchedulerService::new(
            dir.path(),
            Duration::from_secs(1),
            bus,
            manager,
            Arc::new(SkillRegistry::builtin()),
        ))
    };

    let first = make_scheduler();
    let job = first
        .add_job("revision sweep", "boost plan for algebra", 45)
        .await
        .unwrap();
    assert_eq!(job.skill_id.as_deref(), Some("learning-plan-booster"));
    let run_id = first.trigger_job(&job.id).await.unwrap();
    assert!(!run_id.is_empty());

    // A fresh process sees the triggered state, not a blank slate.
    let second = make_scheduler();
    second.load_jobs().await.unwrap();
    let restored = second.list_jobs().await;
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].last_run_id.as_deref(), Some(run_id.as_str()));
    assert_eq!(restored[0].last_status.as_deref(), Some("started"));
    assert!(restored[0].next_run_at.is_some());
}
