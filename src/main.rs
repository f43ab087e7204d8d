//! Mentorix Runtime - Entry Point
//!
//! Runs one autonomous tutoring run for the query given on the command
//! line, streaming bus events to stdout and printing the final snapshot.
//! With MENTORIX_SCHEDULER_ENABLED=true the periodic-job scheduler is
//! started alongside the run.

use std::sync::Arc;

use mentorix_runtime::{
    BreakerRegistry, Config, EventBus, ProviderSet, RunManager, SchedulerService, SkillRegistry,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Mentorix Runtime v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: mentorix-runtime [QUERY...]");
        println!();
        println!("Runs one autonomous run for QUERY (default: a demo query)");
        println!("and streams run events to stdout.");
        println!();
        println!("Environment variables:");
        println!("  MENTORIX_DATA_DIR           Snapshot/job directory (default: data/system)");
        println!("  MENTORIX_MODEL_URL          Ollama endpoint (default: http://localhost:11434)");
        println!("  MENTORIX_SCHEDULER_ENABLED  Start the periodic-job scheduler (default: false)");
        println!("  RUST_LOG                    Log filter (default: info)");
        return Ok(());
    }

    let query = if args.is_empty() {
        "teach me equivalent fractions".to_string()
    } else {
        args.join(" ")
    };

    let config = Config::from_env()?;
    info!("Mentorix Runtime v{}", env!("CARGO_PKG_VERSION"));

    let breakers = Arc::new(BreakerRegistry::new());
    let bus = Arc::new(EventBus::new(config.event_history_size));
    let providers = ProviderSet::from_config(&config, breakers);
    let manager = RunManager::new(config.clone(), bus.clone(), providers);

    let scheduler = Arc::new(SchedulerService::new(
        &config.data_dir,
        config.scheduler_tick,
        bus.clone(),
        manager.clone(),
        Arc::new(SkillRegistry::builtin()),
    ));
    if config.scheduler_enabled {
        scheduler.start().await?;
    }

    let mut subscription = bus.subscribe(0).await;
    let run_id = manager.start_run(&query).await;

    // Stream events until this run reaches a terminal state.
    while let Some(event) = subscription.rx.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        let finished = matches!(event.event_type.as_str(), "run_finished" | "run_failed")
            && event.data["run_id"] == run_id.as_str();
        if finished {
            break;
        }
    }

    if let Some(snapshot) = manager.snapshot(&run_id).await {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    if config.scheduler_enabled {
        scheduler.stop().await;
    }
    Ok(())
}
