//! Periodic-Job Scheduler
//!
//! A thin autonomy layer on top of the run manager:
//! - Jobs persist synchronously to `scheduled_jobs.json` on every
//!   mutation, so a restart recovers exact last-run/next-run state
//! - A tick loop triggers enabled jobs whose `next_run_at` has passed
//! - A failing job records its error and is rescheduled; it never stalls
//!   the tick loop or other jobs
//! - Jobs may bind to a registered skill that rewrites the query before
//!   each run

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::EventBus;
use crate::runtime::RunManager;

const SOURCE: &str = "scheduler";
const JOBS_FILE: &str = "scheduled_jobs.json";

/// Smallest allowed trigger interval
const MIN_INTERVAL_SECONDS: u64 = 10;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error("persisting jobs failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding jobs failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Static metadata describing a registered skill
#[derive(Debug, Clone, Serialize)]
pub struct SkillMetadata {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub intent_triggers: &'static [&'static str],
}

/// A query-shaping extension bound to scheduled jobs by intent
#[async_trait]
pub trait Skill: Send + Sync {
    fn metadata(&self) -> SkillMetadata;

    /// Rewrite the job query before a run starts
    async fn on_run_start(&self, initial_prompt: &str) -> String {
        initial_prompt.to_string()
    }
}

/// Adds pacing and revision constraints to planning queries
pub struct LearningPlanBoosterSkill;

#[async_trait]
impl Skill for LearningPlanBoosterSkill {
    fn metadata(&self) -> SkillMetadata {
        SkillMetadata {
            name: "learning-plan-booster",
            version: "1.0.0",
            description: "Adds explicit pacing and revision constraints to planning prompts.",
            intent_triggers: &["revise plan", "boost plan", "improve learning plan"],
        }
    }

    async fn on_run_start(&self, initial_prompt: &str) -> String {
        format!(
            "{initial_prompt}\n\nSkill guidance:\n\
             - Enforce 25-minute focused blocks\n\
             - Include one spaced-repetition checkpoint\n\
             - Keep concept progression strictly curriculum-grounded"
        )
    }
}

/// Statically registered skills, passed to the scheduler explicitly so
/// tests can construct their own set.
pub struct SkillRegistry {
    skills: Vec<Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new(skills: Vec<Arc<dyn Skill>>) -> Self {
        Self { skills }
    }

    /// The skills compiled into this binary
    pub fn builtin() -> Self {
        Self::new(vec![Arc::new(LearningPlanBoosterSkill)])
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.iter().find(|s| s.metadata().name == name).cloned()
    }

    /// First skill whose intent trigger appears in the query
    pub fn match_intent(&self, query: &str) -> Option<String> {
        let normalized = query.to_lowercase();
        self.skills
            .iter()
            .find(|skill| {
                skill
                    .metadata()
                    .intent_triggers
                    .iter()
                    .any(|trigger| normalized.contains(&trigger.to_lowercase()))
            })
            .map(|skill| skill.metadata().name.to_string())
    }

    pub fn list(&self) -> Vec<SkillMetadata> {
        self.skills.iter().map(|s| s.metadata()).collect()
    }
}

/// A recurring trigger for autonomous runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    pub query: String,
    pub interval_seconds: u64,
    pub enabled: bool,
    pub skill_id: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_id: Option<String>,
    pub last_status: Option<String>,
}

/// Partial update applied by [`SchedulerService::update_job`]
#[derive(Debug, Default, Clone, Deserialize)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub query: Option<String>,
    pub interval_seconds: Option<u64>,
    pub enabled: Option<bool>,
}

pub struct SchedulerService {
    base_dir: PathBuf,
    jobs_file: PathBuf,
    tick: Duration,
    bus: Arc<EventBus>,
    runs: Arc<RunManager>,
    skills: Arc<SkillRegistry>,
    jobs: RwLock<HashMap<String, ScheduledJob>>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerService {
    pub fn new(
        base_dir: &Path,
        tick: Duration,
        bus: Arc<EventBus>,
        runs: Arc<RunManager>,
        skills: Arc<SkillRegistry>,
    ) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            jobs_file: base_dir.join(JOBS_FILE),
            tick: tick.max(Duration::from_secs(1)),
            bus,
            runs,
            skills,
            jobs: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Restore persisted jobs; absent file means a fresh install
    pub async fn load_jobs(&self) -> Result<(), SchedulerError> {
        std::fs::create_dir_all(&self.base_dir)?;
        if !self.jobs_file.exists() {
            return Ok(());
        }
        let text = std::fs::read_to_string(&self.jobs_file)?;
        let loaded: Vec<ScheduledJob> = serde_json::from_str(&text)?;
        let mut jobs = self.jobs.write().await;
        *jobs = loaded.into_iter().map(|j| (j.id.clone(), j)).collect();
        info!("restored {} scheduled jobs", jobs.len());
        Ok(())
    }

    async fn save_jobs(&self) -> Result<(), SchedulerError> {
        std::fs::create_dir_all(&self.base_dir)?;
        let jobs = self.jobs.read().await;
        let mut payload: Vec<&ScheduledJob> = jobs.values().collect();
        payload.sort_by(|a, b| a.id.cmp(&b.id));
        std::fs::write(&self.jobs_file, serde_json::to_string_pretty(&payload)?)?;
        Ok(())
    }

    pub async fn list_jobs(&self) -> Vec<ScheduledJob> {
        let jobs = self.jobs.read().await;
        let mut listed: Vec<ScheduledJob> = jobs.values().cloned().collect();
        listed.sort_by(|a, b| a.id.cmp(&b.id));
        listed
    }

    pub async fn add_job(
        &self,
        name: &str,
        query: &str,
        interval_seconds: u64,
    ) -> Result<ScheduledJob, SchedulerError> {
        let interval = interval_seconds.max(MIN_INTERVAL_SECONDS);
        let job = ScheduledJob {
            id: Uuid::new_v4().to_string()[..8].to_string(),
            name: name.to_string(),
            query: query.to_string(),
            interval_seconds: interval,
            enabled: true,
            skill_id: self.skills.match_intent(query),
            next_run_at: Some(Utc::now() + ChronoDuration::seconds(interval as i64)),
            last_run_at: None,
            last_run_id: None,
            last_status: None,
        };
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        self.save_jobs().await?;
        info!("scheduled job '{}' every {}s", job.name, job.interval_seconds);
        Ok(job)
    }

    pub async fn update_job(
        &self,
        job_id: &str,
        update: JobUpdate,
    ) -> Result<ScheduledJob, SchedulerError> {
        let updated = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            if let Some(name) = update.name {
                job.name = name;
            }
            if let Some(query) = update.query {
                job.skill_id = self.skills.match_intent(&query);
                job.query = query;
            }
            if let Some(interval) = update.interval_seconds {
                job.interval_seconds = interval.max(MIN_INTERVAL_SECONDS);
            }
            if let Some(enabled) = update.enabled {
                job.enabled = enabled;
            }
            job.clone()
        };
        self.save_jobs().await?;
        Ok(updated)
    }

    pub async fn delete_job(&self, job_id: &str) -> Result<(), SchedulerError> {
        let removed = self.jobs.write().await.remove(job_id);
        if removed.is_none() {
            return Err(SchedulerError::JobNotFound(job_id.to_string()));
        }
        self.save_jobs().await
    }

    /// Force a job to run now, even when disabled
    pub async fn trigger_job(&self, job_id: &str) -> Result<String, SchedulerError> {
        let job = self
            .jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
        self.run_job(&job, true).await
    }

    async fn run_job(&self, job: &ScheduledJob, forced: bool) -> Result<String, SchedulerError> {
        if !forced && !job.enabled {
            return Ok(String::new());
        }

        let mut query = job.query.clone();
        if let Some(skill) = job.skill_id.as_deref().and_then(|id| self.skills.get(id)) {
            query = skill.on_run_start(&query).await;
        }

        self.bus
            .publish(
                "scheduler_job_start",
                SOURCE,
                serde_json::json!({"job_id": job.id, "name": job.name}),
            )
            .await;
        let run_id = self.runs.start_run(&query).await;

        {
            let mut jobs = self.jobs.write().await;
            if let Some(stored) = jobs.get_mut(&job.id) {
                let now = Utc::now();
                stored.last_run_id = Some(run_id.clone());
                stored.last_run_at = Some(now);
                stored.next_run_at =
                    Some(now + ChronoDuration::seconds(stored.interval_seconds as i64));
                stored.last_status = Some("started".to_string());
            }
        }
        self.save_jobs().await?;
        self.bus
            .publish(
                "scheduler_job_triggered",
                SOURCE,
                serde_json::json!({"job_id": job.id, "run_id": run_id}),
            )
            .await;
        Ok(run_id)
    }

    /// One scheduling pass: trigger every enabled job whose `next_run_at`
    /// has passed. A failed trigger is recorded on its job and
    /// rescheduled; remaining jobs still run.
    pub async fn run_due_jobs(&self, now: DateTime<Utc>) {
        let due: Vec<ScheduledJob> = {
            let jobs = self.jobs.read().await;
            jobs.values()
                .filter(|job| job.enabled)
                .filter(|job| job.next_run_at.map(|t| t <= now).unwrap_or(true))
                .cloned()
                .collect()
        };

        for job in due {
            if let Err(e) = self.run_job(&job, false).await {
                warn!("scheduled job {} failed: {}", job.id, e);
                {
                    let mut jobs = self.jobs.write().await;
                    if let Some(stored) = jobs.get_mut(&job.id) {
                        stored.last_status = Some(format!("failed: {e}"));
                        stored.next_run_at =
                            Some(now + ChronoDuration::seconds(stored.interval_seconds as i64));
                    }
                }
                if let Err(se) = self.save_jobs().await {
                    warn!("persisting failed job state: {}", se);
                }
                self.bus
                    .publish(
                        "scheduler_job_failed",
                        SOURCE,
                        serde_json::json!({"job_id": job.id, "error": e.to_string()}),
                    )
                    .await;
            }
        }
    }

    /// Start the tick loop; idempotent
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        self.load_jobs().await?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let service = self.clone();
        let handle = tokio::spawn(async move {
            while service.running.load(Ordering::SeqCst) {
                service.run_due_jobs(Utc::now()).await;
                tokio::time::sleep(service.tick).await;
            }
        });
        *self.task.lock().await = Some(handle);
        info!("scheduler started with tick {:?}", self.tick);
        Ok(())
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        if let Err(e) = self.save_jobs().await {
            warn!("persisting jobs on shutdown: {}", e);
        }
    }
}
