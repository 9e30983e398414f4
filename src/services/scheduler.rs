use crate::config::{PoolTemplate, SchedulerConfig};
use crate::services::SettlementEngine;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

/// Observability snapshot of the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub job_count: usize,
    /// Authority key used for on-chain calls, if configured
    pub authority: Option<String>,
}

#[derive(Debug, Clone)]
enum Job {
    CreatePool(PoolTemplate),
    StatusTransitions,
    Resolutions,
    Cleanup,
}

impl Job {
    fn name(&self) -> String {
        match self {
            Job::CreatePool(t) => format!("create:{}:{}", t.asset, t.interval_key),
            Job::StatusTransitions => "status-transitions".to_string(),
            Job::Resolutions => "resolutions".to_string(),
            Job::Cleanup => "cleanup".to_string(),
        }
    }
}

/// Supervisor owning one periodic job per template plus the three sweeps.
///
/// Jobs fire immediately on start and then on their period. Stopping signals
/// every job and waits for in-flight ticks to finish.
pub struct PoolScheduler {
    engine: Arc<SettlementEngine>,
    config: SchedulerConfig,
    shutdown: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl PoolScheduler {
    pub fn new(engine: Arc<SettlementEngine>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            shutdown: None,
            handles: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    pub fn job_count(&self) -> usize {
        self.handles.len()
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            is_running: self.is_running(),
            job_count: self.job_count(),
            authority: self.engine.authority(),
        }
    }

    /// Start every job; a second call while running is a no-op
    pub fn start(&mut self) -> usize {
        if self.is_running() {
            warn!("Pool scheduler already running");
            return self.job_count();
        }

        let (tx, rx) = watch::channel(false);

        let mut jobs: Vec<(Job, Duration)> = self
            .config
            .templates
            .iter()
            .map(|t| (Job::CreatePool(t.clone()), t.cadence()))
            .collect();
        jobs.push((Job::StatusTransitions, self.config.transition_interval()));
        jobs.push((Job::Resolutions, self.config.resolution_interval()));
        jobs.push((Job::Cleanup, self.config.cleanup_interval()));

        for (job, period) in jobs {
            info!("Scheduling {} every {:?}", job.name(), period);
            self.handles.push(self.spawn_job(job, period, rx.clone()));
        }

        self.shutdown = Some(tx);
        info!("Pool scheduler started with {} jobs", self.handles.len());
        self.handles.len()
    }

    fn spawn_job(&self, job: Job, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let retention = self.config.cleanup_retention();

        tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => run_job(&engine, &job, retention).await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Signal every job and wait for in-flight ticks to complete
    pub async fn stop(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };

        let _ = shutdown.send(true);
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Scheduler job ended abnormally: {}", e);
            }
        }
        info!("Pool scheduler stopped");
    }
}

async fn run_job(engine: &SettlementEngine, job: &Job, retention: chrono::Duration) {
    match job {
        Job::CreatePool(template) => {
            if let Err(e) = engine.create_pool(template).await {
                error!(
                    asset = %template.asset,
                    interval = %template.interval_key,
                    "Pool creation failed: {}",
                    e
                );
            }
        }
        Job::StatusTransitions => {
            if let Err(e) = engine.process_status_transitions().await {
                error!("Status sweep failed: {}", e);
            }
        }
        Job::Resolutions => {
            if let Err(e) = engine.process_resolutions().await {
                error!("Resolution sweep failed: {}", e);
            }
        }
        Job::Cleanup => {
            engine.cleanup_empty_pools(retention).await;
        }
    }
}
