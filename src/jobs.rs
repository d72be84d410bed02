//! Job orchestrator.
//!
//! A fixed registry of named jobs on independent interval/cron schedules.
//! Each due job runs in its own spawned task; overlapping ticks of the same
//! job are skipped while the previous run is still in flight. Per-item
//! failure isolation lives inside the sweep bodies; this layer only
//! isolates whole job runs from each other.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::JobsConfig;
use crate::engine::abtest::AbTestEvaluator;
use crate::engine::optimizer::Optimizer;
use crate::engine::Engine;
use crate::notify::Notifier;
use crate::platforms::MarketplaceApi;
use crate::sheets::SheetsMirror;
use crate::storage::CatalogStore;
use crate::types::{ActionEntry, ActionKind};

/// Actions mirrored to the spreadsheet per snapshot.
const MIRROR_ACTION_LIMIT: i64 = 100;

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    TokenRefresh,
    StockSync,
    MetricsRollup,
    Optimize,
    AbEvaluation,
    SheetsMirror,
    AutoPublish,
}

enum Trigger {
    Interval(chrono::Duration),
    Cron(Schedule),
}

/// One named, independently scheduled job.
pub struct Job {
    name: &'static str,
    kind: JobKind,
    trigger: Trigger,
    next_run: Option<DateTime<Utc>>,
    running: Arc<AtomicBool>,
}

impl Job {
    fn interval(name: &'static str, kind: JobKind, every: chrono::Duration, now: DateTime<Utc>) -> Self {
        Self {
            name,
            kind,
            trigger: Trigger::Interval(every),
            next_run: Some(now + every),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn cron(name: &'static str, kind: JobKind, expr: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expr)
            .with_context(|| format!("Invalid cron expression for {name}: {expr}"))?;
        let next_run = schedule.upcoming(Utc).next();
        Ok(Self {
            name,
            kind,
            trigger: Trigger::Cron(schedule),
            next_run,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    fn should_run(&self, now: DateTime<Utc>) -> bool {
        matches!(self.next_run, Some(next) if now >= next)
    }

    /// Move to the next scheduled time. Called at dispatch, including for
    /// skipped ticks, so a long-running job doesn't queue a backlog.
    fn advance(&mut self, now: DateTime<Utc>) {
        self.next_run = match &self.trigger {
            Trigger::Interval(every) => Some(now + *every),
            Trigger::Cron(schedule) => schedule.upcoming(Utc).next(),
        };
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Try to acquire the run slot (returns false if already running).
    fn try_start(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Everything a job body may touch.
pub struct JobContext {
    pub engine: Engine,
    pub optimizer: Optimizer,
    pub ab_tests: AbTestEvaluator,
    pub marketplace: Arc<dyn MarketplaceApi>,
    pub notifier: Notifier,
    pub sheets: Option<SheetsMirror>,
    pub store: CatalogStore,
}

pub struct Scheduler {
    jobs: Vec<Job>,
    ctx: Arc<JobContext>,
    check_interval: Duration,
}

impl Scheduler {
    /// Build the fixed job registry from config.
    pub fn from_config(cfg: &JobsConfig, ctx: Arc<JobContext>) -> Result<Self> {
        let now = Utc::now();
        let jobs = vec![
            Job::interval(
                "token_refresh",
                JobKind::TokenRefresh,
                chrono::Duration::hours(cfg.token_refresh_hours as i64),
                now,
            ),
            Job::interval(
                "stock_sync",
                JobKind::StockSync,
                chrono::Duration::minutes(cfg.sync_stock_minutes as i64),
                now,
            ),
            Job::interval(
                "metrics_rollup",
                JobKind::MetricsRollup,
                chrono::Duration::hours(cfg.metrics_rollup_hours as i64),
                now,
            ),
            Job::cron("optimize_products", JobKind::Optimize, &cfg.optimize_cron)?,
            Job::cron(
                "evaluate_ab_tests",
                JobKind::AbEvaluation,
                &cfg.ab_evaluation_cron,
            )?,
            Job::interval(
                "sheets_mirror",
                JobKind::SheetsMirror,
                chrono::Duration::minutes(cfg.sheets_mirror_minutes as i64),
                now,
            ),
            Job::interval(
                "auto_publish",
                JobKind::AutoPublish,
                chrono::Duration::minutes(cfg.auto_publish_minutes as i64),
                now,
            ),
        ];

        for job in &jobs {
            info!(job = job.name, next_run = ?job.next_run, "Job registered");
        }

        Ok(Self {
            jobs,
            ctx,
            check_interval: Duration::from_secs(cfg.check_interval_secs),
        })
    }

    /// Run until the shutdown future resolves. In-flight jobs are allowed
    /// to finish (they hold no lock that could deadlock shutdown).
    pub async fn run(mut self, shutdown: impl std::future::Future<Output = ()>) {
        info!(
            jobs = self.jobs.len(),
            check_interval = ?self.check_interval,
            "Scheduler started"
        );

        let mut tick = tokio::time::interval(self.check_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.dispatch_due(Utc::now());
                }
                _ = &mut shutdown => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Spawn every due job. Skips (but still advances) jobs whose previous
    /// tick is still in flight.
    fn dispatch_due(&mut self, now: DateTime<Utc>) {
        for job in &mut self.jobs {
            if !job.should_run(now) {
                continue;
            }
            job.advance(now);

            if job.is_running() || !job.try_start() {
                warn!(job = job.name, "Skipping tick: previous run still in flight");
                continue;
            }

            let name = job.name;
            let kind = job.kind;
            let ctx = Arc::clone(&self.ctx);
            let running = Arc::clone(&job.running);

            tokio::spawn(async move {
                info!(job = name, "Job started");
                if let Err(e) = run_job(kind, &ctx).await {
                    error!(job = name, error = %e, "Job failed");
                }
                running.store(false, Ordering::SeqCst);
                info!(job = name, "Job finished");
            });
        }
    }
}

/// Execute one job body. Per-item failures are absorbed inside the sweeps;
/// an error here means the job itself couldn't run.
async fn run_job(kind: JobKind, ctx: &JobContext) -> Result<()> {
    match kind {
        JobKind::TokenRefresh => {
            let mut entry = ActionEntry::new(ActionKind::TokenRefreshed, None);
            if let Err(e) = ctx.marketplace.refresh_token().await {
                error!(error = %e, "Token refresh failed");
                // No immediate retry: the next scheduled tick is the retry.
                ctx.notifier.error("Marketplace token refresh", &e.to_string());
                entry = entry.failed(e.to_string());
            }
            ctx.store.log_action(&entry).await?;
        }
        JobKind::StockSync => {
            ctx.engine.stock_sync_sweep().await?;
        }
        JobKind::MetricsRollup => {
            ctx.engine.metrics_rollup_sweep().await?;
        }
        JobKind::Optimize => {
            ctx.optimizer.optimize_all().await?;
        }
        JobKind::AbEvaluation => {
            ctx.ab_tests.evaluate_all(Utc::now()).await?;
        }
        JobKind::SheetsMirror => {
            if let Some(sheets) = &ctx.sheets {
                let products = ctx.store.all_products().await?;
                let actions = ctx.store.recent_actions(MIRROR_ACTION_LIMIT).await?;
                if let Err(e) = sheets.write_snapshot(&products, &actions).await {
                    // Best-effort by contract: log and move on.
                    warn!(error = %e, "Spreadsheet mirror failed");
                }
            }
        }
        JobKind::AutoPublish => {
            ctx.engine.auto_publish_sweep().await?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
