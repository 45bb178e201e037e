//! Operation sessions.
//!
//! [`Orchestrator::run`] starts one session on a background task and hands
//! back the receiving end of its event stream. The session resets the
//! shared stats, plans the tasks, dispatches them according to the
//! operation's family and ends with a `statistics` event followed by the
//! terminal marker. Setup failures end the stream after a single `error`
//! event without the marker.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::operation::{Family, OperationCode, OperationRequest, SyncMode};
use super::planner::{Plan, Planner};
use super::pool::WorkerPool;
use super::staging::{ArtifactLayout, ArtifactStager, SvnStager};
use crate::backend::{HttpTrigger, ScriptExecutor, TaskRunner};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{EventStatus, ProgressEvent, ZoneKind, ZoneManifest};
use crate::stats::StatsAggregator;
use crate::store::DataAccess;
use crate::stream::{self, EventReceiver, EventSender, DEFAULT_HEARTBEAT};
use crate::{olog, olog_error, olog_warn};


fn missing_sync_mode() -> Error {
    Error::Validation("rsync requires a sync mode (update, reload or battle)".to_string())
}

/// Timing and sizing knobs of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_workers: usize,
    pub phase_settle: Duration,
    pub reload_settle: Duration,
    pub reload_status_delay: Duration,
    pub heartbeat: Duration,
    pub layout: ArtifactLayout,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_workers: 10,
            phase_settle: Duration::from_secs(5),
            reload_settle: Duration::from_secs(1),
            reload_status_delay: Duration::from_secs(5),
            heartbeat: DEFAULT_HEARTBEAT,
            layout: ArtifactLayout::default(),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            max_workers: config.max_workers,
            phase_settle: Duration::from_secs(config.phase_settle_secs),
            reload_settle: Duration::from_secs(config.reload_settle_secs),
            reload_status_delay: Duration::from_secs(config.reload_status_delay_secs),
            heartbeat: config.heartbeat(),
            layout: ArtifactLayout {
                checkout_dir: config.checkout_dir()?,
                aliases: config.artifacts.channel_aliases.clone(),
            },
        })
    }

    /// No settle delays; used where sessions should run back to back.
    pub fn immediate(mut self) -> Self {
        self.phase_settle = Duration::ZERO;
        self.reload_settle = Duration::ZERO;
        self.reload_status_delay = Duration::ZERO;
        self
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn DataAccess>,
    runner: Arc<dyn TaskRunner>,
    stager: Arc<dyn ArtifactStager>,
    http: HttpTrigger,
    stats: Arc<StatsAggregator>,
    settings: SessionSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DataAccess>,
        runner: Arc<dyn TaskRunner>,
        stager: Arc<dyn ArtifactStager>,
        http: HttpTrigger,
    ) -> Self {
        Self {
            store,
            runner,
            stager,
            http,
            stats: Arc::new(StatsAggregator::new()),
            settings: SessionSettings::default(),
        }
    }

    /// Wire the bundled backends from `config`.
    pub fn from_config(config: &Config, store: Arc<dyn DataAccess>) -> Result<Self> {
        Ok(Self::new(
            store,
            Arc::new(ScriptExecutor::from_config(config)),
            Arc::new(SvnStager::from_config(config)?),
            HttpTrigger::new(config.http_timeout())?,
        )
        .with_settings(SessionSettings::from_config(config)?))
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_stats(mut self, stats: Arc<StatsAggregator>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// Start a session for `request` and return its event stream.
    pub fn run(&self, request: OperationRequest) -> EventReceiver {
        let (tx, rx) = stream::channel();
        let session = self.clone();
        tokio::spawn(async move { session.session(request, tx).await });
        rx.with_heartbeat(self.settings.heartbeat)
    }

    async fn session(self, request: OperationRequest, events: EventSender) {
        let session_id = Uuid::new_v4();
        self.stats.reset();
        olog!(
            "[session {}] start: operation={}, sync_mode={:?}",
            session_id,
            request.code,
            request.sync_mode
        );

        if let Err(e) = self.drive(&request, &events, session_id).await {
            if e.is_setup_failure() {
                olog_warn!("[session {}] rejected: {}", session_id, e);
            } else {
                olog_error!("[session {}] aborted: {}", session_id, e);
            }
            events.send(ProgressEvent::error(e.to_string()));
            return;
        }

        let snapshot = self.stats.snapshot();
        olog!(
            "[session {}] finished: executions={}, failures={}",
            session_id,
            snapshot.total_executions,
            snapshot.total_failures
        );
        let mut report = ProgressEvent::new(EventStatus::Statistics, "execution statistics");
        report.data = serde_json::to_value(&snapshot).ok();
        events.send(report);
        events.finish();
    }

    async fn drive(
        &self,
        request: &OperationRequest,
        events: &EventSender,
        session_id: Uuid,
    ) -> Result<()> {
        let code: OperationCode = request.code.parse()?;
        let sync_mode = request.sync_mode;
        if code.family() == Family::Sync && sync_mode.is_none() {
            return Err(missing_sync_mode());
        }

        let manifest = self.store.active_manifest().await?;
        let plan = Planner::new(self.store.as_ref(), events, code, sync_mode)
            .plan(&manifest)
            .await;

        let mut pool = WorkerPool::new(
            self.settings.max_workers,
            Arc::clone(&self.runner),
            events.clone(),
            Arc::clone(&self.stats),
        );

        match code.family() {
            Family::Ordered(order) => self.run_phases(&mut pool, &plan, order, session_id).await,
            Family::Sync => {
                let mode = sync_mode.ok_or_else(missing_sync_mode)?;
                self.run_sync(&mut pool, &plan, &manifest, mode, events, session_id)
                    .await?
            }
            Family::Reload => {
                olog!("[session {}] dispatching {} base task(s)", session_id, plan.tasks.len());
                pool.run_batch(plan.tasks.iter().cloned()).await;
                self.post_reload(&plan, events, session_id).await;
            }
            Family::Default => {
                olog!("[session {}] dispatching {} task(s)", session_id, plan.tasks.len());
                pool.run_batch(plan.tasks.iter().cloned()).await;
            }
        }
        pool.close();
        Ok(())
    }

    async fn run_phases(
        &self,
        pool: &mut WorkerPool,
        plan: &Plan,
        order: &[ZoneKind],
        session_id: Uuid,
    ) {
        let phases = plan.phases(order);
        let last = phases.len().saturating_sub(1);
        for (i, (kind, tasks)) in phases.into_iter().enumerate() {
            olog!(
                "[session {}] phase {}: {} task(s)",
                session_id,
                kind,
                tasks.len()
            );
            let lost = pool.run_batch(tasks).await;
            if lost > 0 {
                olog_warn!("[session {}] phase {}: {} task(s) aborted", session_id, kind, lost);
            }
            olog!("[session {}] phase {} done", session_id, kind);
            if i < last {
                tokio::time::sleep(self.settings.phase_settle).await;
            }
        }
    }

    async fn run_sync(
        &self,
        pool: &mut WorkerPool,
        plan: &Plan,
        manifest: &ZoneManifest,
        mode: SyncMode,
        events: &EventSender,
        session_id: Uuid,
    ) -> Result<()> {
        let revision = self.stager.stage(manifest, events, &self.stats).await?;
        let tasks = plan.sync_tasks(&self.settings.layout, mode);
        olog!(
            "[session {}] revision {} staged, syncing {} host(s)",
            session_id,
            revision,
            tasks.len()
        );
        pool.run_batch(tasks).await;
        Ok(())
    }

    /// Trigger URLs after a settle delay, then status URLs after another.
    async fn post_reload(&self, plan: &Plan, events: &EventSender, session_id: Uuid) {
        tokio::time::sleep(self.settings.reload_settle).await;
        olog!(
            "[session {}] issuing {} reload trigger(s)",
            session_id,
            plan.reload_triggers.len()
        );
        for task in plan.trigger_tasks() {
            self.http.run_task(&task, events).await;
        }

        tokio::time::sleep(self.settings.reload_status_delay).await;
        olog!(
            "[session {}] checking {} reload status url(s)",
            session_id,
            plan.reload_status.len()
        );
        for task in plan.status_tasks() {
            self.http.run_task(&task, events).await;
        }

        olog!("[session {}] reload flow finished", session_id);
        events.send(ProgressEvent::info("reload flow finished"));
    }
}
