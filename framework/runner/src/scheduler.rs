use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use load_test_core::prelude::{DelegatedShutdownListener, RunId, ScenarioId, ShutdownHandle};
use load_test_instruments::ExpectationEvaluator;
use load_test_model::{ExpectationResult, ScenarioSummary, TestRun};
use load_test_store::{MetricStore, StoreResult};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::ScenarioConfig;
use crate::context::{PendingJob, SchedulerContext};
use crate::handler::{HandlerRegistry, ProtocolHandler};
use crate::schedule::{ScheduleError, Trigger};

/// What finalizing a scenario produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalized {
    pub results: Vec<ExpectationResult>,
    pub summaries: Vec<ScenarioSummary>,
}

/// Drives the firings of every scheduled scenario.
///
/// Each scenario gets one job task on the runtime. Firings of the same scenario never overlap, a
/// job waits for its firing to finish before waiting for the next instant. If a firing overran
/// one or more instants they are skipped. The protocol handler itself runs on the blocking pool
/// so a slow handler does not hold up other scenarios.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn MetricStore>,
    handlers: HandlerRegistry,
    evaluator: ExpectationEvaluator,
    context: Mutex<SchedulerContext>,
    runtime: tokio::runtime::Handle,
    shutdown_handle: ShutdownHandle,
    started: AtomicBool,
    /// Notified whenever a firing finishes or a job exits.
    events: Notify,
    worker_node: String,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn MetricStore>,
        handlers: HandlerRegistry,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                evaluator: ExpectationEvaluator::new(store.clone()),
                store,
                handlers,
                context: Mutex::new(SchedulerContext::new()),
                runtime,
                shutdown_handle: ShutdownHandle::new(),
                started: AtomicBool::new(false),
                events: Notify::new(),
                worker_node: worker_node(),
            }),
        }
    }

    /// Schedule a scenario, replacing any schedule it already had.
    ///
    /// Jobs scheduled before [Scheduler::start] wait for it, later ones start straight away.
    pub fn schedule(
        &self,
        scenario_id: ScenarioId,
        config: ScenarioConfig,
    ) -> Result<(), ScheduleError> {
        let schedule = config.schedule()?;
        let trigger = Trigger::new(&schedule, Utc::now(), Instant::now())?;

        if !self.inner.handlers.contains(&config.protocol) {
            log::warn!(
                "Scenario {} uses unknown protocol [{}], its firings will be skipped",
                config.id,
                config.protocol
            );
        }

        log::info!(
            "Scheduled scenario {} ({}) with protocol [{}], mode {}",
            config.id,
            scenario_id,
            config.protocol,
            schedule.mode()
        );
        if let Some(end_time) = trigger.end_time() {
            log::debug!("Scenario {} runs until {}", scenario_id, end_time);
        }

        let generation =
            self.inner
                .context
                .lock()
                .register(scenario_id.clone(), Arc::new(config), trigger);

        if self.inner.started.load(Ordering::SeqCst) {
            self.inner.launch(&scenario_id, generation);
        }

        Ok(())
    }

    /// Start every job that has been scheduled so far.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let unlaunched = self.inner.context.lock().unlaunched();
        for (scenario_id, generation) in unlaunched {
            self.inner.launch(&scenario_id, generation);
        }
    }

    /// Stop producing firings and wait for the firings in progress to finish.
    pub async fn shutdown(&self) {
        log::info!("Shutting down scheduler");
        self.inner.shutdown_handle.shutdown();

        let tasks = self.inner.context.lock().take_tasks();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                log::error!("Scheduler job failed: {:?}", e);
            }
        }

        self.inner.events.notify_waiters();
        log::debug!("Scheduler shut down");
    }

    /// See [SchedulerContext::is_complete].
    pub fn is_complete(&self, scenario_id: &ScenarioId) -> bool {
        self.inner
            .context
            .lock()
            .is_complete(scenario_id, Instant::now())
    }

    pub fn pending_jobs(&self) -> Vec<PendingJob> {
        self.inner
            .context
            .lock()
            .pending_jobs(Instant::now(), Utc::now())
    }

    /// The end of the scenario's recurring window.
    pub fn end_time(&self, scenario_id: &ScenarioId) -> Option<DateTime<Utc>> {
        self.inner.context.lock().end_time(scenario_id)
    }

    /// When the last of the given scenarios is due to be complete.
    pub fn planned_end(&self, scenario_ids: &[ScenarioId]) -> Option<Instant> {
        let context = self.inner.context.lock();
        scenario_ids
            .iter()
            .filter_map(|id| context.job(id))
            .filter_map(|job| job.trigger.last_instant())
            .max()
    }

    pub fn scenario_ids(&self) -> Vec<ScenarioId> {
        self.inner.context.lock().scenario_ids()
    }

    pub fn config(&self, scenario_id: &ScenarioId) -> Option<Arc<ScenarioConfig>> {
        self.inner.context.lock().config(scenario_id)
    }

    /// Wait until every listed scenario is complete and has no firing in progress.
    ///
    /// Returns `false` if the deadline passes first or the scheduler is shut down.
    pub async fn wait_for_completion(&self, scenario_ids: &[ScenarioId], deadline: Instant) -> bool {
        let mut shutdown_listener = self.inner.shutdown_handle.new_listener();

        loop {
            let notified = self.inner.events.notified();
            tokio::pin!(notified);
            // Register for notifications before checking so that none are missed.
            notified.as_mut().enable();

            let now = Instant::now();
            let wake_at = {
                let context = self.inner.context.lock();
                if scenario_ids.iter().all(|id| context.is_quiesced(id, now)) {
                    return true;
                }

                // Recurring scenarios complete by the clock rather than by an event.
                scenario_ids
                    .iter()
                    .filter_map(|id| context.end_instant(id))
                    .filter(|end| *end > now)
                    .min()
                    .map_or(deadline, |end| end.min(deadline))
            };

            if now >= deadline {
                return false;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
                _ = shutdown_listener.wait_for_shutdown() => {
                    log::debug!("Stopped waiting for completion, the scheduler is shutting down");
                    return false;
                }
            }
        }
    }

    /// Evaluate the scenario scope expectations of a scenario and persist its summary.
    ///
    /// Must not be called while firings of the scenario are in progress, the statistics are read
    /// as a snapshot.
    pub fn finalize(&self, scenario_id: &ScenarioId) -> StoreResult<Finalized> {
        let expectations = self
            .config(scenario_id)
            .map(|config| config.expectations.clone())
            .unwrap_or_default();

        let results = self
            .inner
            .evaluator
            .evaluate_scenario(scenario_id, &expectations)?;
        let summaries = self
            .inner
            .evaluator
            .aggregator()
            .persist_summary(scenario_id)?;

        log::info!(
            "Finalized scenario {} with {} scenario verdicts and {} metric summaries",
            scenario_id,
            results.len(),
            summaries.len()
        );

        Ok(Finalized { results, summaries })
    }
}

impl Inner {
    fn launch(self: &Arc<Self>, scenario_id: &ScenarioId, generation: u64) {
        let mut context = self.context.lock();
        let Some(config) = context.config(scenario_id) else {
            return;
        };
        let Some(job) = context.job_mut(scenario_id, generation) else {
            return;
        };

        let task = self.runtime.spawn(run_job(
            self.clone(),
            scenario_id.clone(),
            config,
            generation,
            job.trigger,
            job.in_flight.clone(),
            self.shutdown_handle.new_listener(),
            job.stop.new_listener(),
        ));
        job.task = Some(task);
    }

    fn set_next_fire(&self, scenario_id: &ScenarioId, generation: u64, at: Option<Instant>) {
        if let Some(job) = self.context.lock().job_mut(scenario_id, generation) {
            job.next_fire_at = at;
        }
    }

    async fn fire(
        self: &Arc<Self>,
        scenario_id: &ScenarioId,
        config: &Arc<ScenarioConfig>,
        in_flight: &AtomicUsize,
    ) {
        let Some(handler) = self.handlers.get(&config.protocol) else {
            log::warn!(
                "Skipping firing of scenario {}, unknown protocol [{}]",
                scenario_id,
                config.protocol
            );
            return;
        };

        in_flight.fetch_add(1, Ordering::SeqCst);
        let inner = self.clone();
        let id = scenario_id.clone();
        let config = config.clone();
        let result =
            tokio::task::spawn_blocking(move || inner.execute(&id, &config, handler.as_ref()))
                .await;
        in_flight.fetch_sub(1, Ordering::SeqCst);
        self.events.notify_waiters();

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("Firing of scenario {} failed: {:?}", scenario_id, e),
            Err(e) => log::error!("Firing of scenario {} panicked: {:?}", scenario_id, e),
        }
    }

    /// One firing: record the run, call the handler, persist its metrics and evaluate the
    /// per-iteration expectations.
    fn execute(
        &self,
        scenario_id: &ScenarioId,
        config: &ScenarioConfig,
        handler: &dyn ProtocolHandler,
    ) -> anyhow::Result<()> {
        let run = TestRun {
            run_id: RunId::generate(),
            scenario_id: scenario_id.clone(),
            start_time: Utc::now(),
            worker_node: self.worker_node.clone(),
        };
        self.store
            .insert_test_run(&run)
            .context("Failed to record test run")?;

        log::debug!("Starting run {} of scenario {}", run.run_id, config.id);

        let records = match handler.run(&config.parameters) {
            Ok(records) => records,
            Err(e) => {
                // Nothing was measured, so there is nothing to evaluate either.
                log::error!(
                    "Protocol handler [{}] failed for run {}: {:?}",
                    config.protocol,
                    run.run_id,
                    e
                );
                return Ok(());
            }
        };

        let mut sample_count = 0;
        for record in &records {
            let metrics = record.metric_fields();
            if metrics.is_empty() {
                continue;
            }

            self.store
                .insert_raw_metrics_batch(&run.run_id, &metrics)
                .with_context(|| format!("Failed to store metrics for run {}", run.run_id))?;
            sample_count += metrics.len();
        }

        let results = self
            .evaluator
            .evaluate_run(scenario_id, &run.run_id, &config.expectations)
            .with_context(|| format!("Failed to evaluate run {}", run.run_id))?;

        log::info!(
            "Finished run {} of scenario {}: {} samples, {} verdicts",
            run.run_id,
            config.id,
            sample_count,
            results.len()
        );

        Ok(())
    }
}

async fn run_job(
    inner: Arc<Inner>,
    scenario_id: ScenarioId,
    config: Arc<ScenarioConfig>,
    generation: u64,
    trigger: Trigger,
    in_flight: Arc<AtomicUsize>,
    mut shutdown_listener: DelegatedShutdownListener,
    mut stop_listener: DelegatedShutdownListener,
) {
    let mut next = trigger.first_fire();

    while let Some(at) = next {
        inner.set_next_fire(&scenario_id, generation, Some(at));

        tokio::select! {
            biased;
            _ = shutdown_listener.wait_for_shutdown() => break,
            _ = stop_listener.wait_for_shutdown() => break,
            _ = tokio::time::sleep_until(at) => {}
        }

        if shutdown_listener.should_shutdown() || stop_listener.should_shutdown() {
            break;
        }

        // The firing is no longer pending once it starts.
        let following = trigger.next_fire_after(at, at);
        inner.set_next_fire(&scenario_id, generation, following);

        inner.fire(&scenario_id, &config, &in_flight).await;

        next = trigger.next_fire_after(at, Instant::now());
        if let (Some(planned), Some(actual)) = (following, next) {
            if actual > planned {
                log::warn!(
                    "Firing of scenario {} overran its interval, skipping {} firings",
                    scenario_id,
                    trigger.missed_between(at, actual)
                );
            }
        }
    }

    if let Some(job) = inner.context.lock().job_mut(&scenario_id, generation) {
        job.next_fire_at = None;
        job.finished = true;
    }
    inner.events.notify_waiters();
    log::debug!("Job for scenario {} finished", scenario_id);
}

/// The name of this worker, recorded against every run.
fn worker_node() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(sysinfo::System::host_name)
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_node_is_never_empty() {
        assert!(!worker_node().is_empty());
    }
}
