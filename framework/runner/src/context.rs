use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use load_test_core::prelude::{ScenarioId, ShutdownHandle};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ScenarioConfig;
use crate::schedule::Trigger;

/// A job that still has a firing ahead of it or one in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingJob {
    pub scenario_id: ScenarioId,
    pub name: String,
    /// When the next firing is due, `None` if the job has no further firings.
    pub next_fire_at: Option<DateTime<Utc>>,
    pub in_flight: usize,
}

/// The job that drives the firings of one scenario.
#[derive(Debug)]
pub(crate) struct JobState {
    pub(crate) generation: u64,
    pub(crate) trigger: Trigger,
    /// The next firing. `None` once the last firing has started.
    pub(crate) next_fire_at: Option<Instant>,
    /// Set when the job task has exited, which it only does between firings.
    pub(crate) finished: bool,
    /// Firings in progress. Shared with the tasks of replaced jobs for the same scenario.
    pub(crate) in_flight: Arc<AtomicUsize>,
    /// Stops this job only.
    pub(crate) stop: ShutdownHandle,
    pub(crate) task: Option<JoinHandle<()>>,
}

impl JobState {
    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EndTime {
    pub(crate) instant: Instant,
    pub(crate) time: DateTime<Utc>,
}

/// Everything the scheduler knows about its scenarios.
///
/// Job state, the end of each recurring window and the scenario configuration are kept in three
/// maps keyed by scenario id.
#[derive(Debug, Default)]
pub struct SchedulerContext {
    jobs: HashMap<ScenarioId, JobState>,
    end_times: HashMap<ScenarioId, EndTime>,
    configs: HashMap<ScenarioId, Arc<ScenarioConfig>>,
    /// Tasks of jobs that were replaced, which may still be finishing a firing.
    retired: Vec<JoinHandle<()>>,
    next_generation: u64,
}

impl SchedulerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job for the scenario, replacing any previous one.
    ///
    /// A replaced job is told to stop and its task is kept so that shutdown can wait for it.
    /// Returns the generation of the new job.
    pub(crate) fn register(
        &mut self,
        scenario_id: ScenarioId,
        config: Arc<ScenarioConfig>,
        trigger: Trigger,
    ) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;

        self.retired.retain(|task| !task.is_finished());
        let in_flight = match self.jobs.remove(&scenario_id) {
            Some(previous) => {
                previous.stop.shutdown();
                if let Some(task) = previous.task {
                    self.retired.push(task);
                }
                previous.in_flight
            }
            None => Arc::new(AtomicUsize::new(0)),
        };

        match (trigger.end(), trigger.end_time()) {
            (Some(instant), Some(time)) => {
                self.end_times
                    .insert(scenario_id.clone(), EndTime { instant, time });
            }
            _ => {
                self.end_times.remove(&scenario_id);
            }
        }
        self.configs.insert(scenario_id.clone(), config);
        self.jobs.insert(
            scenario_id,
            JobState {
                generation,
                trigger,
                next_fire_at: trigger.first_fire(),
                finished: false,
                in_flight,
                stop: ShutdownHandle::new(),
                task: None,
            },
        );

        generation
    }

    pub(crate) fn job(&self, scenario_id: &ScenarioId) -> Option<&JobState> {
        self.jobs.get(scenario_id)
    }

    /// The current job of the scenario, if it is still of the given generation.
    pub(crate) fn job_mut(
        &mut self,
        scenario_id: &ScenarioId,
        generation: u64,
    ) -> Option<&mut JobState> {
        self.jobs
            .get_mut(scenario_id)
            .filter(|job| job.generation == generation)
    }

    /// Jobs that have been registered but whose task has not been started.
    pub(crate) fn unlaunched(&self) -> Vec<(ScenarioId, u64)> {
        self.jobs
            .iter()
            .filter(|(_, job)| job.task.is_none() && !job.finished)
            .map(|(id, job)| (id.clone(), job.generation))
            .collect()
    }

    pub fn config(&self, scenario_id: &ScenarioId) -> Option<Arc<ScenarioConfig>> {
        self.configs.get(scenario_id).cloned()
    }

    pub fn scenario_ids(&self) -> Vec<ScenarioId> {
        let mut ids = self.configs.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    pub fn end_time(&self, scenario_id: &ScenarioId) -> Option<DateTime<Utc>> {
        self.end_times.get(scenario_id).map(|end| end.time)
    }

    pub(crate) fn end_instant(&self, scenario_id: &ScenarioId) -> Option<Instant> {
        self.end_times.get(scenario_id).map(|end| end.instant)
    }

    /// Whether every firing of the scenario is behind it.
    ///
    /// A recurring scenario is complete once its window has ended, a one-shot scenario once its
    /// firing has started. Unknown scenarios are complete. Neither says anything about firings
    /// still in progress, see [SchedulerContext::is_quiesced].
    pub fn is_complete(&self, scenario_id: &ScenarioId, now: Instant) -> bool {
        if let Some(end) = self.end_times.get(scenario_id) {
            return now >= end.instant;
        }

        match self.jobs.get(scenario_id) {
            Some(job) => job.next_fire_at.is_none(),
            None => true,
        }
    }

    /// Complete, with nothing in progress and no job task left running.
    pub fn is_quiesced(&self, scenario_id: &ScenarioId, now: Instant) -> bool {
        if !self.is_complete(scenario_id, now) {
            return false;
        }

        match self.jobs.get(scenario_id) {
            Some(job) => job.in_flight() == 0 && (job.finished || job.task.is_none()),
            None => true,
        }
    }

    pub fn pending_jobs(&self, now: Instant, now_time: DateTime<Utc>) -> Vec<PendingJob> {
        let mut pending = self
            .jobs
            .iter()
            .filter(|(_, job)| job.next_fire_at.is_some() || job.in_flight() > 0)
            .map(|(scenario_id, job)| PendingJob {
                scenario_id: scenario_id.clone(),
                name: self
                    .configs
                    .get(scenario_id)
                    .map(|c| c.id.clone())
                    .unwrap_or_default(),
                next_fire_at: job.next_fire_at.map(|at| {
                    let until = at.saturating_duration_since(now);
                    now_time + TimeDelta::from_std(until).unwrap_or_default()
                }),
                in_flight: job.in_flight(),
            })
            .collect::<Vec<_>>();
        pending.sort_by(|a, b| a.scenario_id.cmp(&b.scenario_id));
        pending
    }

    /// Take every job task, current and replaced, so they can be awaited.
    pub(crate) fn take_tasks(&mut self) -> Vec<JoinHandle<()>> {
        let mut tasks = std::mem::take(&mut self.retired);
        tasks.extend(self.jobs.values_mut().filter_map(|job| job.task.take()));
        tasks
    }
}
