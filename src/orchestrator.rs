//! Trial orchestrator: runs independent trials, sequentially or on a
//! rayon pool, and merges what completed.
//!
//! Every trial owns its clock, actors and RNG; the only shared state is
//! the read-only [`Registry`](crate::ability::Registry) behind the
//! scenario's `Arc`. Trial `i` is seeded with `derive_seed(base, i)`, and
//! completed trials are merged in index order after the join, so the
//! merged report does not depend on the worker count.

use rayon::prelude::*;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Scenario;
use crate::error::SimError;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::simulation::{derive_seed, Trial, TrialEnd};
use crate::stats::{AggregatedStats, TrialResult};

#[derive(Debug, Clone)]
pub enum TrialOutcome {
    Completed {
        result: TrialResult,
        metrics: MetricsCollector,
    },
    /// Ran past its event budget; partial metrics are dropped
    Aborted { index: usize, seed: u64, events: u64 },
    Failed { index: usize, seed: u64, error: SimError },
    /// Not started because the batch ran out of wall-clock time
    Skipped { index: usize },
}

/// Merged outcome of a batch of trials
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub base_seed: u64,
    pub requested: usize,
    pub completed: usize,
    pub aborted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub stats: AggregatedStats,
    pub metrics: MetricsSnapshot,
    pub failures: Vec<String>,
    #[serde(skip)]
    pub merged: MetricsCollector,
}

/// Run trial `index` of a batch to completion.
pub fn run_trial(scenario: &Scenario, base_seed: u64, index: usize) -> TrialOutcome {
    let seed = derive_seed(base_seed, index as u64);
    let mut trial = match Trial::from_scenario(scenario, seed) {
        Ok(trial) => trial,
        Err(error) => return TrialOutcome::Failed { index, seed, error },
    };
    match trial.run() {
        Ok(TrialEnd::Completed) => {
            let result = TrialResult::from_metrics(index, seed, trial.now(), trial.events_processed(), trial.metrics());
            debug!(index, seed, damage = result.damage, "trial completed");
            TrialOutcome::Completed {
                result,
                metrics: trial.into_metrics(),
            }
        }
        Ok(TrialEnd::BudgetExceeded) => {
            let events = trial.events_processed();
            warn!(index, seed, events, "trial exceeded its event budget; discarding metrics");
            TrialOutcome::Aborted { index, seed, events }
        }
        Err(error) => {
            warn!(index, seed, %error, "trial failed");
            TrialOutcome::Failed { index, seed, error }
        }
    }
}

fn out_of_time(started: Instant, budget: Option<Duration>) -> bool {
    budget.is_some_and(|b| started.elapsed() >= b)
}

/// Run trials in parallel on a dedicated pool of `workers` threads
/// (all logical cores when `None`). Outcomes come back in index order.
pub fn run_trials_parallel(
    scenario: &Scenario,
    base_seed: u64,
    count: usize,
    workers: Option<usize>,
    time_budget: Option<Duration>,
) -> Vec<TrialOutcome> {
    let started = Instant::now();
    let run = || {
        (0..count)
            .into_par_iter()
            .map(|index| {
                if out_of_time(started, time_budget) {
                    TrialOutcome::Skipped { index }
                } else {
                    run_trial(scenario, base_seed, index)
                }
            })
            .collect()
    };

    let threads = workers.unwrap_or_else(num_cpus::get).max(1);
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(run),
        Err(e) => {
            warn!(%e, "could not build a {threads}-thread pool; using the global pool");
            run()
        }
    }
}

/// Run trials one after another on the calling thread
pub fn run_trials_sequential(
    scenario: &Scenario,
    base_seed: u64,
    count: usize,
    time_budget: Option<Duration>,
) -> Vec<TrialOutcome> {
    let started = Instant::now();
    (0..count)
        .map(|index| {
            if out_of_time(started, time_budget) {
                TrialOutcome::Skipped { index }
            } else {
                run_trial(scenario, base_seed, index)
            }
        })
        .collect()
}

/// Fold outcomes, in the order given, into a report.
pub fn merge_outcomes(scenario: &Scenario, base_seed: u64, outcomes: Vec<TrialOutcome>) -> BatchReport {
    let requested = outcomes.len();
    let mut merged = MetricsCollector::new();
    let mut results = Vec::new();
    let mut failures = Vec::new();
    let (mut aborted, mut skipped) = (0, 0);

    for outcome in outcomes {
        match outcome {
            TrialOutcome::Completed { result, metrics } => {
                merged.merge(&metrics);
                results.push(result);
            }
            TrialOutcome::Aborted { .. } => aborted += 1,
            TrialOutcome::Failed { index, seed, error } => {
                failures.push(format!("trial {index} (seed {seed}): {error}"));
            }
            TrialOutcome::Skipped { .. } => skipped += 1,
        }
    }

    BatchReport {
        base_seed,
        requested,
        completed: results.len(),
        aborted,
        failed: failures.len(),
        skipped,
        stats: AggregatedStats::from_results(&results),
        metrics: merged.snapshot(Some(scenario.registry.as_ref())),
        failures,
        merged,
    }
}

/// Run the scenario's configured batch and aggregate it. Draws a base
/// seed when the scenario has none.
pub fn run_and_aggregate(scenario: &Scenario) -> BatchReport {
    let settings = scenario.batch;
    let base_seed = settings.seed.unwrap_or_else(rand::random::<u64>);
    info!(
        trials = settings.num_trials,
        base_seed,
        parallel = settings.parallel,
        "starting batch"
    );

    let outcomes = if settings.parallel {
        run_trials_parallel(scenario, base_seed, settings.num_trials, settings.workers, settings.time_budget)
    } else {
        run_trials_sequential(scenario, base_seed, settings.num_trials, settings.time_budget)
    };
    let report = merge_outcomes(scenario, base_seed, outcomes);

    if report.skipped > 0 {
        warn!(skipped = report.skipped, "wall-clock budget exhausted before all trials ran");
    }
    info!(
        completed = report.completed,
        aborted = report.aborted,
        failed = report.failed,
        avg_dps = report.stats.avg_dps,
        "batch finished"
    );
    report
}
