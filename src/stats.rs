//! Per-trial results and batch-level throughput statistics

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::metrics::MetricsCollector;

/// Summary of one completed trial
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub index: usize,
    pub seed: u64,
    /// Simulated seconds covered by the trial
    pub elapsed: f64,
    pub events: u64,
    pub damage: f64,
    pub casts: u64,
    pub hits: u64,
    pub crits: u64,
    pub misses: u64,
    pub ticks: u64,
}

impl TrialResult {
    pub fn from_metrics(index: usize, seed: u64, elapsed: Duration, events: u64, metrics: &MetricsCollector) -> Self {
        let mut result = TrialResult {
            index,
            seed,
            elapsed: elapsed.as_secs_f64(),
            events,
            ..Default::default()
        };
        for (_, m) in metrics.iter() {
            result.damage += m.damage;
            result.casts += m.casts;
            result.hits += m.hits;
            result.crits += m.crits;
            result.misses += m.misses;
            result.ticks += m.ticks;
        }
        result
    }

    pub fn dps(&self) -> f64 {
        if self.elapsed > 0.0 {
            self.damage / self.elapsed
        } else {
            0.0
        }
    }
}

/// Aggregated statistics from multiple trials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub trials: usize,
    pub avg_dps: f64,
    pub std_dps: f64,
    pub min_dps: f64,
    pub max_dps: f64,
    pub avg_damage: f64,
    pub avg_casts: f64,
    pub avg_events: f64,
    /// Crits over all resolved outcomes, ticks included
    pub crit_rate: f64,
    pub miss_rate: f64,
}

impl AggregatedStats {
    pub fn from_results(results: &[TrialResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }
        let n = results.len() as f64;
        let dps: Vec<f64> = results.iter().map(TrialResult::dps).collect();
        let avg_dps = dps.iter().sum::<f64>() / n;
        let variance = dps.iter().map(|d| (d - avg_dps).powi(2)).sum::<f64>() / n;

        let outcomes: u64 = results.iter().map(|r| r.hits + r.crits + r.misses).sum();
        let rate = |count: u64| {
            if outcomes == 0 {
                0.0
            } else {
                count as f64 / outcomes as f64
            }
        };

        Self {
            trials: results.len(),
            avg_dps,
            std_dps: variance.sqrt(),
            min_dps: dps.iter().copied().fold(f64::INFINITY, f64::min),
            max_dps: dps.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            avg_damage: results.iter().map(|r| r.damage).sum::<f64>() / n,
            avg_casts: results.iter().map(|r| r.casts as f64).sum::<f64>() / n,
            avg_events: results.iter().map(|r| r.events as f64).sum::<f64>() / n,
            crit_rate: rate(results.iter().map(|r| r.crits).sum()),
            miss_rate: rate(results.iter().map(|r| r.misses).sum()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(damage: f64, crits: u64, misses: u64) -> TrialResult {
        TrialResult {
            elapsed: 10.0,
            damage,
            hits: 10 - crits - misses,
            crits,
            misses,
            casts: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_results() {
        assert_eq!(AggregatedStats::from_results(&[]), AggregatedStats::default());
    }

    #[test]
    fn test_aggregate() {
        let stats = AggregatedStats::from_results(&[result(1000.0, 2, 1), result(3000.0, 4, 1)]);
        assert_eq!(stats.trials, 2);
        assert_eq!(stats.avg_dps, 200.0);
        assert_eq!(stats.std_dps, 100.0);
        assert_eq!(stats.min_dps, 100.0);
        assert_eq!(stats.max_dps, 300.0);
        assert_eq!(stats.avg_casts, 10.0);
        assert!((stats.crit_rate - 0.3).abs() < 1e-12);
        assert!((stats.miss_rate - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_zero_elapsed_has_zero_dps() {
        let r = TrialResult {
            damage: 50.0,
            ..Default::default()
        };
        assert_eq!(r.dps(), 0.0);
    }
}
