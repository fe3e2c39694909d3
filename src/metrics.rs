//! Per-trial metrics keyed by (ability, target).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ability::{AbilityId, Registry};
use crate::actor::ActorId;
use crate::attack_table::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    pub ability: AbilityId,
    pub target: ActorId,
}

impl MetricKey {
    pub fn new(ability: AbilityId, target: ActorId) -> Self {
        Self { ability, target }
    }
}

/// Counters for one (ability, target) pair. `hits` counts landed
/// non-crit outcomes, partial resists included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbilityMetrics {
    pub casts: u64,
    pub hits: u64,
    pub crits: u64,
    pub misses: u64,
    pub partial_resists: u64,
    pub ticks: u64,
    /// Casts that reached completion but could not pay a cost due on landing
    pub fizzles: u64,
    pub damage: f64,
    pub resource_spent: f64,
    pub resource_refunded: f64,
}

impl AbilityMetrics {
    pub fn outcomes(&self) -> u64 {
        self.hits + self.crits + self.misses
    }

    pub fn crit_rate(&self) -> f64 {
        ratio(self.crits, self.outcomes())
    }

    pub fn miss_rate(&self) -> f64 {
        ratio(self.misses, self.outcomes())
    }

    fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Miss => self.misses += 1,
            Outcome::PartialResist => {
                self.hits += 1;
                self.partial_resists += 1;
            }
            Outcome::Hit => self.hits += 1,
            Outcome::Crit => self.crits += 1,
        }
    }

    fn merge(&mut self, other: &AbilityMetrics) {
        self.casts += other.casts;
        self.hits += other.hits;
        self.crits += other.crits;
        self.misses += other.misses;
        self.partial_resists += other.partial_resists;
        self.ticks += other.ticks;
        self.fizzles += other.fizzles;
        self.damage += other.damage;
        self.resource_spent += other.resource_spent;
        self.resource_refunded += other.resource_refunded;
    }
}

fn ratio(n: u64, d: u64) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsCollector {
    entries: BTreeMap<MetricKey, AbilityMetrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, key: MetricKey) -> &mut AbilityMetrics {
        self.entries.entry(key).or_default()
    }

    pub fn record_cast(&mut self, key: MetricKey) {
        self.entry(key).casts += 1;
    }

    pub fn record_spend(&mut self, key: MetricKey, amount: f64) {
        self.entry(key).resource_spent += amount;
    }

    /// A rolled-back cast gives its cost back; it is not a refund.
    pub fn record_rollback(&mut self, key: MetricKey, amount: f64) {
        let entry = self.entry(key);
        entry.casts = entry.casts.saturating_sub(1);
        entry.resource_spent -= amount;
    }

    /// The cast never resolved, so it moves from `casts` to `fizzles`.
    pub fn record_fizzle(&mut self, key: MetricKey) {
        let entry = self.entry(key);
        entry.casts = entry.casts.saturating_sub(1);
        entry.fizzles += 1;
    }

    pub fn record_refund(&mut self, key: MetricKey, amount: f64) {
        self.entry(key).resource_refunded += amount;
    }

    /// Direct-effect outcome. A miss still counts, with zero damage.
    pub fn record_outcome(&mut self, key: MetricKey, outcome: Outcome, damage: f64) {
        let entry = self.entry(key);
        entry.count(outcome);
        entry.damage += damage;
    }

    pub fn record_tick(&mut self, key: MetricKey, outcome: Outcome, damage: f64) {
        let entry = self.entry(key);
        entry.ticks += 1;
        entry.count(outcome);
        entry.damage += damage;
    }

    pub fn get(&self, key: &MetricKey) -> Option<&AbilityMetrics> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricKey, &AbilityMetrics)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_damage(&self) -> f64 {
        self.entries.values().map(|m| m.damage).sum()
    }

    /// Fold `other` into `self`. Counts are plain sums, so any grouping
    /// of merges yields the same counters.
    pub fn merge(&mut self, other: &MetricsCollector) {
        for (key, metrics) in &other.entries {
            self.entry(*key).merge(metrics);
        }
    }

    pub fn snapshot(&self, registry: Option<&Registry>) -> MetricsSnapshot {
        let rows = self
            .entries
            .iter()
            .map(|(key, metrics)| MetricsRow {
                ability: key.ability,
                name: registry.and_then(|r| r.ability_name(key.ability)).map(str::to_string),
                target: key.target,
                metrics: metrics.clone(),
            })
            .collect();
        MetricsSnapshot {
            rows,
            total_damage: self.total_damage(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub ability: AbilityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub target: ActorId,
    #[serde(flatten)]
    pub metrics: AbilityMetrics,
}

/// Read-only export for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub rows: Vec<MetricsRow>,
    pub total_damage: f64,
}
