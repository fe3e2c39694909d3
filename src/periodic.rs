//! Periodic effects (dots) with value snapshotting.
//!
//! An application schedules all of its ticks up front at
//! `interval, 2*interval, .., count*interval` from the application time.
//! Each tick carries the snapshot captured when the effect was applied,
//! so later stat changes on the caster do not reach ticks that are
//! already scheduled (unless the effect is declared dynamic).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::ability::{AbilityId, ScalingTerm};
use crate::actor::ActorId;
use crate::attack_table::AttackKind;
use crate::clock::{EventClock, EventHandle};
use crate::config::seconds;
use crate::error::{ConfigError, Result, SimError};
use crate::simulation::Event;

/// What happens when an effect is re-applied while it is still ticking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReapplyPolicy {
    /// Cancel the remaining ticks; the new snapshot starts a fresh schedule
    #[default]
    Replace,
    /// Like `Replace`, but damage from unticked ticks is carried over and
    /// spread across the fresh schedule
    Pool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    /// Tick values are fixed at application
    #[default]
    Snapshot,
    /// Caster and target multipliers are re-read on every tick
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    #[default]
    AlwaysHit,
    /// Each tick rolls on the caster/target attack table
    Roll,
}

fn default_kind() -> AttackKind {
    AttackKind::Spell
}

fn default_crit_multiplier() -> f64 {
    1.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DotConfig {
    pub label: String,
    /// Metrics are recorded against this id
    pub ability_id: AbilityId,
    pub tick_interval: f64,
    pub tick_count: u32,
    #[serde(default)]
    pub base_tick_damage: f64,
    #[serde(default)]
    pub scaling: Vec<ScalingTerm>,
    #[serde(default)]
    pub policy: ReapplyPolicy,
    #[serde(default)]
    pub mode: SnapshotMode,
    #[serde(default)]
    pub outcome: TickOutcome,
    #[serde(default = "default_kind")]
    pub kind: AttackKind,
    #[serde(default = "default_crit_multiplier")]
    pub crit_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DotDef {
    pub label: String,
    pub ability: AbilityId,
    pub tick_interval: Duration,
    pub tick_count: u32,
    pub base_tick_damage: f64,
    pub scaling: Vec<ScalingTerm>,
    pub policy: ReapplyPolicy,
    pub mode: SnapshotMode,
    pub outcome: TickOutcome,
    pub kind: AttackKind,
    pub crit_multiplier: f64,
}

impl DotDef {
    pub fn from_config(config: &DotConfig) -> std::result::Result<Self, ConfigError> {
        let owner = format!("periodic effect '{}'", config.label);
        if config.label.trim().is_empty() {
            return Err(ConfigError::invalid(owner, "label", "must not be empty"));
        }
        let tick_interval = seconds(&owner, "tick_interval", config.tick_interval)?;
        if tick_interval.is_zero() {
            return Err(ConfigError::invalid(owner, "tick_interval", "must be positive"));
        }
        if config.tick_count == 0 {
            return Err(ConfigError::invalid(
                owner,
                "tick_count",
                "zero ticks with a nonzero duration",
            ));
        }
        if !config.base_tick_damage.is_finite() || config.base_tick_damage < 0.0 {
            return Err(ConfigError::invalid(owner, "base_tick_damage", "must be >= 0"));
        }
        if !config.crit_multiplier.is_finite() || config.crit_multiplier < 0.0 {
            return Err(ConfigError::invalid(owner, "crit_multiplier", "must be >= 0"));
        }
        Ok(Self {
            label: config.label.clone(),
            ability: config.ability_id,
            tick_interval,
            tick_count: config.tick_count,
            base_tick_damage: config.base_tick_damage,
            scaling: config.scaling.clone(),
            policy: config.policy,
            mode: config.mode,
            outcome: config.outcome,
            kind: config.kind,
            crit_multiplier: config.crit_multiplier,
        })
    }

    pub fn duration(&self) -> Duration {
        self.tick_interval * self.tick_count
    }
}

/// Values captured once at application time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DotSnapshot {
    /// Damage of one tick with every multiplier already folded in
    pub tick_damage: f64,
    /// Per-tick damage before caster/target multipliers; dynamic effects
    /// re-multiply this on each tick
    pub base_tick_damage: f64,
    pub crit_multiplier: f64,
}

impl DotSnapshot {
    /// Spread `total` evenly over `ticks`, with no further multipliers.
    pub fn spread(total: f64, ticks: u32, crit_multiplier: f64) -> Self {
        let per_tick = if ticks == 0 { 0.0 } else { total / ticks as f64 };
        Self {
            tick_damage: per_tick,
            base_tick_damage: per_tick,
            crit_multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DotKey {
    pub label: String,
    pub caster: ActorId,
    pub target: ActorId,
}

impl DotKey {
    pub fn new(label: impl Into<String>, caster: ActorId, target: ActorId) -> Self {
        Self {
            label: label.into(),
            caster,
            target,
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveDot {
    snapshot: DotSnapshot,
    applied_at: Duration,
    tick_count: u32,
    ticks_done: u32,
    /// One handle per scheduled tick, in tick order
    handles: Vec<EventHandle>,
}

impl ActiveDot {
    fn remaining(&self) -> u32 {
        self.tick_count - self.ticks_done
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DotApplied {
    Fresh,
    Replaced { cancelled: u32 },
    Pooled { cancelled: u32, carried: f64 },
}

/// One fired tick, ready for outcome resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DotTick {
    pub snapshot: DotSnapshot,
    /// 1-based
    pub index: u32,
    pub last: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PeriodicEngine {
    active: BTreeMap<DotKey, ActiveDot>,
}

impl PeriodicEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, key: &DotKey) -> bool {
        self.active.contains_key(key)
    }

    pub fn remaining_ticks(&self, key: &DotKey) -> u32 {
        self.active.get(key).map_or(0, ActiveDot::remaining)
    }

    pub fn snapshot(&self, key: &DotKey) -> Option<DotSnapshot> {
        self.active.get(key).map(|d| d.snapshot)
    }

    pub fn applied_at(&self, key: &DotKey) -> Option<Duration> {
        self.active.get(key).map(|d| d.applied_at)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Apply (or re-apply) `def` under `key` with a pre-computed snapshot.
    pub fn apply(
        &mut self,
        clock: &mut EventClock<Event>,
        key: DotKey,
        def: &DotDef,
        snapshot: DotSnapshot,
    ) -> Result<DotApplied> {
        let mut snapshot = snapshot;
        let applied = match self.active.remove(&key) {
            None => DotApplied::Fresh,
            Some(previous) => {
                let cancelled = cancel_ticks(clock, &key, &previous)?;
                match def.policy {
                    ReapplyPolicy::Replace => DotApplied::Replaced { cancelled },
                    ReapplyPolicy::Pool => {
                        let carried = previous.snapshot.tick_damage * cancelled as f64;
                        let fresh_total = snapshot.tick_damage * def.tick_count as f64;
                        let pooled = DotSnapshot::spread(fresh_total + carried, def.tick_count, snapshot.crit_multiplier);
                        snapshot.tick_damage = pooled.tick_damage;
                        snapshot.base_tick_damage +=
                            previous.snapshot.base_tick_damage * cancelled as f64 / def.tick_count as f64;
                        DotApplied::Pooled { cancelled, carried }
                    }
                }
            }
        };

        let handles = (1..=def.tick_count)
            .map(|tick| {
                let event = Event::DotTick {
                    key: key.clone(),
                    tick,
                };
                clock.schedule_with_priority(def.tick_interval * tick, event.priority(), event)
            })
            .collect();
        debug!(
            dot = %key.label,
            caster = %key.caster,
            target = %key.target,
            tick_damage = snapshot.tick_damage,
            ?applied,
            at = ?clock.now(),
            "periodic effect applied"
        );
        self.active.insert(
            key,
            ActiveDot {
                snapshot,
                applied_at: clock.now(),
                tick_count: def.tick_count,
                ticks_done: 0,
                handles,
            },
        );
        Ok(applied)
    }

    /// Consume a fired tick event. Ticks must arrive in order and match the
    /// scheduled handle; anything else is an orphan.
    pub fn tick(&mut self, key: &DotKey, index: u32, fired: EventHandle) -> Result<DotTick> {
        let orphan = || {
            SimError::OrphanedEvent(format!(
                "tick {index} of '{}' ({} -> {}) does not match the active schedule",
                key.label, key.caster, key.target
            ))
        };
        let dot = self.active.get_mut(key).ok_or_else(orphan)?;
        let expected = dot.ticks_done + 1;
        if index != expected || dot.handles.get((index - 1) as usize) != Some(&fired) {
            return Err(orphan());
        }
        dot.ticks_done = index;
        let tick = DotTick {
            snapshot: dot.snapshot,
            index,
            last: dot.ticks_done == dot.tick_count,
        };
        if tick.last {
            self.active.remove(key);
        }
        Ok(tick)
    }

    /// Remove an effect and cancel its remaining ticks.
    pub fn cancel(&mut self, clock: &mut EventClock<Event>, key: &DotKey) -> Result<bool> {
        match self.active.remove(key) {
            Some(dot) => {
                cancel_ticks(clock, key, &dot)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Cancel every tick still pending for `dot`; returns how many. A
/// remaining tick that is not pending on the clock is a conflict.
fn cancel_ticks(clock: &mut EventClock<Event>, key: &DotKey, dot: &ActiveDot) -> Result<u32> {
    let mut cancelled = 0;
    for handle in &dot.handles[dot.ticks_done as usize..] {
        if !clock.cancel(*handle) {
            return Err(SimError::SchedulingConflict(format!(
                "tick of '{}' ({} -> {}) was not pending when cancelled",
                key.label, key.caster, key.target
            )));
        }
        cancelled += 1;
    }
    Ok(cancelled)
}
