//! Aura manager: temporary named effects on an actor.
//!
//! Invariant: for the `refresh` and `stack` policies an active aura owns
//! exactly one expiration event on the clock. Re-activation cancels that
//! event and schedules its replacement; a cancel that finds nothing
//! pending means the bookkeeping is corrupt and is reported as a
//! scheduling conflict.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::actor::{Actor, ActorId, Stat, StatOp, StatSheet};
use crate::clock::{EventClock, EventHandle};
use crate::config::seconds;
use crate::error::{ConfigError, Result, SimError};
use crate::simulation::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum StackingPolicy {
    /// Single instance; re-activation restarts the duration
    #[default]
    Refresh,
    /// Single instance with a stack counter; re-activation adds a stack
    /// (up to the cap) and restarts the duration
    Stack { max_stacks: u32 },
    /// Single instance holding `charges` charges; re-activation restores
    /// the full count and restarts the duration, consumption spends one
    Charges { charges: u32 },
    /// Every activation is its own instance with its own expiration
    Independent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatEffect {
    pub stat: Stat,
    pub op: StatOp,
    /// Scale with the stack count instead of applying once
    #[serde(default)]
    pub per_stack: bool,
}

impl StatEffect {
    fn at_stacks(&self, stacks: u32) -> (Stat, StatOp) {
        if !self.per_stack {
            return (self.stat, self.op);
        }
        let op = match self.op {
            StatOp::Add(v) => StatOp::Add(v * stacks as f64),
            StatOp::Multiply(v) => StatOp::Multiply(v.powi(stacks as i32)),
        };
        (self.stat, op)
    }
}

/// Aura as declared by content. `duration: None` means the aura lasts
/// until explicitly deactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuraConfig {
    pub label: String,
    #[serde(default)]
    pub action_id: Option<u32>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub stacking: StackingPolicy,
    #[serde(default)]
    pub effects: Vec<StatEffect>,
}

/// Validated aura definition.
#[derive(Debug, Clone, PartialEq)]
pub struct AuraDef {
    pub label: String,
    pub action_id: Option<u32>,
    pub duration: Option<Duration>,
    pub stacking: StackingPolicy,
    pub effects: Vec<StatEffect>,
}

impl AuraDef {
    pub fn from_config(config: &AuraConfig) -> std::result::Result<Self, ConfigError> {
        let owner = format!("aura '{}'", config.label);
        if config.label.trim().is_empty() {
            return Err(ConfigError::invalid(owner, "label", "must not be empty"));
        }
        let duration = config
            .duration
            .map(|secs| seconds(&owner, "duration", secs))
            .transpose()?;
        match config.stacking {
            StackingPolicy::Stack { max_stacks: 0 } => {
                return Err(ConfigError::invalid(owner, "max_stacks", "must be at least 1"));
            }
            StackingPolicy::Charges { charges: 0 } => {
                return Err(ConfigError::invalid(owner, "charges", "must be at least 1"));
            }
            _ => {}
        }
        Ok(Self {
            label: config.label.clone(),
            action_id: config.action_id,
            duration,
            stacking: config.stacking,
            effects: config.effects.clone(),
        })
    }

    fn stat_mods(&self, stacks: u32) -> Vec<(Stat, StatOp)> {
        self.effects.iter().map(|e| e.at_stacks(stacks)).collect()
    }

    fn initial_stacks(&self) -> u32 {
        match self.stacking {
            StackingPolicy::Charges { charges } => charges,
            _ => 1,
        }
    }

    fn source(&self, instance: u32) -> String {
        match self.stacking {
            StackingPolicy::Independent => format!("{}#{}", self.label, instance),
            _ => self.label.clone(),
        }
    }
}

/// What an activation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuraChange {
    Gained,
    Refreshed,
    Stacked(u32),
    NewInstance(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AuraInstance {
    id: u32,
    stacks: u32,
    gained_at: Duration,
    expiry: Option<(Duration, EventHandle)>,
}

/// Active auras on one actor, by label.
#[derive(Debug, Clone, Default)]
pub struct AuraSet {
    active: HashMap<String, Vec<AuraInstance>>,
    next_instance: u32,
}

impl AuraSet {
    pub fn is_active(&self, label: &str) -> bool {
        self.active.contains_key(label)
    }

    /// Stack count for stacking auras, instance count for independent ones.
    pub fn stacks(&self, label: &str) -> u32 {
        match self.active.get(label) {
            Some(instances) if instances.len() == 1 => instances[0].stacks,
            Some(instances) => instances.len() as u32,
            None => 0,
        }
    }

    pub fn instances(&self, label: &str) -> usize {
        self.active.get(label).map_or(0, Vec::len)
    }

    /// Earliest expiration among the label's instances.
    pub fn expires_at(&self, label: &str) -> Option<Duration> {
        self.active
            .get(label)?
            .iter()
            .filter_map(|i| i.expiry.map(|(at, _)| at))
            .min()
    }

    pub fn gained_at(&self, label: &str) -> Option<Duration> {
        self.active.get(label)?.first().map(|i| i.gained_at)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    fn activate(
        &mut self,
        owner: ActorId,
        stats: &mut StatSheet,
        def: &AuraDef,
        clock: &mut EventClock<Event>,
    ) -> Result<AuraChange> {
        let independent = def.stacking == StackingPolicy::Independent;
        if independent || !self.is_active(&def.label) {
            let id = self.next_instance;
            self.next_instance += 1;
            let stacks = def.initial_stacks();
            let mut instance = AuraInstance {
                id,
                stacks,
                gained_at: clock.now(),
                expiry: None,
            };
            reschedule(owner, def, &mut instance, clock)?;
            stats.enable(&def.source(id), def.stat_mods(stacks));
            let instances = self.active.entry(def.label.clone()).or_default();
            instances.push(instance);
            return Ok(if independent && instances.len() > 1 {
                AuraChange::NewInstance(id)
            } else {
                AuraChange::Gained
            });
        }

        let instances = self.active.get_mut(&def.label).ok_or_else(|| {
            SimError::SchedulingConflict(format!("{owner:?} aura '{}' lost its instance", def.label))
        })?;
        if instances.len() != 1 {
            return Err(SimError::SchedulingConflict(format!(
                "{owner:?} aura '{}' has {} concurrent instances",
                def.label,
                instances.len()
            )));
        }
        let instance = &mut instances[0];
        reschedule(owner, def, instance, clock)?;
        match def.stacking {
            StackingPolicy::Stack { max_stacks } => {
                instance.stacks = (instance.stacks + 1).min(max_stacks);
                stats.enable(&def.source(instance.id), def.stat_mods(instance.stacks));
                Ok(AuraChange::Stacked(instance.stacks))
            }
            StackingPolicy::Charges { charges } => {
                instance.stacks = charges;
                stats.enable(&def.source(instance.id), def.stat_mods(charges));
                Ok(AuraChange::Refreshed)
            }
            _ => Ok(AuraChange::Refreshed),
        }
    }

    fn refresh(&mut self, owner: ActorId, def: &AuraDef, clock: &mut EventClock<Event>) -> Result<bool> {
        let Some(instances) = self.active.get_mut(&def.label) else {
            return Ok(false);
        };
        for instance in instances.iter_mut() {
            reschedule(owner, def, instance, clock)?;
        }
        Ok(true)
    }

    fn deactivate(&mut self, stats: &mut StatSheet, def: &AuraDef, clock: &mut EventClock<Event>) -> bool {
        let Some(instances) = self.active.remove(&def.label) else {
            return false;
        };
        for instance in instances {
            if let Some((_, handle)) = instance.expiry {
                clock.cancel(handle);
            }
            stats.disable(&def.source(instance.id));
        }
        true
    }

    /// Spend one stack or charge; the last one removes the aura. For
    /// independent auras the oldest instance goes. Returns the stacks left.
    fn consume(&mut self, stats: &mut StatSheet, def: &AuraDef, clock: &mut EventClock<Event>) -> Option<u32> {
        let instances = self.active.get_mut(&def.label)?;
        if def.stacking == StackingPolicy::Independent {
            let oldest = instances.remove(0);
            if let Some((_, handle)) = oldest.expiry {
                clock.cancel(handle);
            }
            stats.disable(&def.source(oldest.id));
            let left = instances.len() as u32;
            if left == 0 {
                self.active.remove(&def.label);
            }
            return Some(left);
        }
        let instance = instances.first_mut()?;
        if instance.stacks > 1 {
            instance.stacks -= 1;
            stats.enable(&def.source(instance.id), def.stat_mods(instance.stacks));
            return Some(instance.stacks);
        }
        self.deactivate(stats, def, clock);
        Some(0)
    }

    fn expire(
        &mut self,
        owner: ActorId,
        stats: &mut StatSheet,
        def: &AuraDef,
        instance_id: u32,
        fired: EventHandle,
    ) -> Result<()> {
        let orphan = || {
            SimError::OrphanedEvent(format!(
                "{owner:?} expiration for aura '{}' instance {instance_id} has no live instance",
                def.label
            ))
        };
        let instances = self.active.get_mut(&def.label).ok_or_else(orphan)?;
        let pos = instances
            .iter()
            .position(|i| i.id == instance_id && matches!(i.expiry, Some((_, h)) if h == fired))
            .ok_or_else(orphan)?;
        let instance = instances.remove(pos);
        if instances.is_empty() {
            self.active.remove(&def.label);
        }
        stats.disable(&def.source(instance.id));
        Ok(())
    }
}

/// Cancel the instance's pending expiration (if any) and schedule a fresh
/// one from now.
fn reschedule(
    owner: ActorId,
    def: &AuraDef,
    instance: &mut AuraInstance,
    clock: &mut EventClock<Event>,
) -> Result<()> {
    if let Some((_, handle)) = instance.expiry.take() {
        if !clock.cancel(handle) {
            return Err(SimError::SchedulingConflict(format!(
                "{owner:?} aura '{}' expiration was not pending when rescheduled",
                def.label
            )));
        }
    }
    if let Some(duration) = def.duration {
        let event = Event::AuraExpire {
            actor: owner,
            label: def.label.clone(),
            instance: instance.id,
        };
        let handle = clock.schedule_with_priority(duration, event.priority(), event);
        instance.expiry = Some((clock.now() + duration, handle));
    }
    Ok(())
}

/// Activate `def` on `actor` according to its stacking policy.
pub fn activate(actor: &mut Actor, def: &AuraDef, clock: &mut EventClock<Event>) -> Result<AuraChange> {
    let change = actor.auras.activate(actor.id, &mut actor.stats, def, clock)?;
    debug!(actor = %actor.id, aura = %def.label, ?change, at = ?clock.now(), "aura activated");
    Ok(change)
}

/// Restart the duration of an active aura without touching stacks.
/// Returns `false` if the aura was not active.
pub fn refresh(actor: &mut Actor, def: &AuraDef, clock: &mut EventClock<Event>) -> Result<bool> {
    actor.auras.refresh(actor.id, def, clock)
}

/// Remove every instance of `def` and its stat modifiers. Returns `false`
/// if the aura was not active.
pub fn deactivate(actor: &mut Actor, def: &AuraDef, clock: &mut EventClock<Event>) -> bool {
    let removed = actor.auras.deactivate(&mut actor.stats, def, clock);
    if removed {
        debug!(actor = %actor.id, aura = %def.label, at = ?clock.now(), "aura deactivated");
    }
    removed
}

/// Spend one stack or charge of `def`. Returns `None` if the aura was not
/// active, otherwise the stacks left.
pub fn consume(actor: &mut Actor, def: &AuraDef, clock: &mut EventClock<Event>) -> Option<u32> {
    let left = actor.auras.consume(&mut actor.stats, def, clock);
    if left.is_some() {
        debug!(actor = %actor.id, aura = %def.label, ?left, at = ?clock.now(), "aura consumed");
    }
    left
}

/// Handle a fired expiration event.
pub fn expire(actor: &mut Actor, def: &AuraDef, instance: u32, fired: EventHandle) -> Result<()> {
    actor.auras.expire(actor.id, &mut actor.stats, def, instance, fired)?;
    debug!(actor = %actor.id, aura = %def.label, instance, "aura expired");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(stacking: StackingPolicy, duration: f64) -> AuraDef {
        AuraDef::from_config(&AuraConfig {
            label: "Glyph of Blocking".into(),
            action_id: Some(58397),
            duration: Some(duration),
            stacking,
            effects: vec![StatEffect {
                stat: Stat::BlockValue,
                op: StatOp::Multiply(1.1),
                per_stack: false,
            }],
        })
        .unwrap()
    }

    fn actor() -> Actor {
        Actor::new(ActorId(0), "warrior", 80).with_stat(Stat::BlockValue, 1000.0)
    }

    /// Pop the next event and route it if it is an aura expiration.
    fn fire_next(actor: &mut Actor, def: &AuraDef, clock: &mut EventClock<Event>) -> Option<Duration> {
        let (handle, event) = clock.advance()?;
        match event {
            Event::AuraExpire { instance, .. } => expire(actor, def, instance, handle).unwrap(),
            other => panic!("unexpected {other:?}"),
        }
        Some(clock.now())
    }

    #[test]
    fn test_activation_applies_stats_and_schedules_one_expiry() {
        let mut clock = EventClock::new();
        let mut warrior = actor();
        let glyph = def(StackingPolicy::Refresh, 10.0);

        assert_eq!(activate(&mut warrior, &glyph, &mut clock).unwrap(), AuraChange::Gained);
        assert!(warrior.auras.is_active(&glyph.label));
        assert!((warrior.stat(Stat::BlockValue) - 1100.0).abs() < 1e-9);
        assert_eq!(clock.pending(), 1);

        assert_eq!(fire_next(&mut warrior, &glyph, &mut clock), Some(Duration::from_secs(10)));
        assert!(!warrior.auras.is_active(&glyph.label));
        assert_eq!(warrior.stat(Stat::BlockValue), 1000.0);
    }

    #[test]
    fn test_refresh_policy_replaces_expiration() {
        let mut clock = EventClock::new();
        let mut warrior = actor();
        let glyph = def(StackingPolicy::Refresh, 10.0);

        activate(&mut warrior, &glyph, &mut clock).unwrap();
        clock.schedule(Duration::from_secs(4), Event::ResourceTick);
        clock.advance();

        assert_eq!(activate(&mut warrior, &glyph, &mut clock).unwrap(), AuraChange::Refreshed);
        assert_eq!(clock.pending(), 1, "exactly one expiration remains");
        assert_eq!(warrior.auras.expires_at(&glyph.label), Some(Duration::from_secs(14)));
        // stat modifier applied once, not twice
        assert!((warrior.stat(Stat::BlockValue) - 1100.0).abs() < 1e-9);

        assert_eq!(fire_next(&mut warrior, &glyph, &mut clock), Some(Duration::from_secs(14)));
        assert_eq!(clock.advance().map(|(_, e)| e), None);
    }

    #[test]
    fn test_stack_policy_caps_and_scales_per_stack() {
        let mut clock = EventClock::new();
        let mut warrior = actor();
        let mut stacking = def(StackingPolicy::Stack { max_stacks: 3 }, 5.0);
        stacking.effects = vec![StatEffect {
            stat: Stat::BlockValue,
            op: StatOp::Add(50.0),
            per_stack: true,
        }];

        activate(&mut warrior, &stacking, &mut clock).unwrap();
        assert_eq!(activate(&mut warrior, &stacking, &mut clock).unwrap(), AuraChange::Stacked(2));
        assert_eq!(activate(&mut warrior, &stacking, &mut clock).unwrap(), AuraChange::Stacked(3));
        assert_eq!(activate(&mut warrior, &stacking, &mut clock).unwrap(), AuraChange::Stacked(3));
        assert_eq!(warrior.auras.stacks(&stacking.label), 3);
        assert_eq!(warrior.stat(Stat::BlockValue), 1150.0);
        assert_eq!(clock.pending(), 1);
    }

    #[test]
    fn test_independent_instances_expire_separately() {
        let mut clock = EventClock::new();
        let mut warrior = actor();
        let mut bleed = def(StackingPolicy::Independent, 6.0);
        bleed.effects = vec![StatEffect {
            stat: Stat::BlockValue,
            op: StatOp::Add(10.0),
            per_stack: false,
        }];

        activate(&mut warrior, &bleed, &mut clock).unwrap();
        clock.schedule(Duration::from_secs(2), Event::ResourceTick);
        clock.advance();
        assert!(matches!(
            activate(&mut warrior, &bleed, &mut clock).unwrap(),
            AuraChange::NewInstance(_)
        ));
        assert_eq!(warrior.auras.instances(&bleed.label), 2);
        assert_eq!(warrior.stat(Stat::BlockValue), 1020.0);

        assert_eq!(fire_next(&mut warrior, &bleed, &mut clock), Some(Duration::from_secs(6)));
        assert_eq!(warrior.stat(Stat::BlockValue), 1010.0);
        assert_eq!(fire_next(&mut warrior, &bleed, &mut clock), Some(Duration::from_secs(8)));
        assert!(!warrior.auras.is_active(&bleed.label));
    }

    #[test]
    fn test_deactivate_cancels_expiry() {
        let mut clock = EventClock::new();
        let mut warrior = actor();
        let glyph = def(StackingPolicy::Refresh, 10.0);
        activate(&mut warrior, &glyph, &mut clock).unwrap();

        assert!(deactivate(&mut warrior, &glyph, &mut clock));
        assert!(!deactivate(&mut warrior, &glyph, &mut clock));
        assert_eq!(clock.pending(), 0);
        assert_eq!(warrior.stat(Stat::BlockValue), 1000.0);
    }

    #[test]
    fn test_refresh_only_affects_active_aura() {
        let mut clock = EventClock::new();
        let mut warrior = actor();
        let glyph = def(StackingPolicy::Refresh, 10.0);
        assert!(!refresh(&mut warrior, &glyph, &mut clock).unwrap());
        activate(&mut warrior, &glyph, &mut clock).unwrap();
        assert!(refresh(&mut warrior, &glyph, &mut clock).unwrap());
        assert_eq!(clock.pending(), 1);
    }

    #[test]
    fn test_stale_expiration_is_orphaned() {
        let mut clock = EventClock::new();
        let mut warrior = actor();
        let glyph = def(StackingPolicy::Refresh, 10.0);
        activate(&mut warrior, &glyph, &mut clock).unwrap();
        let (handle, _) = clock.advance().unwrap();
        expire(&mut warrior, &glyph, 0, handle).unwrap();
        assert!(matches!(
            expire(&mut warrior, &glyph, 0, handle),
            Err(SimError::OrphanedEvent(_))
        ));
    }

    #[test]
    fn test_charges_are_spent_one_at_a_time() {
        let mut clock = EventClock::new();
        let mut shaman = actor();
        let clearcasting = def(StackingPolicy::Charges { charges: 2 }, 15.0);

        assert_eq!(activate(&mut shaman, &clearcasting, &mut clock).unwrap(), AuraChange::Gained);
        assert_eq!(shaman.auras.stacks(&clearcasting.label), 2);
        assert_eq!(consume(&mut shaman, &clearcasting, &mut clock), Some(1));
        assert_eq!(activate(&mut shaman, &clearcasting, &mut clock).unwrap(), AuraChange::Refreshed);
        assert_eq!(shaman.auras.stacks(&clearcasting.label), 2);
        assert_eq!(clock.pending(), 1);

        assert_eq!(consume(&mut shaman, &clearcasting, &mut clock), Some(1));
        assert_eq!(consume(&mut shaman, &clearcasting, &mut clock), Some(0));
        assert!(!shaman.auras.is_active(&clearcasting.label));
        assert_eq!(clock.pending(), 0);
        assert_eq!(consume(&mut shaman, &clearcasting, &mut clock), None);
    }

    #[test]
    fn test_consume_takes_oldest_independent_instance() {
        let mut clock = EventClock::new();
        let mut warrior = actor();
        let bleed = def(StackingPolicy::Independent, 6.0);
        activate(&mut warrior, &bleed, &mut clock).unwrap();
        clock.schedule(Duration::from_secs(2), Event::ResourceTick);
        clock.advance();
        activate(&mut warrior, &bleed, &mut clock).unwrap();

        assert_eq!(consume(&mut warrior, &bleed, &mut clock), Some(1));
        assert_eq!(warrior.auras.expires_at(&bleed.label), Some(Duration::from_secs(8)));
    }

    #[test]
    fn test_config_validation() {
        let bad = AuraConfig {
            label: "x".into(),
            action_id: None,
            duration: Some(-1.0),
            stacking: StackingPolicy::Refresh,
            effects: vec![],
        };
        assert!(AuraDef::from_config(&bad).is_err());
        let bad = AuraConfig {
            duration: Some(5.0),
            stacking: StackingPolicy::Stack { max_stacks: 0 },
            ..bad
        };
        assert!(AuraDef::from_config(&bad).is_err());
    }
}
