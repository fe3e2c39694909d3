//! Core trial engine: the event type every component schedules, the
//! seeded RNG threaded through a trial, and the dispatch loop.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::ability::{AbilityId, Registry};
use crate::actor::{Actor, ActorId};
use crate::attack_table::{AttackKind, AttackTable, AttackTables};
use crate::aura;
use crate::clock::{EventClock, EventHandle};
use crate::config::Scenario;
use crate::cooldown::TimerKey;
use crate::error::{Result, SimError};
use crate::metrics::MetricsCollector;
use crate::periodic::{DotKey, PeriodicEngine};

/// Fast RNG wrapper for better performance
#[derive(Debug, Clone)]
pub struct FastRng {
    inner: fastrand::Rng,
}

impl FastRng {
    #[inline(always)]
    pub fn new(seed: u64) -> Self {
        Self {
            inner: fastrand::Rng::with_seed(seed),
        }
    }

    /// Uniform in `[0, 1)`
    #[inline(always)]
    pub fn f64(&mut self) -> f64 {
        self.inner.f64()
    }

    #[inline(always)]
    pub fn u32(&mut self) -> u32 {
        self.inner.u32(..)
    }

    /// Uniform in `[low, high)`
    #[inline(always)]
    pub fn range_f64(&mut self, low: f64, high: f64) -> f64 {
        low + self.inner.f64() * (high - low)
    }
}

/// Seed for trial `index` of a batch (SplitMix64 step). Independent of how
/// trials are spread over workers.
pub fn derive_seed(base: u64, index: u64) -> u64 {
    let mut z = base.wrapping_add(index.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

pub const DEFAULT_MAX_EVENTS: u64 = 2_000_000;

const RESOURCE_TICK: Duration = Duration::from_secs(1);
/// Longest an idle actor waits before re-checking its rotation
const IDLE_RECHECK: Duration = Duration::from_secs(1);

/// Everything that can sit on a trial's clock.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Rotation decision point
    ActorReady { actor: ActorId },
    CastComplete { actor: ActorId, cast_id: u64 },
    CooldownReady { actor: ActorId, timer: TimerKey },
    AuraExpire { actor: ActorId, label: String, instance: u32 },
    DotTick { key: DotKey, tick: u32 },
    /// Once-per-second resource regeneration for every actor
    ResourceTick,
    Incapacitate { actor: ActorId, duration: Duration },
    Recover { actor: ActorId },
}

impl Event {
    /// Tie-break class among events due at the same instant; lower fires
    /// first. Timers free up before anything that might want them.
    pub fn priority(&self) -> u8 {
        match self {
            Event::CooldownReady { .. } | Event::AuraExpire { .. } => 0,
            Event::CastComplete { .. } => 1,
            Event::DotTick { .. } => 2,
            Event::Incapacitate { .. } | Event::Recover { .. } => 3,
            Event::ResourceTick => 4,
            Event::ActorReady { .. } => 5,
        }
    }
}

/// How a trial's event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialEnd {
    /// Queue drained or the duration ceiling was reached
    Completed,
    /// Per-trial event budget exhausted; metrics must be discarded
    BudgetExceeded,
}

/// One trial: private clock, actors, RNG and metrics.
#[derive(Debug)]
pub struct Trial {
    pub(crate) clock: EventClock<Event>,
    pub(crate) actors: Vec<Actor>,
    pub(crate) tables: AttackTables,
    pub(crate) dots: PeriodicEngine,
    pub(crate) metrics: MetricsCollector,
    pub(crate) rng: FastRng,
    pub(crate) registry: Arc<Registry>,
    pub(crate) next_cast_id: u64,
    regen_tick: Option<EventHandle>,
    events_processed: u64,
    max_events: u64,
    started: bool,
}

impl Trial {
    /// `actors[i]` must carry `ActorId(i)`.
    pub fn new(registry: Arc<Registry>, actors: Vec<Actor>, seed: u64, ceiling: Option<Duration>) -> Result<Self> {
        if let Some((i, actor)) = actors.iter().enumerate().find(|(i, a)| a.id.index() != *i) {
            debug!(slot = i, id = %actor.id, "actor id does not match its slot");
            return Err(SimError::UnknownActor(actor.id));
        }
        Ok(Self {
            clock: match ceiling {
                Some(c) => EventClock::with_ceiling(c),
                None => EventClock::new(),
            },
            actors,
            tables: AttackTables::new(),
            dots: PeriodicEngine::new(),
            metrics: MetricsCollector::new(),
            rng: FastRng::new(seed),
            registry,
            next_cast_id: 0,
            regen_tick: None,
            events_processed: 0,
            max_events: DEFAULT_MAX_EVENTS,
            started: false,
        })
    }

    /// Fresh trial in the scenario's canonical starting state.
    pub fn from_scenario(scenario: &Scenario, seed: u64) -> Result<Self> {
        let actors = scenario.actors.iter().map(Actor::from_config).collect();
        let mut trial = Self::new(Arc::clone(&scenario.registry), actors, seed, Some(scenario.duration))?;
        trial.max_events = scenario.max_events;
        for pin in &scenario.pinned {
            trial.pin_table(pin.attacker, pin.defender, pin.kind, pin.table);
        }
        for script in &scenario.script {
            trial.actor(script.actor)?;
            let event = Event::Incapacitate {
                actor: script.actor,
                duration: script.duration,
            };
            let priority = event.priority();
            trial.clock.schedule_at(script.at, priority, event);
        }
        Ok(trial)
    }

    pub fn with_max_events(mut self, max_events: u64) -> Self {
        self.max_events = max_events;
        self
    }

    pub fn pin_table(
        &mut self,
        attacker: ActorId,
        defender: ActorId,
        kind: AttackKind,
        table: AttackTable,
    ) {
        self.tables.pin(attacker, defender, kind, table);
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn actor(&self, id: ActorId) -> Result<&Actor> {
        self.actors.get(id.index()).ok_or(SimError::UnknownActor(id))
    }

    pub fn actor_mut(&mut self, id: ActorId) -> Result<&mut Actor> {
        self.actors.get_mut(id.index()).ok_or(SimError::UnknownActor(id))
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn into_metrics(self) -> MetricsCollector {
        self.metrics
    }

    pub fn dots(&self) -> &PeriodicEngine {
        &self.dots
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Schedule the opening decision point for every actor with a
    /// rotation, and the first regeneration tick if anything regenerates.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for i in 0..self.actors.len() {
            if !self.actors[i].rotation.is_empty() {
                let id = self.actors[i].id;
                self.wake_at(id, self.clock.now());
            }
        }
        if self.actors.iter().any(|a| a.pools.any_regenerates()) {
            self.schedule_regen();
        }
    }

    fn schedule_regen(&mut self) {
        if self.regen_tick.is_none() {
            let event = Event::ResourceTick;
            self.regen_tick = Some(self.clock.schedule_with_priority(RESOURCE_TICK, event.priority(), event));
        }
    }

    /// Restart regeneration after a spend if the tick had gone quiet.
    pub(crate) fn resume_regen(&mut self, actor: ActorId) {
        if self.actors.get(actor.index()).is_some_and(|a| a.pools.any_refilling()) {
            self.schedule_regen();
        }
    }

    /// Process one event. Returns `false` once the clock has nothing left
    /// to fire.
    pub fn step(&mut self) -> Result<bool> {
        let Some((handle, event)) = self.clock.advance() else {
            return Ok(false);
        };
        self.events_processed += 1;
        trace!(at = ?self.clock.now(), ?event, "dispatch");
        self.dispatch(handle, event)?;
        Ok(true)
    }

    /// Run until the queue drains, the ceiling is reached, or the event
    /// budget runs out. The budget only counts as exceeded when another
    /// event is still due after `max_events`.
    pub fn run(&mut self) -> Result<TrialEnd> {
        self.start();
        loop {
            if self.events_processed >= self.max_events && self.clock.has_due() {
                self.clock.halt();
                return Ok(TrialEnd::BudgetExceeded);
            }
            if !self.step()? {
                return Ok(TrialEnd::Completed);
            }
        }
    }

    /// Process every event due at or before `until`, then let the clock
    /// idle forward to `until`.
    pub fn run_until(&mut self, until: Duration) -> Result<()> {
        self.start();
        while self.clock.peek_time().is_some_and(|t| t <= until) {
            self.step()?;
        }
        self.clock.advance_to(until);
        Ok(())
    }

    fn dispatch(&mut self, handle: EventHandle, event: Event) -> Result<()> {
        match event {
            Event::ActorReady { actor } => {
                let a = self.actor_mut(actor)?;
                if a.wake != Some(handle) {
                    return Err(SimError::OrphanedEvent(format!("{actor} decision point is stale")));
                }
                a.wake = None;
                self.decide(actor)
            }
            Event::CastComplete { actor, cast_id } => {
                self.complete_cast(actor, cast_id, handle)?;
                self.after_cast(actor)
            }
            Event::CooldownReady { actor, timer } => self.actor_mut(actor)?.cooldowns.complete(actor, &timer, handle),
            Event::AuraExpire { actor, label, instance } => {
                let registry = Arc::clone(&self.registry);
                let def = registry.aura(&label)?;
                let a = self.actors.get_mut(actor.index()).ok_or(SimError::UnknownActor(actor))?;
                aura::expire(a, def, instance, handle)
            }
            Event::DotTick { key, tick } => self.dot_tick(&key, tick, handle),
            Event::ResourceTick => {
                if self.regen_tick != Some(handle) {
                    return Err(SimError::OrphanedEvent("resource tick is stale".to_string()));
                }
                self.regen_tick = None;
                for actor in &mut self.actors {
                    actor.pools.regen_all();
                }
                // Full pools and an empty queue: nothing left to regenerate for
                if self.actors.iter().any(|a| a.pools.any_refilling()) || self.clock.pending() > 0 {
                    self.schedule_regen();
                }
                Ok(())
            }
            Event::Incapacitate { actor, duration } => {
                debug!(%actor, ?duration, at = ?self.clock.now(), "incapacitated");
                self.interrupt(actor)?;
                let a = self.actor_mut(actor)?;
                a.incapacitated = true;
                let wake = a.wake.take();
                if let Some(h) = wake {
                    self.clock.cancel(h);
                }
                let event = Event::Recover { actor };
                self.clock.schedule_with_priority(duration, event.priority(), event);
                Ok(())
            }
            Event::Recover { actor } => {
                let a = self.actor_mut(actor)?;
                a.incapacitated = false;
                let has_rotation = !a.rotation.is_empty();
                debug!(%actor, at = ?self.clock.now(), "recovered");
                if has_rotation {
                    self.wake_at(actor, self.clock.now());
                }
                Ok(())
            }
        }
    }

    /// Replace the actor's pending decision point with one at `at`.
    pub(crate) fn wake_at(&mut self, actor: ActorId, at: Duration) {
        let Some(a) = self.actors.get_mut(actor.index()) else {
            return;
        };
        if let Some(old) = a.wake.take() {
            self.clock.cancel(old);
        }
        let event = Event::ActorReady { actor };
        let priority = event.priority();
        a.wake = Some(self.clock.schedule_at(at, priority, event));
    }

    /// Next decision once a cast has landed: when the GCD frees up.
    fn after_cast(&mut self, actor: ActorId) -> Result<()> {
        let a = self.actor(actor)?;
        if a.rotation.is_empty() || a.incapacitated {
            return Ok(());
        }
        let gcd_end = a.cooldowns.ready_at(&TimerKey::Gcd).unwrap_or(self.clock.now());
        self.wake_at(actor, gcd_end.max(self.clock.now()));
        Ok(())
    }

    /// Rotation driver: cast the first eligible ability in priority order.
    fn decide(&mut self, actor: ActorId) -> Result<()> {
        let a = self.actor(actor)?;
        if a.incapacitated || a.is_casting() {
            return Ok(());
        }
        let rotation = a.rotation.clone();
        let target = a.target;
        for ability in rotation {
            match self.try_cast(actor, ability, target)? {
                crate::cast::CastAttempt::Started { completes_at, .. } => {
                    trace!(%actor, %ability, ?completes_at, "rotation started cast");
                    // CastComplete reschedules the next decision
                    return Ok(());
                }
                crate::cast::CastAttempt::Completed { .. } => return self.after_cast(actor),
                crate::cast::CastAttempt::Ineligible(reason) => {
                    trace!(%actor, %ability, ?reason, "rotation skipped");
                }
            }
        }
        let now = self.clock.now();
        let next = self.next_ready(actor)?.map_or(now + IDLE_RECHECK, |ready| ready.min(now + IDLE_RECHECK));
        self.wake_at(actor, next);
        Ok(())
    }

    /// Earliest moment any timer gating the actor's rotation frees up.
    fn next_ready(&self, actor: ActorId) -> Result<Option<Duration>> {
        let a = self.actor(actor)?;
        let mut earliest = a.cooldowns.ready_at(&TimerKey::Gcd);
        for id in &a.rotation {
            let ability = self.registry.ability(*id)?;
            if let Some(ready) = a.cooldowns.ready_at(&ability.cooldown_key) {
                earliest = Some(earliest.map_or(ready, |e: Duration| e.min(ready)));
            }
        }
        Ok(earliest)
    }

    /// Convenience for tests and bindings: cast `ability` from `caster` at
    /// its default target.
    pub fn cast_at_default_target(&mut self, caster: ActorId, ability: AbilityId) -> Result<crate::cast::CastAttempt> {
        let target = self.actor(caster)?.target;
        self.try_cast(caster, ability, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ability::{AbilityConfig, CostTiming, CooldownTiming, DamageEffect, Effect, InterruptPolicy, SpellSchool};
    use crate::resource::{ResourceKind, ResourcePool};

    fn bolt_registry(cast_time: f64) -> Arc<Registry> {
        let mut registry = Registry::new();
        registry
            .register_ability(&AbilityConfig {
                id: AbilityId(1),
                name: "Bolt".into(),
                school: SpellSchool::Nature,
                resource: Some(ResourceKind::Mana),
                cost: 10.0,
                cast_time,
                gcd: 1.5,
                ignore_haste: false,
                cooldown: None,
                cost_timing: CostTiming::OnCast,
                cooldown_timing: CooldownTiming::Start,
                interrupt: InterruptPolicy::Rollback,
                gates: vec![],
                cast_modifiers: vec![],
                effects: vec![Effect::DirectDamage(DamageEffect {
                    kind: AttackKind::Spell,
                    min: 100.0,
                    max: 100.0,
                    scaling: vec![],
                    crit_multiplier: 1.5,
                    modifiers: vec![],
                })],
                hooks: vec![],
            })
            .unwrap();
        Arc::new(registry)
    }

    fn duel(mana: f64) -> Vec<Actor> {
        let mut caster = Actor::new(ActorId(0), "caster", 80).with_pool(ResourcePool::new(ResourceKind::Mana, mana, mana));
        caster.rotation = vec![AbilityId(1)];
        caster.target = Some(ActorId(1));
        vec![caster, Actor::new(ActorId(1), "dummy", 83)]
    }

    #[test]
    fn test_derive_seed_is_stable_and_spread() {
        assert_eq!(derive_seed(42, 7), derive_seed(42, 7));
        assert_ne!(derive_seed(42, 0), derive_seed(42, 1));
        assert_ne!(derive_seed(0, 0), derive_seed(1, 0));
    }

    #[test]
    fn test_priority_orders_timer_release_before_decisions() {
        let ready = Event::CooldownReady {
            actor: ActorId(0),
            timer: TimerKey::Gcd,
        };
        let decide = Event::ActorReady { actor: ActorId(0) };
        assert!(ready.priority() < decide.priority());
    }

    #[test]
    fn test_rotation_casts_until_out_of_mana() {
        let mut trial = Trial::new(bolt_registry(2.0), duel(35.0), 1, Some(Duration::from_secs(30))).unwrap();
        let table = AttackTable::from_chances(0.0, 0.0, 0.0);
        trial.pin_table(ActorId(0), ActorId(1), AttackKind::Spell, table);
        assert_eq!(trial.run().unwrap(), TrialEnd::Completed);

        let m = trial.metrics().get(&crate::metrics::MetricKey::new(AbilityId(1), ActorId(1))).unwrap();
        assert_eq!(m.casts, 3);
        assert_eq!(m.hits, 3);
        assert_eq!(m.damage, 300.0);
        assert_eq!(trial.actor(ActorId(0)).unwrap().pools.current(ResourceKind::Mana), 5.0);
        assert_eq!(trial.now(), Duration::from_secs(30));
    }

    #[test]
    fn test_event_budget_aborts() {
        let mut trial = Trial::new(bolt_registry(2.0), duel(1000.0), 1, None)
            .unwrap()
            .with_max_events(10);
        assert_eq!(trial.run().unwrap(), TrialEnd::BudgetExceeded);
        assert_eq!(trial.events_processed(), 10);
    }

    #[test]
    fn test_trial_finishing_on_exact_budget_completes() {
        let trial = || {
            let mut trial = Trial::new(bolt_registry(2.0), duel(35.0), 1, Some(Duration::from_secs(30))).unwrap();
            trial.pin_table(ActorId(0), ActorId(1), AttackKind::Spell, AttackTable::from_chances(0.0, 0.0, 0.0));
            trial
        };
        let mut unbounded = trial();
        assert_eq!(unbounded.run().unwrap(), TrialEnd::Completed);
        let needed = unbounded.events_processed();

        let mut exact = trial().with_max_events(needed);
        assert_eq!(exact.run().unwrap(), TrialEnd::Completed);
        assert_eq!(exact.metrics(), unbounded.metrics());

        let mut short = trial().with_max_events(needed - 1);
        assert_eq!(short.run().unwrap(), TrialEnd::BudgetExceeded);
    }

    #[test]
    fn test_regen_stops_once_pools_are_full() {
        let caster = Actor::new(ActorId(0), "caster", 80)
            .with_pool(ResourcePool::new(ResourceKind::Mana, 50.0, 100.0).with_regen(10.0));
        let mut trial = Trial::new(bolt_registry(0.0), vec![caster, Actor::new(ActorId(1), "dummy", 83)], 1, None).unwrap();
        assert_eq!(trial.run().unwrap(), TrialEnd::Completed);
        assert_eq!(trial.events_processed(), 5);
        assert_eq!(trial.now(), Duration::from_secs(5));
        assert_eq!(trial.actor(ActorId(0)).unwrap().pools.current(ResourceKind::Mana), 100.0);
    }

    #[test]
    fn test_spend_restarts_quiet_regen() {
        let caster = Actor::new(ActorId(0), "caster", 80)
            .with_pool(ResourcePool::new(ResourceKind::Mana, 100.0, 100.0).with_regen(5.0));
        let mut trial = Trial::new(bolt_registry(0.0), vec![caster, Actor::new(ActorId(1), "dummy", 83)], 1, None).unwrap();
        assert_eq!(trial.run().unwrap(), TrialEnd::Completed);
        let quiet = trial.now();

        trial.try_cast(ActorId(0), AbilityId(1), Some(ActorId(1))).unwrap();
        assert_eq!(trial.actor(ActorId(0)).unwrap().pools.current(ResourceKind::Mana), 90.0);
        assert_eq!(trial.run().unwrap(), TrialEnd::Completed);
        assert_eq!(trial.actor(ActorId(0)).unwrap().pools.current(ResourceKind::Mana), 100.0);
        assert_eq!(trial.now(), quiet + Duration::from_secs(2));
    }

    #[test]
    fn test_mismatched_actor_ids_rejected() {
        let actors = vec![Actor::new(ActorId(1), "wrong slot", 80)];
        assert!(matches!(
            Trial::new(bolt_registry(0.0), actors, 1, None),
            Err(SimError::UnknownActor(ActorId(1)))
        ));
    }

    #[test]
    fn test_same_seed_same_metrics() {
        let run = |seed| {
            let mut trial = Trial::new(bolt_registry(2.0), duel(500.0), seed, Some(Duration::from_secs(60))).unwrap();
            trial.run().unwrap();
            trial.into_metrics()
        };
        assert_eq!(run(9), run(9));
    }
}
