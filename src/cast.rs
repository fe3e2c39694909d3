//! Cast pipeline: eligibility, cost, cast time, effect resolution, hooks.
//!
//! ```text
//! Idle -> eligibility -> cost paid -> [casting] -> effects resolved -> Idle
//!            \-> Ineligible (no side effects)
//! ```
//!
//! Everything that can refuse a cast is checked before anything is
//! mutated, so an ineligible attempt leaves the trial untouched. Cast-start
//! modifiers are evaluated once, when the cast starts; later aura changes
//! do not reach an in-flight cast.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::ability::{
    scaling_total, Ability, AbilityId, CastEffect, ConditionContext, CooldownTiming, CostTiming, DamageEffect, Effect,
    HookAction, InterruptPolicy, ModifierTotals, Subject, Trigger,
};
use crate::actor::{ActorId, Stat};
use crate::attack_table::{Outcome, PARTIAL_RESIST_MITIGATION};
use crate::aura;
use crate::clock::EventHandle;
use crate::cooldown::TimerKey;
use crate::error::{Result, SimError};
use crate::metrics::MetricKey;
use crate::periodic::{DotApplied, DotKey, DotSnapshot, SnapshotMode, TickOutcome};
use crate::resource::round3;
use crate::simulation::{Event, Trial};

/// Hasted global cooldowns never drop below this (or the base GCD, if
/// that is shorter).
const GCD_FLOOR: Duration = Duration::from_secs(1);

/// A cast between its start and its completion event.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightCast {
    pub cast_id: u64,
    pub ability: AbilityId,
    pub target: Option<ActorId>,
    pub started_at: Duration,
    pub completes_at: Duration,
    pub paid_cost: f64,
    /// Still owed when the cast lands (pay-on-land abilities)
    pub cost_due: f64,
    pub cooldown_started: bool,
    handle: Option<EventHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    Incapacitated,
    Busy,
    OnCooldown,
    GlobalCooldown,
    NoTarget,
    GateFailed,
    InsufficientResource,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CastAttempt {
    /// Cast time pending; a completion event is on the clock
    Started { cast_id: u64, completes_at: Duration },
    /// Instant cast, already resolved
    Completed { cast_id: u64 },
    Ineligible(Ineligible),
}

/// Outcome of a cast's first damage effect; what hooks react to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub outcome: Outcome,
    pub damage: f64,
}

/// Cost and timing after cast-start modifiers and haste.
#[derive(Debug, Clone, PartialEq)]
struct CastPlan {
    cost: f64,
    cast_time: Duration,
    gcd: Duration,
    consumed: Vec<String>,
}

fn trigger_matches(trigger: Trigger, outcome: Outcome) -> bool {
    match trigger {
        Trigger::Hit => matches!(outcome, Outcome::Hit | Outcome::PartialResist),
        Trigger::Crit => outcome == Outcome::Crit,
        Trigger::Miss => outcome == Outcome::Miss,
        Trigger::Landed => outcome.landed(),
    }
}

/// Final damage for an outcome. A miss zeroes the payload.
fn outcome_damage(outcome: Outcome, amount: f64, crit_multiplier: f64) -> f64 {
    match outcome {
        Outcome::Miss => 0.0,
        Outcome::PartialResist => amount * (1.0 - PARTIAL_RESIST_MITIGATION),
        Outcome::Hit => amount,
        Outcome::Crit => amount * crit_multiplier,
    }
}

impl Trial {
    /// Attempt to cast `ability` from `caster` at `target`.
    pub fn try_cast(&mut self, caster: ActorId, ability: AbilityId, target: Option<ActorId>) -> Result<CastAttempt> {
        let registry = Arc::clone(&self.registry);
        let ability = registry.ability(ability)?;
        self.actor(caster)?;
        if let Some(t) = target {
            self.actor(t)?;
        }
        match self.plan_cast(caster, ability, target) {
            Ok(plan) => self.commit_cast(caster, ability, target, plan),
            Err(reason) => {
                trace!(%caster, ability = %ability.name, ?reason, "cast ineligible");
                Ok(CastAttempt::Ineligible(reason))
            }
        }
    }

    fn plan_cast(
        &self,
        caster: ActorId,
        ability: &Ability,
        target: Option<ActorId>,
    ) -> std::result::Result<CastPlan, Ineligible> {
        let a = &self.actors[caster.index()];
        if a.incapacitated {
            return Err(Ineligible::Incapacitated);
        }
        if a.is_casting() {
            return Err(Ineligible::Busy);
        }
        if ability.cooldown.is_some() && !a.cooldowns.is_ready(&ability.cooldown_key) {
            return Err(Ineligible::OnCooldown);
        }
        if !ability.gcd.is_zero() && !a.cooldowns.is_ready(&TimerKey::Gcd) {
            return Err(Ineligible::GlobalCooldown);
        }
        if target.is_none() && ability.needs_target() {
            return Err(Ineligible::NoTarget);
        }
        let ctx = ConditionContext {
            caster: a,
            target: target.map(|t| &self.actors[t.index()]),
            dots: &self.dots,
        };
        if !ability.gates.iter().all(|g| g.holds(&ctx)) {
            return Err(Ineligible::GateFailed);
        }

        let mut plan = CastPlan {
            cost: ability.cost,
            cast_time: ability.cast_time,
            gcd: ability.gcd,
            consumed: Vec::new(),
        };
        for m in &ability.cast_modifiers {
            if !crate::ability::applies(&m.when, &ctx) {
                continue;
            }
            match m.effect {
                CastEffect::ZeroCost => plan.cost = 0.0,
                CastEffect::InstantCast => plan.cast_time = Duration::ZERO,
                CastEffect::CostMultiplier { factor } => plan.cost *= factor,
                CastEffect::CostReduction { amount } => plan.cost = (plan.cost - amount).max(0.0),
                CastEffect::CastTimeReduction { seconds } => {
                    let cut = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO);
                    plan.cast_time = plan.cast_time.saturating_sub(cut);
                }
            }
            if let Some(label) = &m.consumes {
                plan.consumed.push(label.clone());
            }
        }

        let haste = a.stat(Stat::Haste);
        if !ability.ignore_haste && haste > 0.0 {
            plan.cast_time = plan.cast_time.div_f64(1.0 + haste);
            plan.gcd = plan.gcd.div_f64(1.0 + haste).max(GCD_FLOOR.min(ability.gcd));
        }

        if plan.cost > 0.0 {
            let affordable = ability
                .resource
                .and_then(|kind| a.pools.get(kind))
                .is_some_and(|pool| pool.can_afford(plan.cost));
            if !affordable {
                return Err(Ineligible::InsufficientResource);
            }
        }
        Ok(plan)
    }

    fn commit_cast(
        &mut self,
        caster: ActorId,
        ability: &Ability,
        target: Option<ActorId>,
        plan: CastPlan,
    ) -> Result<CastAttempt> {
        let c = caster.index();
        let now = self.clock.now();
        let key = MetricKey::new(ability.id, target.unwrap_or(caster));
        let cost = round3(plan.cost);
        let (paid, due) = match ability.cost_timing {
            CostTiming::OnCast => (cost, 0.0),
            CostTiming::OnLand => (0.0, cost),
        };

        if paid > 0.0 {
            let spent = ability
                .resource
                .and_then(|kind| self.actors[c].pools.get_mut(kind))
                .is_some_and(|pool| pool.spend(paid));
            if !spent {
                return Ok(CastAttempt::Ineligible(Ineligible::InsufficientResource));
            }
            self.resume_regen(caster);
        }

        let cast_id = self.next_cast_id;
        self.next_cast_id += 1;
        self.metrics.record_cast(key);
        if paid > 0.0 {
            self.metrics.record_spend(key, paid);
        }

        let registry = Arc::clone(&self.registry);
        for label in &plan.consumed {
            let def = registry.aura(label)?;
            aura::consume(&mut self.actors[c], def, &mut self.clock);
        }

        let mut cooldown_started = false;
        if let (Some(duration), CooldownTiming::Start) = (ability.cooldown, ability.cooldown_timing) {
            self.actors[c]
                .cooldowns
                .start(caster, ability.cooldown_key.clone(), duration, &mut self.clock)?;
            cooldown_started = true;
        }
        self.actors[c]
            .cooldowns
            .start(caster, TimerKey::Gcd, plan.gcd, &mut self.clock)?;

        let mut cast = InFlightCast {
            cast_id,
            ability: ability.id,
            target,
            started_at: now,
            completes_at: now + plan.cast_time,
            paid_cost: paid,
            cost_due: due,
            cooldown_started,
            handle: None,
        };
        debug!(
            %caster,
            ability = %ability.name,
            cast_id,
            cost,
            cast_time = ?plan.cast_time,
            at = ?now,
            "cast started"
        );

        if plan.cast_time.is_zero() {
            self.land(caster, cast)?;
            return Ok(CastAttempt::Completed { cast_id });
        }
        let event = Event::CastComplete { actor: caster, cast_id };
        cast.handle = Some(self.clock.schedule_with_priority(plan.cast_time, event.priority(), event));
        let completes_at = cast.completes_at;
        self.actors[c].casting = Some(cast);
        Ok(CastAttempt::Started { cast_id, completes_at })
    }

    /// Completion event for an in-flight cast fired.
    pub(crate) fn complete_cast(&mut self, caster: ActorId, cast_id: u64, fired: EventHandle) -> Result<()> {
        let a = self.actor_mut(caster)?;
        let cast = match a.casting.take() {
            Some(cast) if cast.cast_id == cast_id && cast.handle == Some(fired) => cast,
            other => {
                a.casting = other;
                return Err(SimError::OrphanedEvent(format!(
                    "{caster} completion for cast {cast_id} has no matching in-flight cast"
                )));
            }
        };
        self.land(caster, cast)
    }

    /// Interrupt the caster's in-flight cast, if any. Under the rollback
    /// policy the paid cost comes back and a started cooldown is reset.
    pub fn interrupt(&mut self, caster: ActorId) -> Result<bool> {
        let a = self.actor_mut(caster)?;
        let Some(cast) = a.casting.take() else {
            return Ok(false);
        };
        let has_rotation = !a.rotation.is_empty();
        if let Some(handle) = cast.handle {
            self.clock.cancel(handle);
        }
        let registry = Arc::clone(&self.registry);
        let ability = registry.ability(cast.ability)?;
        let c = caster.index();
        if ability.interrupt == InterruptPolicy::Rollback {
            if cast.paid_cost > 0.0 {
                if let Some(pool) = ability.resource.and_then(|kind| self.actors[c].pools.get_mut(kind)) {
                    pool.refund(cast.paid_cost);
                }
            }
            let key = MetricKey::new(ability.id, cast.target.unwrap_or(caster));
            self.metrics.record_rollback(key, cast.paid_cost);
            if cast.cooldown_started {
                self.actors[c].cooldowns.reset(&ability.cooldown_key, &mut self.clock);
            }
        }
        debug!(
            %caster,
            ability = %ability.name,
            cast_id = cast.cast_id,
            policy = ?ability.interrupt,
            at = ?self.clock.now(),
            "cast interrupted"
        );
        if has_rotation {
            let now = self.clock.now();
            self.wake_at(caster, now);
        }
        Ok(true)
    }

    /// Resolve a cast that reached completion.
    ///
    /// A pay-on-land cost that can no longer be afforded fizzles the cast:
    /// nothing resolves and it is counted as a fizzle instead of a cast.
    /// Timers started with the cast (GCD, a start-timed cooldown) keep
    /// running.
    fn land(&mut self, caster: ActorId, cast: InFlightCast) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let ability = registry.ability(cast.ability)?;
        let c = caster.index();
        let key = MetricKey::new(ability.id, cast.target.unwrap_or(caster));

        let mut paid = cast.paid_cost;
        if cast.cost_due > 0.0 {
            let spent = ability
                .resource
                .and_then(|kind| self.actors[c].pools.get_mut(kind))
                .is_some_and(|pool| pool.spend(cast.cost_due));
            if !spent {
                debug!(%caster, ability = %ability.name, "cost due on landing unaffordable, cast fizzles");
                self.metrics.record_fizzle(key);
                return Ok(());
            }
            paid += cast.cost_due;
            self.metrics.record_spend(key, cast.cost_due);
            self.resume_regen(caster);
        }

        if let (Some(duration), CooldownTiming::Complete) = (ability.cooldown, ability.cooldown_timing) {
            self.actors[c]
                .cooldowns
                .start(caster, ability.cooldown_key.clone(), duration, &mut self.clock)?;
        }

        let mut primary: Option<Resolution> = None;
        for effect in &ability.effects {
            match effect {
                Effect::DirectDamage(dmg) => {
                    let target = self.subject(caster, cast.target, Subject::Target)?;
                    let resolution = self.resolve_damage(caster, target, ability, dmg)?;
                    primary.get_or_insert(resolution);
                }
                Effect::ApplyDot { dot } => {
                    let target = self.subject(caster, cast.target, Subject::Target)?;
                    self.apply_dot(caster, target, dot, None)?;
                }
                Effect::ApplyAura { aura: label, on } => {
                    let subject = self.subject(caster, cast.target, *on)?;
                    let def = registry.aura(label)?;
                    aura::activate(&mut self.actors[subject.index()], def, &mut self.clock)?;
                }
            }
        }

        let resolution = primary.unwrap_or(Resolution {
            outcome: Outcome::Hit,
            damage: 0.0,
        });
        self.run_hooks(caster, cast.target, ability, paid, resolution)
    }

    fn subject(&self, caster: ActorId, target: Option<ActorId>, on: Subject) -> Result<ActorId> {
        match on {
            Subject::Caster => Ok(caster),
            Subject::Target => target.ok_or_else(|| SimError::UnknownDefinition {
                kind: "target",
                name: format!("{caster} has no target"),
            }),
        }
    }

    /// One outcome roll for one damage effect. Crit-on-hit promotes a
    /// landed roll after the fact; a miss stays a miss.
    fn resolve_damage(
        &mut self,
        caster: ActorId,
        target: ActorId,
        ability: &Ability,
        dmg: &DamageEffect,
    ) -> Result<Resolution> {
        let (c, t) = (caster.index(), target.index());
        let totals = {
            let ctx = ConditionContext {
                caster: &self.actors[c],
                target: Some(&self.actors[t]),
                dots: &self.dots,
            };
            ModifierTotals::fold(&dmg.modifiers, &ctx)
        };
        let base = dmg.base_damage(&self.actors[c], &mut self.rng);
        let table = self
            .tables
            .get(&self.actors[c], &self.actors[t], dmg.kind)
            .with_bonus(totals.bonus_hit, totals.bonus_crit);
        let roll = self.rng.f64();
        let mut outcome = table.resolve(roll);
        if totals.crit_on_hit && outcome.landed() {
            outcome = Outcome::Crit;
        }

        let amount = (base + totals.flat_bonus)
            * totals.multiplier
            * self.actors[c].stat(Stat::DamageDone)
            * self.actors[t].stat(Stat::DamageTaken);
        let damage = outcome_damage(outcome, amount, dmg.crit_multiplier + totals.crit_multiplier_bonus);
        self.metrics
            .record_outcome(MetricKey::new(ability.id, target), outcome, damage);
        trace!(%caster, %target, ability = %ability.name, roll, ?outcome, damage, "resolved");
        Ok(Resolution { outcome, damage })
    }

    fn run_hooks(
        &mut self,
        caster: ActorId,
        target: Option<ActorId>,
        ability: &Ability,
        paid: f64,
        resolution: Resolution,
    ) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let c = caster.index();
        let key = MetricKey::new(ability.id, target.unwrap_or(caster));
        for hook in &ability.hooks {
            if !trigger_matches(hook.on, resolution.outcome) {
                continue;
            }
            let applies = {
                let ctx = ConditionContext {
                    caster: &self.actors[c],
                    target: target.map(|t| &self.actors[t.index()]),
                    dots: &self.dots,
                };
                crate::ability::applies(&hook.when, &ctx)
            };
            if !applies {
                continue;
            }
            match &hook.action {
                HookAction::RefundCost { fraction } => {
                    let amount = round3(paid * fraction);
                    if amount <= 0.0 {
                        continue;
                    }
                    if let Some(pool) = ability.resource.and_then(|kind| self.actors[c].pools.get_mut(kind)) {
                        pool.refund(amount);
                        self.metrics.record_refund(key, amount);
                    }
                }
                HookAction::Refund { resource, amount } => {
                    if let Some(pool) = resource
                        .or(ability.resource)
                        .and_then(|kind| self.actors[c].pools.get_mut(kind))
                    {
                        let gained = pool.gain(*amount);
                        self.metrics.record_refund(key, gained);
                    }
                }
                HookAction::ActivateAura { aura: label, on } => {
                    let subject = self.subject(caster, target, *on)?;
                    let def = registry.aura(label)?;
                    aura::activate(&mut self.actors[subject.index()], def, &mut self.clock)?;
                }
                HookAction::DeactivateAura { aura: label, on } => {
                    let subject = self.subject(caster, target, *on)?;
                    let def = registry.aura(label)?;
                    aura::deactivate(&mut self.actors[subject.index()], def, &mut self.clock);
                }
                HookAction::ApplyDot {
                    dot,
                    fraction_of_damage,
                } => {
                    let target = self.subject(caster, target, Subject::Target)?;
                    let total = fraction_of_damage.map(|f| resolution.damage * f);
                    self.apply_dot(caster, target, dot, total)?;
                }
            }
        }
        Ok(())
    }

    /// Apply periodic effect `label` from `caster` to `target`. With
    /// `total` the snapshot spreads that amount over the ticks; otherwise
    /// it is the effect's own formula against current stats.
    pub fn apply_dot(
        &mut self,
        caster: ActorId,
        target: ActorId,
        label: &str,
        total: Option<f64>,
    ) -> Result<DotApplied> {
        self.actor(caster)?;
        self.actor(target)?;
        let registry = Arc::clone(&self.registry);
        let def = registry.dot(label)?;
        let snapshot = match total {
            Some(total) => DotSnapshot::spread(total, def.tick_count, def.crit_multiplier),
            None => {
                let a = &self.actors[caster.index()];
                let base = def.base_tick_damage + scaling_total(&def.scaling, a);
                DotSnapshot {
                    tick_damage: base * a.stat(Stat::DamageDone) * self.actors[target.index()].stat(Stat::DamageTaken),
                    base_tick_damage: base,
                    crit_multiplier: def.crit_multiplier,
                }
            }
        };
        self.dots
            .apply(&mut self.clock, DotKey::new(label, caster, target), def, snapshot)
    }

    pub(crate) fn dot_tick(&mut self, key: &DotKey, index: u32, fired: EventHandle) -> Result<()> {
        let tick = self.dots.tick(key, index, fired)?;
        let registry = Arc::clone(&self.registry);
        let def = registry.dot(&key.label)?;
        self.actor(key.caster)?;
        self.actor(key.target)?;
        let (c, t) = (key.caster.index(), key.target.index());

        let amount = match def.mode {
            SnapshotMode::Snapshot => tick.snapshot.tick_damage,
            SnapshotMode::Dynamic => {
                tick.snapshot.base_tick_damage
                    * self.actors[c].stat(Stat::DamageDone)
                    * self.actors[t].stat(Stat::DamageTaken)
            }
        };
        let outcome = match def.outcome {
            TickOutcome::AlwaysHit => Outcome::Hit,
            TickOutcome::Roll => {
                let table = self.tables.get(&self.actors[c], &self.actors[t], def.kind);
                table.resolve(self.rng.f64())
            }
        };
        let damage = outcome_damage(outcome, amount, tick.snapshot.crit_multiplier);
        self.metrics
            .record_tick(MetricKey::new(def.ability, key.target), outcome, damage);
        trace!(dot = %key.label, tick = index, last = tick.last, ?outcome, damage, "periodic tick");
        Ok(())
    }
}
