//! Ability registration: the structured description content hands to the
//! kernel, its validation, and the composable pieces (conditions, cast
//! modifiers, damage modifiers, hooks) the cast pipeline runs in order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use crate::actor::{Actor, Stat};
use crate::attack_table::AttackKind;
use crate::aura::{AuraConfig, AuraDef};
use crate::config::seconds;
use crate::cooldown::TimerKey;
use crate::error::{ConfigError, SimError};
use crate::periodic::{DotConfig, DotDef, DotKey, PeriodicEngine};
use crate::resource::ResourceKind;
use crate::simulation::FastRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AbilityId(pub u32);

impl fmt::Display for AbilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ability#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpellSchool {
    #[default]
    Physical,
    Fire,
    Frost,
    Nature,
    Arcane,
    Shadow,
    Holy,
}

/// Which side of the cast a condition or aura action looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    #[default]
    Caster,
    Target,
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Condition {
    AuraActive {
        label: String,
        #[serde(default)]
        on: Subject,
    },
    /// The caster's periodic effect is ticking on the target
    DotActive { label: String },
    Equipped {
        slot: String,
        #[serde(default)]
        item: Option<u32>,
    },
    TalentAtLeast { talent: String, points: u32 },
    Glyph { glyph: String },
    SetBonus { set: String, pieces: u32 },
    ResourceAtLeast { resource: ResourceKind, amount: f64 },
    Not { condition: Box<Condition> },
    All { conditions: Vec<Condition> },
}

/// Read-only view a condition is evaluated against.
pub struct ConditionContext<'a> {
    pub caster: &'a Actor,
    pub target: Option<&'a Actor>,
    pub dots: &'a PeriodicEngine,
}

impl Condition {
    pub fn holds(&self, ctx: &ConditionContext<'_>) -> bool {
        match self {
            Condition::AuraActive { label, on } => match on {
                Subject::Caster => ctx.caster.auras.is_active(label),
                Subject::Target => ctx.target.is_some_and(|t| t.auras.is_active(label)),
            },
            Condition::DotActive { label } => ctx
                .target
                .is_some_and(|t| ctx.dots.is_active(&DotKey::new(label.as_str(), ctx.caster.id, t.id))),
            Condition::Equipped { slot, item } => ctx.caster.loadout.is_equipped(slot, *item),
            Condition::TalentAtLeast { talent, points } => ctx.caster.loadout.talent_points(talent) >= *points,
            Condition::Glyph { glyph } => ctx.caster.loadout.has_glyph(glyph),
            Condition::SetBonus { set, pieces } => ctx.caster.loadout.has_set_bonus(set, *pieces),
            Condition::ResourceAtLeast { resource, amount } => {
                ctx.caster.pools.get(*resource).is_some_and(|p| p.current() >= *amount)
            }
            Condition::Not { condition } => !condition.holds(ctx),
            Condition::All { conditions } => conditions.iter().all(|c| c.holds(ctx)),
        }
    }

    fn visit_refs<'a>(&'a self, out: &mut Vec<(&'static str, &'a str)>) {
        match self {
            Condition::AuraActive { label, .. } => out.push(("aura", label.as_str())),
            Condition::DotActive { label } => out.push(("periodic effect", label.as_str())),
            Condition::Not { condition } => condition.visit_refs(out),
            Condition::All { conditions } => conditions.iter().for_each(|c| c.visit_refs(out)),
            _ => {}
        }
    }
}

/// `None` means unconditional.
pub fn applies(when: &Option<Condition>, ctx: &ConditionContext<'_>) -> bool {
    when.as_ref().map_or(true, |c| c.holds(ctx))
}

// ---------------------------------------------------------------------------
// Cast-start modifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CastEffect {
    ZeroCost,
    InstantCast,
    CostMultiplier { factor: f64 },
    CostReduction { amount: f64 },
    CastTimeReduction { seconds: f64 },
}

/// Evaluated once when a cast starts, in declared order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastModifier {
    #[serde(default)]
    pub when: Option<Condition>,
    pub effect: CastEffect,
    /// Caster aura that loses one stack or charge when this modifier
    /// applies to a committed cast
    #[serde(default)]
    pub consumes: Option<String>,
}

// ---------------------------------------------------------------------------
// Damage formula
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Inclusive upper bound of the stat value; `None` is unbounded
    #[serde(default)]
    pub up_to: Option<f64>,
    #[serde(default)]
    pub slope: f64,
    #[serde(default)]
    pub intercept: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "term", rename_all = "snake_case")]
pub enum ScalingTerm {
    Flat { amount: f64 },
    Coefficient { stat: Stat, coefficient: f64 },
    /// Piecewise linear in one stat; the first segment whose bound covers
    /// the value wins
    Piecewise { stat: Stat, segments: Vec<Segment> },
}

impl ScalingTerm {
    pub fn value(&self, caster: &Actor) -> f64 {
        match self {
            ScalingTerm::Flat { amount } => *amount,
            ScalingTerm::Coefficient { stat, coefficient } => caster.stat(*stat) * coefficient,
            ScalingTerm::Piecewise { stat, segments } => {
                let x = caster.stat(*stat);
                segments
                    .iter()
                    .find(|s| s.up_to.map_or(true, |bound| x <= bound))
                    .map_or(0.0, |s| s.slope * x + s.intercept)
            }
        }
    }
}

pub fn scaling_total(terms: &[ScalingTerm], caster: &Actor) -> f64 {
    terms.iter().map(|t| t.value(caster)).sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModifierEffect {
    Multiplier { factor: f64 },
    FlatBonus { amount: f64 },
    BonusHit { chance: f64 },
    BonusCrit { chance: f64 },
    CritMultiplierBonus { amount: f64 },
    /// A landed, non-crit outcome is promoted to a crit
    CritOnHit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageModifier {
    #[serde(default)]
    pub when: Option<Condition>,
    pub effect: ModifierEffect,
}

fn default_spell() -> AttackKind {
    AttackKind::Spell
}

fn default_crit_multiplier() -> f64 {
    1.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageEffect {
    #[serde(default = "default_spell")]
    pub kind: AttackKind,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
    #[serde(default)]
    pub scaling: Vec<ScalingTerm>,
    #[serde(default = "default_crit_multiplier")]
    pub crit_multiplier: f64,
    #[serde(default)]
    pub modifiers: Vec<DamageModifier>,
}

impl DamageEffect {
    /// Base roll plus scaling. Equal bounds take no draw.
    pub fn base_damage(&self, caster: &Actor, rng: &mut FastRng) -> f64 {
        let roll = if self.max > self.min {
            rng.range_f64(self.min, self.max)
        } else {
            self.min
        };
        roll + scaling_total(&self.scaling, caster)
    }
}

/// Folded result of the damage modifiers that applied to one resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModifierTotals {
    pub multiplier: f64,
    pub flat_bonus: f64,
    pub bonus_hit: f64,
    pub bonus_crit: f64,
    pub crit_multiplier_bonus: f64,
    pub crit_on_hit: bool,
}

impl Default for ModifierTotals {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            flat_bonus: 0.0,
            bonus_hit: 0.0,
            bonus_crit: 0.0,
            crit_multiplier_bonus: 0.0,
            crit_on_hit: false,
        }
    }
}

impl ModifierTotals {
    pub fn fold(modifiers: &[DamageModifier], ctx: &ConditionContext<'_>) -> Self {
        let mut totals = Self::default();
        for m in modifiers.iter().filter(|m| applies(&m.when, ctx)) {
            match m.effect {
                ModifierEffect::Multiplier { factor } => totals.multiplier *= factor,
                ModifierEffect::FlatBonus { amount } => totals.flat_bonus += amount,
                ModifierEffect::BonusHit { chance } => totals.bonus_hit += chance,
                ModifierEffect::BonusCrit { chance } => totals.bonus_crit += chance,
                ModifierEffect::CritMultiplierBonus { amount } => totals.crit_multiplier_bonus += amount,
                ModifierEffect::CritOnHit => totals.crit_on_hit = true,
            }
        }
        totals
    }
}

// ---------------------------------------------------------------------------
// Effects and hooks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    DirectDamage(DamageEffect),
    ApplyDot {
        dot: String,
    },
    ApplyAura {
        aura: String,
        #[serde(default)]
        on: Subject,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Landed without critting
    Hit,
    Crit,
    Miss,
    /// Any landed outcome
    Landed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HookAction {
    /// Give back a fraction of the cost actually paid for this cast
    RefundCost { fraction: f64 },
    Refund {
        #[serde(default)]
        resource: Option<ResourceKind>,
        amount: f64,
    },
    ActivateAura {
        aura: String,
        #[serde(default)]
        on: Subject,
    },
    DeactivateAura {
        aura: String,
        #[serde(default)]
        on: Subject,
    },
    /// Apply a periodic effect. With `fraction_of_damage` the snapshot is
    /// that share of the triggering damage, spread over the ticks;
    /// otherwise the effect's own formula is used.
    ApplyDot {
        dot: String,
        #[serde(default)]
        fraction_of_damage: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    pub on: Trigger,
    #[serde(default)]
    pub when: Option<Condition>,
    pub action: HookAction,
}

// ---------------------------------------------------------------------------
// Ability configuration and validated form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTiming {
    #[default]
    OnCast,
    /// Paid when the cast completes, before the outcome roll
    OnLand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownTiming {
    #[default]
    Start,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptPolicy {
    /// Refund the paid cost and reset any started cooldown
    #[default]
    Rollback,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownConfig {
    pub duration: f64,
    #[serde(default)]
    pub shared_timer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityConfig {
    pub id: AbilityId,
    pub name: String,
    #[serde(default)]
    pub school: SpellSchool,
    #[serde(default)]
    pub resource: Option<ResourceKind>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub cast_time: f64,
    #[serde(default)]
    pub gcd: f64,
    #[serde(default)]
    pub ignore_haste: bool,
    #[serde(default)]
    pub cooldown: Option<CooldownConfig>,
    #[serde(default)]
    pub cost_timing: CostTiming,
    #[serde(default)]
    pub cooldown_timing: CooldownTiming,
    #[serde(default)]
    pub interrupt: InterruptPolicy,
    #[serde(default)]
    pub gates: Vec<Condition>,
    #[serde(default)]
    pub cast_modifiers: Vec<CastModifier>,
    pub effects: Vec<Effect>,
    #[serde(default)]
    pub hooks: Vec<Hook>,
}

/// Validated, immutable ability. Shared read-only across trials.
#[derive(Debug, Clone, PartialEq)]
pub struct Ability {
    pub id: AbilityId,
    pub name: String,
    pub school: SpellSchool,
    pub resource: Option<ResourceKind>,
    pub cost: f64,
    pub cast_time: Duration,
    pub gcd: Duration,
    pub ignore_haste: bool,
    pub cooldown: Option<Duration>,
    pub cooldown_key: TimerKey,
    pub cost_timing: CostTiming,
    pub cooldown_timing: CooldownTiming,
    pub interrupt: InterruptPolicy,
    pub gates: Vec<Condition>,
    pub cast_modifiers: Vec<CastModifier>,
    pub effects: Vec<Effect>,
    pub hooks: Vec<Hook>,
}

fn finite_non_negative(owner: &str, field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(owner, field, format!("{value} must be a finite value >= 0")))
    }
}

impl Ability {
    pub fn from_config(config: &AbilityConfig) -> Result<Self, ConfigError> {
        let owner = format!("ability '{}' ({})", config.name, config.id);
        finite_non_negative(&owner, "cost", config.cost)?;
        if config.cost > 0.0 && config.resource.is_none() {
            return Err(ConfigError::invalid(owner, "resource", "a cost needs a resource kind"));
        }
        if config.effects.is_empty() {
            return Err(ConfigError::invalid(owner, "effects", "at least one effect is required"));
        }
        let cast_time = seconds(&owner, "cast_time", config.cast_time)?;
        let gcd = seconds(&owner, "gcd", config.gcd)?;
        let cooldown = config
            .cooldown
            .as_ref()
            .map(|c| seconds(&owner, "cooldown", c.duration))
            .transpose()?;
        let cooldown_key = match config.cooldown.as_ref().and_then(|c| c.shared_timer.clone()) {
            Some(shared) => TimerKey::Shared(shared),
            None => TimerKey::Ability(config.id),
        };

        for effect in &config.effects {
            if let Effect::DirectDamage(dmg) = effect {
                finite_non_negative(&owner, "min", dmg.min)?;
                finite_non_negative(&owner, "crit_multiplier", dmg.crit_multiplier)?;
                if dmg.max < dmg.min || !dmg.max.is_finite() {
                    return Err(ConfigError::invalid(owner, "max", "must be >= min"));
                }
            }
        }
        for modifier in &config.cast_modifiers {
            match modifier.effect {
                CastEffect::CostMultiplier { factor } => finite_non_negative(&owner, "factor", factor)?,
                CastEffect::CostReduction { amount } => finite_non_negative(&owner, "amount", amount)?,
                CastEffect::CastTimeReduction { seconds } => finite_non_negative(&owner, "seconds", seconds)?,
                CastEffect::ZeroCost | CastEffect::InstantCast => {}
            }
        }
        for hook in &config.hooks {
            match hook.action {
                HookAction::RefundCost { fraction } => finite_non_negative(&owner, "fraction", fraction)?,
                HookAction::Refund { amount, .. } => finite_non_negative(&owner, "amount", amount)?,
                HookAction::ApplyDot {
                    fraction_of_damage: Some(fraction),
                    ..
                } => finite_non_negative(&owner, "fraction_of_damage", fraction)?,
                _ => {}
            }
        }

        Ok(Self {
            id: config.id,
            name: config.name.clone(),
            school: config.school,
            resource: config.resource,
            cost: config.cost,
            cast_time,
            gcd,
            ignore_haste: config.ignore_haste,
            cooldown,
            cooldown_key,
            cost_timing: config.cost_timing,
            cooldown_timing: config.cooldown_timing,
            interrupt: config.interrupt,
            gates: config.gates.clone(),
            cast_modifiers: config.cast_modifiers.clone(),
            effects: config.effects.clone(),
            hooks: config.hooks.clone(),
        })
    }

    /// Whether anything the ability does lands on a target.
    pub fn needs_target(&self) -> bool {
        let effect_needs = self.effects.iter().any(|e| match e {
            Effect::DirectDamage(_) | Effect::ApplyDot { .. } => true,
            Effect::ApplyAura { on, .. } => *on == Subject::Target,
        });
        let hook_needs = self.hooks.iter().any(|h| match &h.action {
            HookAction::ApplyDot { .. } => true,
            HookAction::ActivateAura { on, .. } | HookAction::DeactivateAura { on, .. } => *on == Subject::Target,
            HookAction::RefundCost { .. } | HookAction::Refund { .. } => false,
        });
        effect_needs || hook_needs
    }

    /// Every aura / periodic-effect label this ability refers to.
    fn references(&self) -> Vec<(&'static str, &str)> {
        let mut refs = Vec::new();
        for gate in &self.gates {
            gate.visit_refs(&mut refs);
        }
        for m in &self.cast_modifiers {
            if let Some(c) = &m.when {
                c.visit_refs(&mut refs);
            }
            if let Some(label) = &m.consumes {
                refs.push(("aura", label.as_str()));
            }
        }
        for effect in &self.effects {
            match effect {
                Effect::DirectDamage(dmg) => {
                    for m in &dmg.modifiers {
                        if let Some(c) = &m.when {
                            c.visit_refs(&mut refs);
                        }
                    }
                }
                Effect::ApplyDot { dot } => refs.push(("periodic effect", dot.as_str())),
                Effect::ApplyAura { aura, .. } => refs.push(("aura", aura.as_str())),
            }
        }
        for hook in &self.hooks {
            if let Some(c) = &hook.when {
                c.visit_refs(&mut refs);
            }
            match &hook.action {
                HookAction::ActivateAura { aura, .. } | HookAction::DeactivateAura { aura, .. } => {
                    refs.push(("aura", aura.as_str()))
                }
                HookAction::ApplyDot { dot, .. } => refs.push(("periodic effect", dot.as_str())),
                HookAction::RefundCost { .. } | HookAction::Refund { .. } => {}
            }
        }
        refs
    }
}

/// Everything registered for a scenario. Built once, then shared
/// read-only (behind an `Arc`) by every trial.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    abilities: BTreeMap<AbilityId, Ability>,
    auras: HashMap<String, AuraDef>,
    dots: HashMap<String, DotDef>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_aura(&mut self, config: &AuraConfig) -> Result<(), ConfigError> {
        let def = AuraDef::from_config(config)?;
        if self.auras.contains_key(&def.label) {
            return Err(ConfigError::Duplicate {
                kind: "aura",
                name: def.label,
            });
        }
        self.auras.insert(def.label.clone(), def);
        Ok(())
    }

    pub fn register_dot(&mut self, config: &DotConfig) -> Result<(), ConfigError> {
        let def = DotDef::from_config(config)?;
        if self.dots.contains_key(&def.label) {
            return Err(ConfigError::Duplicate {
                kind: "periodic effect",
                name: def.label,
            });
        }
        self.dots.insert(def.label.clone(), def);
        Ok(())
    }

    /// Validate and register an ability. Auras and periodic effects it
    /// refers to must already be registered.
    pub fn register_ability(&mut self, config: &AbilityConfig) -> Result<(), ConfigError> {
        let ability = Ability::from_config(config)?;
        if self.abilities.contains_key(&ability.id) {
            return Err(ConfigError::Duplicate {
                kind: "ability",
                name: ability.id.to_string(),
            });
        }
        for (kind, name) in ability.references() {
            let known = match kind {
                "aura" => self.auras.contains_key(name),
                _ => self.dots.contains_key(name),
            };
            if !known {
                return Err(ConfigError::unknown(
                    format!("ability '{}'", ability.name),
                    kind,
                    name,
                ));
            }
        }
        self.abilities.insert(ability.id, ability);
        Ok(())
    }

    pub fn ability(&self, id: AbilityId) -> Result<&Ability, SimError> {
        self.abilities.get(&id).ok_or(SimError::UnknownAbility(id))
    }

    pub fn aura(&self, label: &str) -> Result<&AuraDef, SimError> {
        self.auras.get(label).ok_or_else(|| SimError::UnknownDefinition {
            kind: "aura",
            name: label.to_string(),
        })
    }

    pub fn dot(&self, label: &str) -> Result<&DotDef, SimError> {
        self.dots.get(label).ok_or_else(|| SimError::UnknownDefinition {
            kind: "periodic effect",
            name: label.to_string(),
        })
    }

    pub fn has_ability(&self, id: AbilityId) -> bool {
        self.abilities.contains_key(&id)
    }

    pub fn abilities(&self) -> impl Iterator<Item = &Ability> {
        self.abilities.values()
    }

    /// Name lookup for reports.
    pub fn ability_name(&self, id: AbilityId) -> Option<&str> {
        self.abilities.get(&id).map(|a| a.name.as_str())
    }
}
